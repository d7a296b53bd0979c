//! The source-control layer (§4.3): a bare clone used as the worktree
//! upstream, tag enumeration and latest-per-minor selection against the
//! caller-supplied source checkout, commit-hash resolution, worktree
//! materialization with retry-on-contention, and README-derived version
//! detection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use abicheck_process::{ProcessError, ProcessRunner, RunSpec};
use abicheck_retry::BackoffPolicy;
use abicheck_types::Version;
use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::commit::{is_zero_hash, Commit, ZERO_HASH};

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("README lookup failed for commit {commit}: neither README.rst nor README exists")]
    ReadmeMissing { commit: String },
    #[error("could not find a \"This is Python version\" line in the README for {commit}")]
    VersionLineMissing { commit: String },
    #[error("malformed version {version:?} in README for {commit}")]
    MalformedVersion { commit: String, version: String },
    #[error("worktree creation for {commit} failed after {attempts} attempts")]
    WorktreeContention { commit: String, attempts: u32 },
}

/// The source-control root: a caller-supplied checkout (`source_dir`) plus a
/// cache directory holding the bare clone and per-commit worktrees.
pub struct Repo {
    pub source_dir: PathBuf,
    pub cache_dir: PathBuf,
    process: ProcessRunner,
    bare_clone: OnceCell<PathBuf>,
    hashes: DashMap<String, Arc<OnceCell<String>>>,
    versions: DashMap<String, Arc<OnceCell<Version>>>,
    worktrees: DashMap<String, Arc<OnceCell<PathBuf>>>,
}

impl Repo {
    pub fn new(source_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>, process: ProcessRunner) -> Self {
        Self {
            source_dir: source_dir.into(),
            cache_dir: cache_dir.into(),
            process,
            bare_clone: OnceCell::new(),
            hashes: DashMap::new(),
            versions: DashMap::new(),
            worktrees: DashMap::new(),
        }
    }

    pub fn bare_clone_dir(&self) -> PathBuf {
        self.cache_dir.join("cpython.git")
    }

    /// Clone `--bare` once, or fetch if the bare clone already exists.
    /// Memoized for the lifetime of this `Repo` (§4.1/§4.3).
    pub async fn ensure_bare_clone(&self) -> Result<&Path, GitError> {
        let dir = self
            .bare_clone
            .get_or_try_init(|| async {
                let dir = self.bare_clone_dir();
                if dir.exists() {
                    self.process
                        .run(RunSpec::new("git", &["fetch"]).cwd(&dir))
                        .await?;
                } else {
                    if let Some(parent) = dir.parent() {
                        std::fs::create_dir_all(parent).ok();
                    }
                    self.process
                        .run(RunSpec::new(
                            "git",
                            &[
                                "clone".to_string(),
                                "--bare".to_string(),
                                self.source_dir.display().to_string(),
                                dir.display().to_string(),
                            ],
                        ))
                        .await?;
                }
                Ok::<PathBuf, GitError>(dir)
            })
            .await?;
        Ok(dir.as_path())
    }

    /// `git tag` against the source checkout.
    pub async fn list_tags(&self) -> Result<Vec<Commit>, GitError> {
        let out = self
            .process
            .run(RunSpec::new("git", &["tag"]).cwd(&self.source_dir))
            .await?;
        Ok(out
            .stdout_string()
            .lines()
            .map(|l| Commit::new(l.trim()))
            .filter(|c| !c.name.is_empty())
            .collect())
    }

    /// Of the tags matching `v3.*`, group by `(major, minor)` and keep the
    /// highest version per group, preferring a final release over a
    /// pre-release when both exist. Groups are returned sorted by version.
    pub fn latest_per_minor(tags: &[Commit]) -> Vec<Commit> {
        use std::collections::BTreeMap;

        let mut best: BTreeMap<(u32, u32), (Commit, Version)> = BTreeMap::new();

        for tag in tags {
            if !tag.name.starts_with("v3.") {
                continue;
            }
            let stripped = &tag.name[1..];
            let Ok(version) = Version::parse(stripped) else {
                continue;
            };
            let key = (version.major, version.minor);
            let rank = |v: &Version| (u8::from(!v.is_prerelease()), *v);

            match best.get(&key) {
                Some((_, existing)) if rank(existing) >= rank(&version) => {}
                _ => {
                    best.insert(key, (tag.clone(), version));
                }
            }
        }

        let mut entries: Vec<_> = best.into_values().collect();
        entries.sort_by_key(|(_, v)| *v);
        entries.into_iter().map(|(c, _)| c).collect()
    }

    /// `git rev-parse <name>`, `check=false`; unknown ref yields the
    /// zero-hash sentinel. Memoized per commit name.
    pub async fn commit_hash(&self, name: &str) -> Result<String, GitError> {
        let cell = self
            .hashes
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_try_init(|| async {
            let out = self
                .process
                .run(
                    RunSpec::new("git", &["rev-parse".to_string(), name.to_string()])
                        .cwd(&self.source_dir)
                        .check(false),
                )
                .await?;
            if out.exit_code == 128 {
                Ok::<String, GitError>(ZERO_HASH.to_string())
            } else {
                Ok(out.stdout_string().trim().to_string())
            }
        })
        .await
        .map(|s| s.clone())
    }

    /// README-derived version for a commit hash. A zero-hash commit is
    /// version zero without touching git.
    pub async fn commit_version(&self, hash: &str) -> Result<Version, GitError> {
        if is_zero_hash(hash) {
            return Ok(Version::zero());
        }

        let cell = self
            .versions
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_try_init(|| async { self.detect_version(hash).await })
            .await
            .map(|v| *v)
    }

    async fn detect_version(&self, hash: &str) -> Result<Version, GitError> {
        let readme_line = self.read_first_line(hash, "README.rst").await;
        let readme_line = match readme_line {
            Ok(line) => line,
            Err(_) => self.read_first_line(hash, "README").await.map_err(|_| {
                GitError::ReadmeMissing {
                    commit: hash.to_string(),
                }
            })?,
        };

        let captured = extract_version_token(&readme_line).ok_or_else(|| GitError::VersionLineMissing {
            commit: hash.to_string(),
        })?;

        Version::parse(&captured).map_err(|_| GitError::MalformedVersion {
            commit: hash.to_string(),
            version: captured,
        })
    }

    async fn read_first_line(&self, hash: &str, filename: &str) -> Result<String, GitError> {
        let out = self
            .process
            .run(
                RunSpec::new("git", &["show".to_string(), format!("{hash}:{filename}")])
                    .cwd(&self.source_dir)
                    .check(true),
            )
            .await?;
        Ok(out.stdout_string().lines().next().unwrap_or_default().to_string())
    }

    pub fn worktree_dir(&self, hash: &str) -> PathBuf {
        self.cache_dir.join(format!("cpython_{hash}"))
    }

    /// `git worktree add --detach --checkout`, retried with exponential
    /// backoff on the index-lock contention exit code 128 (§4.3). Memoized
    /// per commit hash so concurrent callers share one attempt (§8 scenario 6).
    pub async fn worktree(&self, hash: &str) -> Result<PathBuf, GitError> {
        let cell = self
            .worktrees
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_try_init(|| async { self.materialize_worktree(hash).await })
            .await
            .map(|p| p.clone())
    }

    async fn materialize_worktree(&self, hash: &str) -> Result<PathBuf, GitError> {
        let dir = self.worktree_dir(hash);
        if dir.exists() {
            return Ok(dir);
        }

        self.ensure_bare_clone().await?;
        let bare = self.bare_clone_dir();

        let policy = BackoffPolicy::WORKTREE;
        let mut attempt = 1;
        loop {
            let out = self
                .process
                .run(
                    RunSpec::new(
                        "git",
                        &[
                            "worktree".to_string(),
                            "add".to_string(),
                            "--detach".to_string(),
                            "--checkout".to_string(),
                            dir.display().to_string(),
                            hash.to_string(),
                        ],
                    )
                    .cwd(&bare)
                    .check(false),
                )
                .await?;

            if out.exit_code == 0 {
                return Ok(dir);
            }
            if out.exit_code != 128 || !policy.should_retry(attempt) {
                return Err(GitError::WorktreeContention {
                    commit: hash.to_string(),
                    attempts: attempt,
                });
            }

            tokio::time::sleep(policy.delay_for(attempt)).await;
            attempt += 1;
        }
    }
}

/// Extract the `[\.\da-z]+` token following "This is Python version ".
fn extract_version_token(line: &str) -> Option<String> {
    const PREFIX: &str = "This is Python version ";
    let rest = line.strip_prefix(PREFIX)?;
    let token: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || c.is_ascii_lowercase())
        .collect();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_version() {
        assert_eq!(
            extract_version_token("This is Python version 3.13.0"),
            Some("3.13.0".to_string())
        );
    }

    #[test]
    fn extracts_prerelease_version() {
        assert_eq!(
            extract_version_token("This is Python version 3.13.0rc1, more words follow"),
            Some("3.13.0rc1".to_string())
        );
    }

    #[test]
    fn non_matching_line_is_none() {
        assert_eq!(extract_version_token("Welcome to Python!"), None);
    }

    #[test]
    fn latest_per_minor_prefers_final_over_prerelease() {
        let tags = vec![
            Commit::new("v3.13.0"),
            Commit::new("v3.13.0rc1"),
            Commit::new("v3.12.0"),
            Commit::new("v2.7.18"),
        ];
        let latest = Repo::latest_per_minor(&tags);
        let names: Vec<_> = latest.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["v3.12.0", "v3.13.0"]);
    }

    #[test]
    fn latest_per_minor_falls_back_to_prerelease_if_no_final() {
        let tags = vec![Commit::new("v3.14.0b2"), Commit::new("v3.14.0a1")];
        let latest = Repo::latest_per_minor(&tags);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].name, "v3.14.0b2");
    }

    #[test]
    fn is_zero_hash_detects_sentinel() {
        assert!(is_zero_hash(ZERO_HASH));
        assert!(!is_zero_hash("abc123"));
    }

    #[tokio::test]
    async fn commit_version_of_zero_hash_is_zero() {
        let repo = Repo::new("/nonexistent", "/nonexistent-cache", ProcessRunner::with_capacity(2));
        let version = repo.commit_version(ZERO_HASH).await.unwrap();
        assert!(version.is_zero());
    }

    #[tokio::test]
    async fn commit_hash_of_unknown_ref_is_zero_hash() {
        let td = tempfile::tempdir().unwrap();
        std::process::Command::new("git")
            .args(["init"])
            .current_dir(td.path())
            .output()
            .expect("git init");
        std::process::Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(td.path())
            .output()
            .unwrap();
        std::process::Command::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(td.path())
            .output()
            .unwrap();
        std::process::Command::new("git")
            .args(["commit", "--allow-empty", "-m", "init"])
            .current_dir(td.path())
            .output()
            .unwrap();

        let repo = Repo::new(td.path(), td.path().join(".cache"), ProcessRunner::with_capacity(2));
        let hash = repo.commit_hash("refs/heads/does-not-exist").await.unwrap();
        assert_eq!(hash, ZERO_HASH);
    }
}
