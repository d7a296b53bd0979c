//! The build layer (§4.4): one interpreter build for a `(commit, features)`
//! pair. `configure` and `make` are each idempotent against the on-disk
//! build directory, so a fresh process re-discovers prior work (§3 invariant 3).

use std::path::PathBuf;

use abicheck_git::Repo;
use abicheck_process::{ProcessRunner, RunSpec};
use abicheck_types::{CompileOption, Feature, Version};
use tokio::sync::OnceCell;

use crate::error::EngineError;
use abicheck_types::DslOutcome;

/// A Build's cache-path tag: the commit name, plus `~` and the feature tags
/// (sorted) when any features are present.
pub fn compute_tag(commit_name: &str, features: &[Feature]) -> String {
    if features.is_empty() {
        return commit_name.to_string();
    }
    let mut tags: Vec<char> = features.iter().map(|f| f.tag).collect();
    tags.sort_unstable();
    let tag_str: String = tags.into_iter().collect();
    format!("{commit_name}~{tag_str}")
}

pub struct Build {
    pub commit_name: String,
    pub commit_hash: String,
    pub features: Vec<Feature>,
    pub tag: String,
    pub build_dir: PathBuf,
    version: OnceCell<Version>,
    compiler: OnceCell<String>,
    cflags: OnceCell<Vec<String>>,
}

impl Build {
    pub fn new(commit_name: impl Into<String>, commit_hash: impl Into<String>, mut features: Vec<Feature>, cache_dir: &std::path::Path) -> Self {
        features.sort_by_key(|f| f.tag);
        let commit_name = commit_name.into();
        let commit_hash = commit_hash.into();
        let tag = compute_tag(&commit_name, &features);
        let build_dir = cache_dir.join(format!("build-{tag}-{commit_hash}"));
        Self {
            commit_name,
            commit_hash,
            features,
            tag,
            build_dir,
            version: OnceCell::new(),
            compiler: OnceCell::new(),
            cflags: OnceCell::new(),
        }
    }

    pub fn exe_path(&self) -> PathBuf {
        self.build_dir.join("python")
    }

    fn config_log_path(&self) -> PathBuf {
        self.build_dir.join("_config.log")
    }

    fn make_log_path(&self) -> PathBuf {
        self.build_dir.join("make.log")
    }

    fn pythoninfo_path(&self) -> PathBuf {
        self.build_dir.join("pythoninfo")
    }

    pub fn get_config_log_path(&self) -> PathBuf {
        self.config_log_path()
    }

    pub fn get_make_log_path(&self) -> PathBuf {
        self.make_log_path()
    }

    pub fn get_pythoninfo_path(&self) -> PathBuf {
        self.pythoninfo_path()
    }

    /// Idempotent: a `Makefile` already present means configure already ran.
    pub async fn configure(&self, repo: &Repo, process: &ProcessRunner) -> Result<DslOutcome, EngineError> {
        if self.build_dir.join("Makefile").exists() {
            return Ok(DslOutcome::Normal);
        }

        let commit_version = if abicheck_git::is_zero_hash(&self.commit_hash) {
            None
        } else {
            Some(repo.commit_version(&self.commit_hash).await?)
        };

        for feature in &self.features {
            if !feature.compatible_with(commit_version) {
                return Ok(DslOutcome::SkipBuild(format!(
                    "feature {:?} is not defined for commit {}",
                    feature.tag, self.commit_name
                )));
            }
        }

        let worktree = repo.worktree(&self.commit_hash).await?;
        std::fs::create_dir_all(&self.build_dir).map_err(|source| EngineError::Io {
            path: self.build_dir.clone(),
            source,
        })?;

        let mut args: Vec<String> = Vec::new();
        for feature in &self.features {
            args.extend(feature.config_options.iter().map(|s| s.to_string()));
        }

        let configure_script = worktree.join("configure").display().to_string();
        process
            .run(
                RunSpec::new(configure_script, &args)
                    .cwd(&self.build_dir)
                    .log_to(self.config_log_path()),
            )
            .await?;

        Ok(DslOutcome::Normal)
    }

    /// Idempotent: a `python` executable already present means make already ran.
    pub async fn make(&self, repo: &Repo, process: &ProcessRunner, jobs: usize) -> Result<DslOutcome, EngineError> {
        if self.exe_path().exists() {
            return Ok(DslOutcome::Normal);
        }

        let outcome = self.configure(repo, process).await?;
        if outcome.is_skip() {
            return Ok(outcome);
        }

        process
            .run(
                RunSpec::new("make", &[format!("-j{}", jobs.max(2))])
                    .cwd(&self.build_dir)
                    .log_to(self.make_log_path()),
            )
            .await?;

        let version = self.version(process).await?;
        if version > Version::of(3, 7) {
            let _ = process
                .run(
                    RunSpec::new("make", &["pythoninfo".to_string()])
                        .cwd(&self.build_dir)
                        .log_to(self.pythoninfo_path())
                        .check(false),
                )
                .await?;
        }

        Ok(DslOutcome::Normal)
    }

    /// `sysconfig.get_config_var('CC')` under the built interpreter. Cached.
    pub async fn compiler(&self, process: &ProcessRunner) -> Result<String, EngineError> {
        if let Some(cc) = self.compiler.get() {
            return Ok(cc.clone());
        }
        let out = process
            .run(RunSpec::new(
                self.exe_path().display().to_string(),
                &["-c".to_string(), "import sysconfig; print(sysconfig.get_config_var('CC'))".to_string()],
            ))
            .await?;
        let cc = out.stdout_string().trim().to_string();
        let _ = self.compiler.set(cc.clone());
        Ok(cc)
    }

    /// POSIX-shell-word-tokenized `python-config.py --cflags --ldflags`. Cached.
    pub async fn cflags(&self, process: &ProcessRunner) -> Result<Vec<String>, EngineError> {
        if let Some(flags) = self.cflags.get() {
            return Ok(flags.clone());
        }
        let python_config = self.build_dir.join("python-config.py").display().to_string();
        let out = process
            .run(RunSpec::new(python_config, &["--cflags".to_string(), "--ldflags".to_string()]))
            .await?;
        let flags = shell_words::split(out.stdout_string().trim()).map_err(|e| EngineError::ProbeUnparseable {
            what: "python-config.py --cflags --ldflags",
            subject: self.tag.clone(),
            detail: e.to_string(),
        })?;
        let _ = self.cflags.set(flags.clone());
        Ok(flags)
    }

    /// `print(sys.hexversion)` under the built interpreter, parsed as a
    /// decimal integer then decoded as a packed hexversion. Cached.
    pub async fn version(&self, process: &ProcessRunner) -> Result<Version, EngineError> {
        if let Some(v) = self.version.get() {
            return Ok(*v);
        }
        let out = process
            .run(RunSpec::new(
                self.exe_path().display().to_string(),
                &["-c".to_string(), "print(sys.hexversion)".to_string()],
            ))
            .await?;
        let text = out.stdout_string();
        let trimmed = text.trim();
        let hex: u32 = trimmed.parse().map_err(|_| EngineError::ProbeUnparseable {
            what: "sys.hexversion",
            subject: self.tag.clone(),
            detail: trimmed.to_string(),
        })?;
        let version = Version::from_hex(hex);
        let _ = self.version.set(version);
        Ok(version)
    }
}

/// For a commit whose version is `3.m`: `[unrestricted, sentinel-3,
/// limited-3.9, limited-3.10, … limited-3.m]` (§4.4).
pub fn possible_compile_options(version: Version) -> Vec<CompileOption> {
    let mut opts = vec![CompileOption::UNRESTRICTED, CompileOption::limited_sentinel()];
    let mut minor = 9;
    while minor <= version.minor {
        opts.push(CompileOption::limited_at(3, minor));
        minor += 1;
    }
    opts
}
