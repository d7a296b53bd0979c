//! The report aggregator (§4.8): commit selection, build expansion, the
//! Cartesian run expansion, and matrix formatting.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use abicheck_events::{events_path, Event, EventKind, EventLog};
use abicheck_git::{Commit, Repo};
use abicheck_process::ProcessRunner;
use abicheck_types::{all_features, CompileOption, DslOutcome, RunResult, Version};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::build::{compute_tag, possible_compile_options, Build};
use crate::case::Case;
use crate::caserun::{classify, limited_api_skip, CaseRun};
use crate::dsl::Env;
use crate::error::EngineError;
use crate::memo::TaskRegistry;
use crate::reporter::Reporter;
use crate::testmodule::TestModule;

/// The minimum commit version a build is constructed for at all (§4.8).
const MIN_BUILD_VERSION: (u32, u32) = (3, 5);
/// The minimum commit version a build can *compile* extensions under (§4.8).
const MIN_COMPILE_VERSION: (u32, u32) = (3, 9);

pub struct Report {
    repo: Arc<Repo>,
    process: Arc<ProcessRunner>,
    cache_dir: PathBuf,
    jobs: usize,
    pub cases: Vec<Arc<Case>>,
    explicit_commits: Option<Vec<String>>,

    builds: DashMap<String, Arc<Build>>,
    configure_tasks: TaskRegistry<String, DslOutcome>,
    make_tasks: TaskRegistry<String, DslOutcome>,
    compile_tasks: TaskRegistry<String, RunResult>,
    /// `(real_outcome, classified)` so the caller can log `ExecFinished`
    /// against the raw process outcome, separately from the classified result.
    run_tasks: TaskRegistry<String, (RunResult, RunResult)>,
    events: Mutex<EventLog>,
}

/// One row of the printed matrix: a case, a compile-build, a compile-option,
/// and the classified result for every exec-build, in order.
pub struct MatrixRow {
    pub case: String,
    pub compile_build_tag: String,
    pub compile_option_tag: String,
    pub results: Vec<(String, RunResult)>,
}

impl Report {
    pub fn new(
        source_dir: PathBuf,
        cache_dir: PathBuf,
        case_dir: PathBuf,
        explicit_commits: Option<Vec<String>>,
        jobs: Option<usize>,
    ) -> Result<Self, EngineError> {
        let jobs = jobs.unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));
        let process = Arc::new(ProcessRunner::with_capacity(jobs.max(2)));
        let repo = Arc::new(Repo::new(source_dir, cache_dir.clone(), (*process).clone()));

        let mut cases = Vec::new();
        if case_dir.is_dir() {
            let mut entries: Vec<_> = std::fs::read_dir(&case_dir)
                .map_err(|source| EngineError::Io {
                    path: case_dir.clone(),
                    source,
                })?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            entries.sort();
            for dir in entries {
                cases.push(Arc::new(Case::load(&dir)?));
            }
        }

        Ok(Self {
            repo,
            process,
            cache_dir,
            jobs,
            cases,
            explicit_commits,
            builds: DashMap::new(),
            configure_tasks: TaskRegistry::new(),
            make_tasks: TaskRegistry::new(),
            compile_tasks: TaskRegistry::new(),
            run_tasks: TaskRegistry::new(),
            events: Mutex::new(EventLog::new()),
        })
    }

    async fn log_event(&self, subject: &str, kind: EventKind) {
        let mut log = self.events.lock().await;
        log.record(Event::new(subject, kind));
        let _ = log.flush_to_file(&events_path(&self.cache_dir));
    }

    /// The `v3.*` tags to build, in version order: either the explicit
    /// `commits` override, or the latest-per-minor selection (§4.3).
    pub async fn select_commits(&self) -> Result<Vec<Commit>, EngineError> {
        if let Some(names) = &self.explicit_commits {
            return Ok(names.iter().map(|n| Commit::new(n.as_str())).collect());
        }
        let tags = self.repo.list_tags().await?;
        Ok(Repo::latest_per_minor(&tags))
    }

    fn get_or_create_build(&self, commit_name: &str, commit_hash: &str, features: Vec<abicheck_types::Feature>) -> Arc<Build> {
        let tag = compute_tag(commit_name, &features);
        if let Some(existing) = self.builds.get(&tag) {
            return existing.clone();
        }
        let build = Arc::new(Build::new(commit_name, commit_hash, features, &self.cache_dir));
        self.builds.entry(tag).or_insert(build).clone()
    }

    /// For each commit `>= 3.5`, a no-feature build plus one build per
    /// feature compatible with that commit, deduplicated by tag (§4.8).
    pub async fn expand_builds(&self, commits: &[Commit]) -> Result<Vec<Arc<Build>>, EngineError> {
        let mut builds = Vec::new();
        for commit in commits {
            let hash = self.repo.commit_hash(&commit.name).await?;
            let version = self.repo.commit_version(&hash).await?;
            if version < Version::of(MIN_BUILD_VERSION.0, MIN_BUILD_VERSION.1) {
                continue;
            }

            builds.push(self.get_or_create_build(&commit.name, &hash, vec![]));

            for feature in all_features() {
                if feature.compatible_with(Some(version)) {
                    builds.push(self.get_or_create_build(&commit.name, &hash, vec![feature]));
                }
            }
        }
        Ok(builds)
    }

    /// Builds whose commit version is `>= 3.9`; only these can compile
    /// extensions (§4.8).
    pub async fn compile_capable(&self, builds: &[Arc<Build>]) -> Result<Vec<Arc<Build>>, EngineError> {
        let mut out = Vec::new();
        for build in builds {
            let version = self.repo.commit_version(&build.commit_hash).await?;
            if version >= Version::of(MIN_COMPILE_VERSION.0, MIN_COMPILE_VERSION.1) {
                out.push(Arc::clone(build));
            }
        }
        Ok(out)
    }

    /// `configure` then `make` for `build`, memoized per build tag so
    /// concurrent callers against the same build share one attempt (§5).
    pub async fn ensure_build(&self, build: &Arc<Build>) -> Result<DslOutcome, EngineError> {
        let tag = build.tag.clone();

        let worktree_existed = self.repo.worktree_dir(&build.commit_hash).exists();

        self.log_event(&tag, EventKind::ConfigureStarted).await;
        let repo = Arc::clone(&self.repo);
        let process = Arc::clone(&self.process);
        let for_configure = Arc::clone(build);
        let configure_outcome = self
            .configure_tasks
            .get_or_create(tag.clone(), move || async move { for_configure.configure(&repo, &process).await })
            .await
            .map_err(|e| EngineError::Other(anyhow::anyhow!(e.to_string())))?;

        if !worktree_existed && self.repo.worktree_dir(&build.commit_hash).exists() {
            self.log_event(&build.commit_hash, EventKind::WorktreeCreated).await;
        }

        if configure_outcome.is_skip() {
            return Ok(configure_outcome);
        }
        self.log_event(&tag, EventKind::ConfigureFinished { success: true }).await;

        self.log_event(&tag, EventKind::MakeStarted).await;
        let repo = Arc::clone(&self.repo);
        let process = Arc::clone(&self.process);
        let jobs = self.jobs;
        let for_make = Arc::clone(build);
        let make_outcome = self
            .make_tasks
            .get_or_create(tag.clone(), move || async move { for_make.make(&repo, &process, jobs).await })
            .await
            .map_err(|e| EngineError::Other(anyhow::anyhow!(e.to_string())))?;

        self.log_event(&tag, EventKind::MakeFinished { success: !make_outcome.is_skip() }).await;
        Ok(make_outcome)
    }

    /// Compile `case`'s extension against `compile_build`/`compile_option`,
    /// memoized per `(case, compile-build, option)` key so every exec-build
    /// sharing that triple reuses one compiled artifact (§4.5/§4.8).
    pub async fn ensure_test_module(
        &self,
        case: &Arc<Case>,
        compile_build: &Arc<Build>,
        compile_option: CompileOption,
    ) -> Result<(TestModule, RunResult), EngineError> {
        let test_module = TestModule::new(&self.cache_dir, &case.name, &compile_build.tag, compile_option);
        let key = format!("{}/{}/{}", case.name, compile_build.tag, compile_option.tag());

        self.log_event(&key, EventKind::CompileStarted).await;
        let case_c = Arc::clone(case);
        let build_c = Arc::clone(compile_build);
        let process = Arc::clone(&self.process);
        let tm_for_task = TestModule::new(&self.cache_dir, &case_c.name, &build_c.tag, compile_option);
        let result = self
            .compile_tasks
            .get_or_create(key.clone(), move || async move { tm_for_task.compile(&case_c, &build_c, &process).await })
            .await
            .map_err(|e| EngineError::Other(anyhow::anyhow!(e.to_string())))?;

        self.log_event(&key, EventKind::CompileFinished { success: result == RunResult::Success }).await;
        Ok((test_module, result))
    }

    fn run_env(compile_build_version: Version, exec_build_version: Version, compile_build: &Build, exec_build: &Build, compile_option: CompileOption) -> Env {
        Env {
            compile_version: compile_build_version,
            exec_version: exec_build_version,
            compile_features: compile_build.features.iter().map(|f| f.tag).collect(),
            exec_features: exec_build.features.iter().map(|f| f.tag).collect(),
            is_limited_api: compile_option.is_limited_api(),
            limited_api: compile_option.limited_api_version(),
        }
    }

    /// Run (and classify) one `(case, compile-build, compile-option,
    /// exec-build)` combination, memoized per run key (§3 invariant 2, §8
    /// Cartesian-expansion property). Assumes both builds are already
    /// ensured by the caller.
    pub async fn get_or_run(&self, case: Arc<Case>, compile_build: Arc<Build>, compile_option: CompileOption, exec_build: Arc<Build>) -> Result<RunResult, EngineError> {
        let exec_version = self.repo.commit_version(&exec_build.commit_hash).await?;
        if limited_api_skip(&compile_option, exec_version) {
            return Ok(RunResult::Skipped);
        }

        let compile_version = self.repo.commit_version(&compile_build.commit_hash).await?;
        let env = Self::run_env(compile_version, exec_version, &compile_build, &exec_build, compile_option);
        let predicate_outcome = case.evaluate_predicate(&env)?;
        if predicate_outcome.is_skip() {
            return Ok(RunResult::Skipped);
        }

        let (test_module, compile_result) = self.ensure_test_module(&case, &compile_build, compile_option).await?;

        let key = format!("{}/{}/{}/{}", case.name, compile_build.tag, compile_option.tag(), exec_build.tag);
        let process = Arc::clone(&self.process);
        let script_path = case.script_path.clone();
        let exec_tag = exec_build.tag.clone();
        let tm_dir = test_module.dir.clone();
        let predicate_for_task = predicate_outcome.clone();

        self.log_event(&key, EventKind::ExecStarted).await;
        let task = self.run_tasks.get_or_create(key.clone(), move || async move {
            let real_outcome = if compile_result != RunResult::Success {
                compile_result
            } else {
                let case_run = CaseRun::new(&tm_dir, &exec_tag);
                case_run.exec(&script_path, &tm_dir, &exec_build, &process).await?
            };
            let classified = classify(real_outcome, &predicate_for_task);
            Ok::<(RunResult, RunResult), EngineError>((real_outcome, classified))
        });

        let (real_outcome, result) = task.await.map_err(|e| EngineError::Other(anyhow::anyhow!(e.to_string())))?;
        self.log_event(&key, EventKind::ExecFinished { success: real_outcome == RunResult::Success }).await;
        self.log_event(&key, EventKind::RunClassified { result: format!("{result:?}") }).await;
        Ok(result)
    }

    /// The four-way Cartesian expansion: every compile-capable build × its
    /// compile options × every exec build × every case (§4.8, §8).
    pub async fn build_matrix(&self, reporter: &mut dyn Reporter) -> Result<Vec<MatrixRow>, EngineError> {
        let commits = self.select_commits().await?;
        let all_builds = self.expand_builds(&commits).await?;
        let compile_builds = self.compile_capable(&all_builds).await?;

        let mut rows = Vec::new();

        for case in &self.cases {
            for compile_build in &compile_builds {
                reporter.info(&format!("ensuring build {}", compile_build.tag));
                let outcome = match self.ensure_build(compile_build).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        reporter.error(&format!("{}: {e}", compile_build.tag));
                        rows.extend(error_rows_for_failed_build(&self.repo, case, compile_build, &all_builds).await);
                        continue;
                    }
                };
                if outcome.is_skip() {
                    continue;
                }

                let compile_version = match self.repo.commit_version(&compile_build.commit_hash).await {
                    Ok(v) => v,
                    Err(e) => {
                        reporter.error(&format!("{}: {e}", compile_build.tag));
                        rows.extend(error_rows_for_failed_build(&self.repo, case, compile_build, &all_builds).await);
                        continue;
                    }
                };
                for compile_option in possible_compile_options(compile_version) {
                    let mut results = Vec::new();
                    for exec_build in &all_builds {
                        let exec_outcome = match self.ensure_build(exec_build).await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                reporter.error(&format!("{}/{}: {e}", exec_build.tag, compile_option.tag()));
                                results.push((exec_build.tag.clone(), RunResult::Error));
                                continue;
                            }
                        };
                        let result = if exec_outcome.is_skip() {
                            RunResult::Skipped
                        } else {
                            match self
                                .get_or_run(Arc::clone(case), Arc::clone(compile_build), compile_option, Arc::clone(exec_build))
                                .await
                            {
                                Ok(result) => result,
                                Err(e) => {
                                    reporter.error(&format!("{}/{}: {e}", exec_build.tag, compile_option.tag()));
                                    RunResult::Error
                                }
                            }
                        };
                        results.push((exec_build.tag.clone(), result));
                    }
                    rows.push(MatrixRow {
                        case: case.name.clone(),
                        compile_build_tag: compile_build.tag.clone(),
                        compile_option_tag: compile_option.tag(),
                        results,
                    });
                }
            }
        }

        Ok(rows)
    }

    pub fn distinct_exec_tags(rows: &[MatrixRow]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut tags = Vec::new();
        for row in rows {
            for (tag, _) in &row.results {
                if seen.insert(tag.clone()) {
                    tags.push(tag.clone());
                }
            }
        }
        tags
    }
}

/// Build `RunResult::Error` rows for every exec-build, for a compile-build
/// whose own `configure`/`make` (or version resolution) failed. A build
/// every case in the row depends on cannot be partially applied, but the
/// failure still shouldn't abort the rest of the report (§7).
async fn error_rows_for_failed_build(repo: &Repo, case: &Arc<Case>, compile_build: &Arc<Build>, all_builds: &[Arc<Build>]) -> Vec<MatrixRow> {
    let error_results: Vec<(String, RunResult)> = all_builds.iter().map(|b| (b.tag.clone(), RunResult::Error)).collect();

    let compile_option_tags = match repo.commit_version(&compile_build.commit_hash).await {
        Ok(version) => possible_compile_options(version).into_iter().map(|o| o.tag()).collect(),
        Err(_) => vec![CompileOption::UNRESTRICTED.tag()],
    };

    compile_option_tags
        .into_iter()
        .map(|compile_option_tag| MatrixRow {
            case: case.name.clone(),
            compile_build_tag: compile_build.tag.clone(),
            compile_option_tag,
            results: error_results.clone(),
        })
        .collect()
}

/// Render the matrix as a plain-text table: one row per
/// (case, compile-build, compile-option), one column per exec-build.
pub fn format_matrix(rows: &[MatrixRow]) -> String {
    let exec_tags = Report::distinct_exec_tags(rows);
    let exec_width = exec_tags.iter().map(|t| t.len()).max().unwrap_or(1).max(1);

    let mut out = String::new();
    for row in rows {
        out.push_str(&format!("{:<24} {:<12} {:<10} ", row.case, row.compile_build_tag, row.compile_option_tag));
        for (_, result) in &row.results {
            out.push_str(&format!("{:>width$} ", result.glyph(), width = exec_width));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_formatting_includes_glyphs() {
        let rows = vec![MatrixRow {
            case: "tutorial".to_string(),
            compile_build_tag: "v3.13.0".to_string(),
            compile_option_tag: "~".to_string(),
            results: vec![("v3.13.0".to_string(), RunResult::Success)],
        }];
        let rendered = format_matrix(&rows);
        assert!(rendered.contains("tutorial"));
        assert!(rendered.contains(RunResult::Success.glyph()));
    }

    #[tokio::test]
    async fn expand_builds_skips_commits_below_3_5() {
        let td = tempfile::tempdir().unwrap();
        std::process::Command::new("git").args(["init"]).current_dir(td.path()).output().unwrap();
        std::process::Command::new("git")
            .args(["config", "user.email", "t@example.com"])
            .current_dir(td.path())
            .output()
            .unwrap();
        std::process::Command::new("git")
            .args(["config", "user.name", "T"])
            .current_dir(td.path())
            .output()
            .unwrap();
        std::process::Command::new("git")
            .args(["commit", "--allow-empty", "-m", "init"])
            .current_dir(td.path())
            .output()
            .unwrap();

        let report = Report::new(
            td.path().to_path_buf(),
            td.path().join(".cache"),
            td.path().join("cases"),
            Some(vec!["bad-ref".to_string()]),
            Some(2),
        )
        .unwrap();
        let commits = report.select_commits().await.unwrap();
        let builds = report.expand_builds(&commits).await.unwrap();
        assert!(builds.is_empty());
    }

    #[test]
    fn no_cases_when_case_dir_is_absent() {
        let td = tempfile::tempdir().unwrap();
        let report = Report::new(td.path().to_path_buf(), td.path().join(".cache"), td.path().join("no-such-cases"), None, Some(2)).unwrap();
        assert!(report.cases.is_empty());
    }

    fn dummy_case(td: &std::path::Path) -> Arc<Case> {
        let dir = td.join("cases").join("c");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("extension.c"), "").unwrap();
        std::fs::write(dir.join("script.py"), "").unwrap();
        Arc::new(Case::load(&dir).unwrap())
    }

    #[tokio::test]
    async fn error_rows_for_failed_build_marks_every_exec_build_as_error() {
        let td = tempfile::tempdir().unwrap();
        let cache_dir = td.path().join(".cache");
        let repo = Repo::new(td.path(), &cache_dir, ProcessRunner::with_capacity(2));
        let case = dummy_case(td.path());

        // A zero-hash commit resolves its version without touching git, so
        // `possible_compile_options` still runs even though the build itself
        // never got that far.
        let failed_build = Arc::new(Build::new("bad-ref", abicheck_git::ZERO_HASH, vec![], &cache_dir));
        let exec_builds = vec![Arc::new(Build::new("v3.13.0", abicheck_git::ZERO_HASH, vec![], &cache_dir))];

        let rows = error_rows_for_failed_build(&repo, &case, &failed_build, &exec_builds).await;
        assert!(!rows.is_empty());
        for row in &rows {
            assert_eq!(row.case, "c");
            assert_eq!(row.compile_build_tag, "bad-ref");
            for (_, result) in &row.results {
                assert_eq!(*result, RunResult::Error);
            }
        }
    }

    #[tokio::test]
    async fn error_rows_for_failed_build_falls_back_to_unrestricted_when_version_is_unknown() {
        let td = tempfile::tempdir().unwrap();
        let cache_dir = td.path().join(".cache");
        let repo = Repo::new(td.path(), &cache_dir, ProcessRunner::with_capacity(2));
        let case = dummy_case(td.path());

        // A non-zero hash against a non-existent repo makes `commit_version`
        // fail too, so the helper can't even compute the compile-option list.
        let failed_build = Arc::new(Build::new("bad-ref", "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef", vec![], &cache_dir));
        let exec_builds = vec![Arc::new(Build::new("v3.13.0", abicheck_git::ZERO_HASH, vec![], &cache_dir))];

        let rows = error_rows_for_failed_build(&repo, &case, &failed_build, &exec_builds).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].compile_option_tag, CompileOption::UNRESTRICTED.tag());
        assert_eq!(rows[0].results, vec![("v3.13.0".to_string(), RunResult::Error)]);
    }
}
