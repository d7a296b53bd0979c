//! The case-run layer (§4.6): executing a compiled extension under an
//! exec-build and classifying the outcome against the case's predicate.

use std::path::PathBuf;

use abicheck_process::{ProcessRunner, RunSpec};
use abicheck_types::{CompileOption, DslOutcome, RunResult, Version};

use crate::build::Build;
use crate::error::EngineError;

pub struct CaseRun {
    pub dir: PathBuf,
}

impl CaseRun {
    pub fn new(test_module_dir: &std::path::Path, exec_build_tag: &str) -> Self {
        Self {
            dir: test_module_dir.join(exec_build_tag),
        }
    }

    fn stdout_log(&self) -> PathBuf {
        self.dir.join("stdout.log")
    }

    fn stderr_log(&self) -> PathBuf {
        self.dir.join("stderr.log")
    }

    /// Run `script.py` under `exec_build`'s interpreter, `PYTHONPATH` pointed
    /// at the test module's artifact directory.
    pub async fn exec(
        &self,
        script_path: &std::path::Path,
        test_module_dir: &std::path::Path,
        exec_build: &Build,
        process: &ProcessRunner,
    ) -> Result<RunResult, EngineError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| EngineError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let scratch = self.dir.join("scratch");
        std::fs::create_dir_all(&scratch).map_err(|source| EngineError::Io {
            path: scratch.clone(),
            source,
        })?;

        let out = process
            .run(
                RunSpec::new(exec_build.exe_path().display().to_string(), &[script_path.display().to_string()])
                    .cwd(&scratch)
                    .env("PYTHONPATH", test_module_dir.display().to_string())
                    .log_to_split(self.stdout_log(), self.stderr_log())
                    .check(false),
            )
            .await?;

        Ok(if out.success() { RunResult::Success } else { RunResult::ExecFailure })
    }
}

/// The engine-level skip (§4.7, independent of the case's own predicate):
/// a limited-API option newer than the exec interpreter is nonsensical.
pub fn limited_api_skip(compile_option: &CompileOption, exec_version: Version) -> bool {
    match compile_option.limited_api_version() {
        Some(limited) => limited >= exec_version,
        None => false,
    }
}

/// The classification decision table (§4.6):
///
/// | real outcome | predicate | final |
/// |---|---|---|
/// | any | `SkipBuild` | `SKIPPED` (handled by caller before this point) |
/// | `SUCCESS` | `Normal` | `SUCCESS` |
/// | `BUILD_FAILURE`/`EXEC_FAILURE` | `Normal` | as-is |
/// | `SUCCESS` | `ExpectFailure` | `UNEXPECTED_SUCCESS` |
/// | `BUILD_FAILURE`/`EXEC_FAILURE` | `ExpectFailure` | `EXPECTED_FAILURE` |
pub fn classify(real_outcome: RunResult, predicate_outcome: &DslOutcome) -> RunResult {
    match predicate_outcome {
        DslOutcome::SkipBuild(_) => RunResult::Skipped,
        DslOutcome::Normal => real_outcome,
        DslOutcome::ExpectFailure(_) => {
            if real_outcome.is_failure() {
                RunResult::ExpectedFailure
            } else {
                RunResult::UnexpectedSuccess
            }
        }
    }
}
