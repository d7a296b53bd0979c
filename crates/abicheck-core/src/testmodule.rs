//! The test-module layer (§4.5): one compiled extension artifact for a
//! `(case, compile-build, compile-option)` triple.

use std::path::PathBuf;

use abicheck_process::{ProcessRunner, RunSpec};
use abicheck_types::{CompileOption, RunResult};

use crate::build::Build;
use crate::case::Case;
use crate::error::EngineError;

pub struct TestModule {
    pub case_name: String,
    pub build_tag: String,
    pub compile_option: CompileOption,
    pub dir: PathBuf,
}

impl TestModule {
    pub fn new(cache_dir: &std::path::Path, case_name: &str, build_tag: &str, compile_option: CompileOption) -> Self {
        let dir = cache_dir
            .join("runs")
            .join(case_name)
            .join(build_tag)
            .join(compile_option.tag());
        Self {
            case_name: case_name.to_string(),
            build_tag: build_tag.to_string(),
            compile_option,
            dir,
        }
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.dir.join("extension.so")
    }

    fn compile_log_path(&self) -> PathBuf {
        self.dir.join("compile.log")
    }

    /// Flags for this triple: build flags, compile-option flags, each
    /// feature's flags, and `-I<case-path>` (§4.5).
    pub async fn flags(&self, case: &Case, build: &Build, process: &ProcessRunner) -> Result<Vec<String>, EngineError> {
        let mut flags = build.cflags(process).await?;
        flags.extend(self.compile_option.cflags());
        for feature in &build.features {
            flags.extend(feature.flags.iter().map(|s| s.to_string()));
        }
        flags.push(format!("-I{}", case.dir.display()));
        Ok(flags)
    }

    /// Atomically replace the extension artifact: unlink if present, compile
    /// into a fresh scratch directory (not the case directory), write the
    /// artifact into `self.dir`.
    pub async fn compile(&self, case: &Case, build: &Build, process: &ProcessRunner) -> Result<RunResult, EngineError> {
        let artifact = self.artifact_path();
        if artifact.exists() {
            std::fs::remove_file(&artifact).map_err(|source| EngineError::Io {
                path: artifact.clone(),
                source,
            })?;
        }

        std::fs::create_dir_all(&self.dir).map_err(|source| EngineError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let scratch = self.dir.join("scratch");
        std::fs::create_dir_all(&scratch).map_err(|source| EngineError::Io {
            path: scratch.clone(),
            source,
        })?;

        let cc = build.compiler(process).await?;
        let mut args = self.flags(case, build, process).await?;
        args.push("--shared".to_string());
        args.push(case.extension_path.display().to_string());
        args.push("-o".to_string());
        args.push(artifact.display().to_string());
        args.push("-fPIC".to_string());

        let out = process
            .run(
                RunSpec::new(cc, &args)
                    .cwd(&scratch)
                    .log_to(self.compile_log_path())
                    .check(false),
            )
            .await?;

        Ok(if out.success() { RunResult::Success } else { RunResult::BuildFailure })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_is_keyed_by_case_build_and_option_tag() {
        let tm = TestModule::new(std::path::Path::new("/cache"), "tutorial", "v3.13.0", CompileOption::UNRESTRICTED);
        assert_eq!(tm.dir, std::path::PathBuf::from("/cache/runs/tutorial/v3.13.0/~"));
    }

    #[test]
    fn artifact_and_log_paths_live_under_the_run_dir() {
        let tm = TestModule::new(std::path::Path::new("/cache"), "tutorial", "v3.13.0", CompileOption::UNRESTRICTED);
        assert_eq!(tm.artifact_path(), std::path::PathBuf::from("/cache/runs/tutorial/v3.13.0/~/extension.so"));
        assert_eq!(tm.compile_log_path(), std::path::PathBuf::from("/cache/runs/tutorial/v3.13.0/~/compile.log"));
    }
}
