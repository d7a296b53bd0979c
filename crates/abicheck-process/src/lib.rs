//! The single chokepoint for launching external commands (§4.2).
//!
//! Every git invocation, `configure`, `make`, `cc`, and interpreter exec in
//! this engine goes through [`ProcessRunner::run`]. It bounds how many
//! children can be mid-spawn at once (a semaphore sized to the CPU count,
//! floor 2) and standardizes output capture/redirection and the
//! check-exit-code contract.

use std::ffi::OsStr;
use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Semaphore;

/// Where a stream's output should go.
#[derive(Debug, Clone)]
pub enum OutputDest {
    /// Discard (default for stdin-less, fire-and-check commands).
    Capture,
    /// Let the child inherit the parent's stream.
    Inherit,
    /// Redirect to a file on disk, truncating it first.
    File(PathBuf),
}

/// A single external-command invocation.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    pub stdout: OutputDest,
    /// `stderr` may point at the *same path* as `stdout` to alias the two
    /// streams into one log file, as the build layer does for `_config.log`
    /// and `make.log`.
    pub stderr: OutputDest,
    pub check: bool,
}

impl RunSpec {
    pub fn new(program: impl Into<String>, args: &[impl AsRef<str>]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
            cwd: None,
            env: Vec::new(),
            stdin: None,
            stdout: OutputDest::Capture,
            stderr: OutputDest::Capture,
            check: true,
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    /// Redirect both stdout and stderr to the same file.
    pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.stdout = OutputDest::File(path.clone());
        self.stderr = OutputDest::File(path);
        self
    }

    /// Redirect stdout and stderr to two distinct files.
    pub fn log_to_split(mut self, stdout: impl Into<PathBuf>, stderr: impl Into<PathBuf>) -> Self {
        self.stdout = OutputDest::File(stdout.into());
        self.stderr = OutputDest::File(stderr.into());
        self
    }

    fn argv_display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// The outcome of a completed process, regardless of `check`.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn `{argv}`: {source}")]
    Spawn {
        argv: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to prepare redirected output for `{argv}`: {source}")]
    Redirect {
        argv: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{argv}` exited with code {exit_code:?}{log_note}")]
    NonZeroExit {
        argv: String,
        exit_code: Option<i32>,
        log_note: String,
    },
}

/// The process-runner chokepoint: a semaphore bounding concurrent spawns.
#[derive(Clone)]
pub struct ProcessRunner {
    semaphore: Arc<Semaphore>,
}

impl ProcessRunner {
    /// Sized `max(2, cpu_count)` per §4.2 and §5.
    pub fn new() -> Self {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::with_capacity(cpus.max(2))
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }

    /// Run a command to completion, honoring `spec.check`.
    ///
    /// The semaphore permit is held only around `spawn`, not the child's
    /// full lifetime (§4.2's stated default policy): this smooths spawn
    /// bursts without serializing long-running children such as `make`.
    pub async fn run(&self, spec: RunSpec) -> Result<ProcessOutput, ProcessError> {
        let argv = spec.argv_display();

        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        for (k, v) in &spec.env {
            command.env(k, v);
        }

        command.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let stdout_file = open_redirect(&spec.stdout, &argv)?;
        let stderr_file = open_redirect(&spec.stderr, &argv)?;
        command.stdout(stdio_for(&spec.stdout, &stdout_file));
        command.stderr(stdio_for(&spec.stderr, &stderr_file));

        let mut child = {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .expect("process semaphore is never closed");
            command.spawn().map_err(|source| ProcessError::Spawn {
                argv: argv.clone(),
                source,
            })?
            // `_permit` drops here, before we await the child.
        };

        if let Some(input) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(input).await;
            }
        }

        let mut stdout_buf = Vec::new();
        if let Some(mut stdout) = child.stdout.take() {
            let _ = stdout.read_to_end(&mut stdout_buf).await;
        }
        let mut stderr_buf = Vec::new();
        if let Some(mut stderr) = child.stderr.take() {
            let _ = stderr.read_to_end(&mut stderr_buf).await;
        }

        let status = child.wait().await.map_err(|source| ProcessError::Spawn {
            argv: argv.clone(),
            source,
        })?;
        let exit_code = status.code().unwrap_or(-1);

        let stdout_path = path_of(&spec.stdout);
        let stderr_path = path_of(&spec.stderr);

        let stdout = if stdout_path.is_some() {
            std::fs::read(stdout_path.as_ref().unwrap()).unwrap_or_default()
        } else {
            stdout_buf
        };
        let stderr = if stderr_path.is_some() {
            std::fs::read(stderr_path.as_ref().unwrap()).unwrap_or_default()
        } else {
            stderr_buf
        };

        if spec.check && exit_code != 0 {
            let mut log_note = String::new();
            let mut paths = Vec::new();
            if let Some(p) = &stdout_path {
                paths.push(p.display().to_string());
            }
            if let Some(p) = &stderr_path {
                if Some(p) != stdout_path.as_ref() {
                    paths.push(p.display().to_string());
                }
            }
            if !paths.is_empty() {
                log_note = format!(" (see {})", paths.join(", "));
            }
            return Err(ProcessError::NonZeroExit {
                argv,
                exit_code: status.code(),
                log_note,
            });
        }

        Ok(ProcessOutput {
            exit_code,
            stdout,
            stderr,
            stdout_path,
            stderr_path,
        })
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn open_redirect(dest: &OutputDest, argv: &str) -> Result<Option<File>, ProcessError> {
    match dest {
        OutputDest::File(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| ProcessError::Redirect {
                    argv: argv.to_string(),
                    source,
                })?;
            }
            let file = File::create(path).map_err(|source| ProcessError::Redirect {
                argv: argv.to_string(),
                source,
            })?;
            Ok(Some(file))
        }
        _ => Ok(None),
    }
}

fn stdio_for(dest: &OutputDest, file: &Option<File>) -> Stdio {
    match dest {
        OutputDest::Capture => Stdio::piped(),
        OutputDest::Inherit => Stdio::inherit(),
        OutputDest::File(_) => {
            let file = file.as_ref().expect("redirect file was opened");
            let cloned = file.try_clone().expect("clone redirect file handle");
            Stdio::from(cloned)
        }
    }
}

fn path_of(dest: &OutputDest) -> Option<PathBuf> {
    match dest {
        OutputDest::File(p) => Some(p.clone()),
        _ => None,
    }
}

/// Whether `program` is resolvable on `PATH`.
pub fn command_exists(program: impl AsRef<OsStr>) -> bool {
    which::which(program).is_ok()
}
