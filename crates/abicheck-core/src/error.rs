//! The engine-wide error type. `SkipBuild`/`ExpectFailure` are modeled as
//! [`abicheck_types::DslOutcome`] values, not errors — only genuine failures
//! live here.

use std::path::PathBuf;

use abicheck_git::GitError;
use abicheck_process::ProcessError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} probe for {subject} produced unparseable output: {detail}")]
    ProbeUnparseable {
        what: &'static str,
        subject: String,
        detail: String,
    },

    #[error("feature {tag:?} is not defined for commit {commit}")]
    UnknownFeature { tag: char, commit: String },

    #[error(transparent)]
    Dsl(#[from] crate::dsl::DslError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
