//! Source-control layer: bare clone, tag enumeration, worktree
//! materialization, and commit/version resolution against a CPython
//! checkout (§4.3).

mod commit;
mod repo;

pub use commit::{is_zero_hash, Commit, ZERO_HASH};
pub use repo::{GitError, Repo};
