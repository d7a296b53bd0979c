//! A named reference into the interpreter repository.

/// The 40-character all-zero hash used as a sentinel for "unknown ref"
/// (§4.3's commit-hash resolution and version detection).
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000";

/// A tag or branch name, not yet resolved to a hash or version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Commit {
    pub name: String,
}

impl Commit {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl std::fmt::Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub fn is_zero_hash(hash: &str) -> bool {
    hash == ZERO_HASH
}
