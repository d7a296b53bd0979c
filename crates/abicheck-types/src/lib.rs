//! Core data model for the compatibility matrix runner: versions, features,
//! compile options, run results, and the domain outcomes the engine's
//! predicate evaluator can signal.
//!
//! This crate holds only plain value records — no process execution, no
//! filesystem access, no async. Everything here is cheap to construct, hash,
//! and compare, matching the "dataclass-like records" discipline used
//! throughout the engine.

mod compileoption;
mod dsl;
mod feature;
mod metadata;
mod runresult;
mod version;

pub use compileoption::CompileOption;
pub use dsl::DslOutcome;
pub use feature::{all as all_features, lookup as lookup_feature, Feature};
pub use metadata::CaseMetadata;
pub use runresult::RunResult;
pub use version::{Level, Version, VersionError};
