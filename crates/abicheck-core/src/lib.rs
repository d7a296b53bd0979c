//! The compatibility matrix orchestration engine: source control, builds,
//! test modules, case runs, the compatibility DSL, and the report aggregator
//! that ties them together (§4).

pub mod build;
pub mod case;
pub mod caserun;
pub mod dsl;
pub mod error;
pub mod memo;
pub mod report;
pub mod reporter;
pub mod testmodule;

pub use build::Build;
pub use case::Case;
pub use caserun::CaseRun;
pub use error::EngineError;
pub use memo::TaskRegistry;
pub use report::{format_matrix, MatrixRow, Report};
pub use reporter::{NullReporter, Reporter};
pub use testmodule::TestModule;
