//! The closed set of terminal outcomes for a single case run.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    Success,
    BuildFailure,
    ExecFailure,
    Skipped,
    ExpectedFailure,
    UnexpectedSuccess,
    Error,
}

impl RunResult {
    pub fn label(self) -> &'static str {
        match self {
            RunResult::Success => "success",
            RunResult::BuildFailure => "build failure",
            RunResult::ExecFailure => "exec failure",
            RunResult::Skipped => "skipped",
            RunResult::ExpectedFailure => "expected failure",
            RunResult::UnexpectedSuccess => "unexpected success",
            RunResult::Error => "error",
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            RunResult::Success => "✅",
            RunResult::BuildFailure => "❌",
            RunResult::ExecFailure => "❌",
            RunResult::Skipped => "❔",
            RunResult::ExpectedFailure => "➖",
            RunResult::UnexpectedSuccess => "🎆",
            RunResult::Error => "💥",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, RunResult::BuildFailure | RunResult::ExecFailure)
    }

    /// Whether this result should make the CLI's exit code non-zero.
    pub fn is_engine_error(self) -> bool {
        matches!(self, RunResult::Error)
    }
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.glyph(), self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_and_glyphs_are_distinct_enough() {
        let all = [
            RunResult::Success,
            RunResult::BuildFailure,
            RunResult::ExecFailure,
            RunResult::Skipped,
            RunResult::ExpectedFailure,
            RunResult::UnexpectedSuccess,
            RunResult::Error,
        ];
        for r in all {
            assert!(!r.label().is_empty());
            assert!(!r.glyph().is_empty());
        }
    }

    #[test]
    fn only_error_is_engine_error() {
        assert!(RunResult::Error.is_engine_error());
        assert!(!RunResult::ExpectedFailure.is_engine_error());
        assert!(!RunResult::Skipped.is_engine_error());
    }

    #[test]
    fn serde_round_trip() {
        let r = RunResult::UnexpectedSuccess;
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, "\"unexpected_success\"");
        let back: RunResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
