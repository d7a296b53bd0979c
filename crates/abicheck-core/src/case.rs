//! A case: a directory holding a C extension, a driver script, and an
//! optional compatibility predicate (§3, §4.7).

use std::path::{Path, PathBuf};

use abicheck_types::{CaseMetadata, DslOutcome};

use crate::dsl::{self, Env, Program};
use crate::error::EngineError;

pub struct Case {
    pub name: String,
    pub dir: PathBuf,
    pub extension_path: PathBuf,
    pub script_path: PathBuf,
    pub metadata: CaseMetadata,
    predicate: Option<Program>,
}

impl Case {
    /// Load a case from its directory. `extension.c` and `script.py` are
    /// required to exist; `expected.py` and `case.toml` are optional.
    pub fn load(dir: &Path) -> Result<Case, EngineError> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());

        let extension_path = dir.join("extension.c");
        let script_path = dir.join("script.py");

        let metadata = match std::fs::read_to_string(dir.join("case.toml")) {
            Ok(text) => toml::from_str(&text).map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?,
            Err(_) => CaseMetadata::default(),
        };

        let predicate = match std::fs::read_to_string(dir.join("expected.py")) {
            Ok(source) => Some(dsl::parse(&source)?),
            Err(_) => None,
        };

        Ok(Case {
            name,
            dir: dir.to_path_buf(),
            extension_path,
            script_path,
            metadata,
            predicate,
        })
    }

    /// `DslOutcome::Normal` when there is no `expected.py`.
    pub fn evaluate_predicate(&self, env: &Env) -> Result<DslOutcome, EngineError> {
        match &self.predicate {
            None => Ok(DslOutcome::Normal),
            Some(program) => Ok(program.evaluate(env)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abicheck_types::Version;

    fn default_env() -> Env {
        Env {
            compile_version: Version::of(3, 13),
            exec_version: Version::of(3, 13),
            compile_features: Default::default(),
            exec_features: Default::default(),
            is_limited_api: false,
            limited_api: None,
        }
    }

    #[test]
    fn loads_a_minimal_case_with_no_predicate() {
        let td = tempfile::tempdir().unwrap();
        let dir = td.path().join("tutorial-simple-3.13");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("extension.c"), "// ext").unwrap();
        std::fs::write(dir.join("script.py"), "# script").unwrap();

        let case = Case::load(&dir).unwrap();
        assert_eq!(case.name, "tutorial-simple-3.13");
        assert_eq!(case.evaluate_predicate(&default_env()).unwrap(), DslOutcome::Normal);
    }

    #[test]
    fn loads_case_toml_metadata() {
        let td = tempfile::tempdir().unwrap();
        let dir = td.path().join("case-with-meta");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("extension.c"), "").unwrap();
        std::fs::write(dir.join("script.py"), "").unwrap();
        std::fs::write(dir.join("case.toml"), "description = \"a case\"\n").unwrap();

        let case = Case::load(&dir).unwrap();
        assert_eq!(case.metadata.description.as_deref(), Some("a case"));
    }

    #[test]
    fn loads_expected_py_predicate() {
        let td = tempfile::tempdir().unwrap();
        let dir = td.path().join("case-with-predicate");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("extension.c"), "").unwrap();
        std::fs::write(dir.join("script.py"), "").unwrap();
        std::fs::write(dir.join("expected.py"), "raise ExpectFailure('always')\n").unwrap();

        let case = Case::load(&dir).unwrap();
        assert_eq!(
            case.evaluate_predicate(&default_env()).unwrap(),
            DslOutcome::ExpectFailure("always".to_string())
        );
    }
}
