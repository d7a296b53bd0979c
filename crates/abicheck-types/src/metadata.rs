//! Static per-case metadata loaded from an optional `case.toml`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseMetadata {
    #[serde(default)]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_parses_to_default() {
        let meta: CaseMetadata = toml::from_str("").unwrap();
        assert_eq!(meta, CaseMetadata::default());
    }

    #[test]
    fn description_parses() {
        let meta: CaseMetadata = toml::from_str("description = \"tutorial case\"").unwrap();
        assert_eq!(meta.description.as_deref(), Some("tutorial case"));
    }
}
