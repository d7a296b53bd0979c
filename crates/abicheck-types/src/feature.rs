//! Named build variants (free-threading, and room for future ones).

use crate::version::Version;

/// A build variant: a one-character tag, the configure options it contributes,
/// the compiler flags it contributes, and the minimum interpreter version it
/// is defined for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Feature {
    pub tag: char,
    pub config_options: Vec<&'static str>,
    pub flags: Vec<&'static str>,
    pub min_version: Option<Version>,
}

impl Feature {
    /// Whether this feature is even defined for the given commit version.
    /// `None` means "unknown version" (e.g. a zero-hash commit), which is
    /// never compatible.
    pub fn compatible_with(&self, commit_version: Option<Version>) -> bool {
        match (self.min_version, commit_version) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(min), Some(actual)) => actual >= min,
        }
    }
}

/// Look up a feature by its tag. Returns `None` for unknown tags.
pub fn lookup(tag: char) -> Option<Feature> {
    match tag {
        't' => Some(Feature {
            tag: 't',
            config_options: vec!["--disable-gil"],
            flags: vec!["-DPy_GIL_DISABLED=1"],
            min_version: Some(Version::of(3, 13)),
        }),
        _ => None,
    }
}

/// All features known to the engine, in a stable order (used for iterating
/// "each feature" during build expansion, §4.8).
pub fn all() -> Vec<Feature> {
    vec![lookup('t').expect("'t' is a known feature")]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Level;

    #[test]
    fn free_threading_feature_is_defined() {
        let f = lookup('t').unwrap();
        assert_eq!(f.tag, 't');
        assert_eq!(f.config_options, vec!["--disable-gil"]);
    }

    #[test]
    fn unknown_tag_is_none() {
        assert!(lookup('z').is_none());
    }

    #[test]
    fn compatible_with_respects_min_version() {
        let f = lookup('t').unwrap();
        assert!(!f.compatible_with(Some(Version::of(3, 12))));
        assert!(f.compatible_with(Some(Version::of(3, 13))));
        assert!(f.compatible_with(Some(Version::pack(3, 14, 0, Level::Final, 0))));
    }

    #[test]
    fn compatible_with_unknown_version_is_false() {
        let f = lookup('t').unwrap();
        assert!(!f.compatible_with(None));
    }
}
