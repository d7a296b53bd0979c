//! Extension-compilation variants: unrestricted or limited-API at some level.

use crate::version::{Level, Version};

/// `None` is "unrestricted". `Some(3)` is the sentinel meaning limited API at
/// 3.2 (CPython's `Py_LIMITED_API=3` form, predating versioned hex values).
/// Any other `Some(hex)` is a packed version hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompileOption {
    pub limited_api: Option<u32>,
}

impl CompileOption {
    pub const UNRESTRICTED: CompileOption = CompileOption { limited_api: None };

    pub fn limited(hex: u32) -> Self {
        Self {
            limited_api: Some(hex),
        }
    }

    /// The sentinel `Py_LIMITED_API=3` option, meaning "limited API since 3.2".
    pub fn limited_sentinel() -> Self {
        Self::limited(3)
    }

    /// The limited-API option for a given `(major, minor)`, packed to hexversion.
    pub fn limited_at(major: u32, minor: u32) -> Self {
        Self::limited(Version::pack(major, minor, 0, Level::Final, 0).hex())
    }

    pub fn is_limited_api(&self) -> bool {
        self.limited_api.is_some()
    }

    /// The version this limited-API option corresponds to, or `None` for
    /// unrestricted.
    pub fn limited_api_version(&self) -> Option<Version> {
        match self.limited_api {
            None => None,
            Some(3) => Some(Version::pack(3, 2, 0, Level::Final, 0)),
            Some(hex) => Some(Version::from_hex(hex)),
        }
    }

    /// Short key used in cache paths: `"~"` for unrestricted, otherwise an
    /// 8-digit lowercase hex string.
    pub fn tag(&self) -> String {
        match self.limited_api {
            None => "~".to_string(),
            Some(hex) => format!("{hex:08x}"),
        }
    }

    /// Compiler flags contributed by this option.
    pub fn cflags(&self) -> Vec<String> {
        match self.limited_api {
            None => vec![],
            Some(3) => vec!["-DPy_LIMITED_API=3".to_string()],
            Some(hex) => vec![format!("-DPy_LIMITED_API=0x{hex:08x}")],
        }
    }
}

impl std::fmt::Display for CompileOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.limited_api {
            None => write!(f, "~"),
            Some(3) => write!(f, "3"),
            Some(hex) => write!(f, "{}", Version::from_hex(hex)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_sorts_first() {
        let mut opts = vec![CompileOption::limited_at(3, 10), CompileOption::UNRESTRICTED];
        opts.sort();
        assert_eq!(opts[0], CompileOption::UNRESTRICTED);
    }

    #[test]
    fn ascending_by_hex() {
        let a = CompileOption::limited_at(3, 9);
        let b = CompileOption::limited_at(3, 10);
        assert!(a < b);
    }

    #[test]
    fn sentinel_tag_and_cflags() {
        let opt = CompileOption::limited_sentinel();
        assert_eq!(opt.tag(), "00000003");
        assert_eq!(opt.cflags(), vec!["-DPy_LIMITED_API=3"]);
        assert_eq!(opt.limited_api_version(), Some(Version::pack(3, 2, 0, Level::Final, 0)));
    }

    #[test]
    fn unrestricted_tag_and_cflags() {
        let opt = CompileOption::UNRESTRICTED;
        assert_eq!(opt.tag(), "~");
        assert!(opt.cflags().is_empty());
        assert_eq!(opt.limited_api_version(), None);
    }

    #[test]
    fn versioned_cflags() {
        let opt = CompileOption::limited_at(3, 10);
        let hex = Version::of(3, 10).hex();
        assert_eq!(opt.cflags(), vec![format!("-DPy_LIMITED_API=0x{hex:08x}")]);
    }
}
