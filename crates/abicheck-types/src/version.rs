//! CPython version records: parsing, ordering, and the 32-bit hexversion codec.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Release level, ordered so that `Final` sorts after all pre-release levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    Alpha,
    Beta,
    Candidate,
    Final,
}

impl Level {
    /// Parse the level token used in version strings (`"a"`, `"b"`, `"rc"`, or no token at all).
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "a" => Some(Level::Alpha),
            "b" => Some(Level::Beta),
            "rc" => Some(Level::Candidate),
            "" => Some(Level::Final),
            _ => None,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Level::Alpha => "a",
            Level::Beta => "b",
            Level::Candidate => "rc",
            Level::Final => "",
        }
    }

    /// Canonical nibble encoding used by `hexversion`. `0x0` is accepted on
    /// decode as a synonym for `Final` (seen in some zero-initialized values)
    /// but is never produced on encode.
    pub fn from_hex(nibble: u8) -> Option<Self> {
        match nibble {
            0xa => Some(Level::Alpha),
            0xb => Some(Level::Beta),
            0xc => Some(Level::Candidate),
            0xf | 0x0 => Some(Level::Final),
            _ => None,
        }
    }

    pub fn to_hex(self) -> u8 {
        match self {
            Level::Alpha => 0xa,
            Level::Beta => 0xb,
            Level::Candidate => 0xc,
            Level::Final => 0xf,
        }
    }
}

/// A CPython version: `major.minor.micro` plus an optional pre-release marker.
///
/// Total order matches CPython's own: at equal `(major, minor, micro)`,
/// `Final > Candidate > Beta > Alpha`, and within a pre-release level, higher
/// `serial` sorts higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    pub level: Level,
    pub serial: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("not a well-formed version string: {0:?}")]
    Malformed(String),
}

impl Version {
    /// Construct a version directly. Unlike the source this is based on,
    /// `micro` is taken from the `micro` argument, not from `minor`.
    pub fn pack(major: u32, minor: u32, micro: u32, level: Level, serial: u32) -> Self {
        Self {
            major,
            minor,
            micro,
            level,
            serial,
        }
    }

    /// Construct a final release version from just `(major, minor)`, as used
    /// by the compatibility DSL's `v(major, minor)` constructor.
    pub fn of(major: u32, minor: u32) -> Self {
        Self::pack(major, minor, 0, Level::Final, 0)
    }

    pub fn zero() -> Self {
        Self::pack(0, 0, 0, Level::Final, 0)
    }

    pub fn is_zero(&self) -> bool {
        self.major == 0 && self.minor == 0 && self.micro == 0 && self.level == Level::Final
    }

    pub fn is_prerelease(&self) -> bool {
        self.level != Level::Final
    }

    /// Parse strings of the shape `major.minor[.micro][level serial]`, e.g.
    /// `"3.13.0a1"`, `"3.9"`, `"3.10.1rc2"`.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let bytes = s.as_bytes();
        let mut i = 0;

        let major = take_digits(bytes, &mut i).ok_or_else(|| malformed(s))?;
        expect(bytes, &mut i, b'.').ok_or_else(|| malformed(s))?;
        let minor = take_digits(bytes, &mut i).ok_or_else(|| malformed(s))?;

        let micro = if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
            take_digits(bytes, &mut i).ok_or_else(|| malformed(s))?
        } else {
            0
        };

        let level_tag = if i < bytes.len() && bytes[i] == b'r' {
            expect_str(bytes, &mut i, "rc").ok_or_else(|| malformed(s))?;
            "rc"
        } else if i < bytes.len() && (bytes[i] == b'a' || bytes[i] == b'b') {
            let tag = if bytes[i] == b'a' { "a" } else { "b" };
            i += 1;
            tag
        } else {
            ""
        };

        let level = Level::from_tag(level_tag).ok_or_else(|| malformed(s))?;

        let serial = if level == Level::Final {
            0
        } else {
            take_digits(bytes, &mut i).ok_or_else(|| malformed(s))?
        };

        if i != bytes.len() {
            return Err(malformed(s));
        }

        Ok(Self::pack(major, minor, micro, level, serial))
    }

    /// Encode to the `MM mm uu Ls` byte layout used by `sys.hexversion`:
    /// four independent byte fields, not an overlay.
    pub fn hex(&self) -> u32 {
        let major = (self.major & 0xff) << 24;
        let minor = (self.minor & 0xff) << 16;
        let micro = (self.micro & 0xff) << 8;
        let level = (u32::from(self.level.to_hex()) & 0xf) << 4;
        let serial = self.serial & 0xf;
        major | minor | micro | level | serial
    }

    pub fn from_hex(h: u32) -> Self {
        let major = (h >> 24) & 0xff;
        let minor = (h >> 16) & 0xff;
        let micro = (h >> 8) & 0xff;
        let level_nibble = ((h >> 4) & 0xf) as u8;
        let serial = h & 0xf;
        let level = Level::from_hex(level_nibble).unwrap_or(Level::Final);
        Self::pack(major, minor, micro, level, serial)
    }
}

fn malformed(s: &str) -> VersionError {
    VersionError::Malformed(s.to_string())
}

fn take_digits(bytes: &[u8], i: &mut usize) -> Option<u32> {
    let start = *i;
    while *i < bytes.len() && bytes[*i].is_ascii_digit() {
        *i += 1;
    }
    if *i == start {
        return None;
    }
    std::str::from_utf8(&bytes[start..*i]).ok()?.parse().ok()
}

fn expect(bytes: &[u8], i: &mut usize, b: u8) -> Option<()> {
    if *i < bytes.len() && bytes[*i] == b {
        *i += 1;
        Some(())
    } else {
        None
    }
}

fn expect_str(bytes: &[u8], i: &mut usize, s: &str) -> Option<()> {
    let s = s.as_bytes();
    if bytes[*i..].starts_with(s) {
        *i += s.len();
        Some(())
    } else {
        None
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}{}", self.major, self.minor, self.micro, self.level.tag())?;
        if self.level != Level::Final {
            write!(f, "{}", self.serial)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_final_with_micro() {
        let v = Version::parse("3.13.0").unwrap();
        assert_eq!(v, Version::pack(3, 13, 0, Level::Final, 0));
    }

    #[test]
    fn parse_prerelease() {
        let v = Version::parse("3.13.0a1").unwrap();
        assert_eq!(v, Version::pack(3, 13, 0, Level::Alpha, 1));
    }

    #[test]
    fn parse_candidate() {
        let v = Version::parse("3.10.1rc2").unwrap();
        assert_eq!(v, Version::pack(3, 10, 1, Level::Candidate, 2));
    }

    #[test]
    fn format_round_trips() {
        for s in ["3.13.0", "3.13.0a1", "3.9.0b3", "3.10.1rc2"] {
            let v = Version::parse(s).unwrap();
            assert_eq!(v.to_string(), s);
        }
    }

    #[test]
    fn ordering_across_levels() {
        assert!(Version::parse("3.9.0a1").unwrap() < Version::parse("3.9.0b1").unwrap());
        assert!(Version::parse("3.9.0b1").unwrap() < Version::parse("3.9.0rc1").unwrap());
        assert!(Version::parse("3.9.0rc1").unwrap() < Version::parse("3.9.0").unwrap());
    }

    #[test]
    fn pack_sets_micro_from_micro_not_minor() {
        let v = Version::pack(3, 9, 1, Level::Final, 0);
        assert_eq!(v.micro, 1);
    }

    #[test]
    fn level_from_hex_uses_nibble_keys() {
        assert_eq!(Level::from_hex(0xa), Some(Level::Alpha));
        assert_eq!(Level::from_hex(0xb), Some(Level::Beta));
        assert_eq!(Level::from_hex(0xc), Some(Level::Candidate));
        assert_eq!(Level::from_hex(0xf), Some(Level::Final));
        assert_eq!(Level::from_hex(0x0), Some(Level::Final));
        assert_eq!(Level::from_hex(0x5), None);
    }

    #[test]
    fn hex_layout_is_four_separate_bytes() {
        // 3.13.1 final serial 0: 0x03 0x0d 0x01 0xf0
        let v = Version::pack(3, 13, 1, Level::Final, 0);
        assert_eq!(v.hex(), 0x030d_01f0);
    }

    #[test]
    fn hex_round_trip() {
        let v = Version::pack(3, 13, 2, Level::Candidate, 3);
        assert_eq!(Version::from_hex(v.hex()), v);
    }

    proptest! {
        #[test]
        fn parse_format_round_trip(
            major in 0u32..50,
            minor in 0u32..50,
            micro in 0u32..50,
            level_idx in 0u32..4,
            serial in 1u32..15,
        ) {
            let level = match level_idx {
                0 => Level::Alpha,
                1 => Level::Beta,
                2 => Level::Candidate,
                _ => Level::Final,
            };
            let v = Version::pack(major, minor, micro, level, serial);
            let formatted = v.to_string();
            let parsed = Version::parse(&formatted).unwrap();
            prop_assert_eq!(parsed, v);
        }

        #[test]
        fn hex_from_hex_round_trip(
            major in 0u32..256,
            minor in 0u32..256,
            micro in 0u32..256,
            level_idx in 0u32..4,
            serial in 0u32..16,
        ) {
            let level = match level_idx {
                0 => Level::Alpha,
                1 => Level::Beta,
                2 => Level::Candidate,
                _ => Level::Final,
            };
            let v = Version::pack(major, minor, micro, level, serial);
            prop_assert_eq!(Version::from_hex(v.hex()), v);
        }
    }
}
