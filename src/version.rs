//! HTTP protocol versions.

use std::fmt;

use crate::error::Parse;

/// A version of the HTTP protocol, with the keep-alive behaviour it
/// implies when the connection header is absent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Version {
    major: u8,
    minor: u8,
}

/// `HTTP/1.0`
pub const HTTP_10: Version = Version { major: 1, minor: 0 };

/// `HTTP/1.1`
pub const HTTP_11: Version = Version { major: 1, minor: 1 };

impl Version {
    #[inline]
    pub fn major(&self) -> u8 {
        self.major
    }

    #[inline]
    pub fn minor(&self) -> u8 {
        self.minor
    }

    /// Whether connections of this version stay open by default.
    pub fn keep_alive_default(&self) -> bool {
        *self == HTTP_11
    }

    /// Parses `HTTP/<major>.<minor>` text. Only 1.0 and 1.1 exist on this
    /// wire.
    pub(crate) fn parse(s: &str) -> Result<Version, Parse> {
        match s {
            "HTTP/1.1" => Ok(HTTP_11),
            "HTTP/1.0" => Ok(HTTP_10),
            _ => Err(Parse::Version),
        }
    }
}

impl Default for Version {
    fn default() -> Version {
        HTTP_11
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}
