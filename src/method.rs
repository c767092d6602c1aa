//! The HTTP request method.

use std::fmt;
use std::str::FromStr;

use crate::error::Parse;

use self::Method::{Connect, Delete, Extension, Get, Head, Options, Patch, Post, Put, Trace};

/// The request method (verb).
///
/// The nine registered methods are interned; anything else a peer sends is
/// carried through as an `Extension` token.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Method {
    /// OPTIONS
    Options,
    /// GET
    Get,
    /// HEAD
    Head,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// TRACE
    Trace,
    /// CONNECT
    Connect,
    /// Any other token, e.g. `Extension("PROPFIND".to_string())`.
    Extension(String),
}

impl Method {
    /// Whether a method is considered "safe", meaning the request is
    /// essentially read-only.
    pub fn safe(&self) -> bool {
        matches!(*self, Get | Head | Options | Trace)
    }

    /// Whether a method is considered "idempotent".
    pub fn idempotent(&self) -> bool {
        self.safe() || matches!(*self, Put | Delete)
    }

    pub fn as_str(&self) -> &str {
        match *self {
            Options => "OPTIONS",
            Get => "GET",
            Head => "HEAD",
            Post => "POST",
            Put => "PUT",
            Patch => "PATCH",
            Delete => "DELETE",
            Trace => "TRACE",
            Connect => "CONNECT",
            Extension(ref s) => s,
        }
    }
}

impl FromStr for Method {
    type Err = Parse;

    fn from_str(s: &str) -> Result<Method, Parse> {
        if s.is_empty() || !s.bytes().all(is_token_octet) {
            return Err(Parse::Method);
        }
        Ok(match s {
            "OPTIONS" => Options,
            "GET" => Get,
            "HEAD" => Head,
            "POST" => Post,
            "PUT" => Put,
            "PATCH" => Patch,
            "DELETE" => Delete,
            "TRACE" => Trace,
            "CONNECT" => Connect,
            _ => Extension(s.to_string()),
        })
    }
}

// RFC 7230 token octets
fn is_token_octet(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
        | b'`' | b'|' | b'~' | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Method {
    fn default() -> Method {
        Get
    }
}
