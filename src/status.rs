//! HTTP status codes.

use std::fmt;

use crate::error::Parse;

/// An HTTP status code.
///
/// Any non-negative code round-trips through the codec; the class
/// partition and canonical reasons only cover the registered space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StatusCode(u16);

/// The class a status code falls in, per RFC 7231 §6.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
    Unknown,
}

impl StatusCode {
    pub const CONTINUE: StatusCode = StatusCode(100);
    pub const SWITCHING_PROTOCOLS: StatusCode = StatusCode(101);
    pub const OK: StatusCode = StatusCode(200);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const RESET_CONTENT: StatusCode = StatusCode(205);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const REQUEST_ENTITY_TOO_LARGE: StatusCode = StatusCode(413);
    pub const EXPECTATION_FAILED: StatusCode = StatusCode(417);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);

    pub fn new(code: u16) -> StatusCode {
        StatusCode(code)
    }

    #[inline]
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    pub fn class(&self) -> StatusClass {
        match self.0 {
            100..=199 => StatusClass::Informational,
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirection,
            400..=499 => StatusClass::ClientError,
            500..=599 => StatusClass::ServerError,
            _ => StatusClass::Unknown,
        }
    }

    pub fn is_informational(&self) -> bool {
        self.class() == StatusClass::Informational
    }

    pub fn is_success(&self) -> bool {
        self.class() == StatusClass::Success
    }

    pub(crate) fn parse(s: &str) -> Result<StatusCode, Parse> {
        if s.len() != 3 {
            return Err(Parse::Status);
        }
        s.parse::<u16>().map(StatusCode).map_err(|_| Parse::Status)
    }

    /// The default reason phrase for registered codes.
    pub fn canonical_reason(&self) -> Option<&'static str> {
        let reason = match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            102 => "Processing",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            203 => "Non-Authoritative Information",
            204 => "No Content",
            205 => "Reset Content",
            206 => "Partial Content",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            305 => "Use Proxy",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            402 => "Payment Required",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            412 => "Precondition Failed",
            413 => "Request Entity Too Large",
            414 => "Request-URI Too Long",
            415 => "Unsupported Media Type",
            416 => "Requested Range Not Satisfiable",
            417 => "Expectation Failed",
            421 => "Misdirected Request",
            426 => "Upgrade Required",
            428 => "Precondition Required",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => return None,
        };
        Some(reason)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> StatusCode {
        StatusCode(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        assert_eq!(StatusCode::new(100).class(), StatusClass::Informational);
        assert_eq!(StatusCode::new(204).class(), StatusClass::Success);
        assert_eq!(StatusCode::new(304).class(), StatusClass::Redirection);
        assert_eq!(StatusCode::new(404).class(), StatusClass::ClientError);
        assert_eq!(StatusCode::new(500).class(), StatusClass::ServerError);
        assert_eq!(StatusCode::new(600).class(), StatusClass::Unknown);
    }

    #[test]
    fn parse_three_digits() {
        assert_eq!(StatusCode::parse("200").unwrap(), StatusCode::OK);
        assert!(StatusCode::parse("20").is_err());
        assert!(StatusCode::parse("2000").is_err());
        assert!(StatusCode::parse("2x0").is_err());
    }

    #[test]
    fn reasons() {
        assert_eq!(StatusCode::OK.canonical_reason(), Some("OK"));
        assert_eq!(StatusCode::new(599).canonical_reason(), None);
    }
}
