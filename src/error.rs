//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;

/// Result type often returned from methods that can have `httpwire` `Error`s.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur while handling HTTP/1 streams.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    Parse(Parse),
    /// Aggregated or declared content exceeded a configured bound.
    TooLarge,
    /// An `Expect` header carried an unsupported expectation, or a
    /// `100-continue` body did not fit the aggregator bound.
    #[allow(unused)]
    Expectation,
    /// Upgrade handshake failed: missing headers, no codec, or the
    /// 101 write did not complete.
    #[allow(unused)]
    Upgrade,
    /// A message reached EOF, but is not complete.
    IncompleteMessage,
    /// The content transformer (e.g. a decompressor) failed.
    Content,
    /// Multipart body decoding or encoding failed.
    Multipart(Multipart),
    /// The user made an API misstep.
    User(User),
    /// An `io::Error` from part storage or a pipeline write.
    Io,
}

#[derive(Debug)]
pub enum Parse {
    Method,
    Version,
    Uri,
    Status,
    Header,
    /// An initial line or chunk size line exceeded the configured cap.
    LineTooLong,
    /// The accumulated header block exceeded the configured cap.
    HeaderTooLarge,
    ChunkSize,
    ContentLengthInvalid,
    /// `Transfer-Encoding: chunked` received while chunked support is off.
    TransferEncodingUnsupported,
}

#[derive(Debug)]
pub(crate) enum Multipart {
    /// A boundary delimiter did not match the multipart grammar.
    Delimiter,
    /// `Content-Disposition` missing or malformed in a part header block.
    Disposition,
    /// `Content-Transfer-Encoding` was not one of 7bit, 8bit, binary.
    TransferEncoding,
    /// A percent escape in form-urlencoded data was malformed.
    UrlDecode,
    /// Data requested past the end of a completed decoder.
    EndOfData,
}

#[derive(Debug)]
pub(crate) enum User {
    /// The server codec was asked to encode a response with no
    /// correlated request.
    MoreResponsesThanRequests,
    /// The form encoder was constructed with a forbidden method.
    ForbiddenMethod,
    /// A part read was attempted before the part completed.
    NotEnoughData,
    /// A destroyed decoder or consumed encoder was used again.
    Reuse,
    /// A content object was encoded while no message head is open, or a
    /// head while one is.
    UnexpectedMessage,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    /// Returns true if this was an HTTP parse error.
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(_))
    }

    /// Returns true if this error was caused by a message or part that was
    /// too large.
    pub fn is_too_large(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::TooLarge | Kind::Parse(Parse::LineTooLong) | Kind::Parse(Parse::HeaderTooLarge)
        )
    }

    /// Returns true if this was a failed `Expect` negotiation.
    pub fn is_expectation(&self) -> bool {
        matches!(self.inner.kind, Kind::Expectation)
    }

    /// Returns true if this was a failed upgrade handshake.
    pub fn is_upgrade(&self) -> bool {
        matches!(self.inner.kind, Kind::Upgrade)
    }

    /// Returns true if the byte stream ended before a message could
    /// complete.
    pub fn is_incomplete_message(&self) -> bool {
        matches!(self.inner.kind, Kind::IncompleteMessage)
    }

    /// Returns true if a content transformer failed.
    pub fn is_content(&self) -> bool {
        matches!(self.inner.kind, Kind::Content)
    }

    /// Returns true if this was a multipart decoding or encoding error.
    pub fn is_multipart(&self) -> bool {
        matches!(self.inner.kind, Kind::Multipart(_))
    }

    /// Returns true if this error was caused by user code.
    pub fn is_user(&self) -> bool {
        matches!(self.inner.kind, Kind::User(_))
    }

    /// Returns true if this was wrapped from an `io::Error`.
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    pub(crate) fn new_too_large() -> Error {
        Error::new(Kind::TooLarge)
    }

    #[allow(unused)]
    pub(crate) fn new_expectation() -> Error {
        Error::new(Kind::Expectation)
    }

    #[allow(unused)]
    pub(crate) fn new_upgrade() -> Error {
        Error::new(Kind::Upgrade)
    }

    pub(crate) fn new_incomplete() -> Error {
        Error::new(Kind::IncompleteMessage)
    }

    pub(crate) fn new_content() -> Error {
        Error::new(Kind::Content)
    }

    pub(crate) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Parse(Parse::Method) => "invalid HTTP method parsed",
            Kind::Parse(Parse::Version) => "invalid HTTP version parsed",
            Kind::Parse(Parse::Uri) => "invalid request-target parsed",
            Kind::Parse(Parse::Status) => "invalid HTTP status-code parsed",
            Kind::Parse(Parse::Header) => "invalid HTTP header parsed",
            Kind::Parse(Parse::LineTooLong) => "line longer than configured maximum",
            Kind::Parse(Parse::HeaderTooLarge) => "header block larger than configured maximum",
            Kind::Parse(Parse::ChunkSize) => "invalid chunk size line",
            Kind::Parse(Parse::ContentLengthInvalid) => "invalid content-length parsed",
            Kind::Parse(Parse::TransferEncodingUnsupported) => {
                "chunked transfer-encoding not supported"
            }
            Kind::TooLarge => "content length exceeded configured maximum",
            Kind::Expectation => "expectation failed",
            Kind::Upgrade => "upgrade handshake failed",
            Kind::IncompleteMessage => "connection closed before message completed",
            Kind::Content => "content transform failed",
            Kind::Multipart(Multipart::Delimiter) => "invalid multipart delimiter",
            Kind::Multipart(Multipart::Disposition) => "invalid multipart content-disposition",
            Kind::Multipart(Multipart::TransferEncoding) => {
                "invalid multipart content-transfer-encoding"
            }
            Kind::Multipart(Multipart::UrlDecode) => "invalid percent escape",
            Kind::Multipart(Multipart::EndOfData) => "no more multipart data",
            Kind::User(User::MoreResponsesThanRequests) => {
                "response encoded with no correlated request"
            }
            Kind::User(User::ForbiddenMethod) => "method cannot carry a form body",
            Kind::User(User::NotEnoughData) => "part content accessed before completion",
            Kind::User(User::Reuse) => "codec used after destruction",
            Kind::User(User::UnexpectedMessage) => "message encoded out of order",
            Kind::Io => "i/o error",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("httpwire::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

impl From<Parse> for Error {
    fn from(err: Parse) -> Error {
        Error::new(Kind::Parse(err))
    }
}

impl From<Multipart> for Error {
    fn from(err: Multipart) -> Error {
        Error::new(Kind::Multipart(err))
    }
}

impl From<User> for Error {
    fn from(err: User) -> Error {
        Error::new(Kind::User(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::new_io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn error_size_of() {
        assert_eq!(mem::size_of::<Error>(), mem::size_of::<usize>());
    }

    #[test]
    fn predicates() {
        assert!(Error::from(Parse::ChunkSize).is_parse());
        assert!(Error::new_too_large().is_too_large());
        assert!(Error::from(Parse::HeaderTooLarge).is_too_large());
        assert!(Error::new_expectation().is_expectation());
        assert!(Error::from(Multipart::Delimiter).is_multipart());
        assert!(Error::from(User::ForbiddenMethod).is_user());
    }

    #[test]
    fn cause_is_chained() {
        use std::error::Error as _;
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = Error::new_io(io);
        assert!(err.is_io());
        assert_eq!(err.source().unwrap().to_string(), "boom");
    }
}
