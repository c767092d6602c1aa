//! Message model: start lines, streamed objects, and full messages.

use std::fmt;

use bytes::Bytes;

use crate::error::Error;
use crate::headers::HeaderMap;
use crate::method::Method;
use crate::status::StatusCode;
use crate::version::Version;

/// A request line: method, request-target, carried by a [`MessageHead`]
/// with its version.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct RequestLine {
    pub method: Method,
    pub target: String,
}

/// A status line: code and optional reason phrase.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StatusLine {
    pub code: StatusCode,
    pub reason: Option<String>,
}

impl StatusLine {
    pub fn new(code: StatusCode) -> StatusLine {
        StatusLine { code, reason: None }
    }

    /// The reason to put on the wire: the explicit phrase, else the
    /// canonical one, else nothing.
    pub fn reason_or_canonical(&self) -> Option<&str> {
        match self.reason {
            Some(ref reason) => Some(reason),
            None => self.code.canonical_reason(),
        }
    }
}

/// Either side's first line.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum StartLine {
    Request(RequestLine),
    Status(StatusLine),
}

impl StartLine {
    pub fn is_request(&self) -> bool {
        matches!(*self, StartLine::Request(_))
    }

    pub fn request(&self) -> Option<&RequestLine> {
        match *self {
            StartLine::Request(ref line) => Some(line),
            StartLine::Status(_) => None,
        }
    }

    pub fn status(&self) -> Option<&StatusLine> {
        match *self {
            StartLine::Request(_) => None,
            StartLine::Status(ref line) => Some(line),
        }
    }
}

/// A decoded or to-be-encoded message head: start line, version, headers.
#[derive(Clone, PartialEq, Debug)]
pub struct MessageHead {
    pub version: Version,
    pub start: StartLine,
    pub headers: HeaderMap,
}

impl MessageHead {
    pub fn request(method: Method, target: impl Into<String>) -> MessageHead {
        MessageHead {
            version: Version::default(),
            start: StartLine::Request(RequestLine {
                method,
                target: target.into(),
            }),
            headers: HeaderMap::new(),
        }
    }

    pub fn response(code: StatusCode) -> MessageHead {
        MessageHead {
            version: Version::default(),
            start: StartLine::Status(StatusLine::new(code)),
            headers: HeaderMap::new(),
        }
    }

    pub fn is_request(&self) -> bool {
        self.start.is_request()
    }

    pub fn method(&self) -> Option<&Method> {
        self.start.request().map(|line| &line.method)
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.start.status().map(|line| line.code)
    }
}

/// One item of the streamed message sequence.
///
/// A well-formed message decodes to `Head`, zero or more `Chunk`s, then
/// exactly one `Last`. The empty terminal is a `Last` with no trailers.
/// `Invalid` is the synthetic marker a failed decode leaves in the
/// stream, carrying its cause.
#[derive(Debug)]
pub enum HttpObject {
    Head(MessageHead),
    Chunk(Bytes),
    Last(HeaderMap),
    Invalid(Error),
}

impl HttpObject {
    pub fn is_last(&self) -> bool {
        matches!(*self, HttpObject::Last(_))
    }

    pub fn head(&self) -> Option<&MessageHead> {
        match *self {
            HttpObject::Head(ref head) => Some(head),
            _ => None,
        }
    }

    pub fn chunk(&self) -> Option<&Bytes> {
        match *self {
            HttpObject::Chunk(ref data) => Some(data),
            _ => None,
        }
    }

    pub fn trailers(&self) -> Option<&HeaderMap> {
        match *self {
            HttpObject::Last(ref trailers) => Some(trailers),
            _ => None,
        }
    }

    pub fn invalid(&self) -> Option<&Error> {
        match *self {
            HttpObject::Invalid(ref cause) => Some(cause),
            _ => None,
        }
    }
}

/// A whole message: the aggregated form of one streamed sequence.
///
/// `content` owns the composite body; trailing headers survive
/// aggregation alongside the head.
#[derive(Clone, PartialEq, Debug)]
pub struct FullMessage {
    pub head: MessageHead,
    pub content: Bytes,
    pub trailers: HeaderMap,
}

impl FullMessage {
    pub fn new(head: MessageHead, content: Bytes) -> FullMessage {
        FullMessage {
            head,
            content,
            trailers: HeaderMap::new(),
        }
    }
}

impl fmt::Display for MessageHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start {
            StartLine::Request(ref line) => {
                write!(f, "{} {} {}", line.method, line.target, self.version)
            }
            StartLine::Status(ref line) => match line.reason_or_canonical() {
                Some(reason) => write!(f, "{} {} {}", self.version, line.code, reason),
                None => write!(f, "{} {}", self.version, line.code),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_constructors() {
        let req = MessageHead::request(Method::Post, "/upload");
        assert!(req.is_request());
        assert_eq!(req.method(), Some(&Method::Post));
        assert_eq!(req.to_string(), "POST /upload HTTP/1.1");

        let res = MessageHead::response(StatusCode::OK);
        assert!(!res.is_request());
        assert_eq!(res.status(), Some(StatusCode::OK));
        assert_eq!(res.to_string(), "HTTP/1.1 200 OK");
    }

    #[test]
    fn object_accessors() {
        let last = HttpObject::Last(HeaderMap::new());
        assert!(last.is_last());
        assert!(last.trailers().unwrap().is_empty());
        assert!(last.head().is_none());

        let chunk = HttpObject::Chunk(Bytes::from_static(b"hi"));
        assert_eq!(&chunk.chunk().unwrap()[..], b"hi");
    }
}
