//! Streaming HTTP/1.x message encoder.

use std::borrow::Cow;
use std::fmt::{self, Write};

use bytes::BytesMut;

use crate::error::{Parse, User};
use crate::headers::HeaderMap;
use crate::message::{HttpObject, MessageHead, StartLine};
use crate::Result;

const AVERAGE_HEADER_SIZE: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    ContentNonChunk,
    ContentChunk,
    ContentAlwaysEmpty,
}

/// Serializes message heads and content chunks onto the wire, framing the
/// body as fixed-length, chunked, or empty.
///
/// Expects the object order the decoder produces: a head, then chunks,
/// then one terminal. The terminal returns the encoder to its initial
/// state for the next message.
#[derive(Debug)]
pub struct Encoder {
    state: State,
    /// The response being encoded answers a HEAD request; the paired
    /// server codec sets this from its method FIFO.
    head_request: bool,
}

impl Default for Encoder {
    fn default() -> Encoder {
        Encoder::new()
    }
}

impl Encoder {
    pub fn new() -> Encoder {
        Encoder {
            state: State::Init,
            head_request: false,
        }
    }

    pub(crate) fn set_head_request(&mut self, head_request: bool) {
        self.head_request = head_request;
    }

    /// Appends the wire form of `msg` to `dst`.
    pub fn encode(&mut self, msg: &HttpObject, dst: &mut BytesMut) -> Result<()> {
        match *msg {
            HttpObject::Head(ref head) => self.encode_head(head, dst),
            HttpObject::Chunk(ref data) => self.encode_chunk(data, dst),
            HttpObject::Last(ref trailers) => self.encode_last(trailers, dst),
            HttpObject::Invalid(_) => Err(User::UnexpectedMessage.into()),
        }
    }

    fn encode_head(&mut self, head: &MessageHead, dst: &mut BytesMut) -> Result<()> {
        if self.state != State::Init {
            return Err(User::UnexpectedMessage.into());
        }
        dst.reserve(30 + head.headers.len() * AVERAGE_HEADER_SIZE);

        match head.start {
            StartLine::Request(ref line) => {
                let target = normalize_target(&line.target);
                extend(dst, line.method.as_str().as_bytes());
                extend(dst, b" ");
                extend(dst, target.as_bytes());
                extend(dst, b" ");
                let _ = write!(FastWrite(dst), "{}", head.version);
            }
            StartLine::Status(ref line) => {
                let _ = write!(FastWrite(dst), "{} {}", head.version, line.code);
                if let Some(reason) = line.reason_or_canonical() {
                    if reason.bytes().any(|b| b == b'\r' || b == b'\n') {
                        return Err(Parse::Status.into());
                    }
                    extend(dst, b" ");
                    extend(dst, reason.as_bytes());
                }
            }
        }
        extend(dst, b"\r\n");
        write_headers(&head.headers, dst);
        extend(dst, b"\r\n");

        self.state = self.next_state(head);
        trace!("encoded head; content state {:?}", self.state);
        Ok(())
    }

    fn next_state(&self, head: &MessageHead) -> State {
        if self.is_content_always_empty(head) {
            State::ContentAlwaysEmpty
        } else if head
            .headers
            .contains_token("transfer-encoding", "chunked", true)
        {
            State::ContentChunk
        } else {
            State::ContentNonChunk
        }
    }

    fn is_content_always_empty(&self, head: &MessageHead) -> bool {
        let code = match head.start {
            StartLine::Request(_) => return false,
            StartLine::Status(ref line) => line.code.as_u16(),
        };
        if self.head_request {
            return true;
        }
        match code {
            // the legacy websocket 101 carries key material
            100..=199 => {
                !(code == 101
                    && !head.headers.contains("sec-websocket-accept")
                    && head.headers.contains_token("upgrade", "websocket", true))
            }
            204 | 205 => true,
            // 304 deliberately sits in its own arm
            304 => true,
            _ => false,
        }
    }

    fn encode_chunk(&mut self, data: &[u8], dst: &mut BytesMut) -> Result<()> {
        match self.state {
            State::Init => Err(User::UnexpectedMessage.into()),
            State::ContentNonChunk => {
                extend(dst, data);
                Ok(())
            }
            State::ContentChunk => {
                if !data.is_empty() {
                    let _ = write!(FastWrite(dst), "{:X}\r\n", data.len());
                    extend(dst, data);
                    extend(dst, b"\r\n");
                }
                Ok(())
            }
            State::ContentAlwaysEmpty => Ok(()),
        }
    }

    fn encode_last(&mut self, trailers: &HeaderMap, dst: &mut BytesMut) -> Result<()> {
        match self.state {
            State::Init => return Err(User::UnexpectedMessage.into()),
            State::ContentChunk => {
                extend(dst, b"0\r\n");
                write_headers(trailers, dst);
                extend(dst, b"\r\n");
            }
            State::ContentNonChunk | State::ContentAlwaysEmpty => {}
        }
        self.state = State::Init;
        self.head_request = false;
        Ok(())
    }
}

pub(crate) fn write_headers(headers: &HeaderMap, dst: &mut BytesMut) {
    for (name, value) in headers.iter() {
        let mut scratch = Vec::with_capacity(name.len());
        name.extend_lowercase(&mut scratch);
        extend(dst, &scratch);
        extend(dst, b": ");
        extend(dst, value);
        extend(dst, b"\r\n");
    }
}

/// Ensures a request-target has an absolute-path component.
fn normalize_target(target: &str) -> Cow<'_, str> {
    if target.is_empty() {
        return Cow::Borrowed("/");
    }
    if target.starts_with('/') {
        return Cow::Borrowed(target);
    }
    if let Some(p) = target.find("://") {
        match target.find('?') {
            None => {
                let last_slash = target.rfind('/').unwrap_or(0);
                if last_slash <= p + 3 {
                    return Cow::Owned(format!("{}/", target));
                }
            }
            Some(q) => {
                let last_slash = target[..q].rfind('/').unwrap_or(0);
                if last_slash <= p + 3 {
                    let mut fixed = String::with_capacity(target.len() + 1);
                    fixed.push_str(&target[..q]);
                    fixed.push('/');
                    fixed.push_str(&target[q..]);
                    return Cow::Owned(fixed);
                }
            }
        }
    }
    Cow::Borrowed(target)
}

struct FastWrite<'a>(&'a mut BytesMut);

impl<'a> fmt::Write for FastWrite<'a> {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        extend(self.0, s.as_bytes());
        Ok(())
    }

    #[inline]
    fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> fmt::Result {
        fmt::write(self, args)
    }
}

#[inline]
fn extend(dst: &mut BytesMut, data: &[u8]) {
    dst.extend_from_slice(data);
}
