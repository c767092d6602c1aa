//! Streaming HTTP/1.x message decoder.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

use super::line::LineParser;
use crate::ascii::{validate_header_name, validate_header_value, AsciiStr};
use crate::error::{Error, Parse};
use crate::headers::HeaderMap;
use crate::message::{HttpObject, MessageHead, RequestLine, StartLine, StatusLine};
use crate::method::Method;
use crate::status::StatusCode;
use crate::version::Version;
use crate::Result;

/// Construction-time limits and switches for a [`Decoder`].
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub max_initial_line_length: usize,
    pub max_header_size: usize,
    pub max_chunk_size: usize,
    pub chunked_supported: bool,
    pub validate_headers: bool,
    pub initial_buffer_size: usize,
}

impl Default for DecoderConfig {
    fn default() -> DecoderConfig {
        DecoderConfig {
            max_initial_line_length: 4096,
            max_header_size: 8192,
            max_chunk_size: 8192,
            chunked_supported: true,
            validate_headers: true,
            initial_buffer_size: 128,
        }
    }
}

impl DecoderConfig {
    pub fn max_initial_line_length(mut self, max: usize) -> Self {
        self.max_initial_line_length = max;
        self
    }

    pub fn max_header_size(mut self, max: usize) -> Self {
        self.max_header_size = max;
        self
    }

    pub fn max_chunk_size(mut self, max: usize) -> Self {
        self.max_chunk_size = max;
        self
    }

    pub fn chunked_supported(mut self, supported: bool) -> Self {
        self.chunked_supported = supported;
        self
    }

    pub fn validate_headers(mut self, validate: bool) -> Self {
        self.validate_headers = validate;
        self
    }

    pub fn initial_buffer_size(mut self, hint: usize) -> Self {
        self.initial_buffer_size = hint;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SkipControlChars,
    ReadInitial,
    ReadHeader,
    ReadFixedLengthContent,
    ReadVariableLengthContent,
    ReadChunkSize,
    ReadChunkedContent,
    ReadChunkDelimiter,
    ReadChunkFooter,
    BadMessage,
    Upgraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Request,
    Response,
}

enum Step {
    Continue,
    NeedMore,
}

/// A byte-driven state machine turning inbound fragments into
/// [`HttpObject`]s: one head, zero or more chunks, one terminal.
///
/// Parse failures do not poison the call: the decoder pushes an
/// [`HttpObject::Invalid`] marker carrying the cause, drains its input,
/// and sinks into a bad-message state until [`request_reset`] is called.
///
/// [`request_reset`]: Decoder::request_reset
pub struct Decoder {
    config: DecoderConfig,
    direction: Direction,
    state: State,
    line_parser: LineParser,
    header_parser: LineParser,
    head: Option<MessageHead>,
    trailers: Option<HeaderMap>,
    remaining: u64,
    reset_requested: bool,
    observed_methods: VecDeque<Method>,
    correlated: Option<Method>,
}

impl Decoder {
    /// A decoder for inbound requests (server side).
    pub fn request(config: DecoderConfig) -> Decoder {
        Decoder::new(config, Direction::Request)
    }

    /// A decoder for inbound responses (client side).
    pub fn response(config: DecoderConfig) -> Decoder {
        Decoder::new(config, Direction::Response)
    }

    fn new(config: DecoderConfig, direction: Direction) -> Decoder {
        Decoder {
            line_parser: LineParser::initial(config.max_initial_line_length),
            header_parser: LineParser::header(config.max_header_size),
            config,
            direction,
            state: State::SkipControlChars,
            head: None,
            trailers: None,
            remaining: 0,
            reset_requested: false,
            observed_methods: VecDeque::new(),
            correlated: None,
        }
    }

    /// Ask the decoder to discard the message in flight and look for a
    /// fresh one. Honoured at the top of the next [`decode`] call.
    ///
    /// [`decode`]: Decoder::decode
    pub fn request_reset(&mut self) {
        self.reset_requested = true;
    }

    /// True once a `101 Switching Protocols` has passed through; all
    /// further bytes are forwarded as opaque chunks.
    pub fn is_upgraded(&self) -> bool {
        self.state == State::Upgraded
    }

    /// Records the method of a request written on this connection, so the
    /// matching response can be framed (HEAD and CONNECT responses carry
    /// no body). Response direction only; the client codec feeds this.
    pub(crate) fn observe_method(&mut self, method: Method) {
        debug_assert_eq!(self.direction, Direction::Response);
        self.observed_methods.push_back(method);
    }

    /// Feeds inbound bytes, appending decoded objects to `out`. Partial
    /// input leaves the unconsumed tail in `src` for the next call.
    pub fn decode(&mut self, src: &mut BytesMut, out: &mut Vec<HttpObject>) -> Result<()> {
        if self.reset_requested {
            self.reset_now();
        }
        loop {
            match self.step(src, out) {
                Ok(Step::Continue) => {}
                Ok(Step::NeedMore) => return Ok(()),
                Err(err) => {
                    self.fail(src, out, err);
                    return Ok(());
                }
            }
        }
    }

    /// Signals end of stream: decodes what remains, then settles the
    /// in-flight message per the close rules.
    pub fn decode_eof(&mut self, src: &mut BytesMut, out: &mut Vec<HttpObject>) -> Result<()> {
        self.decode(src, out)?;
        match self.state {
            State::ReadVariableLengthContent => {
                // close is the normal terminator for this framing
                out.push(HttpObject::Last(HeaderMap::new()));
                self.reset_for_next();
            }
            State::ReadHeader => {
                out.push(HttpObject::Invalid(
                    Error::new_incomplete().with("connection closed before received headers"),
                ));
                self.reset_for_next();
            }
            State::ReadFixedLengthContent => {
                if self.remaining > 0 {
                    out.push(HttpObject::Invalid(Error::new_incomplete()));
                } else {
                    out.push(HttpObject::Last(HeaderMap::new()));
                }
                self.reset_for_next();
            }
            State::ReadChunkSize
            | State::ReadChunkedContent
            | State::ReadChunkDelimiter
            | State::ReadChunkFooter => {
                out.push(HttpObject::Invalid(Error::new_incomplete()));
                self.reset_for_next();
            }
            _ => {}
        }
        Ok(())
    }

    fn step(&mut self, src: &mut BytesMut, out: &mut Vec<HttpObject>) -> Result<Step> {
        match self.state {
            State::SkipControlChars => {
                while let Some(&b) = src.first() {
                    if b.is_ascii_control() || b.is_ascii_whitespace() {
                        src.advance(1);
                    } else {
                        break;
                    }
                }
                if src.is_empty() {
                    Ok(Step::NeedMore)
                } else {
                    self.state = State::ReadInitial;
                    Ok(Step::Continue)
                }
            }
            State::ReadInitial => self.read_initial(src),
            State::ReadHeader => self.read_header(src, out),
            State::ReadFixedLengthContent => {
                if src.is_empty() {
                    return Ok(Step::NeedMore);
                }
                let n = self.content_window(src.len());
                out.push(HttpObject::Chunk(src.split_to(n).freeze()));
                self.remaining -= n as u64;
                if self.remaining == 0 {
                    out.push(HttpObject::Last(HeaderMap::new()));
                    self.reset_for_next();
                }
                Ok(Step::Continue)
            }
            State::ReadVariableLengthContent => {
                if src.is_empty() {
                    return Ok(Step::NeedMore);
                }
                let n = src.len().min(self.config.max_chunk_size);
                out.push(HttpObject::Chunk(src.split_to(n).freeze()));
                Ok(Step::Continue)
            }
            State::ReadChunkSize => {
                let line = match self.line_parser.parse(src)? {
                    Some(line) => line,
                    None => return Ok(Step::NeedMore),
                };
                let size = parse_chunk_size(&line)?;
                trace!("chunk size {}", size);
                if size == 0 {
                    self.trailers = None;
                    self.state = State::ReadChunkFooter;
                } else {
                    self.remaining = size;
                    self.state = State::ReadChunkedContent;
                }
                Ok(Step::Continue)
            }
            State::ReadChunkedContent => {
                if src.is_empty() {
                    return Ok(Step::NeedMore);
                }
                let n = self.content_window(src.len());
                out.push(HttpObject::Chunk(src.split_to(n).freeze()));
                self.remaining -= n as u64;
                if self.remaining == 0 {
                    self.state = State::ReadChunkDelimiter;
                }
                Ok(Step::Continue)
            }
            State::ReadChunkDelimiter => {
                // everything up to and including the first LF is discarded
                match src.iter().position(|&b| b == b'\n') {
                    Some(lf) => {
                        src.advance(lf + 1);
                        self.state = State::ReadChunkSize;
                        Ok(Step::Continue)
                    }
                    None => {
                        src.clear();
                        Ok(Step::NeedMore)
                    }
                }
            }
            State::ReadChunkFooter => self.read_chunk_footer(src, out),
            State::BadMessage => {
                // drain everything until a reset is requested
                src.clear();
                Ok(Step::NeedMore)
            }
            State::Upgraded => {
                if src.is_empty() {
                    return Ok(Step::NeedMore);
                }
                let n = src.len();
                out.push(HttpObject::Chunk(src.split_to(n).freeze()));
                Ok(Step::Continue)
            }
        }
    }

    fn read_initial(&mut self, src: &mut BytesMut) -> Result<Step> {
        let line = match self.line_parser.parse(src)? {
            Some(line) => line,
            None => {
                src.reserve(self.config.initial_buffer_size);
                return Ok(Step::NeedMore);
            }
        };
        let (a, b, c) = match split_initial_line(&line) {
            Some(fields) => fields,
            None => {
                // stray bytes before a real start line; drop and rescan
                trace!("discarding invalid initial line");
                self.state = State::SkipControlChars;
                return Ok(Step::Continue);
            }
        };

        let head = match self.direction {
            Direction::Request => {
                if c.is_empty() {
                    trace!("discarding initial line with missing version");
                    self.state = State::SkipControlChars;
                    return Ok(Step::Continue);
                }
                let method: Method = std::str::from_utf8(a)
                    .map_err(|_| Parse::Method)?
                    .parse()?;
                let target = std::str::from_utf8(b)
                    .map_err(|_| Parse::Uri)?
                    .to_string();
                let version = Version::parse(std::str::from_utf8(c).map_err(|_| Parse::Version)?)?;
                MessageHead {
                    version,
                    start: StartLine::Request(RequestLine { method, target }),
                    headers: HeaderMap::new(),
                }
            }
            Direction::Response => {
                let version = Version::parse(std::str::from_utf8(a).map_err(|_| Parse::Version)?)?;
                let code = StatusCode::parse(std::str::from_utf8(b).map_err(|_| Parse::Status)?)?;
                let reason = if c.is_empty() {
                    None
                } else {
                    Some(
                        std::str::from_utf8(c)
                            .map_err(|_| Parse::Status)?
                            .to_string(),
                    )
                };
                MessageHead {
                    version,
                    start: StartLine::Status(StatusLine { code, reason }),
                    headers: HeaderMap::new(),
                }
            }
        };
        trace!("initial line: {}", head);
        self.head = Some(head);
        self.header_parser.reset();
        self.state = State::ReadHeader;
        Ok(Step::Continue)
    }

    fn read_header(&mut self, src: &mut BytesMut, out: &mut Vec<HttpObject>) -> Result<Step> {
        loop {
            let line = match self.header_parser.parse(src)? {
                Some(line) => line,
                None => return Ok(Step::NeedMore),
            };
            if line.is_empty() {
                return self.finish_headers(out);
            }
            let head = self.head.as_mut().expect("head while reading headers");
            if line[0] == b' ' || line[0] == b'\t' {
                // obs-fold continuation of the previous header value
                if !head.headers.fold_last_value(trim_ows(&line)) {
                    return Err(Parse::Header.into());
                }
                continue;
            }
            let (name, value) = split_header_line(&line)?;
            if self.config.validate_headers {
                validate_header_name(&name)?;
                validate_header_value(&value)?;
            }
            head.headers
                .add_unchecked(AsciiStr::from_bytes_unchecked(name), value);
        }
    }

    fn finish_headers(&mut self, out: &mut Vec<HttpObject>) -> Result<Step> {
        let head = self.head.take().expect("head after reading headers");
        self.correlated = match self.direction {
            Direction::Response => {
                let status = head.status().expect("response head has a status");
                if status.is_informational() {
                    None
                } else {
                    self.observed_methods.pop_front()
                }
            }
            Direction::Request => None,
        };

        if self.is_content_always_empty(&head) {
            let upgraded = head.status() == Some(StatusCode::SWITCHING_PROTOCOLS);
            out.push(HttpObject::Head(head));
            out.push(HttpObject::Last(HeaderMap::new()));
            if upgraded {
                debug!("101 switching protocols; decoder passing bytes through");
                self.state = State::Upgraded;
            } else {
                self.reset_for_next();
            }
            return Ok(Step::Continue);
        }

        if head
            .headers
            .contains_token("transfer-encoding", "chunked", true)
        {
            if !self.config.chunked_supported {
                return Err(Parse::TransferEncodingUnsupported.into());
            }
            out.push(HttpObject::Head(head));
            self.state = State::ReadChunkSize;
            return Ok(Step::Continue);
        }

        match self.effective_content_length(&head) {
            Some(Err(err)) => Err(err.into()),
            Some(Ok(0)) => {
                out.push(HttpObject::Head(head));
                out.push(HttpObject::Last(HeaderMap::new()));
                self.reset_for_next();
                Ok(Step::Continue)
            }
            Some(Ok(n)) => {
                self.remaining = n;
                out.push(HttpObject::Head(head));
                self.state = State::ReadFixedLengthContent;
                Ok(Step::Continue)
            }
            None => match self.direction {
                // RFC 7230 §3.3.3: an unframed request has no body
                Direction::Request => {
                    out.push(HttpObject::Head(head));
                    out.push(HttpObject::Last(HeaderMap::new()));
                    self.reset_for_next();
                    Ok(Step::Continue)
                }
                Direction::Response => {
                    out.push(HttpObject::Head(head));
                    self.state = State::ReadVariableLengthContent;
                    Ok(Step::Continue)
                }
            },
        }
    }

    fn read_chunk_footer(&mut self, src: &mut BytesMut, out: &mut Vec<HttpObject>) -> Result<Step> {
        loop {
            let line = match self.header_parser.parse(src)? {
                Some(line) => line,
                None => return Ok(Step::NeedMore),
            };
            if line.is_empty() {
                let trailers = self.trailers.take().unwrap_or_default();
                out.push(HttpObject::Last(trailers));
                self.reset_for_next();
                return Ok(Step::Continue);
            }
            if line[0] == b' ' || line[0] == b'\t' {
                let trailers = self.trailers.get_or_insert_with(HeaderMap::new);
                if !trailers.fold_last_value(trim_ows(&line)) {
                    return Err(Parse::Header.into());
                }
                continue;
            }
            let (name, value) = split_header_line(&line)?;
            if self.config.validate_headers {
                validate_header_name(&name)?;
                validate_header_value(&value)?;
                // framing headers have no business in a trailer section
                if is_forbidden_trailer(&name) {
                    trace!("dropping forbidden trailer {:?}", name);
                    continue;
                }
            }
            self.trailers
                .get_or_insert_with(HeaderMap::new)
                .add_unchecked(AsciiStr::from_bytes_unchecked(name), value);
        }
    }

    fn is_content_always_empty(&self, head: &MessageHead) -> bool {
        let code = match self.direction {
            Direction::Request => return false,
            Direction::Response => head.status().expect("response head has a status").as_u16(),
        };
        if let Some(ref method) = self.correlated {
            if *method == Method::Head {
                return true;
            }
            if *method == Method::Connect && (200..300).contains(&code) {
                return true;
            }
        }
        match code {
            // one exception: the legacy websocket handshake response
            // carries a 16-byte body
            100..=199 => {
                !(code == 101
                    && !head.headers.contains("sec-websocket-accept")
                    && head.headers.contains_token("upgrade", "websocket", true))
            }
            204 | 205 => true,
            // 304 is kept apart from the self-defined-length statuses
            304 => true,
            _ => false,
        }
    }

    fn effective_content_length(
        &self,
        head: &MessageHead,
    ) -> Option<std::result::Result<u64, Parse>> {
        if let Some(parsed) = head.headers.content_length_of("content-length") {
            return Some(parsed);
        }
        // legacy websocket handshakes carry key material as an unframed body
        match self.direction {
            Direction::Request => {
                if head.method() == Some(&Method::Get)
                    && head.headers.contains("sec-websocket-key1")
                    && head.headers.contains("sec-websocket-key2")
                {
                    return Some(Ok(8));
                }
            }
            Direction::Response => {
                if head.status() == Some(StatusCode::SWITCHING_PROTOCOLS)
                    && head.headers.contains("sec-websocket-origin")
                    && head.headers.contains("sec-websocket-location")
                {
                    return Some(Ok(16));
                }
            }
        }
        None
    }

    fn content_window(&self, readable: usize) -> usize {
        let cap = self.remaining.min(self.config.max_chunk_size as u64) as usize;
        readable.min(cap)
    }

    fn fail(&mut self, src: &mut BytesMut, out: &mut Vec<HttpObject>, err: Error) {
        debug!("decode failed: {}", err);
        self.state = State::BadMessage;
        src.clear();
        out.push(HttpObject::Invalid(err));
    }

    fn reset_for_next(&mut self) {
        self.head = None;
        self.trailers = None;
        self.correlated = None;
        self.remaining = 0;
        self.line_parser.reset();
        self.header_parser.reset();
        self.state = State::SkipControlChars;
    }

    fn reset_now(&mut self) {
        self.reset_requested = false;
        self.reset_for_next();
    }
}

fn is_forbidden_trailer(name: &Bytes) -> bool {
    name.eq_ignore_ascii_case(b"content-length")
        || name.eq_ignore_ascii_case(b"transfer-encoding")
        || name.eq_ignore_ascii_case(b"trailer")
}

fn trim_ows(mut octets: &[u8]) -> &[u8] {
    while let Some((&first, rest)) = octets.split_first() {
        if first == b' ' || first == b'\t' {
            octets = rest;
        } else {
            break;
        }
    }
    while let Some((&last, rest)) = octets.split_last() {
        if last == b' ' || last == b'\t' {
            octets = rest;
        } else {
            break;
        }
    }
    octets
}

/// Splits `name: value`, slicing out of the shared line buffer.
fn split_header_line(line: &Bytes) -> std::result::Result<(Bytes, Bytes), Parse> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(Parse::Header)?;
    if colon == 0 {
        return Err(Parse::Header);
    }
    let name = line.slice(..colon);
    let rest = &line[colon + 1..];
    let trimmed = trim_ows(rest);
    let start = colon + 1 + (rest.len() - trim_start_len(rest));
    let value = line.slice(start..start + trimmed.len());
    Ok((name, value))
}

fn trim_start_len(octets: &[u8]) -> usize {
    let mut len = octets.len();
    for &b in octets {
        if b == b' ' || b == b'\t' {
            len -= 1;
        } else {
            break;
        }
    }
    len
}

/// Splits an initial line into its three whitespace-delimited fields; the
/// third runs to the (trailing-whitespace-trimmed) end so a reason phrase
/// keeps its inner spaces. `None` when the first two fields are missing.
fn split_initial_line(line: &[u8]) -> Option<(&[u8], &[u8], &[u8])> {
    let a_start = find_non_whitespace(line, 0)?;
    let a_end = find_whitespace(line, a_start);
    let b_start = find_non_whitespace(line, a_end)?;
    let b_end = find_whitespace(line, b_start);
    let c_start = find_non_whitespace(line, b_end);
    let c_end = find_end(line);
    let c = match c_start {
        Some(start) if start < c_end => &line[start..c_end],
        _ => &line[0..0],
    };
    Some((&line[a_start..a_end], &line[b_start..b_end], c))
}

fn find_non_whitespace(line: &[u8], from: usize) -> Option<usize> {
    line[from..]
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|i| from + i)
}

fn find_whitespace(line: &[u8], from: usize) -> usize {
    line[from..]
        .iter()
        .position(|b| b.is_ascii_whitespace())
        .map(|i| from + i)
        .unwrap_or(line.len())
}

fn find_end(line: &[u8]) -> usize {
    line.iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(0)
}

/// Hex prefix of a chunk size line, up to `;`, whitespace, or a control
/// octet; chunk extensions are ignored.
fn parse_chunk_size(line: &[u8]) -> std::result::Result<u64, Parse> {
    let mut size: u64 = 0;
    let mut digits = 0usize;
    for &b in line {
        if b == b';' || b.is_ascii_whitespace() || b.is_ascii_control() {
            break;
        }
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return Err(Parse::ChunkSize),
        };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(digit as u64))
            .ok_or(Parse::ChunkSize)?;
        digits += 1;
    }
    if digits == 0 {
        return Err(Parse::ChunkSize);
    }
    Ok(size)
}
