//! `multipart/form-data` body decoder.

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};

use super::part::Part;
use super::{MultipartConfig, TempFileRegistry};
use crate::error::{Error, Multipart, User};
use crate::message::HttpObject;
use crate::Result;

/// Incremental decoder for one `multipart/form-data` body.
///
/// Content chunks are buffered in a single growable buffer and decoded
/// as far as the boundary grammar allows; completed parts queue up for
/// [`next`], while the one still accumulating shows through
/// [`current_partial`]. Call [`destroy`] when the request ends to release
/// buffers and sweep temp files.
///
/// [`next`]: MultipartDecoder::next
/// [`current_partial`]: MultipartDecoder::current_partial
/// [`destroy`]: MultipartDecoder::destroy
pub struct MultipartDecoder {
    config: MultipartConfig,
    registry: TempFileRegistry,
    boundary: String,
    mixed_boundary: Option<String>,
    state: State,
    undecoded: BytesMut,
    rpos: usize,
    last_chunk: bool,
    scratch: Scratch,
    current: Option<Part>,
    /// Field name a nested `multipart/mixed` group belongs to.
    mixed_field_name: Option<String>,
    ready: VecDeque<Part>,
    destroyed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NotStarted,
    HeaderDelimiter,
    Disposition,
    Field,
    FileUpload,
    MixedDelimiter,
    MixedDisposition,
    MixedFileUpload,
    PreEpilogue,
    Epilogue,
}

/// Part headers parsed so far; survives across offers when a header
/// block straddles chunks.
#[derive(Default)]
struct Scratch {
    disposition: Option<Disposition>,
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
    mixed_boundary: Option<String>,
    charset: Option<String>,
    transfer_encoding: Option<String>,
    declared_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    FormData,
    Attachment,
}

impl MultipartDecoder {
    /// Builds a decoder from the request's `Content-Type` value, which
    /// must carry the boundary parameter.
    pub fn new(content_type: &str, config: MultipartConfig) -> Result<MultipartDecoder> {
        let (_, params) = split_mime_params(content_type);
        let mut boundary = None;
        let mut charset = None;
        for (key, value) in params {
            match key.as_str() {
                "boundary" => boundary = Some(value),
                "charset" => charset = Some(value),
                _ => {}
            }
        }
        let boundary = boundary.ok_or(Multipart::Delimiter)?;
        if boundary.is_empty() {
            return Err(Multipart::Delimiter.into());
        }
        let mut config = config;
        if let Some(charset) = charset {
            // the body-level charset wins over the configured default
            config.charset = charset;
        }
        Ok(MultipartDecoder {
            registry: TempFileRegistry::new(),
            config,
            boundary,
            mixed_boundary: None,
            state: State::NotStarted,
            undecoded: BytesMut::new(),
            rpos: 0,
            last_chunk: false,
            scratch: Scratch::default(),
            current: None,
            mixed_field_name: None,
            ready: VecDeque::new(),
            destroyed: false,
        })
    }

    /// Feeds one decoded object from the message stream.
    pub fn offer(&mut self, obj: &HttpObject) -> Result<()> {
        if self.destroyed {
            return Err(User::Reuse.into());
        }
        match *obj {
            HttpObject::Chunk(ref data) => {
                self.undecoded.extend_from_slice(data);
            }
            HttpObject::Last(_) => {
                self.last_chunk = true;
            }
            _ => {}
        }
        self.parse()?;
        if self.rpos > self.config.discard_threshold {
            self.undecoded.advance(self.rpos);
            self.rpos = 0;
        }
        Ok(())
    }

    /// Whether a completed part is waiting. Once the terminal chunk was
    /// seen and everything is drained, this reports end-of-data.
    pub fn has_next(&self) -> Result<bool> {
        if self.destroyed {
            return Err(User::Reuse.into());
        }
        if self.state == State::Epilogue && self.ready.is_empty() {
            return Err(Multipart::EndOfData.into());
        }
        Ok(!self.ready.is_empty())
    }

    /// Pops the next completed part, in receive order.
    pub fn next(&mut self) -> Option<Part> {
        self.ready.pop_front()
    }

    /// The part currently being accumulated, for progress reporting.
    pub fn current_partial(&self) -> Option<&Part> {
        self.current.as_ref()
    }

    /// Completed parts not yet popped.
    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.ready.iter()
    }

    /// Completed parts for one field name.
    pub fn parts_of(&self, name: &str) -> Vec<&Part> {
        self.ready.iter().filter(|p| p.name() == name).collect()
    }

    /// Deletes every temp file this request created.
    pub fn clean_files(&self) {
        self.registry.clean();
    }

    /// Releases the input buffer and all unpopped parts, then sweeps
    /// temp files.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.undecoded.clear();
        self.rpos = 0;
        self.current = None;
        self.ready.clear();
        if self.config.delete_on_destroy {
            self.registry.clean();
        }
    }

    fn parse(&mut self) -> Result<()> {
        loop {
            let progressed = match self.state {
                State::NotStarted => self.parse_preamble()?,
                State::HeaderDelimiter => self.parse_delimiter(false)?,
                State::Disposition => self.parse_disposition(false)?,
                State::Field | State::FileUpload => self.parse_content(false)?,
                State::MixedDelimiter => self.parse_delimiter(true)?,
                State::MixedDisposition => self.parse_disposition(true)?,
                State::MixedFileUpload => self.parse_content(true)?,
                State::PreEpilogue => {
                    self.discard_rest();
                    if self.last_chunk {
                        self.state = State::Epilogue;
                        true
                    } else {
                        false
                    }
                }
                State::Epilogue => {
                    self.discard_rest();
                    false
                }
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    /// Anything before the first boundary is preamble and is discarded.
    fn parse_preamble(&mut self) -> Result<bool> {
        let open = format!("--{}", self.boundary);
        let close = format!("--{}--", self.boundary);
        loop {
            let line = match self.read_line() {
                Some(line) => line,
                None => return Ok(false),
            };
            let line = trim_trailing_ws(&line);
            if line == open.as_bytes() {
                self.state = State::Disposition;
                return Ok(true);
            }
            if line == close.as_bytes() {
                self.state = State::PreEpilogue;
                return Ok(true);
            }
            trace!("discarding preamble line");
        }
    }

    fn parse_delimiter(&mut self, mixed: bool) -> Result<bool> {
        let boundary = if mixed {
            self.mixed_boundary.as_deref().expect("mixed boundary set")
        } else {
            &self.boundary
        };
        let open = format!("--{}", boundary);
        let close = format!("--{}--", boundary);

        let line = match self.read_line() {
            Some(line) => line,
            None => {
                // Flash uploaders may end the stream right after `--`
                let tail = &self.undecoded[self.rpos..];
                if self.last_chunk && trim_trailing_ws(tail) == close.as_bytes() {
                    self.rpos = self.undecoded.len();
                    return self.delimiter_close(mixed);
                }
                return Ok(false);
            }
        };
        let line = trim_trailing_ws(&line);
        if line == open.as_bytes() {
            self.state = if mixed {
                State::MixedDisposition
            } else {
                State::Disposition
            };
            return Ok(true);
        }
        if line == close.as_bytes() {
            return self.delimiter_close(mixed);
        }
        Err(Multipart::Delimiter.into())
    }

    fn delimiter_close(&mut self, mixed: bool) -> Result<bool> {
        if mixed {
            self.mixed_boundary = None;
            self.mixed_field_name = None;
            self.state = State::HeaderDelimiter;
        } else {
            self.state = State::PreEpilogue;
        }
        Ok(true)
    }

    fn parse_disposition(&mut self, mixed: bool) -> Result<bool> {
        loop {
            let line = match self.read_line() {
                Some(line) => line,
                None => return Ok(false),
            };
            if line.is_empty() {
                return self.finish_disposition(mixed).map(|_| true);
            }
            self.parse_part_header(&line)?;
        }
    }

    fn parse_part_header(&mut self, line: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(line).map_err(|_| Error::from(Multipart::Disposition))?;
        let colon = text.find(':').ok_or(Multipart::Disposition)?;
        let header = text[..colon].trim();
        let value = &text[colon + 1..];

        if header.eq_ignore_ascii_case("content-disposition") {
            let segments = split_quoted(value, ';');
            let mut segments = segments.into_iter();
            let kind = segments.next().unwrap_or_default();
            self.scratch.disposition = match kind.trim() {
                kind if kind.eq_ignore_ascii_case("form-data") => Some(Disposition::FormData),
                kind if kind.eq_ignore_ascii_case("attachment")
                    || kind.eq_ignore_ascii_case("file") =>
                {
                    Some(Disposition::Attachment)
                }
                _ => return Err(Multipart::Disposition.into()),
            };
            for segment in segments {
                let (key, raw) = match segment.split_once('=') {
                    Some(pair) => pair,
                    None => continue,
                };
                let key = key.trim().to_ascii_lowercase();
                match key.as_str() {
                    // a filename keeps its quoted spelling untouched
                    "filename" => self.scratch.filename = Some(unquote(raw.trim()).to_string()),
                    "name" => self.scratch.name = Some(clean_param_value(raw)),
                    "charset" => self.scratch.charset = Some(clean_param_value(raw)),
                    "size" => {
                        self.scratch.declared_size = clean_param_value(raw).parse::<u64>().ok()
                    }
                    _ => {}
                }
            }
        } else if header.eq_ignore_ascii_case("content-type") {
            let (mime, params) = split_mime_params(value);
            if mime.eq_ignore_ascii_case("multipart/mixed") {
                let boundary = params
                    .into_iter()
                    .find(|(k, _)| k == "boundary")
                    .map(|(_, v)| v)
                    .ok_or(Multipart::Delimiter)?;
                self.scratch.mixed_boundary = Some(boundary);
            } else {
                self.scratch.content_type = Some(mime);
                for (key, value) in params {
                    if key == "charset" {
                        self.scratch.charset = Some(value);
                    }
                }
            }
        } else if header.eq_ignore_ascii_case("content-transfer-encoding") {
            let encoding = value.trim().to_ascii_lowercase();
            match encoding.as_str() {
                "7bit" | "8bit" | "binary" => self.scratch.transfer_encoding = Some(encoding),
                _ => return Err(Multipart::TransferEncoding.into()),
            }
        } else if header.eq_ignore_ascii_case("content-length") {
            self.scratch.declared_size = value.trim().parse::<u64>().ok();
        }
        Ok(())
    }

    fn finish_disposition(&mut self, mixed: bool) -> Result<()> {
        let scratch = std::mem::take(&mut self.scratch);

        if mixed {
            if scratch.disposition != Some(Disposition::Attachment) {
                return Err(Multipart::Disposition.into());
            }
            let name = self
                .mixed_field_name
                .clone()
                .ok_or(Multipart::Disposition)?;
            let filename = scratch.filename.clone().ok_or(Multipart::Disposition)?;
            let part = self.new_file_upload(name, filename, &scratch);
            self.current = Some(part);
            self.state = State::MixedFileUpload;
            return Ok(());
        }

        if scratch.disposition != Some(Disposition::FormData) {
            return Err(Multipart::Disposition.into());
        }
        let name = scratch.name.clone().ok_or(Multipart::Disposition)?;

        if let Some(inner) = scratch.mixed_boundary.clone() {
            // multiple files grouped under one field
            self.mixed_boundary = Some(inner);
            self.mixed_field_name = Some(name);
            self.state = State::MixedDelimiter;
            return Ok(());
        }

        if let Some(filename) = scratch.filename.clone() {
            let part = self.new_file_upload(name, filename, &scratch);
            self.current = Some(part);
            self.state = State::FileUpload;
        } else {
            let mut part = Part::attribute(name, &self.config, self.registry.clone());
            match scratch.charset {
                Some(charset) => part.set_charset(charset),
                None => part.set_charset(self.config.charset.clone()),
            }
            if let Some(content_type) = scratch.content_type {
                part.set_content_type(content_type);
            }
            if let Some(size) = scratch.declared_size {
                part.set_declared_size(size);
            }
            self.current = Some(part);
            self.state = State::Field;
        }
        Ok(())
    }

    fn new_file_upload(&mut self, name: String, filename: String, scratch: &Scratch) -> Part {
        let mut part = Part::file_upload(name, filename, &self.config, self.registry.clone());
        if let Some(ref content_type) = scratch.content_type {
            part.set_content_type(content_type.clone());
        }
        if let Some(ref charset) = scratch.charset {
            part.set_charset(charset.clone());
        }
        if let Some(ref encoding) = scratch.transfer_encoding {
            part.set_transfer_encoding(encoding.clone());
        }
        if let Some(size) = scratch.declared_size {
            part.set_declared_size(size);
        }
        part
    }

    /// Accumulates part content up to the next delimiter. The final
    /// payload excludes the CRLF that precedes the delimiter.
    fn parse_content(&mut self, mixed: bool) -> Result<bool> {
        let boundary = if mixed {
            self.mixed_boundary.as_deref().expect("mixed boundary set")
        } else {
            &self.boundary
        };
        let needle = format!("--{}", boundary);
        let hay = &self.undecoded[self.rpos..];

        match find_line_start(hay, needle.as_bytes()) {
            FindDelim::Found {
                content_end,
                delim_start,
            } => {
                let content = self.undecoded[self.rpos..self.rpos + content_end].to_vec();
                let part = self.current.as_mut().expect("part while reading content");
                part.add_content(content.into(), true)?;
                self.rpos += delim_start;

                let part = self.current.take().expect("completed part");
                trace!("part {:?} completed ({} bytes)", part.name(), part.size());
                self.ready.push_back(part);
                self.state = if mixed {
                    State::MixedDelimiter
                } else {
                    State::HeaderDelimiter
                };
                Ok(true)
            }
            FindDelim::Partial { content_end } => {
                // bytes before the candidate's CRLF are content either way
                if content_end > 0 {
                    let content = self.undecoded[self.rpos..self.rpos + content_end].to_vec();
                    let part = self.current.as_mut().expect("part while reading content");
                    part.add_content(content.into(), false)?;
                    self.rpos += content_end;
                }
                if self.last_chunk {
                    return Err(Multipart::Delimiter.into());
                }
                Ok(false)
            }
            FindDelim::NotFound => {
                // keep enough tail that a split delimiter can complete
                let reserve = needle.len() + 2;
                if hay.len() > reserve {
                    let feed = hay.len() - reserve;
                    let content = self.undecoded[self.rpos..self.rpos + feed].to_vec();
                    let part = self.current.as_mut().expect("part while reading content");
                    part.add_content(content.into(), false)?;
                    self.rpos += feed;
                }
                if self.last_chunk {
                    return Err(Multipart::Delimiter.into());
                }
                Ok(false)
            }
        }
    }

    /// Produces the next complete line (CRLF or lone LF), or `None`
    /// leaving the reader untouched.
    fn read_line(&mut self) -> Option<Vec<u8>> {
        let hay = &self.undecoded[self.rpos..];
        let lf = hay.iter().position(|&b| b == b'\n')?;
        let mut end = lf;
        if end > 0 && hay[end - 1] == b'\r' {
            end -= 1;
        }
        let line = hay[..end].to_vec();
        self.rpos += lf + 1;
        Some(line)
    }

    fn discard_rest(&mut self) {
        self.rpos = self.undecoded.len();
    }
}

impl Drop for MultipartDecoder {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Splits `mime; k=v; k2="v2"` into the mime token and its parameters.
fn split_mime_params(value: &str) -> (String, Vec<(String, String)>) {
    let mut segments = split_quoted(value, ';').into_iter();
    let mime = segments.next().unwrap_or_default().trim().to_string();
    let mut params = Vec::new();
    for segment in segments {
        if let Some((key, raw)) = segment.split_once('=') {
            params.push((
                key.trim().to_ascii_lowercase(),
                unquote(raw.trim()).to_string(),
            ));
        }
    }
    (mime, params)
}

/// Splits on `sep` outside double-quoted strings; inside quotes only `"`
/// and `\` are special.
fn split_quoted(value: &str, sep: char) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut piece = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in value.chars() {
        if escaped {
            piece.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                piece.push(c);
                escaped = true;
            }
            '"' => {
                piece.push(c);
                in_quotes = !in_quotes;
            }
            c if c == sep && !in_quotes => {
                pieces.push(std::mem::take(&mut piece));
            }
            c => piece.push(c),
        }
    }
    pieces.push(piece);
    pieces
}

fn trim_trailing_ws(mut octets: &[u8]) -> &[u8] {
    while let Some((last, rest)) = octets.split_last() {
        if last.is_ascii_whitespace() {
            octets = rest;
        } else {
            break;
        }
    }
    octets
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 && bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"' {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Parameter values other than `filename` have separator octets mapped
/// to space and quotes removed before trimming.
fn clean_param_value(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            ':' | ',' | '=' | ';' | '\t' => ' ',
            c => c,
        })
        .filter(|&c| c != '"')
        .collect::<String>()
        .trim()
        .to_string()
}

enum FindDelim {
    /// A real delimiter: content ends before its CRLF, the delimiter
    /// line starts at `delim_start`.
    Found {
        content_end: usize,
        delim_start: usize,
    },
    /// A candidate touches the end of the buffer; more bytes decide.
    Partial { content_end: usize },
    NotFound,
}

/// Finds `needle` at a line start within `hay`. A match only counts as a
/// delimiter when CRLF, LF, or `--` follows; a data line that merely
/// begins with the boundary text stays content.
fn find_line_start(hay: &[u8], needle: &[u8]) -> FindDelim {
    let mut from = 0;
    loop {
        let rel = match find(&hay[from..], needle) {
            Some(rel) => rel,
            None => return FindDelim::NotFound,
        };
        let j = from + rel;
        if j == 0 || hay[j - 1] != b'\n' {
            from = j + 1;
            continue;
        }
        let content_end = if j >= 2 && hay[j - 2] == b'\r' { j - 2 } else { j - 1 };
        let after = &hay[j + needle.len()..];
        if after.is_empty() || after == b"\r" || after == b"-" {
            return FindDelim::Partial { content_end };
        }
        if after.starts_with(b"\r\n") || after.starts_with(b"\n") || after.starts_with(b"--") {
            return FindDelim::Found {
                content_end,
                delim_start: j,
            };
        }
        from = j + 1;
    }
}

fn find(hay: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || hay.len() < needle.len() {
        return None;
    }
    hay.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::headers::HeaderMap;

    fn feed(decoder: &mut MultipartDecoder, body: &[u8]) {
        decoder
            .offer(&HttpObject::Chunk(Bytes::copy_from_slice(body)))
            .unwrap();
        decoder.offer(&HttpObject::Last(HeaderMap::new())).unwrap();
    }

    fn simple_body() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"--B\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"a\"\r\n");
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(b"bar\r\n");
        body.extend_from_slice(b"--B\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"f\"; filename=\"x.bin\"\r\n");
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
        body.extend_from_slice(b"Content-Transfer-Encoding: binary\r\n");
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(b"\x00\x01binary\xff\r\n");
        body.extend_from_slice(b"--B--\r\n");
        body
    }

    #[test]
    fn decodes_attribute_and_file() {
        let mut decoder =
            MultipartDecoder::new("multipart/form-data; boundary=B", MultipartConfig::default())
                .unwrap();
        feed(&mut decoder, &simple_body());

        assert!(decoder.has_next().unwrap());
        let mut attr = decoder.next().unwrap();
        assert_eq!(attr.name(), "a");
        assert!(!attr.is_file_upload());
        assert_eq!(attr.string().unwrap(), "bar");

        let mut file = decoder.next().unwrap();
        assert_eq!(file.name(), "f");
        assert_eq!(file.filename(), Some("x.bin"));
        assert_eq!(file.content_type(), Some("application/octet-stream"));
        assert_eq!(file.transfer_encoding(), Some("binary"));
        assert_eq!(&file.bytes().unwrap()[..], b"\x00\x01binary\xff");

        assert!(matches!(decoder.has_next(), Err(ref e) if e.is_multipart()));
    }

    #[test]
    fn byte_at_a_time_matches_one_shot() {
        let body = simple_body();
        let mut decoder =
            MultipartDecoder::new("multipart/form-data; boundary=B", MultipartConfig::default())
                .unwrap();
        for &b in &body {
            decoder
                .offer(&HttpObject::Chunk(Bytes::copy_from_slice(&[b])))
                .unwrap();
        }
        decoder.offer(&HttpObject::Last(HeaderMap::new())).unwrap();

        let mut attr = decoder.next().unwrap();
        assert_eq!(attr.string().unwrap(), "bar");
        let mut file = decoder.next().unwrap();
        assert_eq!(&file.bytes().unwrap()[..], b"\x00\x01binary\xff");
    }

    #[test]
    fn preamble_is_discarded() {
        let mut body = Vec::new();
        body.extend_from_slice(b"this is a preamble\r\nignored\r\n");
        body.extend_from_slice(&simple_body());
        let mut decoder =
            MultipartDecoder::new("multipart/form-data; boundary=B", MultipartConfig::default())
                .unwrap();
        feed(&mut decoder, &body);
        assert_eq!(decoder.parts().count(), 2);
    }

    #[test]
    fn quoted_boundary_from_content_type() {
        let mut decoder = MultipartDecoder::new(
            "multipart/form-data; boundary=\"B\"",
            MultipartConfig::default(),
        )
        .unwrap();
        feed(&mut decoder, &simple_body());
        assert_eq!(decoder.parts().count(), 2);
    }

    #[test]
    fn missing_boundary_is_an_error() {
        assert!(MultipartDecoder::new("multipart/form-data", MultipartConfig::default()).is_err());
    }

    #[test]
    fn mixed_mode_groups_files_under_one_name() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--B\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"quux\"\r\n");
        body.extend_from_slice(b"Content-Type: multipart/mixed; boundary=IN\r\n");
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(b"--IN\r\n");
        body.extend_from_slice(b"Content-Disposition: attachment; filename=\"f1.txt\"\r\n");
        body.extend_from_slice(b"Content-Type: text/plain\r\n");
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(b"first\r\n");
        body.extend_from_slice(b"--IN\r\n");
        body.extend_from_slice(b"Content-Disposition: attachment; filename=\"f2.txt\"\r\n");
        body.extend_from_slice(b"Content-Type: text/plain\r\n");
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(b"second\r\n");
        body.extend_from_slice(b"--IN--\r\n");
        body.extend_from_slice(b"--B--\r\n");

        let mut decoder =
            MultipartDecoder::new("multipart/form-data; boundary=B", MultipartConfig::default())
                .unwrap();
        feed(&mut decoder, &body);

        let mut f1 = decoder.next().unwrap();
        assert_eq!(f1.name(), "quux");
        assert_eq!(f1.filename(), Some("f1.txt"));
        assert_eq!(f1.string().unwrap(), "first");
        let mut f2 = decoder.next().unwrap();
        assert_eq!(f2.name(), "quux");
        assert_eq!(f2.filename(), Some("f2.txt"));
        assert_eq!(f2.string().unwrap(), "second");
    }

    #[test]
    fn flash_close_without_crlf_tolerated() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--B\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"a\"\r\n");
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(b"v\r\n");
        body.extend_from_slice(b"--B--");
        let mut decoder =
            MultipartDecoder::new("multipart/form-data; boundary=B", MultipartConfig::default())
                .unwrap();
        feed(&mut decoder, &body);
        let mut attr = decoder.next().unwrap();
        assert_eq!(attr.string().unwrap(), "v");
    }

    #[test]
    fn invalid_transfer_encoding_is_fatal() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--B\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"f\"; filename=\"x\"\r\n");
        body.extend_from_slice(b"Content-Transfer-Encoding: base64\r\n");
        body.extend_from_slice(b"\r\n");
        let mut decoder =
            MultipartDecoder::new("multipart/form-data; boundary=B", MultipartConfig::default())
                .unwrap();
        let err = decoder
            .offer(&HttpObject::Chunk(Bytes::from(body)))
            .unwrap_err();
        assert!(err.is_multipart());
    }

    #[test]
    fn current_partial_shows_progress() {
        let mut decoder =
            MultipartDecoder::new("multipart/form-data; boundary=B", MultipartConfig::default())
                .unwrap();
        let mut first = Vec::new();
        first.extend_from_slice(b"--B\r\n");
        first.extend_from_slice(b"Content-Disposition: form-data; name=\"f\"; filename=\"x\"\r\n");
        first.extend_from_slice(b"\r\n");
        first.extend_from_slice(b"lots of bytes that keep coming and coming and coming");
        decoder
            .offer(&HttpObject::Chunk(Bytes::from(first)))
            .unwrap();

        let partial = decoder.current_partial().expect("partial part");
        assert_eq!(partial.name(), "f");
        assert!(!partial.is_completed());
        assert!(partial.size() > 0);
    }

    #[test]
    fn file_content_containing_dashes_is_not_split() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--B\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"a\"\r\n");
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(b"dashes --B inside data\r\n");
        body.extend_from_slice(b"--B--\r\n");
        let mut decoder =
            MultipartDecoder::new("multipart/form-data; boundary=B", MultipartConfig::default())
                .unwrap();
        feed(&mut decoder, &body);
        let mut attr = decoder.next().unwrap();
        assert_eq!(attr.string().unwrap(), "dashes --B inside data");
    }

    #[test]
    fn data_line_starting_with_boundary_text_is_content() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--B\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"a\"\r\n");
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(b"line one\r\n--Bogus line\r\n");
        body.extend_from_slice(b"--B--\r\n");
        let mut decoder =
            MultipartDecoder::new("multipart/form-data; boundary=B", MultipartConfig::default())
                .unwrap();
        feed(&mut decoder, &body);
        let mut attr = decoder.next().unwrap();
        assert_eq!(attr.string().unwrap(), "line one\r\n--Bogus line");
    }

    #[test]
    fn destroy_sweeps_temp_files() {
        let mut config = MultipartConfig::default();
        config.policy = crate::multipart::StoragePolicy::Disk;
        let mut decoder =
            MultipartDecoder::new("multipart/form-data; boundary=B", config).unwrap();
        feed(&mut decoder, &simple_body());
        assert_eq!(decoder.registry.len(), 2);
        decoder.destroy();
        assert_eq!(decoder.registry.len(), 0);
    }
}
