//! `multipart/form-data` and `application/x-www-form-urlencoded` body
//! encoder.

use bytes::Bytes;

use crate::error::User;
use crate::message::MessageHead;
use crate::method::Method;
use crate::Result;

/// Largest chunk [`read_chunk`] hands out, and the body size above which
/// the request goes chunked instead of carrying `Content-Length`.
///
/// [`read_chunk`]: FormEncoder::read_chunk
const CHUNK_SIZE_THRESHOLD: usize = 8096;

/// How attribute keys and values are percent-encoded, and whether
/// same-named uploads collapse into `multipart/mixed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderMode {
    /// Default form encoding: space becomes `+`, `. - * _` survive.
    Rfc1738,
    /// Strict percent encoding: only `[A-Za-z0-9]` survives.
    Rfc3986,
    /// Like RFC 1738, but same-named uploads stay separate outer parts.
    Html5,
}

/// Builds a form body part by part and serves it back as chunks.
///
/// In multipart mode, consecutive file uploads sharing one field name
/// are regrouped under a nested `multipart/mixed` boundary (unless the
/// mode is HTML5), rewriting the already-emitted part in place.
pub struct FormEncoder {
    mode: EncoderMode,
    multipart: bool,
    charset: String,
    boundary: String,
    inner_boundary: Option<String>,
    segments: Vec<Vec<u8>>,
    pairs: Vec<(String, String)>,
    last_file: Option<LastFile>,
    finalized: bool,
    body_size: u64,
    read_seg: usize,
    read_off: usize,
}

/// Enough about the last plain file part to rewrite it for mixed mode.
struct LastFile {
    name: String,
    header_index: usize,
    filename: String,
    content_type: String,
    binary: bool,
    charset: Option<String>,
    size: u64,
}

impl FormEncoder {
    /// A `multipart/form-data` body builder. `TRACE` cannot carry one.
    pub fn multipart(method: &Method, mode: EncoderMode) -> Result<FormEncoder> {
        FormEncoder::new(method, mode, true)
    }

    /// An `application/x-www-form-urlencoded` body builder.
    pub fn urlencoded(method: &Method, mode: EncoderMode) -> Result<FormEncoder> {
        FormEncoder::new(method, mode, false)
    }

    fn new(method: &Method, mode: EncoderMode, multipart: bool) -> Result<FormEncoder> {
        if *method == Method::Trace {
            return Err(User::ForbiddenMethod.into());
        }
        Ok(FormEncoder {
            mode,
            multipart,
            charset: "utf-8".to_string(),
            boundary: random_boundary(),
            inner_boundary: None,
            segments: Vec::new(),
            pairs: Vec::new(),
            last_file: None,
            finalized: false,
            body_size: 0,
            read_seg: 0,
            read_off: 0,
        })
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn is_multipart(&self) -> bool {
        self.multipart
    }

    /// Appends a form field.
    pub fn add_attribute(&mut self, name: &str, value: &str) -> Result<()> {
        self.check_open()?;
        if !self.multipart {
            self.pairs.push((name.to_string(), value.to_string()));
            return Ok(());
        }
        self.close_mixed();

        let mut header = self.open_delimiter();
        header.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n", name).as_bytes(),
        );
        header.extend_from_slice(format!("Content-Length: {}\r\n", value.len()).as_bytes());
        header.extend_from_slice(
            format!("Content-Type: text/plain; charset={}\r\n", self.charset).as_bytes(),
        );
        header.extend_from_slice(b"\r\n");
        self.segments.push(header);
        self.segments.push(value.as_bytes().to_vec());
        self.last_file = None;
        Ok(())
    }

    /// Appends an uploaded file. Multipart mode only.
    pub fn add_file_upload(
        &mut self,
        name: &str,
        filename: &str,
        content_type: &str,
        binary: bool,
        charset: Option<&str>,
        data: Bytes,
    ) -> Result<()> {
        self.check_open()?;
        if !self.multipart {
            return Err(User::UnexpectedMessage.into());
        }

        let same_name = self
            .last_file
            .as_ref()
            .map(|last| last.name == name)
            .unwrap_or(false);

        if same_name && self.mode != EncoderMode::Html5 {
            if self.inner_boundary.is_none() {
                self.promote_to_mixed()?;
            }
            let inner = self.inner_boundary.clone().expect("mixed boundary");
            let mut header = Vec::new();
            header.extend_from_slice(format!("\r\n--{}\r\n", inner).as_bytes());
            push_attachment_headers(&mut header, filename, content_type, binary, charset, data.len() as u64);
            self.segments.push(header);
            self.segments.push(data.to_vec());
            return Ok(());
        }

        self.close_mixed();
        let mut header = self.open_delimiter();
        header.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                name, filename
            )
            .as_bytes(),
        );
        header.extend_from_slice(format!("Content-Length: {}\r\n", data.len()).as_bytes());
        push_content_type(&mut header, content_type, charset);
        if binary {
            header.extend_from_slice(b"Content-Transfer-Encoding: binary\r\n");
        }
        header.extend_from_slice(b"\r\n");
        let header_index = self.segments.len();
        self.segments.push(header);
        self.segments.push(data.to_vec());
        self.last_file = Some(LastFile {
            name: name.to_string(),
            header_index,
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            binary,
            charset: charset.map(|c| c.to_string()),
            size: data.len() as u64,
        });
        Ok(())
    }

    /// Rewrites the previously emitted file part in place: its headers
    /// become a `multipart/mixed` group holding it as the first
    /// attachment.
    fn promote_to_mixed(&mut self) -> Result<()> {
        let inner = random_boundary();
        let last = self.last_file.as_ref().expect("file part to promote");

        let mut header = if last.header_index == 0 {
            Vec::new()
        } else {
            b"\r\n".to_vec()
        };
        header.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        header.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n", last.name).as_bytes(),
        );
        header.extend_from_slice(
            format!("Content-Type: multipart/mixed; boundary={}\r\n", inner).as_bytes(),
        );
        header.extend_from_slice(b"\r\n");
        header.extend_from_slice(format!("--{}\r\n", inner).as_bytes());
        push_attachment_headers(
            &mut header,
            &last.filename,
            &last.content_type,
            last.binary,
            last.charset.as_deref(),
            last.size,
        );

        self.segments[last.header_index] = header;
        self.inner_boundary = Some(inner);
        Ok(())
    }

    /// A different field closes an open mixed group.
    fn close_mixed(&mut self) {
        if let Some(inner) = self.inner_boundary.take() {
            self.segments
                .push(format!("\r\n--{}--", inner).into_bytes());
        }
    }

    fn open_delimiter(&mut self) -> Vec<u8> {
        if self.segments.is_empty() {
            format!("--{}\r\n", self.boundary).into_bytes()
        } else {
            format!("\r\n--{}\r\n", self.boundary).into_bytes()
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.finalized {
            return Err(User::Reuse.into());
        }
        Ok(())
    }

    /// Seals the body and sets the request's `Content-Type` plus either
    /// `Content-Length` or `Transfer-Encoding: chunked`.
    pub fn finalize(&mut self, head: &mut MessageHead) -> Result<()> {
        self.check_open()?;
        self.finalized = true;

        if self.multipart {
            self.close_mixed();
            let close = if self.segments.is_empty() {
                format!("--{}--\r\n", self.boundary)
            } else {
                format!("\r\n--{}--\r\n", self.boundary)
            };
            self.segments.push(close.into_bytes());
            head.headers.set(
                "content-type",
                format!("multipart/form-data; boundary={}", self.boundary),
            )?;
        } else {
            let mut body = Vec::new();
            for (i, (name, value)) in self.pairs.iter().enumerate() {
                if i > 0 {
                    body.push(b'&');
                }
                body.extend_from_slice(encode_component(name, self.mode).as_bytes());
                body.push(b'=');
                body.extend_from_slice(encode_component(value, self.mode).as_bytes());
            }
            self.segments.push(body);
            head.headers
                .set("content-type", "application/x-www-form-urlencoded")?;
        }

        self.body_size = self.segments.iter().map(|s| s.len() as u64).sum();
        let already_chunked = head
            .headers
            .contains_token("transfer-encoding", "chunked", true);
        if !already_chunked && self.body_size <= CHUNK_SIZE_THRESHOLD as u64 {
            head.headers.set("content-length", self.body_size.to_string())?;
        } else {
            head.headers.remove("content-length");
            head.headers.set("transfer-encoding", "chunked")?;
        }
        Ok(())
    }

    /// Total body size; meaningful after [`finalize`].
    ///
    /// [`finalize`]: FormEncoder::finalize
    pub fn body_size(&self) -> u64 {
        self.body_size
    }

    /// The next body chunk of up to the chunk-size threshold, or `None`
    /// once the body is exhausted.
    pub fn read_chunk(&mut self) -> Option<Bytes> {
        if !self.finalized {
            return None;
        }
        let mut chunk = Vec::new();
        while chunk.len() < CHUNK_SIZE_THRESHOLD && self.read_seg < self.segments.len() {
            let segment = &self.segments[self.read_seg];
            let want = CHUNK_SIZE_THRESHOLD - chunk.len();
            let available = segment.len() - self.read_off;
            let take = want.min(available);
            chunk.extend_from_slice(&segment[self.read_off..self.read_off + take]);
            self.read_off += take;
            if self.read_off == segment.len() {
                self.read_seg += 1;
                self.read_off = 0;
            }
        }
        if chunk.is_empty() {
            None
        } else {
            Some(Bytes::from(chunk))
        }
    }

    /// The whole serialized body; test and small-message convenience.
    pub fn body(&mut self) -> Bytes {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_chunk() {
            out.extend_from_slice(&chunk);
        }
        Bytes::from(out)
    }
}

fn push_attachment_headers(
    header: &mut Vec<u8>,
    filename: &str,
    content_type: &str,
    binary: bool,
    charset: Option<&str>,
    size: u64,
) {
    header.extend_from_slice(
        format!("Content-Disposition: attachment; filename=\"{}\"\r\n", filename).as_bytes(),
    );
    header.extend_from_slice(format!("Content-Length: {}\r\n", size).as_bytes());
    push_content_type(header, content_type, charset);
    if binary {
        header.extend_from_slice(b"Content-Transfer-Encoding: binary\r\n");
    }
    header.extend_from_slice(b"\r\n");
}

fn push_content_type(header: &mut Vec<u8>, content_type: &str, charset: Option<&str>) {
    match charset {
        Some(charset) => header.extend_from_slice(
            format!("Content-Type: {}; charset={}\r\n", content_type, charset).as_bytes(),
        ),
        None => {
            header.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes())
        }
    }
}

fn random_boundary() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Percent-encodes one component: `[A-Za-z0-9]` always survives,
/// everything else is `%HH` per byte, with the mode's relaxations.
fn encode_component(s: &str, mode: EncoderMode) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => out.push(b as char),
            b'.' | b'-' | b'*' | b'_' if mode != EncoderMode::Rfc3986 => out.push(b as char),
            b' ' if mode != EncoderMode::Rfc3986 => out.push('+'),
            b => {
                out.push('%');
                out.push_str(&format!("{:02X}", b));
            }
        }
    }
    out
}
