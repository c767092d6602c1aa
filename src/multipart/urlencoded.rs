//! `application/x-www-form-urlencoded` body decoder.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

use super::part::Part;
use super::{MultipartConfig, TempFileRegistry};
use crate::error::{Multipart, User};
use crate::message::HttpObject;
use crate::Result;

/// Incremental decoder for `key=value(&key=value)*` bodies.
///
/// Attributes surface through the same [`Part`] type the multipart
/// decoder produces, so handlers treat both body flavours alike.
pub struct UrlEncodedDecoder {
    config: MultipartConfig,
    registry: TempFileRegistry,
    state: State,
    undecoded: BytesMut,
    key: Option<String>,
    pending: Vec<u8>,
    ready: VecDeque<Part>,
    last_chunk: bool,
    destroyed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Accumulating a key, up to `=`.
    Disposition,
    /// Accumulating a value, up to `&` or end of line.
    Field,
    Epilogue,
}

impl UrlEncodedDecoder {
    pub fn new(config: MultipartConfig) -> UrlEncodedDecoder {
        UrlEncodedDecoder {
            config,
            registry: TempFileRegistry::new(),
            state: State::Disposition,
            undecoded: BytesMut::new(),
            key: None,
            pending: Vec::new(),
            ready: VecDeque::new(),
            last_chunk: false,
            destroyed: false,
        }
    }

    /// Feeds one decoded object from the message stream. The terminal
    /// chunk flushes a pending attribute, which may be empty.
    pub fn offer(&mut self, obj: &HttpObject) -> Result<()> {
        if self.destroyed {
            return Err(User::Reuse.into());
        }
        match *obj {
            HttpObject::Chunk(ref data) => self.undecoded.extend_from_slice(data),
            HttpObject::Last(_) => self.last_chunk = true,
            _ => {}
        }
        self.parse()
    }

    pub fn has_next(&self) -> Result<bool> {
        if self.destroyed {
            return Err(User::Reuse.into());
        }
        if self.state == State::Epilogue && self.ready.is_empty() {
            return Err(Multipart::EndOfData.into());
        }
        Ok(!self.ready.is_empty())
    }

    pub fn next(&mut self) -> Option<Part> {
        self.ready.pop_front()
    }

    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.ready.iter()
    }

    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.undecoded.clear();
        self.pending.clear();
        self.ready.clear();
        if self.config.delete_on_destroy {
            self.registry.clean();
        }
    }

    fn parse(&mut self) -> Result<()> {
        while !self.undecoded.is_empty() {
            let b = self.undecoded[0];
            self.undecoded.advance(1);
            match self.state {
                State::Disposition => match b {
                    b'=' => {
                        let raw = std::mem::take(&mut self.pending);
                        self.key = Some(decode_component(&raw)?);
                        self.state = State::Field;
                    }
                    // a bare key with no value still forms an attribute
                    b'&' => self.emit()?,
                    b'\r' | b'\n' => {}
                    b => self.pending.push(b),
                },
                State::Field => match b {
                    b'&' => {
                        self.emit()?;
                        self.state = State::Disposition;
                    }
                    b'\r' | b'\n' => {
                        self.emit()?;
                        self.state = State::Disposition;
                    }
                    b => self.pending.push(b),
                },
                State::Epilogue => {
                    self.undecoded.clear();
                }
            }
        }
        if self.last_chunk && self.state != State::Epilogue {
            if !self.pending.is_empty() || self.key.is_some() {
                self.emit()?;
            }
            self.state = State::Epilogue;
        }
        Ok(())
    }

    fn emit(&mut self) -> Result<()> {
        let raw = std::mem::take(&mut self.pending);
        let (name, value) = match self.key.take() {
            Some(key) => (key, decode_component(&raw)?),
            None => (decode_component(&raw)?, String::new()),
        };
        if name.is_empty() && value.is_empty() {
            return Ok(());
        }
        let mut part = Part::attribute(name, &self.config, self.registry.clone());
        part.set_charset(self.config.charset.clone());
        part.add_content(Bytes::from(value.into_bytes()), true)?;
        self.ready.push_back(part);
        Ok(())
    }
}

impl Drop for UrlEncodedDecoder {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Percent-decodes one component; `+` is a space, a malformed `%HH`
/// escape is an error.
fn decode_component(raw: &[u8]) -> Result<String> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let hi = hex_digit(*raw.get(i + 1).ok_or(Multipart::UrlDecode)?)?;
                let lo = hex_digit(*raw.get(i + 2).ok_or(Multipart::UrlDecode)?)?;
                out.push(hi << 4 | lo);
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8(out).map_err(|_| Multipart::UrlDecode.into())
}

fn hex_digit(b: u8) -> Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(Multipart::UrlDecode.into()),
    }
}
