//! Decoded body parts: form attributes and file uploads.

use std::io::Read;
use std::path::Path;

use bytes::Bytes;

use super::storage::Storage;
use super::{MultipartConfig, TempFileRegistry};
use crate::error::{Error, User};
use crate::Result;

const STREAM_READ_SIZE: usize = 16 * 1024;

/// What a part is to the form that carried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    /// A plain form field.
    Attribute,
    /// An uploaded file.
    FileUpload,
}

/// One element of a decoded body, in receive order.
#[derive(Debug)]
pub struct Part {
    kind: PartKind,
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    transfer_encoding: Option<String>,
    charset: Option<String>,
    /// Size announced by the part's own `Content-Length`, when present.
    declared_size: Option<u64>,
    max_size: Option<u64>,
    completed: bool,
    storage: Storage,
}

impl Part {
    pub(crate) fn attribute(
        name: String,
        config: &MultipartConfig,
        registry: TempFileRegistry,
    ) -> Part {
        Part {
            kind: PartKind::Attribute,
            name,
            filename: None,
            content_type: None,
            transfer_encoding: None,
            charset: None,
            declared_size: None,
            max_size: None,
            completed: false,
            storage: Storage::new(config, registry),
        }
    }

    pub(crate) fn file_upload(
        name: String,
        filename: String,
        config: &MultipartConfig,
        registry: TempFileRegistry,
    ) -> Part {
        Part {
            kind: PartKind::FileUpload,
            name,
            filename: Some(filename),
            content_type: None,
            transfer_encoding: None,
            charset: None,
            declared_size: None,
            max_size: None,
            completed: false,
            storage: Storage::new(config, registry),
        }
    }

    pub fn kind(&self) -> PartKind {
        self.kind
    }

    pub fn is_file_upload(&self) -> bool {
        self.kind == PartKind::FileUpload
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn transfer_encoding(&self) -> Option<&str> {
        self.transfer_encoding.as_deref()
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub fn declared_size(&self) -> Option<u64> {
        self.declared_size
    }

    /// Bytes received so far.
    pub fn size(&self) -> u64 {
        self.storage.size()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn in_memory(&self) -> bool {
        self.storage.in_memory()
    }

    pub(crate) fn set_filename(&mut self, filename: String) {
        self.filename = Some(filename);
    }

    pub(crate) fn set_content_type(&mut self, content_type: String) {
        self.content_type = Some(content_type);
    }

    pub(crate) fn set_transfer_encoding(&mut self, encoding: String) {
        self.transfer_encoding = Some(encoding);
    }

    pub(crate) fn set_charset(&mut self, charset: String) {
        self.charset = Some(charset);
    }

    pub(crate) fn set_declared_size(&mut self, size: u64) {
        self.declared_size = Some(size);
    }

    /// Caps how much content this part may accumulate.
    pub fn set_max_size(&mut self, max: u64) {
        self.max_size = Some(max);
    }

    /// Replaces the payload outright and marks the part completed.
    pub fn set_content(&mut self, content: Bytes) -> Result<()> {
        self.storage.reset();
        self.completed = false;
        self.add_content(content, true)
    }

    /// Appends a payload fragment; `last` completes the part.
    pub fn add_content(&mut self, content: Bytes, last: bool) -> Result<()> {
        let next_size = self.storage.size() + content.len() as u64;
        if let Some(max) = self.max_size {
            if next_size > max {
                return Err(Error::new_too_large().with("part exceeds configured maximum"));
            }
        }
        if let Some(declared) = self.declared_size {
            if next_size > declared {
                return Err(Error::new_too_large().with("part exceeds its declared size"));
            }
        }
        self.storage.write(&content).map_err(Error::new_io)?;
        if last {
            self.completed = true;
        }
        Ok(())
    }

    /// Consumes a byte stream as the payload, reading 16 KiB at a time.
    pub fn set_content_from(&mut self, reader: &mut dyn Read) -> Result<()> {
        self.storage.reset();
        self.completed = false;
        let mut buf = vec![0u8; STREAM_READ_SIZE];
        loop {
            let n = reader.read(&mut buf).map_err(Error::new_io)?;
            if n == 0 {
                break;
            }
            self.add_content(Bytes::copy_from_slice(&buf[..n]), false)?;
        }
        self.completed = true;
        Ok(())
    }

    /// The whole payload of a completed part.
    pub fn bytes(&mut self) -> Result<Bytes> {
        if !self.completed {
            return Err(User::NotEnoughData.into());
        }
        self.storage.bytes().map_err(Error::new_io)
    }

    /// Successive payload windows of up to `len` bytes; empty at the end.
    pub fn chunk(&mut self, len: usize) -> Result<Bytes> {
        if !self.completed {
            return Err(User::NotEnoughData.into());
        }
        self.storage.chunk(len).map_err(Error::new_io)
    }

    /// The payload decoded as UTF-8 text.
    pub fn string(&mut self) -> Result<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|err| Error::new_io(std::io::Error::new(std::io::ErrorKind::InvalidData, err)))
    }

    /// Moves the payload into a caller-provided file.
    pub fn rename_to(&mut self, destination: &Path) -> Result<()> {
        if !self.completed {
            return Err(User::NotEnoughData.into());
        }
        self.storage.rename_to(destination).map_err(Error::new_io)
    }

    /// Releases the in-memory buffer or deletes the temp file.
    pub fn delete(&mut self) {
        self.storage.delete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multipart::StoragePolicy;

    fn config() -> MultipartConfig {
        MultipartConfig::default()
    }

    fn attribute(name: &str) -> Part {
        Part::attribute(name.to_string(), &config(), TempFileRegistry::new())
    }

    #[test]
    fn accumulates_and_completes() {
        let mut part = attribute("a");
        part.add_content(Bytes::from_static(b"foo"), false).unwrap();
        assert!(part.bytes().is_err());
        part.add_content(Bytes::from_static(b"bar"), true).unwrap();
        assert!(part.is_completed());
        assert_eq!(&part.bytes().unwrap()[..], b"foobar");
        assert_eq!(part.string().unwrap(), "foobar");
    }

    #[test]
    fn declared_size_is_enforced() {
        let mut part = attribute("a");
        part.set_declared_size(3);
        let err = part
            .add_content(Bytes::from_static(b"toolong"), true)
            .unwrap_err();
        assert!(err.is_too_large());
    }

    #[test]
    fn max_size_is_enforced() {
        let mut part = attribute("a");
        part.set_max_size(4);
        part.add_content(Bytes::from_static(b"1234"), false).unwrap();
        let err = part
            .add_content(Bytes::from_static(b"5"), true)
            .unwrap_err();
        assert!(err.is_too_large());
    }

    #[test]
    fn set_content_replaces() {
        let mut part = attribute("a");
        part.add_content(Bytes::from_static(b"old"), true).unwrap();
        part.set_content(Bytes::from_static(b"new")).unwrap();
        assert_eq!(&part.bytes().unwrap()[..], b"new");
    }

    #[test]
    fn stream_ingestion() {
        let mut part = attribute("a");
        let mut source = &b"streamed contents"[..];
        part.set_content_from(&mut source).unwrap();
        assert_eq!(&part.bytes().unwrap()[..], b"streamed contents");
    }

    #[test]
    fn mixed_part_promotes_and_renames() {
        let registry = TempFileRegistry::new();
        let mut config = MultipartConfig::default();
        config.policy = StoragePolicy::Mixed { limit: 4 };
        let mut part = Part::file_upload(
            "f".to_string(),
            "data.bin".to_string(),
            &config,
            registry.clone(),
        );
        part.add_content(Bytes::from_static(b"0123456789"), true)
            .unwrap();
        assert!(!part.in_memory());

        let dest =
            std::env::temp_dir().join(format!("httpwire-part-{:x}", rand::random::<u64>()));
        part.rename_to(&dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
        registry.clean();
        assert!(dest.exists());
        std::fs::remove_file(&dest).unwrap();
    }
}
