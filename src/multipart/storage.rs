//! Tiered backing storage for part payloads.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};

use super::{MultipartConfig, TempFileRegistry};

/// Where a part's payload lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePolicy {
    /// Always in memory.
    Memory,
    /// Always a temp file.
    Disk,
    /// In memory until the payload crosses `limit`, then promoted to a
    /// temp file.
    Mixed { limit: u64 },
}

enum Backing {
    Memory(BytesMut),
    Disk(DiskFile),
}

struct DiskFile {
    path: PathBuf,
    file: File,
}

/// One part's payload, behind whichever backing the policy picked.
///
/// At most one backing is live at a time; promotion moves the
/// accumulated bytes to disk and releases the in-memory buffer.
pub struct Storage {
    policy: StoragePolicy,
    backing: Backing,
    size: u64,
    read_pos: u64,
    base_dir: PathBuf,
    file_prefix: &'static str,
    file_postfix: &'static str,
    registry: TempFileRegistry,
}

impl Storage {
    pub(crate) fn new(config: &MultipartConfig, registry: TempFileRegistry) -> Storage {
        Storage {
            policy: config.policy,
            backing: Backing::Memory(BytesMut::new()),
            size: 0,
            read_pos: 0,
            base_dir: config.base_dir.clone(),
            file_prefix: config.file_prefix,
            file_postfix: config.file_postfix,
            registry,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn in_memory(&self) -> bool {
        matches!(self.backing, Backing::Memory(_))
    }

    /// Appends payload bytes, honouring the storage policy.
    pub(crate) fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self.policy {
            StoragePolicy::Memory => {}
            StoragePolicy::Disk => {
                if self.in_memory() {
                    self.promote()?;
                }
            }
            StoragePolicy::Mixed { limit } => {
                if self.in_memory() && self.size + data.len() as u64 > limit {
                    self.promote()?;
                }
            }
        }
        match self.backing {
            Backing::Memory(ref mut buf) => buf.extend_from_slice(data),
            Backing::Disk(ref mut disk) => {
                disk.file.seek(SeekFrom::End(0))?;
                disk.file.write_all(data)?;
            }
        }
        self.size += data.len() as u64;
        Ok(())
    }

    /// Moves the accumulated bytes into a fresh temp file and drops the
    /// in-memory buffer.
    fn promote(&mut self) -> std::io::Result<()> {
        let path = self.temp_path();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        if let Backing::Memory(ref buf) = self.backing {
            file.write_all(buf)?;
        }
        trace!("promoted {} buffered bytes to {:?}", self.size, path);
        self.registry.register(path.clone());
        self.backing = Backing::Disk(DiskFile { path, file });
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let salt: u64 = rand::random();
        self.base_dir.join(format!(
            "{}{:016x}{}",
            self.file_prefix, salt, self.file_postfix
        ))
    }

    /// The whole payload.
    pub fn bytes(&mut self) -> std::io::Result<Bytes> {
        match self.backing {
            Backing::Memory(ref buf) => Ok(Bytes::copy_from_slice(buf)),
            Backing::Disk(ref mut disk) => {
                let mut contents = Vec::with_capacity(self.size as usize);
                disk.file.seek(SeekFrom::Start(0))?;
                disk.file.read_to_end(&mut contents)?;
                Ok(Bytes::from(contents))
            }
        }
    }

    /// The next `len` payload bytes, shorter at the end, empty once
    /// drained.
    pub fn chunk(&mut self, len: usize) -> std::io::Result<Bytes> {
        let remaining = (self.size - self.read_pos.min(self.size)) as usize;
        let take = remaining.min(len);
        if take == 0 {
            return Ok(Bytes::new());
        }
        let chunk = match self.backing {
            Backing::Memory(ref buf) => {
                let start = self.read_pos as usize;
                Bytes::copy_from_slice(&buf[start..start + take])
            }
            Backing::Disk(ref mut disk) => {
                let mut data = vec![0u8; take];
                disk.file.seek(SeekFrom::Start(self.read_pos))?;
                disk.file.read_exact(&mut data)?;
                Bytes::from(data)
            }
        };
        self.read_pos += take as u64;
        Ok(chunk)
    }

    /// Moves the payload to a caller-owned file. Disk parts copy their
    /// bytes and release the temp file; memory parts drain into the
    /// destination.
    pub fn rename_to(&mut self, destination: &Path) -> std::io::Result<()> {
        let mut dest = File::create(destination)?;
        match self.backing {
            Backing::Memory(ref buf) => {
                dest.write_all(buf)?;
            }
            Backing::Disk(ref mut disk) => {
                disk.file.seek(SeekFrom::Start(0))?;
                std::io::copy(&mut disk.file, &mut dest)?;
                let _ = std::fs::remove_file(&disk.path);
            }
        }
        let file = OpenOptions::new().read(true).write(true).open(destination)?;
        self.backing = Backing::Disk(DiskFile {
            path: destination.to_path_buf(),
            file,
        });
        self.read_pos = 0;
        Ok(())
    }

    /// Releases the in-memory buffer or deletes the temp file.
    pub fn delete(&mut self) {
        match self.backing {
            Backing::Memory(ref mut buf) => buf.clear(),
            Backing::Disk(ref disk) => {
                let _ = std::fs::remove_file(&disk.path);
            }
        }
        self.backing = Backing::Memory(BytesMut::new());
        self.size = 0;
        self.read_pos = 0;
    }

    /// Drops any accumulated payload, keeping the backing choice fresh
    /// for a replacement write.
    pub(crate) fn reset(&mut self) {
        self.delete();
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backing = match self.backing {
            Backing::Memory(_) => "memory",
            Backing::Disk(_) => "disk",
        };
        f.debug_struct("Storage")
            .field("backing", &backing)
            .field("size", &self.size)
            .finish()
    }
}
