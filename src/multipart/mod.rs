//! `multipart/form-data` and `application/x-www-form-urlencoded` bodies.
//!
//! The decoder consumes the codec's content chunks and produces [`Part`]s
//! (form attributes and file uploads) whose payloads live in memory, on
//! disk, or migrate between the two as they grow. The encoder builds the
//! matching chunked bodies, including nested `multipart/mixed` grouping
//! of same-named uploads.

pub use self::decode::MultipartDecoder;
pub use self::encode::{EncoderMode, FormEncoder};
pub use self::part::{Part, PartKind};
pub use self::storage::{Storage, StoragePolicy};
pub use self::urlencoded::UrlEncodedDecoder;

mod decode;
mod encode;
mod part;
mod storage;
mod urlencoded;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Everything the multipart machinery once read from process-wide
/// statics, now carried explicitly.
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Storage tier for decoded parts.
    pub policy: StoragePolicy,
    /// Directory that receives part temp files.
    pub base_dir: PathBuf,
    pub file_prefix: &'static str,
    pub file_postfix: &'static str,
    /// Sweep this request's temp files when the decoder is destroyed.
    pub delete_on_destroy: bool,
    /// Buffered-but-consumed bytes beyond which the input buffer is
    /// compacted.
    pub discard_threshold: usize,
    /// Charset assumed for text when the body does not declare one.
    pub charset: String,
}

impl Default for MultipartConfig {
    fn default() -> MultipartConfig {
        MultipartConfig {
            policy: StoragePolicy::Mixed { limit: 16 * 1024 },
            base_dir: std::env::temp_dir(),
            file_prefix: "FUp_",
            file_postfix: ".tmp",
            delete_on_destroy: true,
            discard_threshold: 10 * 1024 * 1024,
            charset: "utf-8".to_string(),
        }
    }
}

/// Tracks every temp file a request's parts have created, so one sweep
/// can delete whatever is left when the request ends.
///
/// This registry is the one piece of multipart state that may be shared
/// across threads.
#[derive(Debug, Clone, Default)]
pub struct TempFileRegistry {
    files: Arc<Mutex<Vec<PathBuf>>>,
}

impl TempFileRegistry {
    pub fn new() -> TempFileRegistry {
        TempFileRegistry::default()
    }

    pub(crate) fn register(&self, path: PathBuf) {
        self.files.lock().expect("registry poisoned").push(path);
    }

    /// Deletes every registered file that still exists.
    pub fn clean(&self) {
        let files = {
            let mut guard = self.files.lock().expect("registry poisoned");
            std::mem::take(&mut *guard)
        };
        for path in files {
            match std::fs::remove_file(&path) {
                Ok(()) => trace!("removed temp file {:?}", path),
                Err(ref err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => debug!("failed to remove temp file {:?}: {}", path, err),
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.files.lock().expect("registry poisoned").len()
    }
}
