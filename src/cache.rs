//! Variant cache: encoded thumbnails kept on disk between requests.
//!
//! Decoding, resizing and encoding dominate the cost of a request. When a
//! cache directory is configured, the pipeline stores every variant it
//! encodes and streams it back on the next identical request instead of
//! processing again.
//!
//! ## Cache keys
//!
//! The cache is **content-addressed**: a key is the SHA-256 of the source
//! bytes together with the [fingerprint](OperationList::fingerprint) of the
//! operation list. Replacing a source file or changing the configured output
//! format therefore produces a new key; renaming a file does not.
//!
//! JPEG quality is part of the key as well, so changing
//! `processor.quality` does not serve variants encoded at the old quality.
//!
//! ## Storage
//!
//! One file per variant, named by its hex key, directly under the cache
//! directory. Every write goes to its own uniquely named temporary file that
//! is renamed into place, so a concurrent reader sees either nothing or a
//! complete variant, and concurrent writers of one key never share a file.

use crate::operation::OperationList;
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Variant cache IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
        move |source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// SHA-256 of a source image's bytes, returned as a hex string.
pub fn hash_source(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Cache key of the variant `operations` produce from `source_hash`.
pub fn variant_key(source_hash: &str, operations: &OperationList, quality: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"variant\0");
    hasher.update(source_hash.as_bytes());
    hasher.update(b"\0");
    hasher.update(operations.fingerprint().as_bytes());
    hasher.update(b"\0");
    hasher.update(quality.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Directory of encoded variants keyed by [`variant_key`].
#[derive(Debug, Clone)]
pub struct VariantCache {
    dir: PathBuf,
}

impl VariantCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// Bytes of a cached variant, or `None` on a miss.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!(key, bytes = bytes.len(), "variant cache hit");
                Ok(Some(bytes))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CacheError::io(&path)(err)),
        }
    }

    /// Store a variant, replacing any previous entry under the same key.
    pub fn put(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir).map_err(CacheError::io(&self.dir))?;

        let path = self.path_for(key);
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{key}."))
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(CacheError::io(&self.dir))?;
        let tmp_path = tmp.path().to_path_buf();
        tmp.write_all(bytes).map_err(CacheError::io(&tmp_path))?;
        // A failed persist drops the temp file, which removes it.
        tmp.persist(&path)
            .map_err(|err| CacheError::io(&path)(err.error))?;
        debug!(key, bytes = bytes.len(), "variant cached");
        Ok(())
    }
}
