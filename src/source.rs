//! Source image storage.
//!
//! A [`Source`] turns an [`Identifier`] into bytes. The only implementation
//! shipped is [`FilesystemSource`], which treats identifiers as paths
//! relative to a root directory.

use crate::identifier::Identifier;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source image not found: {0}")]
    NotFound(Identifier),
    #[error("Identifier cannot be resolved by this source: {0}")]
    InvalidIdentifier(Identifier),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result of checking that a source image exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatResult {
    pub length: u64,
    pub last_modified: Option<SystemTime>,
}

/// Storage that source images are read from.
pub trait Source: Send + Sync {
    /// Check that the image exists without reading it.
    fn stat(&self, identifier: &Identifier) -> Result<StatResult, SourceError>;

    /// Read the whole image.
    fn read(&self, identifier: &Identifier) -> Result<Vec<u8>, SourceError>;
}

/// Images stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct FilesystemSource {
    root: PathBuf,
}

impl FilesystemSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map an identifier to a path under the root.
    ///
    /// Only plain relative components are accepted, so the result can never
    /// escape the root.
    pub fn resolve(&self, identifier: &Identifier) -> Result<PathBuf, SourceError> {
        let relative = Path::new(identifier.as_str());
        let mut path = self.root.clone();
        let mut components = 0;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    components += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(SourceError::InvalidIdentifier(identifier.clone()));
                }
            }
        }
        if components == 0 {
            return Err(SourceError::InvalidIdentifier(identifier.clone()));
        }
        Ok(path)
    }
}

fn not_found_as(identifier: &Identifier) -> impl FnOnce(io::Error) -> SourceError + '_ {
    move |err| match err.kind() {
        io::ErrorKind::NotFound => SourceError::NotFound(identifier.clone()),
        _ => SourceError::Io(err),
    }
}

impl Source for FilesystemSource {
    fn stat(&self, identifier: &Identifier) -> Result<StatResult, SourceError> {
        let path = self.resolve(identifier)?;
        let metadata = std::fs::metadata(&path).map_err(not_found_as(identifier))?;
        if !metadata.is_file() {
            return Err(SourceError::NotFound(identifier.clone()));
        }
        Ok(StatResult {
            length: metadata.len(),
            last_modified: metadata.modified().ok(),
        })
    }

    fn read(&self, identifier: &Identifier) -> Result<Vec<u8>, SourceError> {
        let path = self.resolve(identifier)?;
        std::fs::read(&path).map_err(not_found_as(identifier))
    }
}
