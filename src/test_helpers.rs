//! Shared test utilities for the thumbnailer test suite.
//!
//! Provides synthetic images, an in-memory [`Source`], and a pipeline
//! [`Callback`] that records every hook it receives.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::test_helpers::*;
//!
//! let source = MemorySource::new().with("cat.jpg", create_test_jpeg(800, 600));
//! let (callback, events) = RecordingCallback::allowing();
//! // ... run a pipeline ...
//! assert_eq!(events.take(), vec!["authorize_before_access", "source_accessed"]);
//! ```

use crate::identifier::Identifier;
use crate::imaging::Info;
use crate::pipeline::{Callback, PipelineError};
use crate::source::{Source, SourceError, StatResult};
use image::{ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

// =========================================================================
// Synthetic images
// =========================================================================

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) % 256) as u8,
        ])
    })
}

/// Encode a gradient of the given size as JPEG.
pub fn create_test_jpeg(width: u32, height: u32) -> Vec<u8> {
    encode_gradient(width, height, ImageFormat::Jpeg)
}

/// Encode a gradient of the given size as PNG.
pub fn create_test_png(width: u32, height: u32) -> Vec<u8> {
    encode_gradient(width, height, ImageFormat::Png)
}

fn encode_gradient(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    gradient(width, height)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

// =========================================================================
// In-memory source
// =========================================================================

/// [`Source`] backed by a map, counting reads.
#[derive(Debug, Default)]
pub struct MemorySource {
    images: HashMap<String, Vec<u8>>,
    reads: Mutex<usize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, identifier: &str, bytes: Vec<u8>) -> Self {
        self.images.insert(identifier.to_string(), bytes);
        self
    }

    pub fn reads(&self) -> usize {
        *self.reads.lock().unwrap()
    }

    fn lookup(&self, identifier: &Identifier) -> Result<&Vec<u8>, SourceError> {
        self.images
            .get(identifier.as_str())
            .ok_or_else(|| SourceError::NotFound(identifier.clone()))
    }
}

impl Source for MemorySource {
    fn stat(&self, identifier: &Identifier) -> Result<StatResult, SourceError> {
        let bytes = self.lookup(identifier)?;
        Ok(StatResult {
            length: bytes.len() as u64,
            last_modified: None,
        })
    }

    fn read(&self, identifier: &Identifier) -> Result<Vec<u8>, SourceError> {
        *self.reads.lock().unwrap() += 1;
        self.lookup(identifier).cloned()
    }
}

// =========================================================================
// Recording callback
// =========================================================================

/// Names of the hooks a [`RecordingCallback`] saw, in order.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<&'static str>>>);

impl EventLog {
    fn push(&self, event: &'static str) {
        self.0.lock().unwrap().push(event);
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

/// Pipeline callback with fixed checkpoint answers that records every hook.
#[derive(Debug)]
pub struct RecordingCallback {
    pub before_access: bool,
    pub after_identify: bool,
    events: EventLog,
}

impl RecordingCallback {
    pub fn new(before_access: bool, after_identify: bool) -> (Self, EventLog) {
        let events = EventLog::default();
        let callback = Self {
            before_access,
            after_identify,
            events: events.clone(),
        };
        (callback, events)
    }

    pub fn allowing() -> (Self, EventLog) {
        Self::new(true, true)
    }
}

impl Callback for RecordingCallback {
    fn authorize_before_access(&mut self) -> Result<bool, PipelineError> {
        self.events.push("authorize_before_access");
        Ok(self.before_access)
    }

    fn authorize(&mut self) -> Result<bool, PipelineError> {
        self.events.push("authorize");
        Ok(self.after_identify)
    }

    fn source_accessed(&mut self, _: &StatResult) {
        self.events.push("source_accessed");
    }

    fn info_available(&mut self, _: &Info) {
        self.events.push("info_available");
    }

    fn will_stream_image_from_variant_cache(&mut self) {
        self.events.push("will_stream_image_from_variant_cache");
    }

    fn will_process_image(&mut self, _: &Info) {
        self.events.push("will_process_image");
    }
}
