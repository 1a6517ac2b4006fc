//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations the pipeline needs:
//! identify (read dimensions and format) and process (run an
//! [`OperationList`] and return encoded bytes).
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate.

use crate::format::Format;
use crate::operation::OperationList;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode source image: {0}")]
    Decode(String),
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),
    #[error("Operation list has no encode step")]
    MissingEncode,
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub width: u32,
    pub height: u32,
    /// Detected source format, if the registry knows it.
    pub source_format: Option<Format>,
}

/// Trait for image processing backends.
pub trait ImageBackend: Send + Sync {
    /// Read dimensions and format of an encoded source image.
    fn identify(&self, data: &[u8]) -> Result<Info, BackendError>;

    /// Apply `operations` in order to the source image and return the bytes
    /// produced by its encode step.
    fn process(&self, data: &[u8], operations: &OperationList) -> Result<Vec<u8>, BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mock backend that records operations without executing them.
    #[derive(Default)]
    pub struct MockBackend {
        pub identify_results: Mutex<Vec<Info>>,
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Identify { bytes: usize },
        Process { identifier: String, fingerprint: String },
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_info(info: Vec<Info>) -> Self {
            Self {
                identify_results: Mutex::new(info),
                operations: Mutex::new(Vec::new()),
            }
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }
    }

    /// Bytes the mock "encodes" for an operation list.
    pub fn mock_output(operations: &OperationList) -> Vec<u8> {
        format!("{}|{}", operations.identifier(), operations.fingerprint()).into_bytes()
    }

    impl ImageBackend for MockBackend {
        fn identify(&self, data: &[u8]) -> Result<Info, BackendError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Identify { bytes: data.len() });

            self.identify_results
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| BackendError::ProcessingFailed("No mock info".to_string()))
        }

        fn process(
            &self,
            _data: &[u8],
            operations: &OperationList,
        ) -> Result<Vec<u8>, BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::Process {
                identifier: operations.identifier().to_string(),
                fingerprint: operations.fingerprint(),
            });
            Ok(mock_output(operations))
        }
    }

    #[test]
    fn mock_records_identify() {
        let backend = MockBackend::with_info(vec![Info {
            width: 800,
            height: 600,
            source_format: Some(Format::Jpeg),
        }]);

        let info = backend.identify(b"abc").unwrap();
        assert_eq!((info.width, info.height), (800, 600));

        let ops = backend.get_operations();
        assert_eq!(ops, vec![RecordedOp::Identify { bytes: 3 }]);
    }

    #[test]
    fn mock_identify_without_results_errors() {
        let backend = MockBackend::new();
        assert!(backend.identify(b"abc").is_err());
    }

    #[test]
    fn mock_records_process() {
        use crate::identifier::Identifier;
        use crate::operation::{Crop, Encode};

        let backend = MockBackend::new();
        let list = OperationList::builder(Identifier::from("a.jpg"))
            .with_operation(Crop::ToSquare)
            .with_operation(Encode::new(Format::Png))
            .build();

        let out = backend.process(b"src", &list).unwrap();
        assert_eq!(out, b"a.jpg|crop:square/encode:png");
        assert!(matches!(
            &backend.get_operations()[0],
            RecordedOp::Process { identifier, .. } if identifier == "a.jpg"
        ));
    }
}
