//! Image operations and operation lists.
//!
//! These types describe *what* to do to a source image, not *how*. An
//! [`OperationList`] is the complete description of a variant image: the
//! identifier of its source plus an ordered sequence of [`Operation`]s.
//! Execution belongs to an [`ImageBackend`](crate::imaging::ImageBackend).
//!
//! Order matters. Each operation conceptually consumes the geometry or format
//! produced by the one before it, so `crop → scale → encode` and
//! `scale → crop → encode` are different variants.

use crate::format::Format;
use crate::identifier::Identifier;
use std::fmt;

/// Cropping operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crop {
    /// Crop to the largest centered square. The region is derived from the
    /// image dimensions when the operation runs.
    ToSquare,
}

/// How a [`Scale`] fits the image into its target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleMode {
    /// Scale so the whole image fits inside `width × height`, keeping its
    /// aspect ratio.
    AspectFitInside,
}

/// Scale to a pixel bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scale {
    pub width: u32,
    pub height: u32,
    pub mode: ScaleMode,
}

impl Scale {
    pub fn fit_inside(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            mode: ScaleMode::AspectFitInside,
        }
    }
}

/// Encode to an output format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Encode {
    format: Format,
}

impl Encode {
    pub fn new(format: Format) -> Self {
        Self { format }
    }

    pub fn format(&self) -> &Format {
        &self.format
    }
}

/// One step of an image transformation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Crop(Crop),
    Scale(Scale),
    Encode(Encode),
}

impl From<Crop> for Operation {
    fn from(crop: Crop) -> Self {
        Operation::Crop(crop)
    }
}

impl From<Scale> for Operation {
    fn from(scale: Scale) -> Self {
        Operation::Scale(scale)
    }
}

impl From<Encode> for Operation {
    fn from(encode: Encode) -> Self {
        Operation::Encode(encode)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Crop(Crop::ToSquare) => f.write_str("crop:square"),
            Operation::Scale(Scale {
                width,
                height,
                mode: ScaleMode::AspectFitInside,
            }) => write!(f, "scale:{width}x{height}:fit-inside"),
            Operation::Encode(encode) => write!(f, "encode:{}", encode.format.key()),
        }
    }
}

/// Ordered, immutable list of operations bound to one identifier.
///
/// Built with [`OperationList::builder`]. The builder takes the identifier up
/// front and keeps at most one [`Encode`] (a later one replaces an earlier
/// one in place), so a built list always satisfies both invariants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationList {
    identifier: Identifier,
    operations: Vec<Operation>,
}

impl OperationList {
    pub fn builder(identifier: Identifier) -> OperationListBuilder {
        OperationListBuilder {
            identifier,
            operations: Vec::new(),
        }
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Format of the encode step, if the list has one.
    pub fn output_format(&self) -> Option<&Format> {
        self.operations.iter().find_map(|op| match op {
            Operation::Encode(encode) => Some(encode.format()),
            _ => None,
        })
    }

    /// Stable textual description of the operations (not the identifier).
    ///
    /// Two lists with equal fingerprints produce the same variant from the
    /// same source bytes, which is what the variant cache keys on.
    pub fn fingerprint(&self) -> String {
        self.operations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl<'a> IntoIterator for &'a OperationList {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

/// Builder for [`OperationList`].
#[derive(Debug, Clone)]
pub struct OperationListBuilder {
    identifier: Identifier,
    operations: Vec<Operation>,
}

impl OperationListBuilder {
    pub fn with_operation(mut self, operation: impl Into<Operation>) -> Self {
        let operation = operation.into();
        if matches!(operation, Operation::Encode(_))
            && let Some(existing) = self
                .operations
                .iter_mut()
                .find(|op| matches!(op, Operation::Encode(_)))
        {
            *existing = operation;
            return self;
        }
        self.operations.push(operation);
        self
    }

    pub fn with_operations<I>(self, operations: I) -> Self
    where
        I: IntoIterator<Item = Operation>,
    {
        operations
            .into_iter()
            .fold(self, |builder, op| builder.with_operation(op))
    }

    pub fn build(self) -> OperationList {
        OperationList {
            identifier: self.identifier,
            operations: self.operations,
        }
    }
}
