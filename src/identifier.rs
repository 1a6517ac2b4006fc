//! Source image identifiers.
//!
//! An [`Identifier`] is an opaque token naming a source image. This module
//! only checks that one was supplied; what it means (a relative path, an
//! object key, ...) is up to the [`Source`](crate::source::Source) that
//! resolves it.

use crate::error::ResourceError;
use crate::http::Reference;
use serde::Serialize;
use std::fmt;

/// Name of the query parameter carrying the identifier.
pub const IDENTIFIER_PARAM: &str = "identifier";

/// Message returned to the client when no usable identifier is present.
pub const IDENTIFIER_MISSING: &str = "Identifier not supplied";

/// Opaque, immutable name of a source image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Read the first `identifier` query value from a request reference.
///
/// The value is returned exactly as the query-string decoder produced it.
/// A missing or blank value is a client error (400, "Identifier not supplied")
/// regardless of any other parameters present.
pub fn parse_identifier(reference: &Reference) -> Result<Identifier, ResourceError> {
    let value = reference
        .first_query_value(IDENTIFIER_PARAM)
        .unwrap_or_default();
    if is_blank(&value) {
        return Err(ResourceError::bad_request(IDENTIFIER_MISSING));
    }
    Ok(Identifier::new(value))
}

/// True when every character is a breaking space or control separator.
///
/// No-break spaces (U+00A0, U+2007, U+202F) and NEL count as content; the
/// ASCII information separators U+001C..U+001F count as blank.
fn is_blank(value: &str) -> bool {
    value.chars().all(|c| match c {
        '\u{1C}'..='\u{1F}' => true,
        '\u{85}' | '\u{A0}' | '\u{2007}' | '\u{202F}' => false,
        c => c.is_whitespace(),
    })
}
