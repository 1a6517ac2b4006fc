//! Shared per-request context.
//!
//! One [`RequestContext`] is created per inbound request and passed, by
//! cheap clone, to everything that handles that request: the resource, the
//! authorization policy and the pipeline. Values that become known during the
//! request (the identifier, the source image size) are stored in set-once
//! cells so they can be read without re-deriving them.

use crate::http::Reference;
use crate::identifier::Identifier;
use axum::http::HeaderMap;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use tracing::warn;

#[derive(Debug, Default)]
struct ContextInner {
    request_uri: String,
    request_headers: HeaderMap,
    client_ip: Option<IpAddr>,
    identifier: OnceLock<Identifier>,
    full_size: OnceLock<(u32, u32)>,
}

/// Cloneable handle to the state of one request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

impl RequestContext {
    pub fn new(reference: &Reference, headers: HeaderMap, client_ip: Option<IpAddr>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                request_uri: reference.to_string(),
                request_headers: headers,
                client_ip,
                ..ContextInner::default()
            }),
        }
    }

    pub fn request_uri(&self) -> &str {
        &self.inner.request_uri
    }

    pub fn request_headers(&self) -> &HeaderMap {
        &self.inner.request_headers
    }

    pub fn client_ip(&self) -> Option<IpAddr> {
        self.inner.client_ip
    }

    pub fn identifier(&self) -> Option<&Identifier> {
        self.inner.identifier.get()
    }

    /// Register the request's identifier.
    ///
    /// Repeating the call with the same identifier is a no-op. A different
    /// identifier is ignored: the first registration stands.
    pub fn set_identifier(&self, identifier: &Identifier) {
        if let Err(rejected) = self.inner.identifier.set(identifier.clone())
            && self.inner.identifier.get() != Some(&rejected)
        {
            warn!(
                existing = ?self.inner.identifier.get(),
                rejected = %rejected,
                "ignoring conflicting identifier for request"
            );
        }
    }

    /// Full (unprocessed) size of the source image, once the pipeline has
    /// identified it.
    pub fn full_size(&self) -> Option<(u32, u32)> {
        self.inner.full_size.get().copied()
    }

    pub fn set_full_size(&self, width: u32, height: u32) {
        let _ = self.inner.full_size.set((width, height));
    }
}
