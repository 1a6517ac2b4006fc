//! # Thumbnailer
//!
//! An image server endpoint that serves square thumbnails. A request names a
//! source image; the server crops it to a centered square, scales it to fit
//! inside 256×256 and encodes it to the configured format.
//!
//! ```text
//! GET /thumbs?identifier=cats/001.jpg
//!   → 200, Content-Type: image/jpeg, 256×256 JPEG body
//! GET /thumbs
//!   → 400, "Identifier not supplied"
//! ```
//!
//! # Architecture: Resource → Directive → Pipeline
//!
//! The endpoint itself is deliberately thin. [`resource::ThumbnailResource`]
//! only translates a request into a *directive* (an
//! [`operation::OperationList`]) and hands it to the
//! [`pipeline::ImageRequestHandler`], which owns everything expensive:
//!
//! ```text
//! 1. Resource   query string   →  Identifier + OperationList + Content-Type
//! 2. Pipeline   OperationList  →  authorize, read source, identify, authorize
//! 3. Imaging    source bytes   →  crop → scale → encode (or variant cache hit)
//! ```
//!
//! Authorization is inverted: the pipeline calls back into the resource's
//! [`resource::AuthorizationBridge`] at two checkpoints (before touching the
//! source, and after identifying it), and the bridge asks the request's
//! [`auth::Delegate`] for a decision.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`resource`] | The `/thumbs` endpoint: identifier, format, directive, authorization bridge |
//! | [`plugin`] | Host contract: `Plugin`, `ResourcePlugin`, `Resource`, `Route`, `RequestScope` |
//! | [`server`] | axum host: route dispatch, per-request scope, error shaping, lifecycle |
//! | [`pipeline`] | `ImageRequestHandler` and its `Callback` checkpoints |
//! | [`auth`] | Authorization decisions, delegates, the config-driven policy |
//! | [`operation`] | `Operation` and the immutable `OperationList` |
//! | [`format`] | Output format registry and media types |
//! | [`identifier`] | `Identifier` and query parsing |
//! | [`context`] | Shared per-request context |
//! | [`http`] | Request reference and the response a resource writes |
//! | [`source`] | Source image storage |
//! | [`imaging`] | `image`-crate backend and crop/scale geometry |
//! | [`cache`] | Content-addressed variant cache |
//! | [`config`] | `thumbnailer.toml` loading, layering over stock defaults, live reload |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`error`] | Errors a resource hands back to the host |
//!
//! # Design Decisions
//!
//! ## Operations as Data
//!
//! The directive is a closed enum of operations rather than a chain of
//! trait objects. It can be compared, hashed and printed, which is what the
//! variant cache key and the tests need, and the backend matches on it
//! exhaustively.
//!
//! ## Configuration Read per Request
//!
//! The output format is looked up in a fresh configuration snapshot on every
//! request, so editing `thumbnailer.toml` and sending SIGHUP changes the
//! format of the next thumbnail without a restart. Host-level settings
//! (bind address, source root, cache directory, quality) are fixed at startup.
//!
//! ## Pure-Rust Imaging
//!
//! Decoding and encoding use the `image` crate only, so the binary has no
//! system library dependencies.

pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod format;
pub mod http;
pub mod identifier;
pub mod imaging;
pub mod logging;
pub mod operation;
pub mod pipeline;
pub mod plugin;
pub mod resource;
pub mod server;
pub mod source;

#[cfg(test)]
pub(crate) mod test_helpers;
