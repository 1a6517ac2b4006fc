//! Image request pipeline.
//!
//! An [`ImageRequestHandler`] takes a fully described variant request (an
//! [`OperationList`] plus the request's reference, context and delegate) and
//! turns it into bytes on an output stream:
//!
//! ```text
//! authorize_before_access ─false─▶ Halted
//!         │
//!   stat source ─▶ source_accessed
//!         │
//!   read + identify ─▶ info_available
//!         │
//!     authorize ─false─▶ Halted
//!         │
//!   variant cache hit? ─yes─▶ will_stream_image_from_variant_cache ─▶ StreamedFromCache
//!         │ no
//!   will_process_image ─▶ process ─▶ write ─▶ store ─▶ Processed
//! ```
//!
//! The pipeline never decides authorization itself: both checkpoints go
//! through the request's [`Callback`], which reports `false` after it has put
//! the response into its final denied state.
//!
//! A handler is consumed by [`ImageRequestHandler::handle`], so each built
//! handler runs at most once.

use crate::auth::{AuthError, Delegate};
use crate::cache::{CacheError, VariantCache, hash_source, variant_key};
use crate::config::AppConfig;
use crate::context::RequestContext;
use crate::http::Reference;
use crate::imaging::{BackendError, ImageBackend, Info, Quality, RustBackend};
use crate::operation::OperationList;
use crate::source::{FilesystemSource, Source, SourceError, StatResult};
use axum::http::StatusCode;
use std::io::{self, Write};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info_span, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Authorization(#[from] AuthError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("Failed to write response body: {0}")]
    Io(#[from] io::Error),
    #[error("Image request is missing its {0}")]
    Incomplete(&'static str),
}

impl PipelineError {
    /// HTTP status a host should answer with.
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::Source(SourceError::NotFound(_)) => StatusCode::NOT_FOUND,
            PipelineError::Source(SourceError::InvalidIdentifier(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// How a handled request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A checkpoint refused the request; nothing was written.
    Halted,
    /// A stored variant was written.
    StreamedFromCache,
    /// The source was processed and the result written.
    Processed,
}

/// Hooks the pipeline calls while handling one request.
///
/// The two checkpoints must be answered; the notifications default to
/// doing nothing.
pub trait Callback: Send {
    /// Before the source is touched. `false` halts the request.
    fn authorize_before_access(&mut self) -> Result<bool, PipelineError>;

    /// After the source is identified, before processing. `false` halts the
    /// request.
    fn authorize(&mut self) -> Result<bool, PipelineError>;

    fn source_accessed(&mut self, _stat: &StatResult) {}

    fn info_available(&mut self, _info: &Info) {}

    fn will_stream_image_from_variant_cache(&mut self) {}

    fn will_process_image(&mut self, _info: &Info) {}
}

/// Process-wide collaborators shared by every request.
#[derive(Clone)]
pub struct ProcessingEnv {
    source: Arc<dyn Source>,
    backend: Arc<dyn ImageBackend>,
    cache: Option<Arc<VariantCache>>,
    quality: Quality,
}

impl ProcessingEnv {
    pub fn new(source: Arc<dyn Source>, backend: Arc<dyn ImageBackend>) -> Self {
        Self {
            source,
            backend,
            cache: None,
            quality: Quality::default(),
        }
    }

    pub fn with_cache(mut self, cache: VariantCache) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Encoder quality, also mixed into variant cache keys.
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Filesystem source, `image` backend and optional cache from config.
    pub fn from_config(config: &AppConfig) -> Self {
        let quality = Quality::new(config.processor.quality);
        let env = Self::new(
            Arc::new(FilesystemSource::new(&config.source.root)),
            Arc::new(RustBackend::with_quality(quality)),
        )
        .with_quality(quality);
        match &config.cache.dir {
            Some(dir) => env.with_cache(VariantCache::new(dir)),
            None => env,
        }
    }

    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    pub fn backend(&self) -> &Arc<dyn ImageBackend> {
        &self.backend
    }

    pub fn cache(&self) -> Option<&VariantCache> {
        self.cache.as_deref()
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }
}

impl std::fmt::Debug for ProcessingEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingEnv")
            .field("cache", &self.cache)
            .field("quality", &self.quality)
            .finish_non_exhaustive()
    }
}

/// A single variant request, ready to run.
pub struct ImageRequestHandler {
    reference: Reference,
    context: RequestContext,
    delegate: Delegate,
    operations: OperationList,
    callback: Box<dyn Callback>,
    env: ProcessingEnv,
}

/// Builder for [`ImageRequestHandler`].
#[derive(Default)]
pub struct ImageRequestHandlerBuilder {
    reference: Option<Reference>,
    context: Option<RequestContext>,
    delegate: Option<Delegate>,
    operations: Option<OperationList>,
    callback: Option<Box<dyn Callback>>,
    env: Option<ProcessingEnv>,
}

impl ImageRequestHandlerBuilder {
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_request_context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_delegate(mut self, delegate: Delegate) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn with_operation_list(mut self, operations: OperationList) -> Self {
        self.operations = Some(operations);
        self
    }

    pub fn with_callback(mut self, callback: impl Callback + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn with_environment(mut self, env: ProcessingEnv) -> Self {
        self.env = Some(env);
        self
    }

    /// Finish the handler. Without an explicit request context, the
    /// delegate's context is used.
    pub fn build(self) -> Result<ImageRequestHandler, PipelineError> {
        let delegate = self.delegate.ok_or(PipelineError::Incomplete("delegate"))?;
        Ok(ImageRequestHandler {
            reference: self
                .reference
                .ok_or(PipelineError::Incomplete("reference"))?,
            context: self
                .context
                .unwrap_or_else(|| delegate.context().clone()),
            operations: self
                .operations
                .ok_or(PipelineError::Incomplete("operation list"))?,
            callback: self.callback.ok_or(PipelineError::Incomplete("callback"))?,
            env: self.env.ok_or(PipelineError::Incomplete("environment"))?,
            delegate,
        })
    }
}

impl ImageRequestHandler {
    pub fn builder() -> ImageRequestHandlerBuilder {
        ImageRequestHandlerBuilder::default()
    }

    pub fn delegate(&self) -> &Delegate {
        &self.delegate
    }

    /// Run the request, writing the variant to `out`.
    ///
    /// Nothing is written when a checkpoint halts the request or an error
    /// occurs before encoding finishes.
    pub fn handle(mut self, out: &mut dyn Write) -> Result<Outcome, PipelineError> {
        let identifier = self.operations.identifier().clone();
        let span = info_span!(
            "image_request",
            %identifier,
            uri = %self.reference,
            operations = %self.operations.fingerprint(),
        );
        let _guard = span.enter();

        if !self.callback.authorize_before_access()? {
            debug!("halted before source access");
            return Ok(Outcome::Halted);
        }

        let stat = self.env.source.stat(&identifier)?;
        self.callback.source_accessed(&stat);

        let source_bytes = self.env.source.read(&identifier)?;
        let info = self.env.backend.identify(&source_bytes)?;
        self.context.set_full_size(info.width, info.height);
        debug!(width = info.width, height = info.height, "source identified");
        self.callback.info_available(&info);

        if !self.callback.authorize()? {
            debug!("halted after identify");
            return Ok(Outcome::Halted);
        }

        let cache_key = self.env.cache.as_ref().map(|_| {
            variant_key(
                &hash_source(&source_bytes),
                &self.operations,
                self.env.quality.value(),
            )
        });

        if let (Some(cache), Some(key)) = (self.env.cache.as_deref(), cache_key.as_deref())
            && let Some(cached) = cache.get(key)?
        {
            self.callback.will_stream_image_from_variant_cache();
            out.write_all(&cached)?;
            return Ok(Outcome::StreamedFromCache);
        }

        self.callback.will_process_image(&info);
        let encoded = self.env.backend.process(&source_bytes, &self.operations)?;
        out.write_all(&encoded)?;

        if let (Some(cache), Some(key)) = (self.env.cache.as_deref(), cache_key.as_deref())
            && let Err(err) = cache.put(key, &encoded)
        {
            warn!(error = %err, "failed to store variant");
        }

        debug!(bytes = encoded.len(), "variant written");
        Ok(Outcome::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAll;
    use crate::format::Format;
    use crate::identifier::Identifier;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp, mock_output};
    use crate::operation::{Crop, Encode, Scale};
    use crate::test_helpers::{MemorySource, RecordingCallback, create_test_jpeg};
    use axum::http::HeaderMap;
    use tempfile::TempDir;

    fn info() -> Info {
        Info {
            width: 800,
            height: 600,
            source_format: Some(Format::Jpeg),
        }
    }

    fn ops(identifier: &str) -> OperationList {
        OperationList::builder(Identifier::from(identifier))
            .with_operation(Crop::ToSquare)
            .with_operation(Scale::fit_inside(256, 256))
            .with_operation(Encode::new(Format::Jpeg))
            .build()
    }

    fn reference() -> Reference {
        Reference::new("/thumbs?identifier=cat.jpg".parse().unwrap())
    }

    fn delegate() -> Delegate {
        let context = RequestContext::new(&reference(), HeaderMap::new(), None);
        Delegate::new(Arc::new(AllowAll), context)
    }

    struct Fixture {
        source: Arc<MemorySource>,
        backend: Arc<MockBackend>,
    }

    impl Fixture {
        fn new(identify_results: usize) -> Self {
            Self {
                source: Arc::new(MemorySource::new().with("cat.jpg", b"source".to_vec())),
                backend: Arc::new(MockBackend::with_info(vec![info(); identify_results])),
            }
        }

        fn env(&self) -> ProcessingEnv {
            ProcessingEnv::new(self.source.clone(), self.backend.clone())
        }
    }

    fn handler(
        env: ProcessingEnv,
        callback: RecordingCallback,
        identifier: &str,
    ) -> ImageRequestHandler {
        ImageRequestHandler::builder()
            .with_reference(reference())
            .with_delegate(delegate())
            .with_operation_list(ops(identifier))
            .with_callback(callback)
            .with_environment(env)
            .build()
            .unwrap()
    }

    #[test]
    fn processes_and_writes_variant() {
        let fx = Fixture::new(1);
        let (callback, events) = RecordingCallback::allowing();
        let mut out = Vec::new();

        let outcome = handler(fx.env(), callback, "cat.jpg")
            .handle(&mut out)
            .unwrap();

        assert_eq!(outcome, Outcome::Processed);
        assert_eq!(out, mock_output(&ops("cat.jpg")));
        assert_eq!(
            events.take(),
            vec![
                "authorize_before_access",
                "source_accessed",
                "info_available",
                "authorize",
                "will_process_image",
            ]
        );
        assert_eq!(
            fx.backend.get_operations(),
            vec![
                RecordedOp::Identify { bytes: 6 },
                RecordedOp::Process {
                    identifier: "cat.jpg".into(),
                    fingerprint: ops("cat.jpg").fingerprint(),
                },
            ]
        );
    }

    #[test]
    fn denial_before_access_touches_nothing() {
        let fx = Fixture::new(1);
        let (callback, events) = RecordingCallback::new(false, true);
        let mut out = Vec::new();

        let outcome = handler(fx.env(), callback, "cat.jpg")
            .handle(&mut out)
            .unwrap();

        assert_eq!(outcome, Outcome::Halted);
        assert!(out.is_empty());
        assert_eq!(events.take(), vec!["authorize_before_access"]);
        assert_eq!(fx.source.reads(), 0);
        assert!(fx.backend.get_operations().is_empty());
    }

    #[test]
    fn denial_after_identify_skips_processing() {
        let fx = Fixture::new(1);
        let (callback, events) = RecordingCallback::new(true, false);
        let mut out = Vec::new();

        let outcome = handler(fx.env(), callback, "cat.jpg")
            .handle(&mut out)
            .unwrap();

        assert_eq!(outcome, Outcome::Halted);
        assert!(out.is_empty());
        assert_eq!(events.take().last(), Some(&"authorize"));
        assert_eq!(
            fx.backend.get_operations(),
            vec![RecordedOp::Identify { bytes: 6 }]
        );
    }

    #[test]
    fn records_full_size_in_context() {
        let fx = Fixture::new(1);
        let (callback, _) = RecordingCallback::allowing();
        let handler = handler(fx.env(), callback, "cat.jpg");
        let context = handler.delegate().context().clone();

        handler.handle(&mut Vec::new()).unwrap();
        assert_eq!(context.full_size(), Some((800, 600)));
    }

    #[test]
    fn missing_source_is_not_found() {
        let fx = Fixture::new(1);
        let (callback, _) = RecordingCallback::allowing();

        let err = handler(fx.env(), callback, "dog.jpg")
            .handle(&mut Vec::new())
            .unwrap_err();

        assert!(matches!(err, PipelineError::Source(SourceError::NotFound(_))));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn second_request_streams_from_cache() {
        let tmp = TempDir::new().unwrap();
        let fx = Fixture::new(2);
        let env = fx.env().with_cache(VariantCache::new(tmp.path()));

        let (first, _) = RecordingCallback::allowing();
        let mut first_out = Vec::new();
        let outcome = handler(env.clone(), first, "cat.jpg")
            .handle(&mut first_out)
            .unwrap();
        assert_eq!(outcome, Outcome::Processed);

        let (second, events) = RecordingCallback::allowing();
        let mut second_out = Vec::new();
        let outcome = handler(env, second, "cat.jpg")
            .handle(&mut second_out)
            .unwrap();

        assert_eq!(outcome, Outcome::StreamedFromCache);
        assert_eq!(first_out, second_out);
        assert_eq!(
            events.take().last(),
            Some(&"will_stream_image_from_variant_cache")
        );
        let processed = fx
            .backend
            .get_operations()
            .into_iter()
            .filter(|op| matches!(op, RecordedOp::Process { .. }))
            .count();
        assert_eq!(processed, 1);
    }

    #[cfg(unix)]
    #[test]
    fn cache_store_failure_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        // A dangling symlink as the cache dir: lookups miss cleanly, but the
        // directory cannot be created, so the store fails.
        let dir = tmp.path().join("variants");
        std::os::unix::fs::symlink(tmp.path().join("gone"), &dir).unwrap();

        let fx = Fixture::new(1);
        let env = fx.env().with_cache(VariantCache::new(&dir));
        let (callback, _) = RecordingCallback::allowing();
        let mut out = Vec::new();

        let outcome = handler(env, callback, "cat.jpg").handle(&mut out).unwrap();
        assert_eq!(outcome, Outcome::Processed);
        assert_eq!(out, mock_output(&ops("cat.jpg")));
        assert!(!tmp.path().join("gone").exists());
    }

    #[test]
    fn real_backend_end_to_end() {
        let source = MemorySource::new().with("cat.jpg", create_test_jpeg(640, 480));
        let env = ProcessingEnv::new(Arc::new(source), Arc::new(RustBackend::new()));
        let (callback, _) = RecordingCallback::allowing();
        let mut out = Vec::new();

        handler(env, callback, "cat.jpg").handle(&mut out).unwrap();

        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (256, 256));
    }

    #[test]
    fn build_requires_every_part() {
        let (callback, _) = RecordingCallback::allowing();
        let result = ImageRequestHandler::builder()
            .with_reference(reference())
            .with_delegate(delegate())
            .with_callback(callback)
            .build();
        assert!(matches!(
            result,
            Err(PipelineError::Incomplete("operation list"))
        ));

        let result = ImageRequestHandler::builder().build();
        assert!(matches!(result, Err(PipelineError::Incomplete("delegate"))));
    }

    #[test]
    fn env_from_config_enables_cache_only_when_configured() {
        let mut config = AppConfig::default();
        assert!(ProcessingEnv::from_config(&config).cache().is_none());

        config.cache.dir = Some("variants".into());
        config.processor.quality = 75;
        let env = ProcessingEnv::from_config(&config);
        assert!(env.cache().is_some());
        assert_eq!(env.quality().value(), 75);
    }
}
