//! The thumbnail endpoint.
//!
//! `GET /thumbs?identifier=<id>` answers with a square variant of the source
//! image, at most 256 pixels on a side, in the format configured under
//! `endpoint.thumbnailer.format` (JPEG unless configured otherwise).
//!
//! The resource only describes the variant. Authorization, source access,
//! processing and caching all happen in the
//! [`ImageRequestHandler`], which calls back into an [`AuthorizationBridge`]
//! at its two checkpoints.

use crate::auth::{AuthInfo, AuthorizerFactory, Delegate};
use crate::config::Configuration;
use crate::error::ResourceError;
use crate::format::Format;
use crate::http::{Response, SharedHead};
use crate::identifier::{Identifier, parse_identifier};
use crate::operation::{Crop, Encode, OperationList, Scale};
use crate::pipeline::{Callback, ImageRequestHandler, PipelineError};
use crate::plugin::{Plugin, RequestScope, Resource, ResourcePlugin, Route};
use axum::http::header::{CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Configuration key naming the output format.
pub const FORMAT_CONFIG_KEY: &str = "endpoint.thumbnailer.format";

/// Format key used when [`FORMAT_CONFIG_KEY`] is not set.
pub const DEFAULT_FORMAT_KEY: &str = "jpg";

/// Edge length of the box thumbnails are scaled into.
pub const THUMBNAIL_SIZE: u32 = 256;

const ROUTE_PATTERN: &str = "^/thumbs$";

/// Output format for thumbnails, read from `config` on every call.
///
/// Unknown keys are passed through as [`Format::Unknown`]; the encoder
/// rejects them later.
pub fn variant_format(config: &Configuration) -> Format {
    Format::get(&config.get_string_or(FORMAT_CONFIG_KEY, DEFAULT_FORMAT_KEY))
}

/// The thumbnail directive: square crop, fit into 256×256, encode.
pub fn build_operation_list(identifier: Identifier, format: Format) -> OperationList {
    OperationList::builder(identifier)
        .with_operation(Crop::ToSquare)
        .with_operation(Scale::fit_inside(THUMBNAIL_SIZE, THUMBNAIL_SIZE))
        .with_operation(Encode::new(format))
        .build()
}

// =============================================================================
// Plugin
// =============================================================================

/// Registers the thumbnail endpoint with the host.
#[derive(Debug, Clone)]
pub struct ThumbnailPlugin {
    route: Route,
}

impl ThumbnailPlugin {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            route: Route::get(ROUTE_PATTERN)?,
        })
    }
}

impl Plugin for ThumbnailPlugin {
    fn plugin_name(&self) -> &str {
        "ThumbnailResource"
    }

    fn plugin_config_keys(&self) -> BTreeSet<&'static str> {
        BTreeSet::from([FORMAT_CONFIG_KEY])
    }
}

impl ResourcePlugin for ThumbnailPlugin {
    fn routes(&self) -> Vec<Route> {
        vec![self.route.clone()]
    }

    fn new_resource(&self, scope: RequestScope) -> Box<dyn Resource> {
        Box::new(ThumbnailResource::new(scope))
    }
}

// =============================================================================
// Resource
// =============================================================================

/// One `/thumbs` request.
pub struct ThumbnailResource {
    scope: RequestScope,
    identifier: Option<Identifier>,
}

impl ThumbnailResource {
    pub fn new(scope: RequestScope) -> Self {
        Self {
            scope,
            identifier: None,
        }
    }

    /// The request's identifier, parsed on first use and registered into
    /// the request context.
    pub fn identifier(&mut self) -> Result<Identifier, ResourceError> {
        if let Some(identifier) = &self.identifier {
            return Ok(identifier.clone());
        }
        let identifier = parse_identifier(&self.scope.reference)?;
        self.scope.context.set_identifier(&identifier);
        self.identifier = Some(identifier.clone());
        Ok(identifier)
    }
}

impl Resource for ThumbnailResource {
    fn do_init(&mut self) -> Result<(), ResourceError> {
        let identifier = self.identifier()?;
        self.scope.context.set_identifier(&identifier);
        Ok(())
    }

    fn do_get(&mut self, response: &mut Response) -> Result<(), ResourceError> {
        let identifier = self.identifier()?;
        let format = variant_format(&self.scope.config);
        let operations = build_operation_list(identifier, format.clone());

        response.set_header(
            CONTENT_TYPE,
            HeaderValue::from_static(format.preferred_media_type()),
        );

        let bridge = AuthorizationBridge::new(
            Arc::clone(&self.scope.authorizers),
            self.scope.delegate.clone(),
            response.head(),
        );
        let handler = ImageRequestHandler::builder()
            .with_reference(self.scope.reference.clone())
            .with_request_context(self.scope.context.clone())
            .with_delegate(self.scope.delegate.clone())
            .with_operation_list(operations)
            .with_callback(bridge)
            .with_environment(self.scope.environment.clone())
            .build()?;

        let outcome = handler.handle(&mut response.open_body_stream())?;
        debug!(?outcome, format = %format, "thumbnail request handled");
        Ok(())
    }
}

// =============================================================================
// Authorization bridge
// =============================================================================

/// Pipeline callback that asks the request's authorizer at both
/// checkpoints and applies denials to the response head.
pub struct AuthorizationBridge {
    authorizers: Arc<dyn AuthorizerFactory>,
    delegate: Delegate,
    head: SharedHead,
}

impl AuthorizationBridge {
    pub fn new(
        authorizers: Arc<dyn AuthorizerFactory>,
        delegate: Delegate,
        head: SharedHead,
    ) -> Self {
        Self {
            authorizers,
            delegate,
            head,
        }
    }

    /// Apply an authorization decision. Returns whether to proceed.
    ///
    /// A denial sets the status and any header it needs, and drops the
    /// `Content-Type` set for the image that will not be sent.
    pub fn handle_auth_info(&self, info: AuthInfo) -> bool {
        match info {
            AuthInfo::Authorized => return true,
            AuthInfo::Unauthorized { challenge } => {
                self.head.set_status(StatusCode::UNAUTHORIZED);
                self.set_header_or_warn(WWW_AUTHENTICATE, &challenge);
            }
            AuthInfo::Forbidden => {
                self.head.set_status(StatusCode::FORBIDDEN);
            }
            AuthInfo::Redirect { location, status } => {
                self.head.set_status(status);
                self.set_header_or_warn(LOCATION, &location);
            }
        }
        self.head.remove_header(&CONTENT_TYPE);
        false
    }

    fn set_header_or_warn(&self, name: axum::http::HeaderName, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(value) => self.head.set_header(name, value),
            Err(_) => warn!(header = %name, value, "dropping invalid header value"),
        }
    }
}

impl Callback for AuthorizationBridge {
    fn authorize_before_access(&mut self) -> Result<bool, PipelineError> {
        let authorizer = self.authorizers.new_authorizer(&self.delegate);
        match authorizer.authorize_before_access()? {
            Some(info) => Ok(self.handle_auth_info(info)),
            None => Ok(true),
        }
    }

    fn authorize(&mut self) -> Result<bool, PipelineError> {
        let authorizer = self.authorizers.new_authorizer(&self.delegate);
        match authorizer.authorize()? {
            Some(info) => Ok(self.handle_auth_info(info)),
            None => Ok(true),
        }
    }
}
