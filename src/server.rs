//! HTTP host.
//!
//! Resources are not mounted as axum routes. A single fallback handler
//! matches each request against the [`Route`](crate::plugin::Route)s of the
//! registered [`ResourcePlugin`]s, builds a fresh [`RequestScope`] (config
//! snapshot, request context, delegate) and runs a new resource instance on
//! the blocking pool. Errors are shaped into plain-text responses here.

use crate::auth::{
    AuthorizerFactory, ConfigPolicy, Delegate, DelegateAuthorizerFactory, PolicyDelegate,
};
use crate::config::{ConfigError, ConfigStore};
use crate::context::RequestContext;
use crate::error::ResourceError;
use crate::http::{Reference, Response, plain_text};
use crate::pipeline::ProcessingEnv;
use crate::plugin::{RequestScope, Resource, ResourcePlugin};
use crate::resource::ThumbnailPlugin;
use axum::Router;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::ALLOW;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{Span, debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid route pattern: {0}")]
    Route(#[from] regex::Error),
}

/// Everything the host shares across requests.
pub struct AppState {
    config: Arc<ConfigStore>,
    environment: ProcessingEnv,
    authorizers: Arc<dyn AuthorizerFactory>,
    policy: Option<Arc<dyn PolicyDelegate>>,
    plugins: Vec<Arc<dyn ResourcePlugin>>,
}

/// Builder for [`AppState`].
pub struct AppStateBuilder {
    config: Arc<ConfigStore>,
    environment: ProcessingEnv,
    authorizers: Arc<dyn AuthorizerFactory>,
    policy: Option<Arc<dyn PolicyDelegate>>,
    plugins: Vec<Arc<dyn ResourcePlugin>>,
}

impl AppStateBuilder {
    pub fn with_authorizers(mut self, authorizers: Arc<dyn AuthorizerFactory>) -> Self {
        self.authorizers = authorizers;
        self
    }

    /// Use `policy` for every request instead of the `[delegate]` section.
    pub fn with_policy(mut self, policy: Arc<dyn PolicyDelegate>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn ResourcePlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn build(self) -> Arc<AppState> {
        Arc::new(AppState {
            config: self.config,
            environment: self.environment,
            authorizers: self.authorizers,
            policy: self.policy,
            plugins: self.plugins,
        })
    }
}

/// What the route table says about a request.
enum Dispatch {
    Found(Arc<dyn ResourcePlugin>),
    MethodNotAllowed(BTreeSet<String>),
    NotFound,
}

impl AppState {
    /// A host with no plugins registered.
    pub fn builder(config: Arc<ConfigStore>, environment: ProcessingEnv) -> AppStateBuilder {
        AppStateBuilder {
            config,
            environment,
            authorizers: Arc::new(DelegateAuthorizerFactory),
            policy: None,
            plugins: Vec::new(),
        }
    }

    /// The stock host: environment from configuration, thumbnail endpoint
    /// registered.
    pub fn from_store(config: Arc<ConfigStore>) -> Result<Arc<Self>, ServerError> {
        let environment = ProcessingEnv::from_config(config.snapshot().app());
        Ok(Self::builder(config, environment)
            .with_plugin(Arc::new(ThumbnailPlugin::new()?))
            .build())
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn plugins(&self) -> &[Arc<dyn ResourcePlugin>] {
        &self.plugins
    }

    fn dispatch(&self, path: &str, method: &Method) -> Dispatch {
        let mut allowed = BTreeSet::new();
        for plugin in &self.plugins {
            for route in plugin.routes() {
                if !route.matches_path(path) {
                    continue;
                }
                if route.allows(method) {
                    return Dispatch::Found(Arc::clone(plugin));
                }
                allowed.extend(route.methods().iter().map(|m| m.to_string()));
            }
        }
        if allowed.is_empty() {
            Dispatch::NotFound
        } else {
            Dispatch::MethodNotAllowed(allowed)
        }
    }

    fn request_scope(
        &self,
        reference: Reference,
        headers: HeaderMap,
        client_ip: Option<IpAddr>,
    ) -> RequestScope {
        let config = self.config.snapshot();
        let context = RequestContext::new(&reference, headers, client_ip);
        let policy = match &self.policy {
            Some(policy) => Arc::clone(policy),
            None => Arc::new(ConfigPolicy::from_config(&config)) as Arc<dyn PolicyDelegate>,
        };
        RequestScope {
            delegate: Delegate::new(policy, context.clone()),
            reference,
            context,
            config,
            environment: self.environment.clone(),
            authorizers: Arc::clone(&self.authorizers),
        }
    }

    /// Warn about `[endpoint]` keys that no registered plugin reads.
    pub fn warn_undeclared_keys(&self) {
        let declared: BTreeSet<&str> = self
            .plugins
            .iter()
            .flat_map(|p| p.plugin_config_keys())
            .collect();
        for key in self.config.snapshot().undeclared_plugin_keys(&declared) {
            warn!(%key, "configuration key is not used by any plugin");
        }
    }
}

/// The axum router serving every registered plugin.
pub fn router(state: Arc<AppState>) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                route = %request.uri().path(),
                status_code = tracing::field::Empty,
                latency_ms = tracing::field::Empty,
            )
        })
        .on_response(
            |response: &axum::response::Response, latency: Duration, span: &Span| {
                span.record("status_code", response.status().as_u16());
                let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                span.record("latency_ms", latency_ms);
            },
        );

    Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(trace_layer)
}

async fn dispatch(State(state): State<Arc<AppState>>, request: Request) -> axum::response::Response {
    let (parts, _body) = request.into_parts();

    let plugin = match state.dispatch(parts.uri.path(), &parts.method) {
        Dispatch::Found(plugin) => plugin,
        Dispatch::NotFound => return plain_text(StatusCode::NOT_FOUND, "Not Found"),
        Dispatch::MethodNotAllowed(allowed) => {
            let mut response = plain_text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
            let allow = allowed.into_iter().collect::<Vec<_>>().join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                response.headers_mut().insert(ALLOW, value);
            }
            return response;
        }
    };

    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let scope = state.request_scope(Reference::new(parts.uri), parts.headers, client_ip);
    let resource = plugin.new_resource(scope);
    let method = parts.method;

    let span = Span::current();
    let joined =
        tokio::task::spawn_blocking(move || span.in_scope(|| run_resource(resource, &method)))
            .await;

    match joined {
        Ok(Ok(response)) => response.into_http(),
        Ok(Err(err)) => error_response(&err),
        Err(err) => {
            error!(error = %err, "resource task failed");
            plain_text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn run_resource(mut resource: Box<dyn Resource>, method: &Method) -> Result<Response, ResourceError> {
    resource.do_init()?;
    let mut response = Response::new();
    if *method == Method::GET {
        resource.do_get(&mut response)?;
    } else {
        return Err(ResourceError::Client {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: "Method Not Allowed".into(),
        });
    }
    Ok(response)
}

fn error_response(err: &ResourceError) -> axum::response::Response {
    let status = err.status();
    if status.is_server_error() {
        error!(error = %err, %status, "request failed");
    } else {
        debug!(error = %err, %status, "request rejected");
    }
    plain_text(status, err.to_string())
}

/// Run the host until Ctrl-C.
///
/// Plugins are started before the listener binds and stopped after the last
/// connection drains. On unix, SIGHUP reloads the configuration file.
pub async fn serve(state: Arc<AppState>, bind: SocketAddr) -> Result<(), ServerError> {
    for plugin in state.plugins() {
        plugin.initialize_plugin();
        plugin.on_application_start();
        info!(plugin = plugin.plugin_name(), "plugin started");
    }
    state.warn_undeclared_keys();

    #[cfg(unix)]
    spawn_reload_on_hangup(Arc::clone(&state))?;

    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(
        listener,
        router(Arc::clone(&state)).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    for plugin in state.plugins() {
        plugin.on_application_stop();
    }
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown requested");
}

#[cfg(unix)]
fn spawn_reload_on_hangup(state: Arc<AppState>) -> Result<(), ServerError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match state.config().reload() {
                Ok(()) => {
                    info!("configuration reloaded");
                    state.warn_undeclared_keys();
                }
                Err(err) => error!(error = %err, "configuration reload failed, keeping current"),
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::imaging::backend::tests::MockBackend;
    use crate::test_helpers::MemorySource;

    fn state() -> Arc<AppState> {
        let store = Arc::new(ConfigStore::new(Configuration::stock().unwrap(), None));
        let env = ProcessingEnv::new(Arc::new(MemorySource::new()), Arc::new(MockBackend::new()));
        AppState::builder(store, env)
            .with_plugin(Arc::new(ThumbnailPlugin::new().unwrap()))
            .build()
    }

    #[test]
    fn dispatch_finds_thumbnail_plugin() {
        let state = state();
        assert!(matches!(
            state.dispatch("/thumbs", &Method::GET),
            Dispatch::Found(_)
        ));
    }

    #[test]
    fn dispatch_reports_allowed_methods() {
        let state = state();
        match state.dispatch("/thumbs", &Method::POST) {
            Dispatch::MethodNotAllowed(allowed) => {
                assert_eq!(allowed, BTreeSet::from(["GET".to_string()]));
            }
            _ => panic!("expected 405"),
        }
    }

    #[test]
    fn dispatch_unknown_path() {
        let state = state();
        assert!(matches!(
            state.dispatch("/iiif/3", &Method::GET),
            Dispatch::NotFound
        ));
    }

    #[test]
    fn request_scope_uses_config_policy_by_default() {
        let store = Arc::new(ConfigStore::new(
            Configuration::from_toml_str("[delegate]\ndeny = [\"secret.jpg\"]").unwrap(),
            None,
        ));
        let env = ProcessingEnv::new(Arc::new(MemorySource::new()), Arc::new(MockBackend::new()));
        let state = AppState::builder(store, env).build();

        let scope = state.request_scope(
            Reference::new("/thumbs?identifier=secret.jpg".parse().unwrap()),
            HeaderMap::new(),
            None,
        );
        scope
            .context
            .set_identifier(&crate::identifier::Identifier::from("secret.jpg"));
        let authorizer = scope.authorizers.new_authorizer(&scope.delegate);
        assert_eq!(
            authorizer.authorize_before_access().unwrap(),
            Some(crate::auth::AuthInfo::Forbidden)
        );
    }

    #[test]
    fn scope_sees_replaced_config() {
        let state = state();
        state.config().replace(
            Configuration::from_toml_str("[endpoint.thumbnailer]\nformat = \"png\"").unwrap(),
        );
        let scope = state.request_scope(
            Reference::new("/thumbs".parse().unwrap()),
            HeaderMap::new(),
            None,
        );
        assert_eq!(
            scope.config.get_string("endpoint.thumbnailer.format").as_deref(),
            Some("png")
        );
    }
}
