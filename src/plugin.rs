//! Plugin host contract.
//!
//! A [`ResourcePlugin`] contributes HTTP resources to the server. The host
//! matches each inbound request against the plugin's [`Route`]s and, on a
//! match, asks the plugin for a fresh [`Resource`] bound to a
//! [`RequestScope`]. The resource lives for exactly one request.

use crate::auth::{AuthorizerFactory, Delegate};
use crate::config::Configuration;
use crate::context::RequestContext;
use crate::error::ResourceError;
use crate::http::{Reference, Response};
use crate::pipeline::ProcessingEnv;
use axum::http::Method;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Something the host loads at startup.
pub trait Plugin {
    fn plugin_name(&self) -> &str;

    /// Configuration keys this plugin reads, in dotted form.
    fn plugin_config_keys(&self) -> BTreeSet<&'static str> {
        BTreeSet::new()
    }

    fn initialize_plugin(&self) {}

    fn on_application_start(&self) {}

    fn on_application_stop(&self) {}
}

/// A plugin that serves HTTP resources.
pub trait ResourcePlugin: Plugin + Send + Sync {
    fn routes(&self) -> Vec<Route>;

    fn new_resource(&self, scope: RequestScope) -> Box<dyn Resource>;
}

/// One request's worth of resource.
pub trait Resource: Send {
    /// Runs before any method handler. An error ends the request.
    fn do_init(&mut self) -> Result<(), ResourceError>;

    fn do_get(&mut self, response: &mut Response) -> Result<(), ResourceError>;
}

/// Paths and methods a resource answers.
#[derive(Debug, Clone)]
pub struct Route {
    methods: Vec<Method>,
    patterns: Vec<Regex>,
}

impl Route {
    pub fn new(methods: Vec<Method>, patterns: Vec<Regex>) -> Self {
        Self { methods, patterns }
    }

    /// GET on paths matching `pattern`.
    pub fn get(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::new(vec![Method::GET], vec![Regex::new(pattern)?]))
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn matches_path(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(path))
    }

    pub fn allows(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }
}

/// Everything a resource may use while handling its request.
#[derive(Clone)]
pub struct RequestScope {
    pub reference: Reference,
    pub context: RequestContext,
    pub delegate: Delegate,
    /// Configuration as of the start of the request.
    pub config: Arc<Configuration>,
    pub environment: ProcessingEnv,
    pub authorizers: Arc<dyn AuthorizerFactory>,
}
