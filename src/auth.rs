//! Authorization policy.
//!
//! Authorization happens at two checkpoints of an image request: before the
//! source is accessed, and after the source has been identified but before
//! any processing. At each checkpoint an [`Authorizer`] (produced by an
//! [`AuthorizerFactory`] for the request's [`Delegate`]) returns either no
//! decision, which means "proceed", or an [`AuthInfo`] describing what the
//! response should become.
//!
//! The policy itself lives behind [`PolicyDelegate`]. [`ConfigPolicy`] is the
//! stock one, driven by the `[delegate]` configuration section.

use crate::config::{Configuration, DelegateConfig};
use crate::context::RequestContext;
use axum::http::StatusCode;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authorization policy failed: {0}")]
    Policy(String),
}

/// Outcome of an authorization checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthInfo {
    /// Proceed.
    Authorized,
    /// 401 with a `WWW-Authenticate` challenge.
    Unauthorized { challenge: String },
    /// 403.
    Forbidden,
    /// Send the client elsewhere.
    Redirect { location: String, status: StatusCode },
}

/// Request-specific authorization policy.
///
/// Returning `Ok(None)` leaves the decision to the caller, which treats it as
/// authorized.
pub trait PolicyDelegate: Send + Sync + fmt::Debug {
    fn authorize_before_access(
        &self,
        context: &RequestContext,
    ) -> Result<Option<AuthInfo>, AuthError>;

    fn authorize(&self, context: &RequestContext) -> Result<Option<AuthInfo>, AuthError>;
}

/// Opaque per-request policy handle: a policy plus the context it judges.
#[derive(Debug, Clone)]
pub struct Delegate {
    policy: Arc<dyn PolicyDelegate>,
    context: RequestContext,
}

impl Delegate {
    pub fn new(policy: Arc<dyn PolicyDelegate>, context: RequestContext) -> Self {
        Self { policy, context }
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }
}

/// Evaluates the two checkpoints for one request.
pub trait Authorizer {
    fn authorize_before_access(&self) -> Result<Option<AuthInfo>, AuthError>;
    fn authorize(&self) -> Result<Option<AuthInfo>, AuthError>;
}

/// Produces an [`Authorizer`] for a request's delegate.
pub trait AuthorizerFactory: Send + Sync {
    fn new_authorizer(&self, delegate: &Delegate) -> Box<dyn Authorizer>;
}

/// Factory whose authorizers ask the delegate's policy directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelegateAuthorizerFactory;

impl AuthorizerFactory for DelegateAuthorizerFactory {
    fn new_authorizer(&self, delegate: &Delegate) -> Box<dyn Authorizer> {
        Box::new(DelegateAuthorizer {
            delegate: delegate.clone(),
        })
    }
}

struct DelegateAuthorizer {
    delegate: Delegate,
}

impl Authorizer for DelegateAuthorizer {
    fn authorize_before_access(&self) -> Result<Option<AuthInfo>, AuthError> {
        self.delegate
            .policy
            .authorize_before_access(&self.delegate.context)
    }

    fn authorize(&self) -> Result<Option<AuthInfo>, AuthError> {
        self.delegate.policy.authorize(&self.delegate.context)
    }
}

/// Policy that never makes a decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PolicyDelegate for AllowAll {
    fn authorize_before_access(&self, _: &RequestContext) -> Result<Option<AuthInfo>, AuthError> {
        Ok(None)
    }

    fn authorize(&self, _: &RequestContext) -> Result<Option<AuthInfo>, AuthError> {
        Ok(None)
    }
}

/// Policy built from the `[delegate]` configuration section.
///
/// - `deny`: identifiers refused (403) before source access.
/// - `redirect`: identifier → location, answered with 302 before access.
/// - `max_pixels`: sources larger than this are refused (403) once their
///   size is known.
#[derive(Debug, Clone, Default)]
pub struct ConfigPolicy {
    deny: BTreeSet<String>,
    redirect: BTreeMap<String, String>,
    max_pixels: Option<u64>,
}

impl ConfigPolicy {
    pub fn new(config: &DelegateConfig) -> Self {
        Self {
            deny: config.deny.iter().cloned().collect(),
            redirect: config.redirect.clone(),
            max_pixels: config.max_pixels,
        }
    }

    pub fn from_config(config: &Configuration) -> Self {
        Self::new(&config.app().delegate)
    }
}

impl PolicyDelegate for ConfigPolicy {
    fn authorize_before_access(
        &self,
        context: &RequestContext,
    ) -> Result<Option<AuthInfo>, AuthError> {
        let Some(identifier) = context.identifier() else {
            return Ok(None);
        };
        if self.deny.contains(identifier.as_str()) {
            debug!(%identifier, "identifier is on the deny list");
            return Ok(Some(AuthInfo::Forbidden));
        }
        if let Some(location) = self.redirect.get(identifier.as_str()) {
            return Ok(Some(AuthInfo::Redirect {
                location: location.clone(),
                status: StatusCode::FOUND,
            }));
        }
        Ok(None)
    }

    fn authorize(&self, context: &RequestContext) -> Result<Option<AuthInfo>, AuthError> {
        match (self.max_pixels, context.full_size()) {
            (Some(max), Some((width, height))) if u64::from(width) * u64::from(height) > max => {
                debug!(width, height, max, "source exceeds max_pixels");
                Ok(Some(AuthInfo::Forbidden))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Reference;
    use crate::identifier::Identifier;
    use axum::http::HeaderMap;

    fn context_for(identifier: &str) -> RequestContext {
        let ctx = RequestContext::new(
            &Reference::new("/thumbs".parse().unwrap()),
            HeaderMap::new(),
            None,
        );
        ctx.set_identifier(&Identifier::from(identifier));
        ctx
    }

    fn policy() -> ConfigPolicy {
        ConfigPolicy::new(&DelegateConfig {
            deny: vec!["secret.jpg".into()],
            redirect: BTreeMap::from([("old.jpg".into(), "/thumbs?identifier=new.jpg".into())]),
            max_pixels: Some(1_000_000),
        })
    }

    #[test]
    fn allow_all_never_decides() {
        let ctx = context_for("a.jpg");
        assert_eq!(AllowAll.authorize_before_access(&ctx).unwrap(), None);
        assert_eq!(AllowAll.authorize(&ctx).unwrap(), None);
    }

    #[test]
    fn denied_identifier_is_forbidden_before_access() {
        let decision = policy()
            .authorize_before_access(&context_for("secret.jpg"))
            .unwrap();
        assert_eq!(decision, Some(AuthInfo::Forbidden));
    }

    #[test]
    fn redirected_identifier_gets_location() {
        let decision = policy()
            .authorize_before_access(&context_for("old.jpg"))
            .unwrap();
        assert_eq!(
            decision,
            Some(AuthInfo::Redirect {
                location: "/thumbs?identifier=new.jpg".into(),
                status: StatusCode::FOUND,
            })
        );
    }

    #[test]
    fn other_identifiers_get_no_decision() {
        assert_eq!(
            policy()
                .authorize_before_access(&context_for("ok.jpg"))
                .unwrap(),
            None
        );
    }

    #[test]
    fn oversized_source_is_forbidden_after_identify() {
        let ctx = context_for("big.jpg");
        assert_eq!(policy().authorize(&ctx).unwrap(), None);
        ctx.set_full_size(2000, 1000);
        assert_eq!(policy().authorize(&ctx).unwrap(), Some(AuthInfo::Forbidden));
    }

    #[test]
    fn source_within_limit_is_allowed() {
        let ctx = context_for("small.jpg");
        ctx.set_full_size(1000, 1000);
        assert_eq!(policy().authorize(&ctx).unwrap(), None);
    }

    #[test]
    fn delegate_factory_routes_to_policy() {
        let delegate = Delegate::new(Arc::new(policy()), context_for("secret.jpg"));
        let authorizer = DelegateAuthorizerFactory.new_authorizer(&delegate);
        assert_eq!(
            authorizer.authorize_before_access().unwrap(),
            Some(AuthInfo::Forbidden)
        );
        assert_eq!(authorizer.authorize().unwrap(), None);
    }
}
