//! Authentication policies and the negotiator that enforces them.
//!
//! A policy attaches to a method, or to the server as the default for methods without one.
//! Credentials reach a connection through the `kite.authenticate` handshake and are checked
//! on every call against the effective policy.

use async_trait::async_trait;
use kite_protocol::{AuthStatus, ErrorPayload, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// What a policy decision knows about the call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallContext {
    /// Connection the call arrived on
    pub connection_id: Uuid,
    /// Method being called
    pub method: String,
    /// Credentials presented on the connection, if any
    pub credentials: Option<Value>,
}

/// Dynamic allow/deny decision.
#[async_trait]
pub trait AuthPredicate: Send + Sync + 'static {
    /// Decide whether the call may run.
    async fn evaluate(&self, credentials: Option<&Value>, context: &CallContext) -> bool;

    /// Ask for evaluation on every call instead of caching per connection.
    fn reevaluate(&self) -> bool {
        false
    }
}

struct FnPredicate<F>(F);

#[async_trait]
impl<F, Fut> AuthPredicate for FnPredicate<F>
where
    F: Fn(Option<Value>, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    async fn evaluate(&self, credentials: Option<&Value>, context: &CallContext) -> bool {
        (self.0)(credentials.cloned(), context.clone()).await
    }
}

/// Authentication requirement of a method.
#[derive(Clone, Default)]
pub enum AuthPolicy {
    /// Anyone may call
    #[default]
    None,
    /// The connection must have presented exactly these credentials
    Static(Value),
    /// A predicate decides
    Predicate(Arc<dyn AuthPredicate>),
}

impl AuthPolicy {
    /// Policy backed by an async closure.
    pub fn predicate<F, Fut>(evaluate: F) -> Self
    where
        F: Fn(Option<Value>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self::Predicate(Arc::new(FnPredicate(evaluate)))
    }

    /// Policy backed by a custom [`AuthPredicate`].
    pub fn from_predicate(predicate: impl AuthPredicate) -> Self {
        Self::Predicate(Arc::new(predicate))
    }

    /// Whether this policy lets everyone through.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Debug for AuthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Static(credentials) => f.debug_tuple("Static").field(credentials).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Static credentials compare by value, predicates by identity.
impl PartialEq for AuthPolicy {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Static(a), Self::Static(b)) => a == b,
            (Self::Predicate(a), Self::Predicate(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// How long predicate outcomes are remembered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthCaching {
    /// Once per connection and method, until the next handshake
    #[default]
    PerConnection,
    /// Every call
    PerCall,
}

/// Authentication state of one server-side connection.
#[derive(Debug, Default)]
pub struct AuthSession {
    status: AuthStatus,
    outcomes: HashMap<String, bool>,
}

impl AuthSession {
    /// Fresh, unauthenticated session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> &AuthStatus {
        &self.status
    }

    /// Presented credentials, if any.
    #[must_use]
    pub const fn credentials(&self) -> Option<&Value> {
        self.status.credentials()
    }

    /// Record a handshake. Cached outcomes no longer apply.
    pub fn authenticate(&mut self, credentials: Value) {
        self.status = AuthStatus::Authenticated(credentials);
        self.outcomes.clear();
    }

    /// Number of cached predicate outcomes.
    #[must_use]
    pub fn cached_outcomes(&self) -> usize {
        self.outcomes.len()
    }
}

/// Applies policies to calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthNegotiator {
    caching: AuthCaching,
}

impl AuthNegotiator {
    /// Negotiator with the given caching mode.
    #[must_use]
    pub const fn new(caching: AuthCaching) -> Self {
        Self { caching }
    }

    /// Configured caching mode.
    #[must_use]
    pub const fn caching(&self) -> AuthCaching {
        self.caching
    }

    /// Decide whether the call described by `context` may run under `policy`.
    ///
    /// # Errors
    ///
    /// Returns an `authenticationRequired` payload when the connection presented no
    /// credentials, and `authenticationFailed` when they were rejected.
    pub async fn authorize(
        &self,
        policy: &AuthPolicy,
        session: &mut AuthSession,
        context: &CallContext,
    ) -> Result<(), ErrorPayload> {
        let allowed = match policy {
            AuthPolicy::None => return Ok(()),
            AuthPolicy::Static(expected) => session.credentials() == Some(expected),
            AuthPolicy::Predicate(predicate) => {
                let cacheable = self.caching == AuthCaching::PerConnection && !predicate.reevaluate();
                let cached = if cacheable {
                    session.outcomes.get(&context.method).copied()
                } else {
                    None
                };

                match cached {
                    Some(allowed) => {
                        trace!(method = %context.method, allowed, "using cached auth outcome");
                        allowed
                    }
                    None => {
                        let allowed = predicate.evaluate(session.credentials(), context).await;
                        if cacheable {
                            session.outcomes.insert(context.method.clone(), allowed);
                        }
                        allowed
                    }
                }
            }
        };

        if allowed {
            return Ok(());
        }

        debug!(
            connection = %context.connection_id,
            method = %context.method,
            "call rejected by auth policy"
        );

        if session.credentials().is_none() {
            Err(ErrorPayload::authentication_required(&context.method))
        } else {
            Err(ErrorPayload::authentication_failed(&context.method))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use kite_protocol::{ErrorKind, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context(method: &str) -> CallContext {
        CallContext {
            connection_id: Uuid::new_v4(),
            method: method.to_string(),
            credentials: None,
        }
    }

    struct Counting {
        calls: Arc<AtomicUsize>,
        reevaluate: bool,
    }

    #[async_trait]
    impl AuthPredicate for Counting {
        async fn evaluate(&self, credentials: Option<&Value>, _context: &CallContext) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            credentials == Some(&json!("letmein"))
        }

        fn reevaluate(&self) -> bool {
            self.reevaluate
        }
    }

    fn counting(reevaluate: bool) -> (AuthPolicy, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = AuthPolicy::from_predicate(Counting {
            calls: Arc::clone(&calls),
            reevaluate,
        });
        (policy, calls)
    }

    #[tokio::test]
    async fn test_none_allows_everyone() {
        let negotiator = AuthNegotiator::default();
        let mut session = AuthSession::new();

        assert!(
            negotiator
                .authorize(&AuthPolicy::None, &mut session, &context("open"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_static_requires_equal_credentials() {
        let negotiator = AuthNegotiator::default();
        let policy = AuthPolicy::Static(json!({ "user": "kite", "token": [1, 2, 3] }));
        let mut session = AuthSession::new();

        let err = negotiator
            .authorize(&policy, &mut session, &context("secret"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationRequired);

        session.authenticate(json!({ "user": "kite", "token": [1, 2] }));
        let err = negotiator
            .authorize(&policy, &mut session, &context("secret"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);

        session.authenticate(json!({ "token": [1, 2, 3], "user": "kite" }));
        assert!(
            negotiator
                .authorize(&policy, &mut session, &context("secret"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_predicate_cached_per_connection() {
        let negotiator = AuthNegotiator::new(AuthCaching::PerConnection);
        let (policy, calls) = counting(false);
        let mut session = AuthSession::new();
        session.authenticate(json!("letmein"));

        for _ in 0..3 {
            assert!(
                negotiator
                    .authorize(&policy, &mut session, &context("secret"))
                    .await
                    .is_ok()
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.cached_outcomes(), 1);

        // A new handshake clears the cache.
        session.authenticate(json!("wrong"));
        assert_eq!(session.cached_outcomes(), 0);
        let err = negotiator
            .authorize(&policy, &mut session, &context("secret"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_predicate_per_call() {
        let negotiator = AuthNegotiator::new(AuthCaching::PerCall);
        let (policy, calls) = counting(false);
        let mut session = AuthSession::new();
        session.authenticate(json!("letmein"));

        for _ in 0..3 {
            negotiator
                .authorize(&policy, &mut session, &context("secret"))
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(session.cached_outcomes(), 0);
    }

    #[tokio::test]
    async fn test_predicate_requests_reevaluation() {
        let negotiator = AuthNegotiator::new(AuthCaching::PerConnection);
        let (policy, calls) = counting(true);
        let mut session = AuthSession::new();
        session.authenticate(json!("letmein"));

        for _ in 0..2 {
            negotiator
                .authorize(&policy, &mut session, &context("secret"))
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_predicate_denial_without_credentials() {
        let negotiator = AuthNegotiator::default();
        let policy = AuthPolicy::predicate(|credentials, _context| async move {
            credentials.is_some()
        });
        let mut session = AuthSession::new();

        let err = negotiator
            .authorize(&policy, &mut session, &context("secret"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationRequired);
    }

    #[test]
    fn test_policy_equality() {
        let predicate = AuthPolicy::predicate(|_, _| async { true });

        assert_eq!(AuthPolicy::None, AuthPolicy::default());
        assert_eq!(
            AuthPolicy::Static(json!({ "a": 1 })),
            AuthPolicy::Static(json!({ "a": 1 }))
        );
        assert_ne!(AuthPolicy::Static(json!(1)), AuthPolicy::None);
        assert_eq!(predicate, predicate.clone());
        assert_ne!(predicate, AuthPolicy::predicate(|_, _| async { true }));
    }
}
