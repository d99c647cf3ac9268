//! Method registration and lookup

use crate::auth::AuthPolicy;
use crate::error::{self, ServerError};
use crate::responder::Responder;

use kite_protocol::{AUTHENTICATE_METHOD, Args, ErrorPayload, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Handler function signature
pub type HandlerFn = Arc<dyn Fn(Args, Responder) + Send + Sync>;

fn encode_result<T: Serialize>(result: Result<T, ErrorPayload>) -> Result<Value, ErrorPayload> {
    result.and_then(|value| {
        serde_json::to_value(value)
            .map_err(|e| ErrorPayload::new(format!("failed to encode result: {e}")))
    })
}

/// A method handler plus its optional authentication requirement
#[derive(Clone)]
pub struct Method {
    handler: HandlerFn,
    auth: Option<AuthPolicy>,
}

impl Method {
    /// Raw handler receiving the arguments and a [`Responder`].
    ///
    /// The handler runs on the connection's task and must not block; hand long work to a
    /// spawned task together with the responder.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Args, Responder) + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            auth: None,
        }
    }

    /// Handler that computes its answer synchronously.
    pub fn sync<F, T>(handler: F) -> Self
    where
        F: Fn(Args) -> Result<T, ErrorPayload> + Send + Sync + 'static,
        T: Serialize,
    {
        Self::new(move |args, responder| responder.respond(encode_result(handler(args))))
    }

    /// Handler backed by an async closure, run on its own task.
    pub fn from_async<F, Fut, T>(handler: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ErrorPayload>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        Self::new(move |args, responder| {
            let fut = handler(args);
            tokio::spawn(async move {
                responder.respond(encode_result(fut.await));
            });
        })
    }

    /// Attach an authentication requirement that overrides the server default.
    #[must_use]
    pub fn with_auth(mut self, policy: AuthPolicy) -> Self {
        self.auth = Some(policy);
        self
    }

    /// Requirement attached to this method, if any.
    #[must_use]
    pub const fn auth(&self) -> Option<&AuthPolicy> {
        self.auth.as_ref()
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

/// A named method in the registry
#[derive(Debug, Clone)]
pub struct MethodEntry {
    name: String,
    method: Method,
}

impl MethodEntry {
    /// Method name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Explicit requirement, `None` when the method inherits the server default
    #[must_use]
    pub const fn auth(&self) -> Option<&AuthPolicy> {
        self.method.auth()
    }

    pub(crate) fn invoke(&self, args: Args, responder: Responder) {
        (self.method.handler)(args, responder);
    }
}

/// Immutable map of method name to entry
#[derive(Debug, Clone, Default)]
pub struct MethodRegistry {
    entries: HashMap<String, MethodEntry>,
}

impl MethodRegistry {
    /// Build a registry from named methods.
    ///
    /// # Errors
    ///
    /// Fails on empty or reserved names and on duplicates.
    pub fn from_methods(
        methods: impl IntoIterator<Item = (String, Method)>,
    ) -> error::Result<Self> {
        let mut entries = HashMap::new();

        for (name, method) in methods {
            if name.is_empty() || name == AUTHENTICATE_METHOD {
                return Err(ServerError::InvalidMethod(name));
            }
            if entries.contains_key(&name) {
                return Err(ServerError::DuplicateMethod(name));
            }

            info!("Registered method: {name}");
            entries.insert(name.clone(), MethodEntry { name, method });
        }

        Ok(Self { entries })
    }

    /// Look up a method
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MethodEntry> {
        self.entries.get(name)
    }

    /// Registered method names, in no particular order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of methods
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no methods are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use kite_protocol::json;

    fn noop() -> Method {
        Method::sync(|_| Ok(Value::Null))
    }

    #[test]
    fn test_explicit_auth_is_stored_verbatim() {
        let credentials = json!({ "user": "kite", "scopes": ["read", "write"] });
        let registry = MethodRegistry::from_methods([
            ("open".to_string(), noop()),
            (
                "guarded".to_string(),
                noop().with_auth(AuthPolicy::Static(credentials.clone())),
            ),
        ])
        .unwrap();

        assert_eq!(
            registry.get("guarded").unwrap().auth(),
            Some(&AuthPolicy::Static(credentials))
        );
        assert_eq!(registry.get("open").unwrap().auth(), None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = MethodRegistry::from_methods([
            ("square".to_string(), noop()),
            ("square".to_string(), noop()),
        ]);
        assert_matches!(result, Err(ServerError::DuplicateMethod(name)) if name == "square");
    }

    #[test]
    fn test_reserved_names_rejected() {
        assert_matches!(
            MethodRegistry::from_methods([(String::new(), noop())]),
            Err(ServerError::InvalidMethod(_))
        );
        assert_matches!(
            MethodRegistry::from_methods([(AUTHENTICATE_METHOD.to_string(), noop())]),
            Err(ServerError::InvalidMethod(_))
        );
    }
}
