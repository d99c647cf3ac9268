use serde_json::Value;

/// Reserved method carrying a connection's credentials. Its single argument is the
/// credentials value; a successful response is `true`.
pub const AUTHENTICATE_METHOD: &str = "kite.authenticate";

/// Authentication state of one connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AuthStatus {
    /// No credentials presented.
    #[default]
    Unauthenticated,
    /// Handshake sent, waiting for the server.
    Pending,
    /// Credentials presented and accepted.
    Authenticated(Value),
}

impl AuthStatus {
    /// Presented credentials, if any.
    #[must_use]
    pub const fn credentials(&self) -> Option<&Value> {
        match self {
            Self::Authenticated(credentials) => Some(credentials),
            _ => None,
        }
    }
}
