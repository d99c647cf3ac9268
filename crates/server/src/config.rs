//! Server configuration

use crate::auth::{AuthCaching, AuthPolicy};

/// Configuration for a [`KiteServer`](crate::KiteServer)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name reported in logs
    pub name: String,
    /// Policy for methods registered without their own
    pub auth: AuthPolicy,
    /// How long predicate outcomes are remembered
    pub auth_caching: AuthCaching,
    /// Transport configuration used for listeners
    pub transport: kite_transport::Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "kite".to_string(),
            auth: AuthPolicy::None,
            auth_caching: AuthCaching::PerConnection,
            transport: kite_transport::Config::default(),
        }
    }
}
