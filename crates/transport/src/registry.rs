use crate::error::TransportError;
use crate::{Config, Listener, Socket, Transport};

use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Transports keyed by URL scheme.
///
/// Registering a transport claims every scheme it reports; later registrations win.
#[derive(Debug, Clone, Default)]
pub struct Transports {
    by_scheme: HashMap<&'static str, Arc<dyn Transport>>,
}

impl Transports {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transport for all of its schemes.
    #[must_use]
    pub fn with(mut self, transport: Arc<dyn Transport>) -> Self {
        self.register(transport);
        self
    }

    /// Add a transport for all of its schemes.
    pub fn register(&mut self, transport: Arc<dyn Transport>) {
        for scheme in transport.schemes() {
            self.by_scheme.insert(scheme, Arc::clone(&transport));
        }
    }

    /// Transport serving the scheme of `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UnsupportedScheme`] when nothing is registered for it.
    pub fn resolve(&self, url: &Url) -> Result<Arc<dyn Transport>, TransportError> {
        self.by_scheme
            .get(url.scheme())
            .cloned()
            .ok_or_else(|| TransportError::UnsupportedScheme(url.scheme().to_string()))
    }

    /// Open `url` with the matching transport.
    ///
    /// # Errors
    ///
    /// Returns an error if no transport serves the scheme.
    pub fn open(&self, url: &Url, config: &Config) -> Result<Socket, TransportError> {
        Ok(self.resolve(url)?.open(url, config))
    }

    /// Listen on `url` with the matching transport.
    ///
    /// # Errors
    ///
    /// Returns an error if no transport serves the scheme or binding fails.
    pub async fn listen(
        &self,
        url: &Url,
        config: &Config,
    ) -> Result<Box<dyn Listener>, TransportError> {
        self.resolve(url)?.listen(url, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        fn schemes(&self) -> &'static [&'static str] {
            &["null"]
        }

        fn open(&self, _url: &Url, _config: &Config) -> Socket {
            crate::socket().0
        }

        async fn listen(
            &self,
            url: &Url,
            _config: &Config,
        ) -> Result<Box<dyn Listener>, TransportError> {
            Err(TransportError::InvalidAddress(url.to_string()))
        }
    }

    #[test]
    fn test_resolve_by_scheme() {
        let transports = Transports::new().with(Arc::new(NullTransport));

        let url = Url::parse("null://somewhere").unwrap();
        assert!(transports.resolve(&url).is_ok());

        let url = Url::parse("carrier-pigeon://somewhere").unwrap();
        assert!(matches!(
            transports.resolve(&url),
            Err(TransportError::UnsupportedScheme(scheme)) if scheme == "carrier-pigeon"
        ));
    }
}
