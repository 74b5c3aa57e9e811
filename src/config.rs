//! Client configuration

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, RootCertStore};
use url::Url;

use crate::error::Result;

/// Default time a single fetch may take before it is reported as timed out.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of redirects followed for one fetch.
/// Reference: <https://fetch.spec.whatwg.org/#http-redirect-fetch> (step 5)
pub const DEFAULT_MAX_REDIRECTIONS: usize = 20;

/// Request timeout shared between the client and its host bridge.
///
/// A change is picked up by every fetch started afterwards; fetches already
/// in flight keep the value they started with.
#[derive(Debug, Clone)]
pub struct RequestTimeout(Rc<Cell<Duration>>);

impl RequestTimeout {
    pub fn new(timeout: Duration) -> Self {
        Self(Rc::new(Cell::new(timeout)))
    }

    pub fn get(&self) -> Duration {
        self.0.get()
    }

    pub fn set(&self, timeout: Duration) {
        log::debug!("changing request timeout to {:?}", timeout);
        self.0.set(timeout)
    }
}

impl Default for RequestTimeout {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

/// Configuration for a mix-fetch client
#[derive(Debug, Clone)]
pub struct MixFetchConfig {
    /// Origin of the calling document, used for mode and CORS checks
    pub origin: Url,

    /// Per-fetch timeout
    pub request_timeout: RequestTimeout,

    /// Maximum redirect hops
    pub max_redirections: usize,

    /// TLS configuration used for `https` dials
    pub tls_config: Arc<ClientConfig>,
}

impl MixFetchConfig {
    /// Create config for the given calling origin
    pub fn new(origin: &str) -> Result<Self> {
        Ok(Self {
            origin: Url::parse(origin)?,
            request_timeout: RequestTimeout::default(),
            max_redirections: DEFAULT_MAX_REDIRECTIONS,
            tls_config: default_tls_config(),
        })
    }

    pub fn with_request_timeout(self, timeout: Duration) -> Self {
        self.request_timeout.set(timeout);
        self
    }

    pub fn with_max_redirections(mut self, max_redirections: usize) -> Self {
        self.max_redirections = max_redirections;
        self
    }

    pub fn with_tls_config(mut self, tls_config: Arc<ClientConfig>) -> Self {
        self.tls_config = tls_config;
        self
    }

    /// Serialized calling origin, as it appears in `Access-Control-Allow-Origin`
    pub fn origin_string(&self) -> String {
        self.origin.origin().ascii_serialization()
    }
}

/// TLS config trusting the Mozilla root set, speaking HTTP/1.1 only.
pub fn default_tls_config() -> Arc<ClientConfig> {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    log::debug!("  📜 Loaded {} root certificates", root_store.len());

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Arc::new(config)
}
