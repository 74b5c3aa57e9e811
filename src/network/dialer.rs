//! Dialing virtual connections through the mixnet

use std::rc::Rc;
use std::sync::Arc;

use futures::task::LocalSpawnExt;
use futures::StreamExt;
use rustls::ClientConfig;
use url::Url;

use super::stream::MixStream;
use super::tls::TlsStream;
use super::MixnetTransport;
use crate::connection::{ClientDataReceiver, ConnectionRegistry, VirtualConnection};
use crate::error::{MixFetchError, Result};
use crate::request::{RequestId, RequestMode};
use crate::runtime::Runtime;

/// Check the request mode against the dial target.
///
/// Two URLs share an origin when scheme, host and port (defaults applied)
/// all match. Reference: <https://www.rfc-editor.org/rfc/rfc6454.html#section-3.2>
pub fn check_mode(mode: RequestMode, origin: &Url, target: &Url) -> Result<()> {
    match mode {
        RequestMode::Cors | RequestMode::NoCors => {
            log::warn!("unimplemented {} mode", mode);
            Ok(())
        }
        // "Fetch will return a network error if the request is not made to a same-origin URL."
        // Reference: https://fetch.spec.whatwg.org/#concept-request-mode
        RequestMode::SameOrigin => {
            if origin.origin() == target.origin() {
                Ok(())
            } else {
                Err(MixFetchError::ModeViolation {
                    target: target.to_string(),
                    origin: origin.origin().ascii_serialization(),
                })
            }
        }
        // those should have been rejected at parsing time
        RequestMode::Navigate | RequestMode::WebSocket => {
            Err(MixFetchError::ImpossibleMode(mode.to_string()))
        }
    }
}

/// `host:port` handed to the mixnet for `target`.
pub fn dial_address(target: &Url) -> Result<String> {
    let host = target
        .host_str()
        .ok_or_else(|| MixFetchError::InvalidUrl(format!("{target} has no host")))?;
    let port = target
        .port_or_known_default()
        .ok_or_else(|| MixFetchError::InvalidUrl(format!("{target} has no port")))?;
    Ok(format!("{host}:{port}"))
}

/// Opens virtual connections for one request.
pub struct MixDialer<R> {
    runtime: R,
    transport: Rc<dyn MixnetTransport>,
    registry: ConnectionRegistry,
    origin: Url,
    mode: RequestMode,
    tls_config: Arc<ClientConfig>,
}

impl<R: Runtime> MixDialer<R> {
    pub fn new(
        runtime: R,
        transport: Rc<dyn MixnetTransport>,
        registry: ConnectionRegistry,
        origin: Url,
        mode: RequestMode,
        tls_config: Arc<ClientConfig>,
    ) -> Self {
        Self {
            runtime,
            transport,
            registry,
            origin,
            mode,
            tls_config,
        }
    }

    /// Dial `target`, wrapping the connection in TLS for `https`.
    pub async fn connect(&self, target: &Url) -> Result<MixStream> {
        if target.scheme() == "https" {
            self.dial_tls(target).await.map(|tls| MixStream::Tls(Box::new(tls)))
        } else {
            self.dial(target).await.map(MixStream::Plain)
        }
    }

    /// Dial a plain connection.
    pub async fn dial(&self, target: &Url) -> Result<VirtualConnection> {
        log::info!("dialing plain connection to {}", target);
        self.open(target).await
    }

    /// Dial a connection and complete a TLS handshake over it.
    pub async fn dial_tls(&self, target: &Url) -> Result<TlsStream<VirtualConnection>> {
        log::info!("dialing TLS connection to {}", target);
        let conn = self.open(target).await?;

        let server_name = target
            .host_str()
            .ok_or_else(|| MixFetchError::InvalidUrl(format!("{target} has no host")))?;
        TlsStream::connect(conn, server_name, Arc::clone(&self.tls_config)).await
    }

    async fn open(&self, target: &Url) -> Result<VirtualConnection> {
        check_mode(self.mode, &self.origin, target)?;

        let address = dial_address(target)?;
        let request_id = self.transport.start_new_request(&address).await?;
        log::debug!("request {} allocated for {}", request_id, address);

        let (conn, injector, outbound) = VirtualConnection::new(request_id, address);
        self.registry.insert(request_id, injector).await?;

        if let Err(err) = self.spawn_forwarder(request_id, outbound) {
            self.registry.remove(request_id).await?;
            return Err(err);
        }

        Ok(conn)
    }

    /// Drain everything the connection writes into the mixnet. Once the
    /// connection is closed or dropped, the request is unregistered.
    fn spawn_forwarder(
        &self,
        request_id: RequestId,
        mut outbound: ClientDataReceiver,
    ) -> Result<()> {
        let transport = Rc::clone(&self.transport);
        let registry = self.registry.clone();

        self.runtime
            .spawn_local(async move {
                while let Some(chunk) = outbound.next().await {
                    if let Err(err) = transport.send_client_data(request_id, chunk).await {
                        log::warn!("failed to send data for request {}: {}", request_id, err);
                        if let Err(err) = registry.send_error(request_id, err).await {
                            log::error!("{}", err);
                        }
                        break;
                    }
                }

                transport.finish_request(request_id);
                if let Err(err) = registry.remove(request_id).await {
                    log::error!("{}", err);
                }
            })
            .map_err(|err| MixFetchError::Internal(format!("failed to spawn forwarder: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_tls_config;
    use crate::runtime::mock::{MockRuntime, MockTransport};
    use futures::executor::LocalPool;
    use futures::io::{AsyncReadExt, AsyncWriteExt};

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    fn dialer(
        pool: &LocalPool,
        transport: &Rc<MockTransport>,
        registry: &ConnectionRegistry,
        mode: RequestMode,
    ) -> MixDialer<MockRuntime> {
        MixDialer::new(
            MockRuntime::new(pool.spawner()),
            transport.clone(),
            registry.clone(),
            url("https://example.com"),
            mode,
            default_tls_config(),
        )
    }

    #[test]
    fn test_same_origin_with_default_port() {
        let origin = url("https://example.com");
        let target = url("https://example.com:443/x");
        assert!(check_mode(RequestMode::SameOrigin, &origin, &target).is_ok());
    }

    #[test]
    fn test_same_origin_mismatch() {
        let origin = url("https://example.com");
        for target in ["https://evil.com/x", "http://example.com/x", "https://example.com:8443/x"] {
            let err = check_mode(RequestMode::SameOrigin, &origin, &url(target)).unwrap_err();
            assert!(matches!(err, MixFetchError::ModeViolation { .. }), "{target}");
        }
    }

    #[test]
    fn test_cors_modes_accepted() {
        let origin = url("https://example.com");
        let target = url("https://evil.com/x");
        assert!(check_mode(RequestMode::Cors, &origin, &target).is_ok());
        assert!(check_mode(RequestMode::NoCors, &origin, &target).is_ok());
    }

    #[test]
    fn test_impossible_modes() {
        let origin = url("https://example.com");
        let err = check_mode(RequestMode::Navigate, &origin, &origin).unwrap_err();
        assert!(err.is_contract_violation());
        let err = check_mode(RequestMode::WebSocket, &origin, &origin).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_dial_address() {
        assert_eq!(dial_address(&url("https://nym.com/a")).unwrap(), "nym.com:443");
        assert_eq!(dial_address(&url("http://nym.com/a")).unwrap(), "nym.com:80");
        assert_eq!(dial_address(&url("http://[::1]:8080/")).unwrap(), "[::1]:8080");
    }

    #[test]
    fn test_dial_registers_and_forwards() {
        let mut pool = LocalPool::new();
        let transport = Rc::new(MockTransport::default());
        let registry = ConnectionRegistry::new();
        let dialer = dialer(&pool, &transport, &registry, RequestMode::Cors);

        let mut conn = pool.run_until(dialer.dial(&url("http://nym.com/"))).unwrap();
        assert_eq!(conn.request_id(), 1);
        assert_eq!(transport.addresses(), vec!["nym.com:80"]);
        assert!(pool.run_until(registry.exists(1)));

        pool.run_until(conn.write_all(b"ping")).unwrap();
        pool.run_until_stalled();
        assert_eq!(transport.sent_data(1), b"ping");

        pool.run_until(registry.inject_data(1, b"pong".to_vec())).unwrap();
        let mut buf = [0u8; 4];
        pool.run_until(conn.read_exact(&mut buf)).unwrap();
        assert_eq!(&buf, b"pong");

        // dropping the connection ends its lifecycle
        drop(conn);
        pool.run_until_stalled();
        assert!(!pool.run_until(registry.exists(1)));
        assert_eq!(transport.finished(), vec![1]);
    }

    #[test]
    fn test_each_dial_gets_fresh_id() {
        let mut pool = LocalPool::new();
        let transport = Rc::new(MockTransport::default());
        let registry = ConnectionRegistry::new();
        let dialer = dialer(&pool, &transport, &registry, RequestMode::Cors);

        let first = pool.run_until(dialer.dial(&url("http://nym.com/"))).unwrap();
        let second = pool.run_until(dialer.dial(&url("http://nym.com/"))).unwrap();
        assert_ne!(first.request_id(), second.request_id());
        assert_eq!(pool.run_until(registry.len()), 2);
    }

    #[test]
    fn test_mode_checked_before_allocation() {
        let mut pool = LocalPool::new();
        let transport = Rc::new(MockTransport::default());
        let registry = ConnectionRegistry::new();
        let dialer = dialer(&pool, &transport, &registry, RequestMode::SameOrigin);

        let err = pool.run_until(dialer.dial(&url("https://evil.com/x"))).unwrap_err();
        assert!(matches!(err, MixFetchError::ModeViolation { .. }));
        assert!(transport.addresses().is_empty());
        assert!(pool.run_until(registry.is_empty()));
    }

    #[test]
    fn test_allocation_failure_propagates() {
        let mut pool = LocalPool::new();
        let transport = Rc::new(MockTransport::default());
        transport.refuse_dials();
        let registry = ConnectionRegistry::new();
        let dialer = dialer(&pool, &transport, &registry, RequestMode::Cors);

        let err = pool.run_until(dialer.dial(&url("http://nym.com/"))).unwrap_err();
        assert!(matches!(err, MixFetchError::DialFailed { .. }));
    }

    #[test]
    fn test_send_failure_reaches_reader() {
        let mut pool = LocalPool::new();
        let transport = Rc::new(MockTransport::default());
        transport.fail_sends();
        let registry = ConnectionRegistry::new();
        let dialer = dialer(&pool, &transport, &registry, RequestMode::Cors);

        let mut conn = pool.run_until(dialer.dial(&url("http://nym.com/"))).unwrap();
        pool.run_until(conn.write_all(b"hello")).unwrap();
        pool.run_until_stalled();

        let mut buf = [0u8; 4];
        let err = pool.run_until(conn.read(&mut buf)).unwrap_err();
        assert!(matches!(MixFetchError::from(err), MixFetchError::Transport(_)));
        assert!(pool.run_until(registry.is_empty()));
    }

    #[test]
    fn test_tls_handshake_failure_is_dial_failure() {
        let mut pool = LocalPool::new();
        let transport = Rc::new(MockTransport::default());
        let registry = ConnectionRegistry::new();
        let dialer = dialer(&pool, &transport, &registry, RequestMode::Cors);
        let spawner = pool.spawner();

        let (tx, rx) = futures::channel::oneshot::channel();
        spawner
            .spawn_local(async move {
                let _ = tx.send(dialer.dial_tls(&url("https://nym.com/")).await);
            })
            .unwrap();
        pool.run_until_stalled();

        // a ClientHello went out; answer with garbage
        assert!(!transport.sent_data(1).is_empty());
        pool.run_until(registry.inject_data(1, b"this is not TLS at all".to_vec()))
            .unwrap();

        let result = pool.run_until(rx).unwrap();
        assert!(matches!(result, Err(MixFetchError::HandshakeFailed(_))));
    }
}
