//! TLS over virtual connections using rustls
//!
//! The handshake is driven to completion in [`TlsStream::connect`]; afterwards
//! the stream encrypts writes and decrypts reads on top of any
//! `AsyncRead + AsyncWrite` transport. Certificates are checked against the
//! webpki root store configured in [`crate::config`].

use std::io::{self, Read, Result as IoResult, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection};

use crate::error::{MixFetchError, Result};

/// Buffer size for TLS records (max TLS record = 16KB)
const TLS_BUFFER_SIZE: usize = 16384;

/// Size of a single read from the underlying stream
const READ_CHUNK_SIZE: usize = 4096;

/// TLS-wrapped stream.
pub struct TlsStream<S> {
    inner: S,

    /// Rustls client connection state machine
    tls: ClientConnection,

    /// Decrypted plaintext waiting to be read by the caller
    plaintext_buf: Vec<u8>,

    /// Encrypted data from the network, waiting for rustls to process
    incoming_tls: Vec<u8>,

    /// Encrypted data from rustls, waiting to be written to the network
    outgoing_tls: Vec<u8>,

    /// Peer sent close_notify
    peer_closed: bool,
}

fn tls_error(context: &str, err: rustls::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("TLS {context}: {err}"))
}

/// Failures during the handshake are dial failures. A typed transport error
/// that interrupted it is kept as is.
fn handshake_error(err: io::Error) -> MixFetchError {
    match MixFetchError::from(err) {
        MixFetchError::Io { message, .. } => MixFetchError::HandshakeFailed(message),
        other => other,
    }
}

impl<S> TlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Perform the full TLS handshake with `server_name` over `stream`.
    pub async fn connect(
        mut stream: S,
        server_name: &str,
        config: Arc<ClientConfig>,
    ) -> Result<Self> {
        log::info!("TLS handshake with {}", server_name);

        let name: ServerName<'static> = server_name.to_string().try_into().map_err(|_| {
            MixFetchError::InvalidUrl(format!("invalid server name '{server_name}'"))
        })?;

        let mut tls = ClientConnection::new(config, name)
            .map_err(|e| MixFetchError::HandshakeFailed(format!("TLS init failed: {e}")))?;

        loop {
            // 1. Flush any pending outgoing TLS records (ClientHello, etc.)
            let mut tls_output = Vec::new();
            while tls.wants_write() {
                tls.write_tls(&mut tls_output).map_err(handshake_error)?;
            }

            if !tls_output.is_empty() {
                log::debug!("TLS handshake: sending {} bytes", tls_output.len());
                stream.write_all(&tls_output).await.map_err(handshake_error)?;
                stream.flush().await.map_err(handshake_error)?;
            }

            // 2. Check if handshake is done
            if !tls.is_handshaking() {
                break;
            }

            // 3. Read the server's flight
            if !tls.wants_read() {
                return Err(MixFetchError::HandshakeFailed(
                    "TLS handshake stalled".to_string(),
                ));
            }

            let mut buf = [0u8; READ_CHUNK_SIZE];
            let n = stream.read(&mut buf).await.map_err(handshake_error)?;
            if n == 0 {
                return Err(MixFetchError::HandshakeFailed(
                    "connection closed during TLS handshake".to_string(),
                ));
            }
            log::debug!("TLS handshake: received {} bytes", n);

            tls.read_tls(&mut &buf[..n]).map_err(handshake_error)?;
            tls.process_new_packets()
                .map_err(|e| MixFetchError::HandshakeFailed(e.to_string()))?;
        }

        log::info!(
            "TLS handshake with {} complete (protocol: {:?})",
            server_name,
            tls.protocol_version()
        );

        Ok(Self {
            inner: stream,
            tls,
            plaintext_buf: Vec::with_capacity(TLS_BUFFER_SIZE),
            incoming_tls: Vec::with_capacity(TLS_BUFFER_SIZE),
            outgoing_tls: Vec::new(),
            peer_closed: false,
        })
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Feed buffered ciphertext to rustls and move any plaintext out.
    fn process_incoming(&mut self) -> IoResult<()> {
        while !self.incoming_tls.is_empty() {
            let consumed = self.tls.read_tls(&mut &self.incoming_tls[..])?;
            self.incoming_tls.drain(..consumed);

            let state = self
                .tls
                .process_new_packets()
                .map_err(|e| tls_error("process", e))?;

            if state.plaintext_bytes_to_read() > 0 {
                let start = self.plaintext_buf.len();
                self.plaintext_buf
                    .resize(start + state.plaintext_bytes_to_read(), 0);
                self.tls
                    .reader()
                    .read_exact(&mut self.plaintext_buf[start..])?;
            }
            if state.peer_has_closed() {
                self.peer_closed = true;
            }

            if consumed == 0 {
                break;
            }
        }
        Ok(())
    }

    fn take_plaintext(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.plaintext_buf.len());
        buf[..n].copy_from_slice(&self.plaintext_buf[..n]);
        self.plaintext_buf.drain(..n);
        n
    }

    /// Move encrypted records from rustls into the outgoing buffer.
    fn extract_outgoing(&mut self) -> IoResult<()> {
        while self.tls.wants_write() {
            self.tls.write_tls(&mut self.outgoing_tls)?;
        }
        Ok(())
    }

    fn poll_flush_outgoing(&mut self, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        while !self.outgoing_tls.is_empty() {
            match Pin::new(&mut self.inner).poll_write(cx, &self.outgoing_tls) {
                Poll::Ready(Ok(0)) => return Poll::Ready(Err(io::ErrorKind::WriteZero.into())),
                Poll::Ready(Ok(n)) => {
                    self.outgoing_tls.drain(..n);
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<S> AsyncRead for TlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<IoResult<usize>> {
        let this = &mut *self;

        loop {
            if !this.plaintext_buf.is_empty() {
                return Poll::Ready(Ok(this.take_plaintext(buf)));
            }
            if this.peer_closed {
                return Poll::Ready(Ok(0));
            }

            let mut tmp = [0u8; READ_CHUNK_SIZE];
            match Pin::new(&mut this.inner).poll_read(cx, &mut tmp) {
                // EOF without close_notify; plenty of servers do this
                Poll::Ready(Ok(0)) => return Poll::Ready(Ok(0)),
                Poll::Ready(Ok(n)) => {
                    this.incoming_tls.extend_from_slice(&tmp[..n]);
                    this.process_incoming()?;
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> AsyncWrite for TlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        let this = &mut *self;

        // records from the previous write go first
        futures::ready!(this.poll_flush_outgoing(cx))?;

        let written = this.tls.writer().write(buf)?;
        this.extract_outgoing()?;

        // the rest is picked up by the next write or flush
        if let Poll::Ready(Err(e)) = this.poll_flush_outgoing(cx) {
            return Poll::Ready(Err(e));
        }

        Poll::Ready(Ok(written))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        let this = &mut *self;
        this.extract_outgoing()?;
        futures::ready!(this.poll_flush_outgoing(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        let this = &mut *self;

        this.tls.send_close_notify();
        this.extract_outgoing()?;
        futures::ready!(this.poll_flush_outgoing(cx))?;

        Pin::new(&mut this.inner).poll_close(cx)
    }
}

impl<S> std::fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("protocol", &self.tls.protocol_version())
            .field("peer_closed", &self.peer_closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_tls_config;
    use crate::connection::{ClientDataReceiver, ConnectionInjector, VirtualConnection};
    use futures::channel::oneshot;
    use futures::executor::{block_on, LocalPool};
    use futures::task::LocalSpawnExt;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use rustls::{RootCertStore, ServerConfig, ServerConnection};

    /// Self-signed CA and a leaf for `mix.test` issued by it
    const CA_CERT: &[u8] = include_bytes!("testdata/ca.der");
    const SERVER_CERT: &[u8] = include_bytes!("testdata/mix.test.der");
    const SERVER_KEY: &[u8] = include_bytes!("testdata/mix.test.key.der");

    fn client_config() -> Arc<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.add(CertificateDer::from(CA_CERT)).unwrap();
        Arc::new(
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    }

    /// rustls server on the far side of a virtual connection
    struct TestServer {
        tls: ServerConnection,
        injector: ConnectionInjector,
        outbound: ClientDataReceiver,
    }

    impl TestServer {
        fn new(injector: ConnectionInjector, outbound: ClientDataReceiver) -> Self {
            let config = ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(
                    vec![CertificateDer::from(SERVER_CERT)],
                    PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(SERVER_KEY)),
                )
                .unwrap();
            TestServer {
                tls: ServerConnection::new(Arc::new(config)).unwrap(),
                injector,
                outbound,
            }
        }

        /// Take everything the client wrote, answer with pending records in
        /// small pieces, and let the client run.
        fn pump(&mut self, pool: &mut LocalPool) {
            pool.run_until_stalled();
            while let Ok(Some(chunk)) = self.outbound.try_next() {
                let mut rest = &chunk[..];
                while !rest.is_empty() {
                    self.tls.read_tls(&mut rest).unwrap();
                    self.tls.process_new_packets().unwrap();
                }
            }

            let mut records = Vec::new();
            while self.tls.wants_write() {
                self.tls.write_tls(&mut records).unwrap();
            }
            for piece in records.chunks(64) {
                pool.run_until(self.injector.inject_data(piece.to_vec()));
            }
            pool.run_until_stalled();
        }

        fn received(&mut self) -> Vec<u8> {
            let mut out = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                match self.tls.reader().read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => out.extend_from_slice(&buf[..n]),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => panic!("server read failed: {err}"),
                }
            }
            out
        }
    }

    #[test]
    fn test_round_trip_after_handshake() {
        let mut pool = LocalPool::new();
        let (conn, injector, outbound) = VirtualConnection::new(1, "mix.test:443");
        let mut server = TestServer::new(injector, outbound);

        let (tx, rx) = oneshot::channel();
        pool.spawner()
            .spawn_local(async move {
                let result = async {
                    let mut stream = TlsStream::connect(conn, "mix.test", client_config()).await?;
                    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await?;
                    stream.flush().await?;

                    // small reads drain the decrypted buffer piece by piece
                    let mut response = Vec::new();
                    let mut buf = [0u8; 5];
                    loop {
                        let n = stream.read(&mut buf).await?;
                        if n == 0 {
                            break;
                        }
                        response.extend_from_slice(&buf[..n]);
                    }
                    stream.close().await?;
                    Ok::<_, MixFetchError>(response)
                }
                .await;
                let _ = tx.send(result);
            })
            .unwrap();

        for _ in 0..10 {
            if !server.tls.is_handshaking() {
                break;
            }
            server.pump(&mut pool);
        }
        assert!(!server.tls.is_handshaking());

        server.pump(&mut pool);
        assert_eq!(server.received(), b"GET / HTTP/1.1\r\n\r\n");

        let reply = b"HTTP/1.1 200 OK\r\nContent-Length: 14\r\n\r\nhello over tls";
        server.tls.writer().write_all(reply).unwrap();
        server.tls.send_close_notify();
        server.pump(&mut pool);

        let response = pool.run_until(rx).unwrap().unwrap();
        assert_eq!(response, reply);

        // the client answered with its own close_notify
        server.pump(&mut pool);
        assert!(server.tls.process_new_packets().unwrap().peer_has_closed());
    }

    #[test]
    fn test_certificate_for_other_name_rejected() {
        let mut pool = LocalPool::new();
        let (conn, injector, outbound) = VirtualConnection::new(1, "other.test:443");
        let mut server = TestServer::new(injector, outbound);

        let (tx, rx) = oneshot::channel();
        pool.spawner()
            .spawn_local(async move {
                let result = TlsStream::connect(conn, "other.test", client_config()).await;
                let _ = tx.send(result.map(|_| ()));
            })
            .unwrap();

        // the client gives up on the first server flight
        server.pump(&mut pool);

        let err = pool.run_until(rx).unwrap().unwrap_err();
        assert!(matches!(err, MixFetchError::HandshakeFailed(_)));
    }

    #[test]
    fn test_invalid_server_name() {
        let (conn, _injector, _outbound) = VirtualConnection::new(1, "nym.com:443");
        let err = block_on(TlsStream::connect(conn, "not a hostname!", default_tls_config()))
            .unwrap_err();
        assert!(matches!(err, MixFetchError::InvalidUrl(_)));
    }

    #[test]
    fn test_eof_during_handshake() {
        let (conn, mut injector, _outbound) = VirtualConnection::new(1, "nym.com:443");
        injector.close_remote();

        let err = block_on(TlsStream::connect(conn, "nym.com", default_tls_config())).unwrap_err();
        assert!(matches!(err, MixFetchError::HandshakeFailed(_)));
    }

    #[test]
    fn test_transport_error_during_handshake_is_kept() {
        let (conn, mut injector, _outbound) = VirtualConnection::new(1, "nym.com:443");
        injector.inject_error(MixFetchError::Transport("gateway gone".into()));

        let err = block_on(TlsStream::connect(conn, "nym.com", default_tls_config())).unwrap_err();
        assert!(matches!(err, MixFetchError::Transport(_)));
    }

    #[test]
    fn test_client_hello_goes_out() {
        let (conn, mut injector, mut outbound) = VirtualConnection::new(1, "nym.com:443");
        injector.close_remote();

        let _ = block_on(TlsStream::connect(conn, "nym.com", default_tls_config()));
        let hello = outbound.try_next().unwrap().unwrap();
        // handshake record
        assert_eq!(hello[0], 0x16);
    }
}
