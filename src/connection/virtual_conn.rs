//! Socket-shaped connection whose bytes are injected from outside
//!
//! [`VirtualConnection`] implements `AsyncRead + AsyncWrite`, so rustls and
//! the HTTP exchange treat it like any other stream. Reads are fed through
//! the paired [`ConnectionInjector`]; writes end up on an outbound channel
//! that is drained towards the mixnet.

use std::io::{self, Result as IoResult};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::io::{AsyncRead, AsyncWrite};
use futures::{ready, SinkExt, StreamExt};
use web_time::Instant;

use crate::error::MixFetchError;
use crate::request::RequestId;

/// Inbound chunks that may queue up before the reader catches up
pub const INBOUND_CHANNEL_CAPACITY: usize = 10;

/// Outbound chunks that may queue up before writes start waiting
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 10;

/// Receiving end of the bytes a connection wants to send to the remote.
pub type ClientDataReceiver = mpsc::Receiver<Vec<u8>>;

/// Controls the data that shows up on the corresponding [`VirtualConnection`].
///
/// Owned by exactly one registry entry.
pub struct ConnectionInjector {
    request_id: RequestId,
    server_data: mpsc::Sender<Vec<u8>>,
    remote_closed: mpsc::Sender<()>,
    remote_error: mpsc::Sender<MixFetchError>,
}

impl ConnectionInjector {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Queue a chunk of server data, waiting if the reader is behind.
    pub(crate) async fn inject_data(&mut self, data: Vec<u8>) {
        if self.server_data.send(data).await.is_err() {
            log::warn!(
                "connection {} has already been dropped, discarding injected data",
                self.request_id
            );
        }
    }

    /// Signal that the remote closed its side. Repeated signals collapse into one.
    pub(crate) fn close_remote(&mut self) {
        if let Err(err) = self.remote_closed.try_send(()) {
            if err.is_disconnected() {
                log::debug!("connection {} is gone, ignoring remote close", self.request_id);
            }
        }
    }

    /// Hand a transport failure to the reader.
    pub(crate) fn inject_error(&mut self, error: MixFetchError) {
        if let Err(err) = self.remote_error.try_send(error) {
            if err.is_disconnected() {
                log::warn!(
                    "connection {} is gone, dropping transport error: {}",
                    self.request_id,
                    err.into_inner()
                );
            } else {
                log::debug!(
                    "connection {} already has a pending transport error",
                    self.request_id
                );
            }
        }
    }
}

/// What the read side has been told about the remote.
#[derive(Debug)]
enum ReadState {
    Open,
    RemoteClosed,
    Failed(MixFetchError),
    EndOfStream,
}

/// A connection that lets us inspect and control the bytes that would
/// normally go onto the wire.
pub struct VirtualConnection {
    request_id: RequestId,
    remote_addr: String,

    server_data: mpsc::Receiver<Vec<u8>>,
    remote_closed: mpsc::Receiver<()>,
    remote_error: mpsc::Receiver<MixFetchError>,
    client_data: mpsc::Sender<Vec<u8>>,

    /// Tail of the last inbound chunk that did not fit the caller's buffer
    leftover: Option<Vec<u8>>,

    read_state: ReadState,
    local_closed: bool,

    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

impl VirtualConnection {
    /// Create a connection together with its injector and the receiver of
    /// everything written to it.
    pub fn new(
        request_id: RequestId,
        remote_addr: impl Into<String>,
    ) -> (Self, ConnectionInjector, ClientDataReceiver) {
        let (data_tx, data_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (closed_tx, closed_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);
        let (client_tx, client_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

        let conn = Self {
            request_id,
            remote_addr: remote_addr.into(),
            server_data: data_rx,
            remote_closed: closed_rx,
            remote_error: error_rx,
            client_data: client_tx,
            leftover: None,
            read_state: ReadState::Open,
            local_closed: false,
            read_deadline: None,
            write_deadline: None,
        };

        let injector = ConnectionInjector {
            request_id,
            server_data: data_tx,
            remote_closed: closed_tx,
            remote_error: error_tx,
        };

        (conn, injector, client_rx)
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// The `host:port` this connection was dialed for
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// There is no local socket behind a virtual connection.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Record a deadline for both directions. Not enforced: the fetch
    /// timeout is what bounds a request.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }

    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        log::debug!(
            "setting read deadline of connection {} to {:?} (not enforced)",
            self.request_id,
            deadline
        );
        self.read_deadline = deadline;
    }

    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        log::debug!(
            "setting write deadline of connection {} to {:?} (not enforced)",
            self.request_id,
            deadline
        );
        self.write_deadline = deadline;
    }

    pub fn read_deadline(&self) -> Option<Instant> {
        self.read_deadline
    }

    pub fn write_deadline(&self) -> Option<Instant> {
        self.write_deadline
    }

    /// Copy as much of `data` as fits into `out`, keeping the rest for the next read.
    fn read_and_buffer(&mut self, mut data: Vec<u8>, out: &mut [u8]) -> usize {
        debug_assert!(self.leftover.is_none());

        let n = data.len().min(out.len());
        out[..n].copy_from_slice(&data[..n]);
        if data.len() > n {
            self.leftover = Some(data.split_off(n));
        }

        log::trace!("READING INJECTED >>> {}", hex::encode(&out[..n]));
        n
    }

    /// Pick up close/error signals and translate the read state.
    fn poll_signals(&mut self, cx: &mut Context<'_>) -> Poll<IoResult<usize>> {
        if let Poll::Ready(Some(err)) = self.remote_error.poll_next_unpin(cx) {
            log::debug!("connection {} received transport error: {}", self.request_id, err);
            self.read_state = ReadState::Failed(err);
        }
        if let Poll::Ready(Some(())) = self.remote_closed.poll_next_unpin(cx) {
            if matches!(self.read_state, ReadState::Open) {
                log::debug!("remote closed connection {}", self.request_id);
                self.read_state = ReadState::RemoteClosed;
            }
        }

        match &self.read_state {
            ReadState::Open => Poll::Pending,
            ReadState::RemoteClosed => Poll::Ready(Ok(0)),
            ReadState::Failed(err) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                err.clone(),
            ))),
            ReadState::EndOfStream => Poll::Ready(Err(closed_pipe())),
        }
    }
}

fn closed_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "io: read/write on closed pipe")
}

impl AsyncRead for VirtualConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<IoResult<usize>> {
        let this = self.get_mut();

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        // see if we have any leftover data from the previous read
        if let Some(incomplete) = this.leftover.take() {
            log::trace!("reading previously incomplete data");
            return Poll::Ready(Ok(this.read_and_buffer(incomplete, buf)));
        }

        if matches!(this.read_state, ReadState::EndOfStream) {
            return Poll::Ready(Err(closed_pipe()));
        }

        // data queued before a close or error is still delivered first
        match this.server_data.poll_next_unpin(cx) {
            Poll::Ready(Some(data)) if data.is_empty() => {
                this.read_state = ReadState::EndOfStream;
                Poll::Ready(Err(closed_pipe()))
            }
            Poll::Ready(Some(data)) => Poll::Ready(Ok(this.read_and_buffer(data, buf))),
            // the registry entry is gone, nothing will ever arrive again,
            // but an error sent just before the removal must not be lost
            Poll::Ready(None) => match this.poll_signals(cx) {
                Poll::Pending => Poll::Ready(Ok(0)),
                signalled => signalled,
            },
            Poll::Pending => this.poll_signals(cx),
        }
    }
}

impl AsyncWrite for VirtualConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        let this = self.get_mut();

        if this.local_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "write on locally closed connection",
            )));
        }

        ready!(this.client_data.poll_ready(cx)).map_err(|_| closed_pipe())?;

        log::trace!("WRITING TO 'REMOTE' >>> {}", hex::encode(buf));
        this.client_data
            .start_send(buf.to_vec())
            .map_err(|_| closed_pipe())?;

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        // every accepted write is already queued for the mixnet
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        let this = self.get_mut();
        if !this.local_closed {
            log::debug!("closing connection {} locally", this.request_id);
            this.client_data.close_channel();
            this.local_closed = true;
        }
        Poll::Ready(Ok(()))
    }
}

impl std::fmt::Debug for VirtualConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualConnection")
            .field("request_id", &self.request_id)
            .field("remote_addr", &self.remote_addr)
            .field("read_state", &self.read_state)
            .field("local_closed", &self.local_closed)
            .finish_non_exhaustive()
    }
}
