//! Plain or TLS stream handed to the HTTP exchange

use std::io::Result as IoResult;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::io::{AsyncRead, AsyncWrite};

use super::tls::TlsStream;
use crate::connection::VirtualConnection;
use crate::request::RequestId;

/// A dialed connection, with or without TLS on top.
///
/// Both variants implement `AsyncRead + AsyncWrite` by delegation.
pub enum MixStream {
    /// `http` targets
    Plain(VirtualConnection),

    /// `https` targets, handshake already completed
    Tls(Box<TlsStream<VirtualConnection>>),
}

impl MixStream {
    fn connection(&self) -> &VirtualConnection {
        match self {
            MixStream::Plain(conn) => conn,
            MixStream::Tls(stream) => stream.get_ref(),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.connection().request_id()
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, MixStream::Tls(_))
    }
}

impl AsyncRead for MixStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<IoResult<usize>> {
        match self.get_mut() {
            MixStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MixStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MixStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<IoResult<usize>> {
        match self.get_mut() {
            MixStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MixStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        match self.get_mut() {
            MixStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MixStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        match self.get_mut() {
            MixStream::Plain(stream) => Pin::new(stream).poll_close(cx),
            MixStream::Tls(stream) => Pin::new(stream.as_mut()).poll_close(cx),
        }
    }
}

impl From<VirtualConnection> for MixStream {
    fn from(conn: VirtualConnection) -> Self {
        MixStream::Plain(conn)
    }
}

impl From<TlsStream<VirtualConnection>> for MixStream {
    fn from(stream: TlsStream<VirtualConnection>) -> Self {
        MixStream::Tls(Box::new(stream))
    }
}

impl std::fmt::Debug for MixStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_tls() { "Tls" } else { "Plain" };
        write!(f, "MixStream::{}({})", kind, self.request_id())
    }
}
