//! Network adapter layer
//!
//! Everything that would normally open a socket goes through here instead:
//! a dial asks the mixnet for a fresh [`RequestId`], wires a
//! [`VirtualConnection`](crate::connection::VirtualConnection) into the
//! registry and, for `https`, runs a rustls handshake over it. The per-request
//! [`MixHttpClient`] speaks HTTP/1.1 on top and applies the redirect policy.

mod client;
mod dialer;
mod http;
mod redirect;
mod stream;
mod tls;

pub use client::MixHttpClient;
pub use dialer::{check_mode, dial_address, MixDialer};
pub use http::{encode_request, read_response, HttpResponse};
pub use redirect::{check_redirect, RedirectDecision};
pub use stream::MixStream;
pub use tls::TlsStream;

use async_trait::async_trait;

use crate::error::Result;
use crate::request::RequestId;

/// The mixnet client, as seen from the transport.
///
/// Implemented by the host bridge in the browser and by mocks in tests.
#[async_trait(?Send)]
pub trait MixnetTransport {
    /// Allocate a new, never used request id for a connection to `address`
    /// (`host:port`).
    async fn start_new_request(&self, address: &str) -> Result<RequestId>;

    /// Push bytes written by the local side towards the remote.
    async fn send_client_data(&self, request_id: RequestId, data: Vec<u8>) -> Result<()>;

    /// The local side is done with this request.
    fn finish_request(&self, _request_id: RequestId) {}
}
