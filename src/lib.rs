//! # mix-fetch
//!
//! A `fetch` implementation for the browser whose traffic is tunnelled
//! through a mixnet instead of the browser's own network stack.
//!
//! ## Architecture
//!
//! ```text
//! MixFetchClient (WASM)
//!   ↓
//! MixFetch ── timeout, CORS check
//!   ↓
//! MixHttpClient ── HTTP/1.1, redirect policy
//!   ↓
//! MixDialer ── mode check, TLS (rustls)
//!   ↓
//! VirtualConnection ⇄ ConnectionRegistry ⇄ mixnet client (via JS)
//! ```
//!
//! Every dial allocates a request id from the mixnet client. Bytes written
//! to the connection are forwarded to the mixnet under that id; bytes the
//! mixnet receives for it are injected back through the registry.

use wasm_bindgen::prelude::*;

pub mod bridge;
pub mod config;
pub mod connection;
mod error;
pub mod fetch;
pub mod network;
pub mod request;
pub mod response;
pub mod runtime;

pub use bridge::{JsMixnetBridge, MixFetchClient};
pub use config::{MixFetchConfig, RequestTimeout, DEFAULT_MAX_REDIRECTIONS, DEFAULT_REQUEST_TIMEOUT};
pub use connection::{ConnectionRegistry, VirtualConnection};
pub use error::{ErrorCode, ErrorInfo, MixFetchError, Result};
pub use fetch::{cors_check, MixFetch};
pub use network::MixnetTransport;
pub use request::{
    CredentialsMode, ParsedRequest, RedirectMode, Referrer, ReferrerPolicy, RequestId,
    RequestInit, RequestMode, RequestOptions,
};
pub use response::{FetchResponse, ResponseInfo};
pub use runtime::{Runtime, SleepProvider, WasmRuntime};

/// Initialize the mix fetch module
///
/// This sets up logging.
#[wasm_bindgen(start)]
pub fn init() {
    if let Err(err) = console_log::init_with_level(log::Level::Info) {
        web_sys::console::warn_1(&format!("logger already initialized: {err}").into());
        return;
    }

    log::info!("mix fetch initialized");
}
