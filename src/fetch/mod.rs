//! Fetch orchestration
//!
//! [`MixFetch`] runs each request on a background task and races it against
//! the configured timeout. A timed out request is not cancelled: it keeps
//! running, and its connection stays registered until it finishes on its own.

mod cors;

pub use cors::cors_check;

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::FusedFuture;
use futures::task::LocalSpawnExt;
use futures::FutureExt;

use crate::config::MixFetchConfig;
use crate::connection::ConnectionRegistry;
use crate::error::{MixFetchError, Result};
use crate::network::{MixDialer, MixHttpClient, MixnetTransport};
use crate::request::{ParsedRequest, Referrer, RequestId, RequestOptions};
use crate::response::FetchResponse;
use crate::runtime::Runtime;

/// Fetch API client whose traffic goes through the mixnet.
#[derive(Clone)]
pub struct MixFetch<R> {
    runtime: R,
    transport: Rc<dyn MixnetTransport>,
    registry: ConnectionRegistry,
    config: MixFetchConfig,
}

impl<R: Runtime> MixFetch<R> {
    pub fn new(runtime: R, transport: Rc<dyn MixnetTransport>, config: MixFetchConfig) -> Self {
        log::info!(
            "creating mix fetch client for origin {}",
            config.origin_string()
        );
        Self {
            runtime,
            transport,
            registry: ConnectionRegistry::new(),
            config,
        }
    }

    pub fn config(&self) -> &MixFetchConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout.get()
    }

    /// Applies to fetches started after the call.
    pub fn set_request_timeout(&self, timeout: Duration) {
        self.config.request_timeout.set(timeout)
    }

    /// Perform `request`, failing with [`MixFetchError::Timeout`] if it does
    /// not complete within the request timeout.
    pub async fn fetch(&self, request: ParsedRequest) -> Result<FetchResponse> {
        log::info!("mix fetch: {} {}", request.method(), request.url());

        let timeout = self.request_timeout();
        let client = self.http_client(request.options());
        let origin = self.config.origin_string();

        let (response_tx, response_rx) = oneshot::channel();
        let (error_tx, error_rx) = oneshot::channel();

        self.runtime
            .spawn_local(async move {
                match perform_request(&client, &request, &origin).await {
                    Ok(response) => {
                        let _ = response_tx.send(response);
                    }
                    Err(err) => {
                        let _ = error_tx.send(err);
                    }
                }
            })
            .map_err(|err| MixFetchError::Internal(format!("failed to spawn request: {err}")))?;

        let mut response_rx = response_rx.fuse();
        let mut error_rx = error_rx.fuse();
        let mut timer = self.runtime.sleep(timeout).fuse();

        loop {
            futures::select! {
                response = response_rx => {
                    if let Ok(response) = response {
                        log::info!("finished performing the request");
                        return Ok(response);
                    }
                }
                err = error_rx => {
                    if let Ok(err) = err {
                        log::warn!("request failure: {}", err);
                        return Err(err);
                    }
                }
                () = timer => {
                    log::warn!("request has timed out");
                    return Err(MixFetchError::Timeout);
                }
            }

            if response_rx.is_terminated() && error_rx.is_terminated() {
                return Err(MixFetchError::Internal(
                    "request task ended without an outcome".to_string(),
                ));
            }
        }
    }

    /// Deliver data the mixnet received for `request_id`.
    pub async fn inject_server_data(&self, request_id: RequestId, data: Vec<u8>) -> Result<()> {
        self.registry.inject_data(request_id, data).await
    }

    /// The remote end of `request_id` has closed.
    pub async fn close_remote_socket(&self, request_id: RequestId) {
        self.registry.close_remote_socket(request_id).await
    }

    /// The mixnet reported a failure for `request_id`.
    pub async fn inject_conn_error(&self, request_id: RequestId, message: String) -> Result<()> {
        self.registry
            .send_error(request_id, MixFetchError::Transport(message))
            .await
    }

    fn http_client(&self, options: &RequestOptions) -> MixHttpClient<R> {
        let dialer = MixDialer::new(
            self.runtime.clone(),
            Rc::clone(&self.transport),
            self.registry.clone(),
            self.config.origin.clone(),
            options.mode,
            Arc::clone(&self.config.tls_config),
        );
        MixHttpClient::new(dialer, options.redirect, self.config.max_redirections)
    }
}

/// Main fetch: run the request, then the CORS check on whatever came back.
///
/// Reference: <https://fetch.spec.whatwg.org/#main-fetch>
async fn perform_request<R: Runtime>(
    client: &MixHttpClient<R>,
    request: &ParsedRequest,
    origin: &str,
) -> Result<FetchResponse> {
    let options = request.options();

    // 8.
    if options.referrer_policy.is_none() {
        log::warn!("unimplemented: could not obtain referrer policy from the policy container");
    }

    // 9.
    if options.referrer != Referrer::NoReferrer {
        log::warn!("unimplemented: could not determine request's referrer");
    }

    log::info!("Starting the request...");
    log::debug!("{:?}: {} {}", options, request.method(), request.url());
    let response = client.execute(request).await?;

    cors_check(origin, options.credentials, response.headers())?;

    Ok(response)
}
