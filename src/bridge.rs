//! JavaScript host bridge
//!
//! The mixnet client lives on the JS side. It hands us three callbacks to
//! start requests, push client data and release finished requests, and calls
//! back into [`MixFetchClient`] whenever the mixnet delivers data, a close or
//! a failure for one of our request ids.

use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use js_sys::{Function, Promise, Uint8Array};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use crate::config::MixFetchConfig;
use crate::error::{ErrorInfo, MixFetchError, Result};
use crate::fetch::MixFetch;
use crate::network::MixnetTransport;
use crate::request::{ParsedRequest, RequestId, RequestInit};
use crate::runtime::WasmRuntime;

fn describe(value: &JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}

/// Await `value` if the callback returned a promise.
async fn resolve(value: JsValue) -> std::result::Result<JsValue, JsValue> {
    match value.dyn_into::<Promise>() {
        Ok(promise) => JsFuture::from(promise).await,
        Err(value) => Ok(value),
    }
}

/// [`MixnetTransport`] backed by JS callbacks.
pub struct JsMixnetBridge {
    start_request: Function,
    send_client_data: Function,
    finish_request: Option<Function>,
}

impl JsMixnetBridge {
    pub fn new(
        start_request: Function,
        send_client_data: Function,
        finish_request: Option<Function>,
    ) -> Self {
        Self {
            start_request,
            send_client_data,
            finish_request,
        }
    }
}

#[async_trait(?Send)]
impl MixnetTransport for JsMixnetBridge {
    async fn start_new_request(&self, address: &str) -> Result<RequestId> {
        let dial_failed = |reason: String| MixFetchError::DialFailed {
            address: address.to_string(),
            reason,
        };

        let pending = self
            .start_request
            .call1(&JsValue::NULL, &JsValue::from_str(address))
            .map_err(|err| dial_failed(describe(&err)))?;
        let value = resolve(pending)
            .await
            .map_err(|err| dial_failed(describe(&err)))?;

        serde_wasm_bindgen::from_value::<RequestId>(value)
            .map_err(|err| dial_failed(format!("invalid request id: {err}")))
    }

    async fn send_client_data(&self, request_id: RequestId, data: Vec<u8>) -> Result<()> {
        let payload = Uint8Array::from(data.as_slice());
        let pending = self
            .send_client_data
            .call2(&JsValue::NULL, &JsValue::from(request_id), &payload)
            .map_err(|err| MixFetchError::Transport(describe(&err)))?;
        resolve(pending)
            .await
            .map_err(|err| MixFetchError::Transport(describe(&err)))?;
        Ok(())
    }

    fn finish_request(&self, request_id: RequestId) {
        if let Some(finish) = &self.finish_request {
            if let Err(err) = finish.call1(&JsValue::NULL, &JsValue::from(request_id)) {
                log::warn!(
                    "failed to notify host about finished request {}: {}",
                    request_id,
                    describe(&err)
                );
            }
        }
    }
}

/// Turn an error into something JS can inspect. Contract violations are
/// logged loudly: the host's bookkeeping no longer matches ours.
fn into_js_error(err: MixFetchError) -> JsValue {
    if err.is_contract_violation() {
        log::error!("contract violation: {}", err);
    }
    serde_wasm_bindgen::to_value(&ErrorInfo::from(&err)).unwrap_or_else(|_| err.into())
}

/// Timeouts cross the boundary as whole milliseconds, saturating at `u32::MAX`.
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

/// Fetch client exported to JavaScript
#[wasm_bindgen]
pub struct MixFetchClient {
    inner: MixFetch<WasmRuntime>,
}

#[wasm_bindgen]
impl MixFetchClient {
    /// Create a client for the calling document's `origin`.
    #[wasm_bindgen(constructor)]
    pub fn new(
        origin: String,
        start_request: Function,
        send_client_data: Function,
        finish_request: Option<Function>,
    ) -> std::result::Result<MixFetchClient, JsValue> {
        let config = MixFetchConfig::new(&origin).map_err(into_js_error)?;
        let bridge = JsMixnetBridge::new(start_request, send_client_data, finish_request);

        log::info!("✅ mix fetch client created for {}", config.origin_string());

        Ok(Self {
            inner: MixFetch::new(WasmRuntime::new(), Rc::new(bridge), config),
        })
    }

    /// Perform a fetch. `request` is a `RequestInit`-like object that also
    /// carries the target `url`.
    pub async fn fetch(&self, request: JsValue) -> std::result::Result<JsValue, JsValue> {
        let init: RequestInit = serde_wasm_bindgen::from_value(request)
            .map_err(|err| into_js_error(MixFetchError::InvalidRequest(err.to_string())))?;
        let request = ParsedRequest::try_from(init).map_err(into_js_error)?;

        let response = self.inner.fetch(request).await.map_err(into_js_error)?;
        serde_wasm_bindgen::to_value(&response.to_info())
            .map_err(|err| into_js_error(MixFetchError::Internal(err.to_string())))
    }

    /// Data received from the mixnet for `request_id`
    #[wasm_bindgen(js_name = injectServerData)]
    pub async fn inject_server_data(
        &self,
        request_id: RequestId,
        data: Vec<u8>,
    ) -> std::result::Result<(), JsValue> {
        self.inner
            .inject_server_data(request_id, data)
            .await
            .map_err(into_js_error)
    }

    #[wasm_bindgen(js_name = closeRemoteSocket)]
    pub async fn close_remote_socket(&self, request_id: RequestId) {
        self.inner.close_remote_socket(request_id).await
    }

    /// The mixnet failed `request_id`
    #[wasm_bindgen(js_name = injectConnError)]
    pub async fn inject_conn_error(
        &self,
        request_id: RequestId,
        message: String,
    ) -> std::result::Result<(), JsValue> {
        self.inner
            .inject_conn_error(request_id, message)
            .await
            .map_err(into_js_error)
    }

    #[wasm_bindgen(js_name = changeRequestTimeout)]
    pub fn change_request_timeout(&self, timeout_ms: u32) {
        log::info!("⏱️ request timeout changed to {}ms", timeout_ms);
        self.inner
            .set_request_timeout(Duration::from_millis(u64::from(timeout_ms)));
    }

    /// Current request timeout in milliseconds
    #[wasm_bindgen(js_name = requestTimeout)]
    pub fn request_timeout(&self) -> u32 {
        timeout_millis(self.inner.request_timeout())
    }
}
