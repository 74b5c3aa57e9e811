//! Active connection registry
//!
//! Maps every in-flight [`RequestId`] to the injector of its virtual
//! connection. Operations that originate locally assume the id is one we
//! created and still track, so a mismatch is reported as a contract
//! violation. Remote close is the exception: it may legitimately race with
//! local teardown.
//!
//! The lock is held while a chunk is pushed into a connection, so a slow
//! reader stalls injection for every other connection too.

use std::collections::HashMap;
use std::sync::Arc;

use futures::lock::Mutex;

use super::virtual_conn::ConnectionInjector;
use crate::error::{MixFetchError, Result};
use crate::request::RequestId;

struct ActiveRequest {
    injector: ConnectionInjector,
}

/// Shared map of in-flight virtual connections
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<RequestId, ActiveRequest>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn exists(&self, request_id: RequestId) -> bool {
        log::debug!("checking if request {} exists", request_id);
        self.inner.lock().await.contains_key(&request_id)
    }

    /// Number of connections currently registered
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Register the injector of a freshly dialed connection.
    pub async fn insert(&self, request_id: RequestId, injector: ConnectionInjector) -> Result<()> {
        let mut active = self.inner.lock().await;
        if active.contains_key(&request_id) {
            return Err(MixFetchError::DuplicateRequest(request_id));
        }
        active.insert(request_id, ActiveRequest { injector });
        Ok(())
    }

    pub async fn remove(&self, request_id: RequestId) -> Result<()> {
        log::debug!("removing request {}", request_id);
        self.inner
            .lock()
            .await
            .remove(&request_id)
            .map(drop)
            .ok_or(MixFetchError::UnknownRequest {
                request_id,
                operation: "remove",
            })
    }

    /// Deliver a chunk of server data to the connection.
    pub async fn inject_data(&self, request_id: RequestId, data: Vec<u8>) -> Result<()> {
        log::debug!("injecting {} bytes for {}", data.len(), request_id);
        let mut active = self.inner.lock().await;
        let request = active
            .get_mut(&request_id)
            .ok_or(MixFetchError::UnknownRequest {
                request_id,
                operation: "write to",
            })?;
        request.injector.inject_data(data).await;
        Ok(())
    }

    /// Tell the connection the remote side went away. Unknown ids are ignored.
    pub async fn close_remote_socket(&self, request_id: RequestId) {
        log::debug!("closing remote socket for {}", request_id);
        let mut active = self.inner.lock().await;
        match active.get_mut(&request_id) {
            Some(request) => request.injector.close_remote(),
            None => log::warn!(
                "attempted to close remote socket of a connection that doesn't exist ({})",
                request_id
            ),
        }
    }

    /// Deliver a transport failure to the connection.
    pub async fn send_error(&self, request_id: RequestId, err: MixFetchError) -> Result<()> {
        log::debug!("injecting error for {}: {}", request_id, err);
        let mut active = self.inner.lock().await;
        let request = active
            .get_mut(&request_id)
            .ok_or(MixFetchError::UnknownRequest {
                request_id,
                operation: "inject error data to",
            })?;
        request.injector.inject_error(err);
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry").finish_non_exhaustive()
    }
}
