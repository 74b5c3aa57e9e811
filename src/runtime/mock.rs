//! Deterministic runtime and mixnet transport for unit tests

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::oneshot;
use futures::executor::LocalSpawner;
use futures::future::LocalBoxFuture;
use futures::task::{LocalFutureObj, LocalSpawn, SpawnError};
use futures::FutureExt;

use super::SleepProvider;
use crate::error::{MixFetchError, Result};
use crate::network::MixnetTransport;
use crate::request::RequestId;

/// Runtime whose timers only fire when the test says so.
#[derive(Clone)]
pub(crate) struct MockRuntime {
    spawner: LocalSpawner,
    timers: Rc<RefCell<Vec<(Duration, oneshot::Sender<()>)>>>,
}

impl MockRuntime {
    pub(crate) fn new(spawner: LocalSpawner) -> Self {
        Self {
            spawner,
            timers: Default::default(),
        }
    }

    /// Fire every pending sleep.
    pub(crate) fn fire_timers(&self) {
        for (_, timer) in self.timers.borrow_mut().drain(..) {
            let _ = timer.send(());
        }
    }

    pub(crate) fn pending_timers(&self) -> Vec<Duration> {
        self.timers.borrow().iter().map(|(d, _)| *d).collect()
    }
}

impl LocalSpawn for MockRuntime {
    fn spawn_local_obj(
        &self,
        future: LocalFutureObj<'static, ()>,
    ) -> std::result::Result<(), SpawnError> {
        self.spawner.spawn_local_obj(future)
    }
}

impl SleepProvider for MockRuntime {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let (tx, rx) = oneshot::channel();
        self.timers.borrow_mut().push((duration, tx));
        async move {
            let _ = rx.await;
        }
        .boxed_local()
    }
}

/// Mixnet stand-in recording everything the client hands to it.
#[derive(Default)]
pub(crate) struct MockTransport {
    next_id: Cell<RequestId>,
    addresses: RefCell<Vec<String>>,
    sent: RefCell<HashMap<RequestId, Vec<u8>>>,
    finished: RefCell<Vec<RequestId>>,
    refuse_dials: Cell<bool>,
    fail_sends: Cell<bool>,
}

impl MockTransport {
    pub(crate) fn refuse_dials(&self) {
        self.refuse_dials.set(true);
    }

    pub(crate) fn fail_sends(&self) {
        self.fail_sends.set(true);
    }

    pub(crate) fn addresses(&self) -> Vec<String> {
        self.addresses.borrow().clone()
    }

    pub(crate) fn sent_data(&self, request_id: RequestId) -> Vec<u8> {
        self.sent
            .borrow()
            .get(&request_id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn finished(&self) -> Vec<RequestId> {
        self.finished.borrow().clone()
    }
}

#[async_trait(?Send)]
impl MixnetTransport for MockTransport {
    async fn start_new_request(&self, address: &str) -> Result<RequestId> {
        if self.refuse_dials.get() {
            return Err(MixFetchError::DialFailed {
                address: address.to_string(),
                reason: "no gateway".into(),
            });
        }
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        self.addresses.borrow_mut().push(address.to_string());
        Ok(id)
    }

    async fn send_client_data(&self, request_id: RequestId, data: Vec<u8>) -> Result<()> {
        if self.fail_sends.get() {
            return Err(MixFetchError::Transport("mixnet input closed".into()));
        }
        self.sent
            .borrow_mut()
            .entry(request_id)
            .or_default()
            .extend_from_slice(&data);
        Ok(())
    }

    fn finish_request(&self, request_id: RequestId) {
        self.finished.borrow_mut().push(request_id);
    }
}
