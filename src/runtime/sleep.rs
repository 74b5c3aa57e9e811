//! Sleep provider implementation using browser timers

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use gloo_timers::future::TimeoutFuture;

use super::{SleepProvider, WasmRuntime};

/// A future that resolves after a specified duration
pub struct WasmSleep {
    timeout: TimeoutFuture,
}

impl WasmSleep {
    /// Create a new sleep future
    pub fn new(duration: Duration) -> Self {
        // setTimeout takes a 32-bit delay
        let millis = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
        Self {
            timeout: TimeoutFuture::new(millis),
        }
    }
}

impl Future for WasmSleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.timeout).poll(cx)
    }
}

impl SleepProvider for WasmRuntime {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        WasmSleep::new(duration).boxed_local()
    }
}
