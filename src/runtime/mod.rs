//! Runtime abstraction for mix-fetch
//!
//! Everything above the virtual connection needs exactly two things from its
//! environment: spawning a local (non-`Send`) task and sleeping. In the
//! browser both come from the JS event loop; in tests they come from a
//! `futures` `LocalPool` and a manually driven clock.

mod sleep;
mod spawn;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use futures::future::LocalBoxFuture;
use futures::task::LocalSpawn;

pub use sleep::WasmSleep;
pub use spawn::WasmSpawner;

/// Something that can produce a future resolving after `duration`.
pub trait SleepProvider {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// Everything mix-fetch needs from its executor.
pub trait Runtime: LocalSpawn + SleepProvider + Clone + 'static {}

impl<T> Runtime for T where T: LocalSpawn + SleepProvider + Clone + 'static {}

/// Browser runtime backed by `spawn_local` and JS timers
#[derive(Debug, Clone, Default)]
pub struct WasmRuntime;

impl WasmRuntime {
    pub fn new() -> Self {
        Self
    }
}
