//! Task spawning implementation for WASM

use futures::task::{LocalFutureObj, LocalSpawn, SpawnError};
use wasm_bindgen_futures::spawn_local;

use super::WasmRuntime;

/// WASM spawner that uses wasm-bindgen-futures
#[derive(Debug, Clone)]
pub struct WasmSpawner;

impl LocalSpawn for WasmSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        // spawn_local runs the future to completion in the browser's event loop
        spawn_local(future);
        Ok(())
    }
}

impl LocalSpawn for WasmRuntime {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        WasmSpawner.spawn_local_obj(future)
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use crate::runtime::SleepProvider;
    use futures::task::LocalSpawnExt;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    async fn test_spawn() {
        let runtime = WasmRuntime::new();
        let executed = Rc::new(Cell::new(false));
        let executed_clone = executed.clone();

        runtime
            .spawn_local(async move {
                executed_clone.set(true);
            })
            .expect("Failed to spawn task");

        // Give the spawned task time to execute
        runtime.sleep(Duration::from_millis(50)).await;

        assert!(executed.get(), "Spawned task should have executed");
    }
}
