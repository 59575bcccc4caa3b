//! Where fire-and-forget network writes run.

use crate::platform::{BoxFuture, MaybeSend};

/// Runs a detached task. Results come back over channels, never as return values.
pub trait Spawner: MaybeSend {
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Native: each task gets a short-lived thread driven by `pollster`.
///
/// Pairs with the blocking HTTP client, whose calls would otherwise stall the
/// caller's loop.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSpawner;

#[cfg(not(target_arch = "wasm32"))]
impl Spawner for ThreadSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        let result = std::thread::Builder::new()
            .name("inkpage-task".to_string())
            .spawn(move || pollster::block_on(task));
        if let Err(e) = result {
            log::error!("Failed to spawn background task: {}", e);
        }
    }
}

/// WASM: tasks run on the browser's microtask queue.
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSpawner;

#[cfg(target_arch = "wasm32")]
impl Spawner for LocalSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }
}

/// Runs each task to completion before `spawn` returns.
///
/// Deterministic ordering for tests and command-line tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineSpawner;

impl Spawner for InlineSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        #[cfg(not(target_arch = "wasm32"))]
        pollster::block_on(task);
        #[cfg(target_arch = "wasm32")]
        wasm_bindgen_futures::spawn_local(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_inline_spawner_completes_before_return() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        InlineSpawner.spawn(Box::pin(async move {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_thread_spawner_runs_task() {
        let (tx, rx) = mpsc::channel();
        ThreadSpawner.spawn(Box::pin(async move {
            let _ = tx.send(42);
        }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }
}
