//! Blocking and background call forms.
//!
//! Every remote operation is an `async fn`. [`Remote`] derives the two other
//! forms from it: `run_blocking` drives the future on a runtime owned by the
//! client, and `run_in_background` moves the entity into a task on a caller
//! supplied worker and hands it back, with the result, to a completion
//! closure.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::KiiClient;
use crate::error::{KiiError, KiiResult};

/// Lazily built runtime behind the blocking call form.
pub(crate) struct Invoker {
    worker_threads: usize,
    runtime: Mutex<Option<Arc<Runtime>>>,
}

impl Invoker {
    pub(crate) fn new(worker_threads: usize) -> Self {
        Self {
            worker_threads: worker_threads.max(1),
            runtime: Mutex::new(None),
        }
    }

    fn runtime(&self) -> KiiResult<Arc<Runtime>> {
        let mut slot = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(runtime) = slot.as_ref() {
            return Ok(Arc::clone(runtime));
        }
        debug!(threads = self.worker_threads, "starting blocking runtime");
        let runtime = Arc::new(
            Builder::new_multi_thread()
                .worker_threads(self.worker_threads)
                .thread_name("kii-worker")
                .enable_all()
                .build()?,
        );
        *slot = Some(Arc::clone(&runtime));
        Ok(runtime)
    }

    /// Runs `future` to completion on the calling thread.
    ///
    /// Fails with a precondition error when called from inside an async
    /// context, where blocking would stall the caller's executor.
    pub(crate) fn block_on<T>(&self, future: impl Future<Output = KiiResult<T>>) -> KiiResult<T> {
        if Handle::try_current().is_ok() {
            return Err(KiiError::Precondition(
                "blocking calls cannot be made from within an async runtime; await the async form instead"
                    .into(),
            ));
        }
        self.runtime()?.block_on(future)
    }

    /// Handle of the owned runtime, usable as a background worker.
    pub(crate) fn handle(&self) -> KiiResult<Handle> {
        Ok(self.runtime()?.handle().clone())
    }
}

impl Drop for Invoker {
    fn drop(&mut self) {
        let slot = self.runtime.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(runtime) = slot.take() {
            if let Ok(runtime) = Arc::try_unwrap(runtime) {
                runtime.shutdown_background();
            }
        }
    }
}

/// Call forms shared by everything that talks to the backend.
pub trait Remote: Send + Sized + 'static {
    /// The client this value was created from.
    fn client(&self) -> &KiiClient;

    /// Runs `op` on the client's runtime and waits for it.
    fn run_blocking<T, Op>(&mut self, op: Op) -> KiiResult<T>
    where
        Op: for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, KiiResult<T>>,
    {
        let invoker = self.client().invoker();
        invoker.block_on(op(self))
    }

    /// Runs `op` on `worker` and calls `done` with the value and the result.
    ///
    /// The value is moved into the task, so the caller cannot observe it
    /// half-updated; `done` receives it in its final state, on a worker thread.
    fn run_in_background<T, Op, Done>(self, worker: &Handle, op: Op, done: Done) -> JoinHandle<()>
    where
        T: Send + 'static,
        Op: for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, KiiResult<T>> + Send + 'static,
        Done: FnOnce(Self, KiiResult<T>) + Send + 'static,
    {
        worker.spawn(async move {
            let mut value = self;
            let result = op(&mut value).await;
            done(value, result);
        })
    }
}
