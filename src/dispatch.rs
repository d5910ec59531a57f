//! Exactly-once delivery of a query result to a caller-supplied continuation.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::QueryError;

const PENDING: u8 = 0;
const DELIVERED: u8 = 1;
const CANCELLED: u8 = 2;

/// Runs calls on a fixed tokio runtime and hands results to continuations.
///
/// Continuations are invoked on a worker of that runtime.
#[derive(Debug, Clone)]
pub struct Dispatcher {
  handle: Handle,
}

impl Dispatcher {
  pub fn new(handle: Handle) -> Self {
    Self { handle }
  }

  /// Dispatcher bound to the runtime of the calling task.
  ///
  /// Panics when called outside a tokio runtime, like `Handle::current`.
  pub fn current() -> Self {
    Self::new(Handle::current())
  }

  pub fn handle(&self) -> &Handle {
    &self.handle
  }

  /// Run `call` and pass its result to `on_complete` exactly once, unless cancelled first.
  pub fn dispatch<T, F, C>(&self, call: F, on_complete: C) -> CallHandle
  where
    T: Send + 'static,
    F: Future<Output = Result<T, QueryError>> + Send + 'static,
    C: FnOnce(Result<T, QueryError>) + Send + 'static,
  {
    let state = Arc::new(AtomicU8::new(PENDING));
    let claim = Arc::clone(&state);

    let task = self.handle.spawn(async move {
      let result = call.await;
      if claim
        .compare_exchange(PENDING, DELIVERED, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
      {
        on_complete(result);
      } else {
        log::trace!("call cancelled before delivery; dropping result");
      }
    });

    CallHandle { state, task }
  }
}

/// Handle to a dispatched call.
#[derive(Debug)]
pub struct CallHandle {
  state: Arc<AtomicU8>,
  task: JoinHandle<()>,
}

impl CallHandle {
  /// Cancel the call. Returns `true` if the continuation will never run.
  ///
  /// Returns `false` when the result was already claimed for delivery. Cancelling
  /// aborts the in-flight wait, which releases its correlation id on the connection;
  /// the connection itself stays open.
  pub fn cancel(&self) -> bool {
    let won = self
      .state
      .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok();
    if won {
      self.task.abort();
    }
    won
  }

  pub fn is_cancelled(&self) -> bool {
    self.state.load(Ordering::Acquire) == CANCELLED
  }

  /// Whether the underlying task has stopped, by delivery or cancellation.
  pub fn is_finished(&self) -> bool {
    self.task.is_finished()
  }

  /// Wait for the task to stop.
  pub async fn join(self) {
    let _ = self.task.await;
  }
}
