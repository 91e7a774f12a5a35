//! Per-session cooperative executor.
//!
//! All cache mutations, event handling and result delivery of a session happen on one
//! single-threaded task queue, so only one unit of work runs at a time. State shared between
//! tasks is `Rc`-based, which keeps two sessions structurally isolated.

use crate::mi_debug;
use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

pub struct Executor {
    pool: LocalPool,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            pool: LocalPool::new(),
        }
    }

    /// Return a handle for scheduling tasks on this executor.
    pub fn spawner(&self) -> Spawner {
        Spawner(self.pool.spawner())
    }

    /// Run all scheduled tasks until given future resolves.
    pub fn run_until<F: Future>(&mut self, future: F) -> F::Output {
        self.pool.run_until(future)
    }

    /// Run scheduled tasks until none of them can make progress.
    pub fn run_until_stalled(&mut self) {
        self.pool.run_until_stalled()
    }
}

/// Cloneable handle to a session executor.
#[derive(Clone)]
pub struct Spawner(LocalSpawner);

impl Spawner {
    /// Schedule a task. When session executor is already dropped the task is discarded.
    pub fn spawn(&self, task: impl Future<Output = ()> + 'static) {
        if let Err(e) = self.0.spawn_local(task) {
            mi_debug!(target: "executor", "task discarded: {e}");
        }
    }
}

/// Give other scheduled tasks a chance to run (one scheduling turn).
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
