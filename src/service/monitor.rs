//! Fan-in of independent asynchronous sub-requests.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

#[derive(Default)]
struct State {
    remaining: Cell<usize>,
    waker: RefCell<Option<Waker>>,
}

impl State {
    fn complete_one(&self) {
        let remaining = self.remaining.get();
        debug_assert!(remaining > 0);
        self.remaining.set(remaining.saturating_sub(1));
        if remaining == 1 {
            if let Some(waker) = self.waker.borrow_mut().take() {
                waker.wake();
            }
        }
    }
}

/// Counting monitor: completes once after each of N sub-requests reports completion.
///
/// Every sub-request receives its own [`Completion`] token. A token counts once, no matter
/// how many times it is completed; a dropped token counts as completed.
pub struct CountingMonitor {
    state: Rc<State>,
}

impl CountingMonitor {
    /// Create monitor for `count` sub-requests, zero count monitor is already completed.
    pub fn new(count: usize) -> (CountingMonitor, Vec<Completion>) {
        let state = Rc::new(State {
            remaining: Cell::new(count),
            waker: RefCell::default(),
        });
        let tokens = (0..count)
            .map(|_| Completion {
                state: state.clone(),
                done: Cell::new(false),
            })
            .collect();
        (CountingMonitor { state }, tokens)
    }

    pub fn remaining(&self) -> usize {
        self.state.remaining.get()
    }

    pub fn is_done(&self) -> bool {
        self.remaining() == 0
    }

    /// Wait until all sub-requests are completed.
    pub fn wait(self) -> Wait {
        Wait { state: self.state }
    }
}

/// Completion token of a single sub-request.
pub struct Completion {
    state: Rc<State>,
    done: Cell<bool>,
}

impl Completion {
    pub fn done(&self) {
        if !self.done.replace(true) {
            self.state.complete_one();
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.done();
    }
}

pub struct Wait {
    state: Rc<State>,
}

impl Future for Wait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.state.remaining.get() == 0 {
            return Poll::Ready(());
        }
        *self.state.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}
