use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

/// How a [`CountdownLatch`] completed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Completion {
    /// `done` was called the expected number of times.
    Done,
    /// The timeout elapsed first. Carries the number of `done` calls still missing.
    TimedOut(usize),
}

type Callback = Box<dyn FnOnce(Completion) + Send + 'static>;

struct LatchState {
    remaining: usize,
    callback: Option<Callback>,
    timer: Option<AbortHandle>,
}

/// Waits for `count` independent completions, or a timeout, then runs its callback exactly once.
///
/// The latch is cheap to clone; every clone counts down the same state. Calls to
/// [`done`](CountdownLatch::done) after the callback fired are ignored.
#[derive(Clone)]
pub struct CountdownLatch {
    state: Arc<Mutex<LatchState>>,
}

impl CountdownLatch {
    /// A zero count fires the callback before returning. A non-zero count needs a tokio runtime
    /// for the timeout timer.
    pub fn new<F>(count: usize, timeout: Duration, callback: F) -> Self
        where
            F: FnOnce(Completion) + Send + 'static,
    {
        let state = Arc::new(Mutex::new(LatchState {
            remaining: count,
            callback: Some(Box::new(callback)),
            timer: None,
        }));
        let latch = Self { state };
        if count == 0 {
            latch.fire(|_| Completion::Done);
        } else {
            let timed = latch.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                timed.fire(|remaining| Completion::TimedOut(remaining));
            });
            let mut state = latch.state.lock();
            if state.callback.is_some() {
                state.timer = Some(handle.abort_handle());
            } else {
                handle.abort();
            }
        }
        latch
    }

    pub fn done(&self) {
        let finished = {
            let mut state = self.state.lock();
            if state.callback.is_none() || state.remaining == 0 {
                return;
            }
            state.remaining -= 1;
            state.remaining == 0
        };
        if finished {
            self.fire(|_| Completion::Done);
        }
    }

    pub fn remaining(&self) -> usize {
        self.state.lock().remaining
    }

    pub fn is_fired(&self) -> bool {
        self.state.lock().callback.is_none()
    }

    fn fire<C>(&self, completion: C) where C: FnOnce(usize) -> Completion {
        let (callback, timer, remaining) = {
            let mut state = self.state.lock();
            (state.callback.take(), state.timer.take(), state.remaining)
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(callback) = callback {
            callback(completion(remaining));
        }
    }
}

impl Debug for CountdownLatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CountdownLatch")
            .field("remaining", &state.remaining)
            .field("fired", &state.callback.is_none())
            .finish()
    }
}
