use std::time::Duration;

use tokio::task::AbortHandle;

/// Handle of a scheduled block. Dropping the key leaves the schedule running; call
/// [`cancel`](ScheduleKey::cancel) to stop it.
#[derive(Debug)]
pub struct ScheduleKey {
    handle: AbortHandle,
}

impl ScheduleKey {
    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

pub fn schedule_once<F>(delay: Duration, block: F) -> ScheduleKey
    where
        F: FnOnce() + Send + 'static,
{
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        block();
    });
    ScheduleKey { handle: handle.abort_handle() }
}

/// Runs `block` after `initial_delay` (immediately when `None`) and then every `interval`.
pub fn schedule_with_fixed_delay<F>(initial_delay: Option<Duration>, interval: Duration, block: F) -> ScheduleKey
    where
        F: Fn() + Send + 'static,
{
    let handle = tokio::spawn(async move {
        if let Some(delay) = initial_delay {
            tokio::time::sleep(delay).await;
        }
        loop {
            block();
            tokio::time::sleep(interval).await;
        }
    });
    ScheduleKey { handle: handle.abort_handle() }
}
