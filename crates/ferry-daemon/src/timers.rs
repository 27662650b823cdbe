//! Wall-clock timers on the tokio runtime

use std::sync::atomic::Ordering;
use std::time::Duration;

use ferry_core::{BundleEvent, EventQueue, TimerHandle, TimerService};
use tokio::runtime::Handle;
use tracing::trace;

use crate::error::{DaemonError, DaemonResult};

/// Timer service that sleeps on a tokio task and posts the event when due
pub struct TokioTimers {
    events: EventQueue,
    runtime: Handle,
}

impl TokioTimers {
    pub fn new(events: EventQueue, runtime: Handle) -> Self {
        Self { events, runtime }
    }

    /// Use the runtime the caller is running on
    pub fn from_current(events: EventQueue) -> DaemonResult<Self> {
        let runtime = Handle::try_current().map_err(|e| DaemonError::Runtime(e.to_string()))?;
        Ok(Self::new(events, runtime))
    }
}

impl TimerService for TokioTimers {
    fn schedule(&self, delay: Duration, event: BundleEvent) -> TimerHandle {
        let handle = TimerHandle::new();
        let cancelled = handle.cancelled_flag();
        let events = self.events.clone();
        let name = event.name();

        trace!(event = name, delay_ms = delay.as_millis() as u64, "timer scheduled");

        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if cancelled.load(Ordering::Acquire) {
                return;
            }
            trace!(event = name, "timer fired");
            events.post(event);
        });

        handle.with_abort(task.abort_handle())
    }
}
