//! The per-session elapsed clock.
//!
//! One ticking interval per active session, 1-second granularity. The clock
//! is a handle owned by the controller with explicit start/stop and an
//! idempotent clear: the previous task is always aborted before a new one
//! starts, on stop, and on drop, so at most one interval is ever alive.
//! Ticks carry a generation number so a tick from a superseded phase is
//! discarded by the receiver instead of advancing the wrong session.

use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle, time};
use tracing::debug;

/// Hard ceiling of one session, in seconds.
pub const SESSION_CEILING_SECS: u32 = 900;

/// The tick at which the controller forces termination, i.e. the 15:00
/// boundary. The ended path still proceeds to the review prompt.
pub const FORCED_STOP_AT_SECS: u32 = 899;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTick {
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct SessionClock {
    task: Option<JoinHandle<()>>,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts ticking once per second into `tx`. Any previous interval is
    /// cleared first.
    pub fn start(&mut self, generation: u64, tx: mpsc::Sender<ClockTick>) {
        self.stop();
        debug!(generation, "Session clock started");
        self.task = Some(tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(ClockTick { generation }).await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Idempotent clear. Safe on a clock that never started.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Session clock cleared");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for SessionClock {
    fn drop(&mut self) {
        self.stop();
    }
}
