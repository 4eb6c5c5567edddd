//! Operational pool events.
//!
//! Emitted on a broadcast channel so operators can alert on restarts and
//! permanent instance death without scraping logs. Lagging or absent
//! subscribers never block the pool.

use tokio::sync::broadcast;
use uuid::Uuid;

/// Default buffer for the event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// Instance came up during initial pool startup.
    InstanceStarted { ordinal: u32 },
    /// Instance stopped answering (probe failure or mid-task death).
    InstanceDied { ordinal: u32, reason: String },
    /// Instance came back after a restart.
    InstanceRestarted {
        ordinal: u32,
        consecutive_failures: u32,
    },
    /// A restart attempt failed; another will follow with more backoff.
    RestartFailed {
        ordinal: u32,
        consecutive_failures: u32,
    },
    /// Restart budget exhausted; the slot left the rotation for good.
    InstancePermanentlyDead { ordinal: u32 },
    /// Instance was proactively replaced after serving its task quota.
    InstanceRecycled { ordinal: u32, tasks_completed: u32 },
    /// A task went back to the queue after its instance died mid-flight.
    TaskRequeued { task_id: Uuid, retries: u32 },
}

impl PoolEvent {
    /// Short human-readable description, for operator logs.
    pub fn describe(&self) -> String {
        match self {
            PoolEvent::InstanceStarted { ordinal } => format!("instance #{ordinal} started"),
            PoolEvent::InstanceDied { ordinal, reason } => {
                format!("instance #{ordinal} died: {reason}")
            }
            PoolEvent::InstanceRestarted {
                ordinal,
                consecutive_failures,
            } => format!("instance #{ordinal} restarted after {consecutive_failures} failure(s)"),
            PoolEvent::RestartFailed {
                ordinal,
                consecutive_failures,
            } => format!("instance #{ordinal} restart failed ({consecutive_failures} consecutive)"),
            PoolEvent::InstancePermanentlyDead { ordinal } => {
                format!("instance #{ordinal} is permanently dead")
            }
            PoolEvent::InstanceRecycled {
                ordinal,
                tasks_completed,
            } => format!("instance #{ordinal} recycled after {tasks_completed} tasks"),
            PoolEvent::TaskRequeued { task_id, retries } => {
                format!("task {task_id} requeued (retry {retries})")
            }
        }
    }
}

/// Shared emitter handle.
#[derive(Clone)]
pub struct PoolEvents {
    sender: broadcast::Sender<PoolEvent>,
}

impl PoolEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: PoolEvent) {
        tracing::debug!(event = %event.describe(), "pool event");
        // Send only fails when nobody is subscribed, which is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for PoolEvents {
    fn default() -> Self {
        Self::new()
    }
}
