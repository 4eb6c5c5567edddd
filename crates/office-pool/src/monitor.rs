//! Instance health monitoring and restart supervision.
//!
//! A single periodic task, independent of conversion traffic. Each sweep
//! probes idle instances and schedules restarts for dead slots: restart
//! delays follow the configured exponential backoff, a successful restart
//! clears the slot's failure streak, and a slot whose streak exceeds the
//! budget is marked permanently dead and removed from rotation (with an
//! operational alert, while the pool keeps serving on the remaining
//! slots). Quota recycles ride the same path without the backoff penalty.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use office_engine::{EngineBackend, InstanceState, OfficeInstance};

use crate::config::PoolConfig;
use crate::events::{PoolEvent, PoolEvents};
use crate::pool::InstancePool;
use crate::restart::RestartBackoff;

pub(crate) struct HealthMonitor {
    pool: InstancePool,
    backend: Arc<dyn EngineBackend>,
    backoff: RestartBackoff,
    events: PoolEvents,
    probe_interval: Duration,
    shutdown: CancellationToken,
}

impl HealthMonitor {
    pub fn new(
        pool: InstancePool,
        backend: Arc<dyn EngineBackend>,
        config: &PoolConfig,
        events: PoolEvents,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pool,
            backend,
            backoff: RestartBackoff::new(config.restart.clone()),
            events,
            probe_interval: config.probe_interval(),
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut tick = tokio::time::interval(self.probe_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            self.sweep().await;
        }
        debug!("health monitor stopped");
    }

    async fn sweep(&self) {
        for index in 0..self.pool.slots().len() {
            match self.pool.slot(index).state() {
                InstanceState::Dead => self.begin_restart(index),
                InstanceState::Idle => self.probe_idle(index).await,
                // Starting/Busy/Restarting slots are someone else's move;
                // PermanentlyDead ones are gone.
                _ => {}
            }
        }
    }

    /// Probe one idle instance, taking it out of rotation for the probe so
    /// no worker can grab it mid-call.
    async fn probe_idle(&self, index: usize) {
        let slot = self.pool.slot(index);
        if !self.pool.steal_idle(index) {
            return; // a worker beat us to it
        }
        let Some(mut instance) = slot.take() else {
            self.pool.push_idle(index);
            return;
        };
        if instance.last_activity().elapsed() < self.probe_interval {
            // Recently active instances are known good; skip the round trip.
            slot.park(instance);
            self.pool.push_idle(index);
            return;
        }

        match instance.probe().await {
            Ok(()) => {
                slot.park(instance);
                self.pool.push_idle(index);
            }
            Err(e) => {
                warn!(ordinal = slot.ordinal, error = %e, "idle instance failed probe");
                slot.restart_failures.fetch_add(1, Ordering::SeqCst);
                slot.transition(InstanceState::Dead);
                slot.park(instance);
                self.events.emit(PoolEvent::InstanceDied {
                    ordinal: slot.ordinal,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Move a dead slot into the restart path, or retire it when the
    /// failure streak has exceeded the budget.
    fn begin_restart(&self, index: usize) {
        let slot = self.pool.slot(index);
        let ordinal = slot.ordinal;
        let recycle = slot.recycle_pending.swap(false, Ordering::SeqCst);
        let failures = slot.restart_failures.load(Ordering::SeqCst);

        slot.transition(InstanceState::Restarting);

        if !recycle && self.backoff.exhausted(failures) {
            slot.transition(InstanceState::PermanentlyDead);
            error!(
                ordinal,
                consecutive_failures = failures,
                "instance exceeded its restart budget and is permanently dead"
            );
            self.events
                .emit(PoolEvent::InstancePermanentlyDead { ordinal });
            if let Some(instance) = slot.take() {
                tokio::spawn(instance.terminate());
            }
            // Waiters must re-check live slots instead of sleeping forever.
            self.pool.wake_waiters();
            return;
        }

        let delay = if recycle {
            Duration::ZERO
        } else {
            self.backoff.delay_for(failures)
        };

        let pool = self.pool.clone();
        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            restart_slot(pool, backend, events, shutdown, index, delay, recycle).await;
        });
    }
}

/// One restart attempt for one slot. Runs detached so a long backoff or a
/// slow engine start never stalls probing of the other slots.
async fn restart_slot(
    pool: InstancePool,
    backend: Arc<dyn EngineBackend>,
    events: PoolEvents,
    shutdown: CancellationToken,
    index: usize,
    delay: Duration,
    recycle: bool,
) {
    let slot = pool.slot(index);
    let ordinal = slot.ordinal;

    // Get rid of the old process first so it cannot hold its port or
    // profile directory across the restart.
    if let Some(old) = slot.take() {
        let tasks_completed = old.tasks_completed();
        old.terminate().await;
        if recycle {
            info!(ordinal, tasks_completed, "recycling engine instance");
            events.emit(PoolEvent::InstanceRecycled {
                ordinal,
                tasks_completed,
            });
        }
    }

    if !delay.is_zero() {
        debug!(ordinal, ?delay, "backing off before restart");
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    if shutdown.is_cancelled() {
        return;
    }

    slot.transition(InstanceState::Starting);
    match backend.launch(ordinal).await {
        Ok(session) => {
            let failures = slot.restart_failures.swap(0, Ordering::SeqCst);
            pool.install(index, OfficeInstance::new(ordinal, session));
            if !recycle {
                info!(ordinal, "engine instance restarted");
                events.emit(PoolEvent::InstanceRestarted {
                    ordinal,
                    consecutive_failures: failures,
                });
            }
        }
        Err(e) => {
            let failures = slot.restart_failures.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(ordinal, consecutive_failures = failures, error = %e, "restart attempt failed");
            slot.transition(InstanceState::Dead);
            events.emit(PoolEvent::RestartFailed {
                ordinal,
                consecutive_failures: failures,
            });
        }
    }
}
