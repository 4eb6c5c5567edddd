//! Fixed-size pool of engine instances.
//!
//! Each slot owns at most one [`OfficeInstance`] plus its lifecycle state.
//! Workers check instances out exclusively; while a task holds one, the
//! slot cell is empty and nobody else can reach the process. There is no
//! pool-wide lock: the idle set and each slot are guarded independently.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use office_engine::{InstanceState, OfficeInstance};

/// How a checked-out instance is being given back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseOutcome {
    /// Task finished and the instance is healthy.
    Success,
    /// The instance failed mid-task and must be restarted.
    Failure,
}

/// Why an acquire attempt came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcquireError {
    /// No instance became idle within the timeout.
    Timeout,
    /// Every slot is permanently dead; waiting cannot help.
    NoLiveSlots,
}

pub(crate) struct Slot {
    pub ordinal: u32,
    state: Mutex<InstanceState>,
    cell: Mutex<Option<OfficeInstance>>,
    /// Consecutive failures without an intervening successful restart.
    pub restart_failures: AtomicU32,
    /// Set when the next restart is a quota recycle, not a crash recovery.
    pub recycle_pending: AtomicBool,
}

impl Slot {
    fn new(ordinal: u32) -> Self {
        Self {
            ordinal,
            state: Mutex::new(InstanceState::Starting),
            cell: Mutex::new(None),
            restart_failures: AtomicU32::new(0),
            recycle_pending: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> InstanceState {
        *self.state.lock()
    }

    /// Move the slot's state machine, warning on an illegal edge. Illegal
    /// edges indicate a supervision bug; the move is still applied so the
    /// pool converges on the observed reality rather than wedging.
    pub fn transition(&self, to: InstanceState) {
        let mut state = self.state.lock();
        if !state.can_transition(to) {
            warn!(
                ordinal = self.ordinal,
                from = %*state,
                to = %to,
                "illegal instance state transition"
            );
        }
        *state = to;
    }

    /// Park an instance in the slot cell.
    pub fn park(&self, instance: OfficeInstance) {
        let mut cell = self.cell.lock();
        debug_assert!(cell.is_none(), "slot cell already occupied");
        *cell = Some(instance);
    }

    /// Remove the parked instance, if any.
    pub fn take(&self) -> Option<OfficeInstance> {
        self.cell.lock().take()
    }
}

pub(crate) struct PoolShared {
    slots: Vec<Slot>,
    idle: Mutex<VecDeque<usize>>,
    idle_notify: Notify,
}

/// Handle to the shared pool state. Cheap to clone.
#[derive(Clone)]
pub(crate) struct InstancePool {
    shared: Arc<PoolShared>,
}

impl InstancePool {
    pub fn new(size: usize) -> Self {
        assert!(size >= 1, "pool size must be at least 1");
        Self {
            shared: Arc::new(PoolShared {
                slots: (0..size as u32).map(Slot::new).collect(),
                idle: Mutex::new(VecDeque::new()),
                idle_notify: Notify::new(),
            }),
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.shared.slots
    }

    pub fn slot(&self, index: usize) -> &Slot {
        &self.shared.slots[index]
    }

    /// Slots not yet written off as permanently dead.
    pub fn live_slots(&self) -> usize {
        self.shared
            .slots
            .iter()
            .filter(|s| s.state().is_live())
            .count()
    }

    pub fn idle_len(&self) -> usize {
        self.shared.idle.lock().len()
    }

    /// Install a freshly started instance and put it into rotation.
    pub fn install(&self, index: usize, instance: OfficeInstance) {
        let slot = &self.shared.slots[index];
        slot.park(instance);
        slot.transition(InstanceState::Idle);
        self.push_idle(index);
    }

    /// Return a slot index to the idle rotation.
    pub fn push_idle(&self, index: usize) {
        self.shared.idle.lock().push_back(index);
        self.shared.idle_notify.notify_one();
    }

    /// Remove `index` from the idle set if it is currently queued there.
    /// Used by the monitor to probe an idle instance without racing a
    /// worker for it.
    pub fn steal_idle(&self, index: usize) -> bool {
        let mut idle = self.shared.idle.lock();
        if let Some(position) = idle.iter().position(|&i| i == index) {
            idle.remove(position);
            true
        } else {
            false
        }
    }

    /// Wake everyone blocked on the idle set; used when the pool's live
    /// count drops so waiters can re-check instead of sleeping forever.
    pub fn wake_waiters(&self) {
        self.shared.idle_notify.notify_waiters();
    }

    fn try_acquire(&self) -> Option<PooledInstance> {
        let mut idle = self.shared.idle.lock();
        while let Some(index) = idle.pop_front() {
            let slot = &self.shared.slots[index];
            if slot.state() != InstanceState::Idle {
                // Stale entry: the instance died while queued.
                continue;
            }
            if let Some(instance) = slot.take() {
                slot.transition(InstanceState::Busy);
                return Some(PooledInstance {
                    index,
                    instance: Some(instance),
                    pool: self.clone(),
                });
            }
        }
        None
    }

    /// Wait for an idle instance, first-idle-found in FIFO order.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledInstance, AcquireError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let future = self.shared.idle_notify.notified();
        tokio::pin!(future);
        loop {
            future.as_mut().enable();
            if let Some(guard) = self.try_acquire() {
                return Ok(guard);
            }
            if self.live_slots() == 0 {
                return Err(AcquireError::NoLiveSlots);
            }
            if tokio::time::timeout_at(deadline, future.as_mut()).await.is_err() {
                // One last look before giving up.
                return match self.try_acquire() {
                    Some(guard) => Ok(guard),
                    None if self.live_slots() == 0 => Err(AcquireError::NoLiveSlots),
                    None => Err(AcquireError::Timeout),
                };
            }
            future.set(self.shared.idle_notify.notified());
        }
    }

    /// Give a checked-out instance back.
    ///
    /// On success the instance returns to the idle rotation unless it hit
    /// its task quota, in which case it is parked for recycling. On
    /// failure it is parked dead for the monitor, with one more
    /// consecutive failure on the books.
    pub fn release(
        &self,
        mut guard: PooledInstance,
        outcome: ReleaseOutcome,
        tasks_per_instance: u32,
    ) -> ReleaseDisposition {
        let index = guard.index;
        let slot = &self.shared.slots[index];
        let mut instance = guard.instance.take().expect("released twice");

        match outcome {
            ReleaseOutcome::Success => {
                let completed = instance.note_task_completed();
                if tasks_per_instance > 0 && completed >= tasks_per_instance {
                    slot.recycle_pending.store(true, Ordering::SeqCst);
                    slot.transition(InstanceState::Dead);
                    slot.park(instance);
                    ReleaseDisposition::Recycled {
                        tasks_completed: completed,
                    }
                } else {
                    slot.transition(InstanceState::Idle);
                    slot.park(instance);
                    self.push_idle(index);
                    ReleaseDisposition::Idle
                }
            }
            ReleaseOutcome::Failure => {
                slot.restart_failures.fetch_add(1, Ordering::SeqCst);
                slot.transition(InstanceState::Dead);
                slot.park(instance);
                ReleaseDisposition::Dead
            }
        }
    }
}

/// Where an instance ended up after release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseDisposition {
    Idle,
    Recycled { tasks_completed: u32 },
    Dead,
}

/// Exclusive checkout of one instance. The holding worker is the only
/// code that can reach the underlying session until release.
pub(crate) struct PooledInstance {
    index: usize,
    instance: Option<OfficeInstance>,
    pool: InstancePool,
}

impl PooledInstance {
    pub fn ordinal(&self) -> u32 {
        self.pool.shared.slots[self.index].ordinal
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn instance_mut(&mut self) -> &mut OfficeInstance {
        self.instance.as_mut().expect("instance already released")
    }
}

impl std::fmt::Debug for PooledInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledInstance")
            .field("index", &self.index)
            .field("checked_out", &self.instance.is_some())
            .finish()
    }
}

impl Drop for PooledInstance {
    fn drop(&mut self) {
        // Normal paths release through the pool; this only runs if a
        // worker unwound mid-task. Treat the instance as suspect.
        if let Some(instance) = self.instance.take() {
            let slot = &self.pool.shared.slots[self.index];
            slot.restart_failures.fetch_add(1, Ordering::SeqCst);
            slot.transition(InstanceState::Dead);
            slot.park(instance);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use office_engine::EngineBackend;
    use office_engine::test_utils::FakeBackend;

    async fn pool_with_instances(size: usize) -> (InstancePool, FakeBackend) {
        let backend = FakeBackend::new();
        let pool = InstancePool::new(size);
        for index in 0..size {
            let session = backend.launch(index as u32).await.unwrap();
            pool.install(index, OfficeInstance::new(index as u32, session));
        }
        (pool, backend)
    }

    #[tokio::test]
    async fn acquire_times_out_when_everything_is_busy() {
        let (pool, _backend) = pool_with_instances(1).await;

        let held = pool.acquire(Duration::from_millis(10)).await.unwrap();
        assert_eq!(pool.slot(held.index()).state(), InstanceState::Busy);

        let err = pool.acquire(Duration::from_millis(30)).await.unwrap_err();
        assert_eq!(err, AcquireError::Timeout);
    }

    #[tokio::test]
    async fn release_success_returns_to_rotation() {
        let (pool, _backend) = pool_with_instances(1).await;

        let guard = pool.acquire(Duration::from_millis(10)).await.unwrap();
        let disposition = pool.release(guard, ReleaseOutcome::Success, 0);
        assert_eq!(disposition, ReleaseDisposition::Idle);
        assert_eq!(pool.idle_len(), 1);

        // Immediately acquirable again.
        pool.acquire(Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn release_failure_parks_the_instance_dead() {
        let (pool, _backend) = pool_with_instances(2).await;

        let guard = pool.acquire(Duration::from_millis(10)).await.unwrap();
        let index = guard.index();
        let disposition = pool.release(guard, ReleaseOutcome::Failure, 0);

        assert_eq!(disposition, ReleaseDisposition::Dead);
        assert_eq!(pool.slot(index).state(), InstanceState::Dead);
        assert_eq!(pool.slot(index).restart_failures.load(Ordering::SeqCst), 1);
        // The dead slot is out of rotation; the other one still serves.
        assert_eq!(pool.idle_len(), 1);
    }

    #[tokio::test]
    async fn task_quota_marks_the_instance_for_recycling() {
        let (pool, _backend) = pool_with_instances(1).await;

        let guard = pool.acquire(Duration::from_millis(10)).await.unwrap();
        let index = guard.index();
        let disposition = pool.release(guard, ReleaseOutcome::Success, 1);

        assert_eq!(
            disposition,
            ReleaseDisposition::Recycled { tasks_completed: 1 }
        );
        assert_eq!(pool.slot(index).state(), InstanceState::Dead);
        assert!(pool.slot(index).recycle_pending.load(Ordering::SeqCst));
        assert_eq!(
            pool.slot(index).restart_failures.load(Ordering::SeqCst),
            0,
            "recycling is not a failure"
        );
    }

    #[tokio::test]
    async fn waiting_acquire_is_woken_by_release() {
        let (pool, _backend) = pool_with_instances(1).await;
        let guard = pool.acquire(Duration::from_millis(10)).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(Duration::from_secs(5)).await.map(|_g| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.release(guard, ReleaseOutcome::Success, 0);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn no_live_slots_fails_fast() {
        let (pool, _backend) = pool_with_instances(1).await;
        let guard = pool.acquire(Duration::from_millis(10)).await.unwrap();
        let index = guard.index();
        pool.release(guard, ReleaseOutcome::Failure, 0);

        pool.slot(index).transition(InstanceState::Restarting);
        pool.slot(index).transition(InstanceState::PermanentlyDead);
        pool.wake_waiters();

        let err = pool.acquire(Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, AcquireError::NoLiveSlots);
    }
}
