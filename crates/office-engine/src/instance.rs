//! One supervised engine instance.
//!
//! Supervision is an explicit state machine: [`InstanceState`] names every
//! state a pool slot can be in and [`InstanceState::can_transition`] the
//! legal moves, so pool and monitor transitions are checkable on their own.
//! The [`OfficeInstance`] itself carries the live session plus the
//! bookkeeping the pool needs (activity, task count); which state the slot
//! is in is owned by whoever owns the slot.

use std::path::Path;
use std::time::Instant;

use crate::backend::EngineSession;
use crate::document::DocumentHandle;
use crate::error::OfficeError;
use crate::protocol::{ExportOptions, TransformAction};

/// Lifecycle state of a pool slot's engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum InstanceState {
    /// Process spawned, not yet answering probes.
    Starting,
    /// Ready for a task.
    Idle,
    /// Serving exactly one task.
    Busy,
    /// Taken out of rotation, restart in progress or pending backoff.
    Restarting,
    /// Probe failure or process exit observed; awaiting the monitor.
    Dead,
    /// Restart budget exhausted; removed from rotation for good.
    PermanentlyDead,
}

impl InstanceState {
    /// Legal state-machine moves. Any live state may drop to `Dead`.
    pub fn can_transition(self, to: InstanceState) -> bool {
        use InstanceState::*;
        match (self, to) {
            (Starting, Idle) => true,
            (Idle, Busy) => true,
            (Busy, Idle) => true,
            (Dead, Restarting) => true,
            (Restarting, Starting) => true,
            // A failed restart attempt goes back to Dead for the next sweep.
            (Restarting, Dead) => true,
            (Restarting, PermanentlyDead) => true,
            (Starting | Idle | Busy, Dead) => true,
            _ => false,
        }
    }

    /// False once the slot has been permanently removed from rotation.
    pub fn is_live(self) -> bool {
        !matches!(self, InstanceState::PermanentlyDead)
    }
}

/// A live engine instance checked into a pool slot.
///
/// Owns the only session to its process. All document traffic flows
/// through these wrappers so the activity clock stays accurate.
pub struct OfficeInstance {
    ordinal: u32,
    session: Box<dyn EngineSession>,
    started_at: Instant,
    last_activity: Instant,
    tasks_completed: u32,
}

impl OfficeInstance {
    pub fn new(ordinal: u32, session: Box<dyn EngineSession>) -> Self {
        let now = Instant::now();
        Self {
            ordinal,
            session,
            started_at: now,
            last_activity: now,
            tasks_completed: 0,
        }
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Number of tasks completed since this process was started.
    pub fn tasks_completed(&self) -> u32 {
        self.tasks_completed
    }

    /// Record a completed task; returns the new count.
    pub fn note_task_completed(&mut self) -> u32 {
        self.tasks_completed += 1;
        self.tasks_completed
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub async fn probe(&mut self) -> Result<(), OfficeError> {
        self.touch();
        self.session.probe().await
    }

    pub async fn load(&mut self, source: &Path) -> Result<DocumentHandle, OfficeError> {
        self.touch();
        self.session.load(source).await
    }

    pub async fn transform(
        &mut self,
        doc: &DocumentHandle,
        action: TransformAction,
    ) -> Result<(), OfficeError> {
        self.touch();
        self.session.transform(doc, action).await
    }

    pub async fn export(
        &mut self,
        doc: &DocumentHandle,
        target: &Path,
        options: &ExportOptions,
    ) -> Result<(), OfficeError> {
        self.touch();
        self.session.export(doc, target, options).await
    }

    pub async fn close(&mut self, doc: &DocumentHandle) -> Result<(), OfficeError> {
        self.touch();
        self.session.close(doc).await
    }

    /// Graceful shutdown: quit over the link, kill after the grace period.
    pub async fn shutdown(self) {
        self.session.quit().await;
    }

    /// Immediate kill, for instances already considered dead.
    pub async fn terminate(self) {
        self.session.terminate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::InstanceState::*;

    #[test]
    fn happy_path_transitions() {
        assert!(Starting.can_transition(Idle));
        assert!(Idle.can_transition(Busy));
        assert!(Busy.can_transition(Idle));
    }

    #[test]
    fn any_live_state_can_die() {
        for state in [Starting, Idle, Busy] {
            assert!(state.can_transition(Dead), "{state} -> Dead must be legal");
        }
    }

    #[test]
    fn restart_cycle() {
        assert!(Dead.can_transition(Restarting));
        assert!(Restarting.can_transition(Starting));
        assert!(Restarting.can_transition(Dead));
        assert!(Restarting.can_transition(PermanentlyDead));
        assert!(Starting.can_transition(Idle));
    }

    #[test]
    fn permanent_death_is_terminal() {
        for state in [Starting, Idle, Busy, Restarting, Dead] {
            assert!(!PermanentlyDead.can_transition(state));
        }
        assert!(!PermanentlyDead.is_live());
        assert!(Dead.is_live());
    }

    #[test]
    fn no_shortcuts_into_busy() {
        assert!(!Starting.can_transition(Busy));
        assert!(!Dead.can_transition(Busy));
        assert!(!Restarting.can_transition(Busy));
        assert!(!Dead.can_transition(Idle));
    }
}
