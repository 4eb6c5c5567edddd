//! Scripted in-memory engine backend.
//!
//! Implements [`EngineBackend`]/[`EngineSession`] without any process or
//! socket so pool, dispatcher, and monitor behavior can be exercised
//! deterministically: launches can be made to fail, instances can be
//! killed mid-task, exports can be slowed down, and every call is counted.
//! Capabilities reported at load time follow the source extension the way
//! a real engine would (`.odg` → drawing, `.odp` → slide deck, …).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::backend::{EngineBackend, EngineSession};
use crate::document::{Capability, DocumentHandle};
use crate::error::OfficeError;
use crate::protocol::{ExportOptions, TransformAction};

/// One recorded export call.
#[derive(Debug, Clone)]
pub struct ExportRecord {
    pub ordinal: u32,
    pub target: PathBuf,
    pub filter: String,
}

/// Shared observable state of a [`FakeBackend`] and all its sessions.
#[derive(Default)]
pub struct FakeEngineState {
    launches: AtomicU32,
    loads: AtomicU32,
    quits: AtomicU32,
    open_docs: AtomicU32,
    max_open_docs: AtomicU32,
    launch_failures: Mutex<u32>,
    export_failures: Mutex<u32>,
    export_delay: Mutex<Duration>,
    rejected_sources: Mutex<HashSet<PathBuf>>,
    alive: Mutex<HashMap<u32, Arc<AtomicBool>>>,
    exports: Mutex<Vec<ExportRecord>>,
    transforms: Mutex<Vec<(u32, String)>>,
}

impl FakeEngineState {
    /// Make the next `n` launch attempts fail with a start error.
    pub fn fail_next_launches(&self, n: u32) {
        *self.launch_failures.lock() = n;
    }

    /// Make the next `n` export calls fail as if the process died mid-call.
    /// The affected session stops answering afterwards.
    pub fn fail_next_exports(&self, n: u32) {
        *self.export_failures.lock() = n;
    }

    /// Slow every export down, to observe concurrent occupancy.
    pub fn set_export_delay(&self, delay: Duration) {
        *self.export_delay.lock() = delay;
    }

    /// Make loads of `source` fail as rejected input.
    pub fn reject_source(&self, source: impl Into<PathBuf>) {
        self.rejected_sources.lock().insert(source.into());
    }

    /// Kill the current session of instance `ordinal`; its next call fails.
    pub fn kill_instance(&self, ordinal: u32) {
        if let Some(flag) = self.alive.lock().get(&ordinal) {
            flag.store(false, Ordering::SeqCst);
        }
    }

    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn quits(&self) -> u32 {
        self.quits.load(Ordering::SeqCst)
    }

    pub fn open_docs(&self) -> u32 {
        self.open_docs.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open documents ever observed.
    pub fn max_open_docs(&self) -> u32 {
        self.max_open_docs.load(Ordering::SeqCst)
    }

    pub fn exports(&self) -> Vec<ExportRecord> {
        self.exports.lock().clone()
    }

    pub fn transforms(&self) -> Vec<(u32, String)> {
        self.transforms.lock().clone()
    }

    fn doc_opened(&self) {
        let now = self.open_docs.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open_docs.fetch_max(now, Ordering::SeqCst);
    }

    fn doc_gone(&self) {
        self.open_docs.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Capabilities a real engine would report for a source, by extension.
pub fn capabilities_for(source: &Path) -> Vec<Capability> {
    match source.extension().and_then(|e| e.to_str()) {
        Some("odg") => vec![Capability::DrawingSurface],
        Some("odp") => vec![Capability::SlideDeck, Capability::DrawingSurface],
        Some("ods") => vec![Capability::SpreadsheetGrid],
        _ => vec![Capability::TextFlow],
    }
}

/// In-memory [`EngineBackend`] for tests.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<FakeEngineState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<FakeEngineState> {
        Arc::clone(&self.state)
    }
}

#[async_trait]
impl EngineBackend for FakeBackend {
    async fn launch(&self, ordinal: u32) -> Result<Box<dyn EngineSession>, OfficeError> {
        {
            let mut failures = self.state.launch_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(OfficeError::Start {
                    ordinal,
                    reason: "scripted launch failure".to_string(),
                });
            }
        }
        self.state.launches.fetch_add(1, Ordering::SeqCst);

        let alive = Arc::new(AtomicBool::new(true));
        self.state.alive.lock().insert(ordinal, Arc::clone(&alive));

        Ok(Box::new(FakeSession {
            ordinal,
            state: Arc::clone(&self.state),
            alive,
            open: None,
        }))
    }
}

struct FakeSession {
    ordinal: u32,
    state: Arc<FakeEngineState>,
    alive: Arc<AtomicBool>,
    open: Option<Uuid>,
}

impl FakeSession {
    fn check_alive(&mut self, operation: &'static str) -> Result<(), OfficeError> {
        if self.alive.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.open.take().is_some() {
            self.state.doc_gone();
        }
        Err(OfficeError::comm(operation, "instance is dead"))
    }

    fn die(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if self.open.take().is_some() {
            self.state.doc_gone();
        }
    }
}

#[async_trait]
impl EngineSession for FakeSession {
    async fn probe(&mut self) -> Result<(), OfficeError> {
        self.check_alive("probe")
    }

    async fn load(&mut self, source: &Path) -> Result<DocumentHandle, OfficeError> {
        self.check_alive("load")?;
        if self.open.is_some() {
            return Err(OfficeError::comm("load", "a document is already open"));
        }
        if self.state.rejected_sources.lock().contains(source) {
            return Err(OfficeError::Load {
                path: source.to_path_buf(),
                reason: "scripted rejection".to_string(),
            });
        }

        let id = Uuid::new_v4();
        self.open = Some(id);
        self.state.loads.fetch_add(1, Ordering::SeqCst);
        self.state.doc_opened();
        Ok(DocumentHandle::new(id, capabilities_for(source)))
    }

    async fn transform(
        &mut self,
        doc: &DocumentHandle,
        action: TransformAction,
    ) -> Result<(), OfficeError> {
        self.check_alive("transform")?;
        if self.open != Some(doc.id()) {
            return Err(OfficeError::comm("transform", "no such open document"));
        }
        self.state
            .transforms
            .lock()
            .push((self.ordinal, action.describe()));
        Ok(())
    }

    async fn export(
        &mut self,
        doc: &DocumentHandle,
        target: &Path,
        options: &ExportOptions,
    ) -> Result<(), OfficeError> {
        self.check_alive("export")?;
        if self.open != Some(doc.id()) {
            return Err(OfficeError::comm("export", "no such open document"));
        }

        let delay = *self.state.export_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.state.export_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                drop(failures);
                self.die();
                return Err(OfficeError::comm("export", "scripted death mid-export"));
            }
        }

        self.state.exports.lock().push(ExportRecord {
            ordinal: self.ordinal,
            target: target.to_path_buf(),
            filter: options.filter.clone(),
        });
        Ok(())
    }

    async fn close(&mut self, doc: &DocumentHandle) -> Result<(), OfficeError> {
        self.check_alive("close")?;
        if self.open.take() != Some(doc.id()) {
            return Err(OfficeError::comm("close", "no such open document"));
        }
        self.state.doc_gone();
        Ok(())
    }

    async fn quit(mut self: Box<Self>) {
        self.state.quits.fetch_add(1, Ordering::SeqCst);
        self.die();
    }

    async fn terminate(mut self: Box<Self>) {
        self.die();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::is_draw;

    #[tokio::test]
    async fn load_reports_capabilities_by_extension() {
        let backend = FakeBackend::new();
        let mut session = backend.launch(0).await.unwrap();

        let doc = session.load(Path::new("shapes.odg")).await.unwrap();
        assert!(is_draw(&doc));
        session.close(&doc).await.unwrap();

        let doc = session.load(Path::new("deck.odp")).await.unwrap();
        assert!(doc.supports(Capability::SlideDeck));
    }

    #[tokio::test]
    async fn killed_instance_stops_answering() {
        let backend = FakeBackend::new();
        let state = backend.state();
        let mut session = backend.launch(3).await.unwrap();

        session.probe().await.unwrap();
        state.kill_instance(3);
        assert!(session.probe().await.is_err());
    }

    #[tokio::test]
    async fn scripted_export_failure_kills_the_session() {
        let backend = FakeBackend::new();
        let state = backend.state();
        state.fail_next_exports(1);

        let mut session = backend.launch(0).await.unwrap();
        let doc = session.load(Path::new("a.odt")).await.unwrap();
        let options = ExportOptions::with_filter("writer_pdf_Export");

        let err = session
            .export(&doc, Path::new("a.pdf"), &options)
            .await
            .unwrap_err();
        assert!(!err.is_content());
        assert!(session.probe().await.is_err());
        assert_eq!(state.open_docs(), 0);
    }
}
