//! # office-filter
//!
//! Ordered transformation steps applied to a loaded document before it is
//! exported. A [`FilterChain`] is a chain of responsibility with an
//! explicit continuation: each [`Filter`] receives a [`Next`] value and
//! must invoke it to let the rest of the chain run. That makes three
//! behaviors possible by construction:
//!
//! * **wrap**: run logic both before and after the downstream filters,
//! * **short-circuit**: return without invoking the continuation; the
//!   chain ends and the caller sees [`ChainOutcome::ShortCircuited`]
//!   (no export happens),
//! * **abort**: return an error; the conversion fails.
//!
//! Chains are immutable once built and execute filters strictly in the
//! order they were appended.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use office_engine::{DocumentHandle, OfficeError, OfficeInstance, TransformAction};

mod refresh;

pub use refresh::RefreshFilter;

/// Error raised while running a filter chain.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// A filter rejected the document or its own configuration.
    #[error("filter `{filter}` failed: {reason}")]
    Filter { filter: String, reason: String },

    /// The engine call issued by a filter failed.
    #[error(transparent)]
    Engine(#[from] OfficeError),

    /// The owning task was cancelled at a chain suspension point.
    #[error("filter chain cancelled")]
    Cancelled,
}

impl FilterError {
    pub fn filter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        FilterError::Filter {
            filter: name.into(),
            reason: reason.into(),
        }
    }
}

/// Execution context handed to every filter.
///
/// Borrows the engine instance the document is open in, so filters can
/// issue in-memory transformations but can never touch another instance.
pub struct FilterContext<'a> {
    instance: &'a mut OfficeInstance,
    cancel: &'a CancellationToken,
}

impl<'a> FilterContext<'a> {
    pub fn new(instance: &'a mut OfficeInstance, cancel: &'a CancellationToken) -> Self {
        Self { instance, cancel }
    }

    /// Ordinal of the instance serving this conversion.
    pub fn instance_ordinal(&self) -> u32 {
        self.instance.ordinal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Apply an in-memory transformation to the open document.
    pub async fn transform(
        &mut self,
        doc: &DocumentHandle,
        action: TransformAction,
    ) -> Result<(), FilterError> {
        Ok(self.instance.transform(doc, action).await?)
    }
}

/// One named transformation step.
#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspect or mutate the document, then invoke `next` to continue the
    /// chain, or return without doing so to short-circuit it.
    async fn apply(
        &self,
        ctx: &mut FilterContext<'_>,
        doc: &DocumentHandle,
        next: Next<'_>,
    ) -> Result<(), FilterError>;
}

/// Continuation for the remainder of a chain.
///
/// Consumed on use: a filter can invoke the rest of the chain at most once.
pub struct Next<'c> {
    rest: &'c [Arc<dyn Filter>],
    reached_end: &'c AtomicBool,
}

impl<'c> Next<'c> {
    /// Run the rest of the chain. Cancellation is honored between steps;
    /// an in-flight engine call is left to finish or time out.
    pub async fn run(
        self,
        ctx: &mut FilterContext<'_>,
        doc: &DocumentHandle,
    ) -> Result<(), FilterError> {
        if ctx.is_cancelled() {
            return Err(FilterError::Cancelled);
        }
        match self.rest.split_first() {
            Some((head, rest)) => {
                trace!(filter = head.name(), "entering filter");
                head.apply(
                    ctx,
                    doc,
                    Next {
                        rest,
                        reached_end: self.reached_end,
                    },
                )
                .await
            }
            None => {
                self.reached_end.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

/// Whether a chain ran to its end or a filter stopped it early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Every filter invoked its continuation; export may proceed.
    Completed,
    /// Some filter deliberately did not continue; nothing is exported.
    ShortCircuited,
}

/// An immutable, ordered chain of filters.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Arc<[Arc<dyn Filter>]>,
}

impl FilterChain {
    pub fn builder() -> FilterChainBuilder {
        FilterChainBuilder {
            filters: Vec::new(),
        }
    }

    /// Chain with no filters; runs straight to completion.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Chain of a single filter.
    pub fn of(filter: impl Filter + 'static) -> Self {
        Self::builder().append(filter).build()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Run the chain over the open document, in declaration order.
    pub async fn run(
        &self,
        ctx: &mut FilterContext<'_>,
        doc: &DocumentHandle,
    ) -> Result<ChainOutcome, FilterError> {
        let reached_end = AtomicBool::new(false);
        Next {
            rest: &self.filters,
            reached_end: &reached_end,
        }
        .run(ctx, doc)
        .await?;

        Ok(if reached_end.load(Ordering::SeqCst) {
            ChainOutcome::Completed
        } else {
            ChainOutcome::ShortCircuited
        })
    }
}

pub struct FilterChainBuilder {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChainBuilder {
    pub fn append(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn build(self) -> FilterChain {
        FilterChain {
            filters: self.filters.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use office_engine::test_utils::FakeBackend;
    use office_engine::{EngineBackend, is_draw};
    use parking_lot::Mutex;
    use std::path::Path;

    /// Records its traversal, optionally refusing to continue.
    struct TraceFilter {
        name: &'static str,
        continue_chain: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Filter for TraceFilter {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn apply(
            &self,
            ctx: &mut FilterContext<'_>,
            doc: &DocumentHandle,
            next: Next<'_>,
        ) -> Result<(), FilterError> {
            self.log.lock().push(format!("{}:pre", self.name));
            if self.continue_chain {
                next.run(ctx, doc).await?;
            }
            self.log.lock().push(format!("{}:post", self.name));
            Ok(())
        }
    }

    struct FailingFilter;

    #[async_trait]
    impl Filter for FailingFilter {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn apply(
            &self,
            _ctx: &mut FilterContext<'_>,
            _doc: &DocumentHandle,
            _next: Next<'_>,
        ) -> Result<(), FilterError> {
            Err(FilterError::filter("failing", "intentional"))
        }
    }

    async fn open_document() -> (OfficeInstance, DocumentHandle) {
        let backend = FakeBackend::new();
        let session = backend.launch(0).await.unwrap();
        let mut instance = OfficeInstance::new(0, session);
        let doc = instance.load(Path::new("input.odt")).await.unwrap();
        (instance, doc)
    }

    fn trace(
        name: &'static str,
        continue_chain: bool,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> TraceFilter {
        TraceFilter {
            name,
            continue_chain,
            log: Arc::clone(log),
        }
    }

    #[tokio::test]
    async fn filters_run_in_declaration_order_with_wrap_semantics() {
        let (mut instance, doc) = open_document().await;
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::builder()
            .append(trace("a", true, &log))
            .append(trace("b", true, &log))
            .build();

        let cancel = CancellationToken::new();
        let mut ctx = FilterContext::new(&mut instance, &cancel);
        let outcome = chain.run(&mut ctx, &doc).await.unwrap();

        assert_eq!(outcome, ChainOutcome::Completed);
        assert_eq!(
            *log.lock(),
            vec!["a:pre", "b:pre", "b:post", "a:post"],
            "downstream filters must run inside upstream ones"
        );
    }

    #[tokio::test]
    async fn omitting_the_continuation_short_circuits() {
        let (mut instance, doc) = open_document().await;
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::builder()
            .append(trace("a", true, &log))
            .append(trace("b", false, &log))
            .append(trace("c", true, &log))
            .build();

        let cancel = CancellationToken::new();
        let mut ctx = FilterContext::new(&mut instance, &cancel);
        let outcome = chain.run(&mut ctx, &doc).await.unwrap();

        assert_eq!(outcome, ChainOutcome::ShortCircuited);
        let entries = log.lock();
        assert!(!entries.iter().any(|e| e.starts_with("c:")), "c never runs");
    }

    #[tokio::test]
    async fn empty_chain_completes() {
        let (mut instance, doc) = open_document().await;
        let cancel = CancellationToken::new();
        let mut ctx = FilterContext::new(&mut instance, &cancel);

        let outcome = FilterChain::empty().run(&mut ctx, &doc).await.unwrap();
        assert_eq!(outcome, ChainOutcome::Completed);
    }

    #[tokio::test]
    async fn filter_error_aborts_the_chain() {
        let (mut instance, doc) = open_document().await;
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::builder()
            .append(FailingFilter)
            .append(trace("after", true, &log))
            .build();

        let cancel = CancellationToken::new();
        let mut ctx = FilterContext::new(&mut instance, &cancel);
        let err = chain.run(&mut ctx, &doc).await.unwrap_err();

        assert!(matches!(err, FilterError::Filter { .. }));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn cancellation_is_honored_between_steps() {
        let (mut instance, doc) = open_document().await;
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::builder().append(trace("a", true, &log)).build();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut ctx = FilterContext::new(&mut instance, &cancel);

        let err = chain.run(&mut ctx, &doc).await.unwrap_err();
        assert!(matches!(err, FilterError::Cancelled));
        assert!(log.lock().is_empty());
    }

    /// A filter branching on classification, the way custom filters do.
    struct DrawOnlyFilter {
        saw_draw: Arc<Mutex<Option<bool>>>,
    }

    #[async_trait]
    impl Filter for DrawOnlyFilter {
        fn name(&self) -> &'static str {
            "draw-only"
        }

        async fn apply(
            &self,
            ctx: &mut FilterContext<'_>,
            doc: &DocumentHandle,
            next: Next<'_>,
        ) -> Result<(), FilterError> {
            *self.saw_draw.lock() = Some(is_draw(doc));
            next.run(ctx, doc).await
        }
    }

    #[tokio::test]
    async fn filters_can_classify_the_loaded_document() {
        let backend = FakeBackend::new();
        let session = backend.launch(0).await.unwrap();
        let mut instance = OfficeInstance::new(0, session);
        let doc = instance.load(Path::new("shapes.odg")).await.unwrap();

        let saw_draw = Arc::new(Mutex::new(None));
        let chain = FilterChain::of(DrawOnlyFilter {
            saw_draw: Arc::clone(&saw_draw),
        });

        let cancel = CancellationToken::new();
        let mut ctx = FilterContext::new(&mut instance, &cancel);
        chain.run(&mut ctx, &doc).await.unwrap();

        assert_eq!(*saw_draw.lock(), Some(true));
    }
}
