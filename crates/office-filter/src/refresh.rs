//! Built-in refresh filter.

use async_trait::async_trait;

use office_engine::{DocumentHandle, TransformAction};

use crate::{Filter, FilterContext, FilterError, Next};

/// Refreshes the loaded document (layout, indexes, fields) and continues.
///
/// Used as the default chain so stale layout state never leaks into the
/// exported target when the caller supplies no filters of their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct RefreshFilter;

#[async_trait]
impl Filter for RefreshFilter {
    fn name(&self) -> &'static str {
        "refresh"
    }

    async fn apply(
        &self,
        ctx: &mut FilterContext<'_>,
        doc: &DocumentHandle,
        next: Next<'_>,
    ) -> Result<(), FilterError> {
        ctx.transform(doc, TransformAction::Refresh).await?;
        next.run(ctx, doc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChainOutcome, FilterChain};
    use office_engine::test_utils::FakeBackend;
    use office_engine::{EngineBackend, OfficeInstance};
    use std::path::Path;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn refresh_is_sent_to_the_engine_and_chain_completes() {
        let backend = FakeBackend::new();
        let state = backend.state();
        let session = backend.launch(0).await.unwrap();
        let mut instance = OfficeInstance::new(0, session);
        let doc = instance.load(Path::new("report.odt")).await.unwrap();

        let cancel = CancellationToken::new();
        let mut ctx = FilterContext::new(&mut instance, &cancel);
        let outcome = FilterChain::of(RefreshFilter).run(&mut ctx, &doc).await.unwrap();

        assert_eq!(outcome, ChainOutcome::Completed);
        assert_eq!(state.transforms(), vec![(0, "refresh".to_string())]);
    }
}
