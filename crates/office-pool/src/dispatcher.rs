//! Dispatcher workers.
//!
//! One worker per pool slot. Each worker pulls a task from the queue,
//! checks an instance out, and drives load → filter chain → export →
//! close. Instance-health failures put the task back at the end of the
//! queue (bounded by the retry budget) and hand the instance to the
//! monitor; document-content failures resolve the task immediately, on
//! the grounds that another instance would reject the document the same
//! way.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use office_engine::{
    DocumentHandle, ExportOptions, FormatRegistry, OfficeError, OfficeInstance,
};
use office_filter::{ChainOutcome, FilterChain, FilterContext, FilterError};

use crate::config::PoolConfig;
use crate::error::ConvertError;
use crate::events::{PoolEvent, PoolEvents};
use crate::pool::{AcquireError, InstancePool, PooledInstance, ReleaseOutcome};
use crate::task::{Conversion, ConversionRequest, ConversionTask, TaskQueue};

pub(crate) struct WorkerContext {
    pub queue: Arc<TaskQueue>,
    pub pool: InstancePool,
    pub config: PoolConfig,
    pub events: PoolEvents,
    pub default_chain: FilterChain,
    pub shutdown: CancellationToken,
}

pub(crate) fn spawn_workers(ctx: Arc<WorkerContext>) -> Vec<JoinHandle<()>> {
    (0..ctx.config.pool_size)
        .map(|worker_id| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(worker_loop(worker_id, ctx))
        })
        .collect()
}

async fn worker_loop(worker_id: usize, ctx: Arc<WorkerContext>) {
    while let Some(task) = ctx.queue.pop().await {
        handle_task(&ctx, task).await;
    }
    debug!(worker_id, "dispatcher worker stopped");
}

async fn handle_task(ctx: &WorkerContext, mut task: ConversionTask) {
    if task.cancel.is_cancelled() {
        task.resolve(Err(ConvertError::Cancelled));
        return;
    }

    let mut guard = loop {
        match ctx.pool.acquire(ctx.config.acquire_timeout()).await {
            Ok(guard) => break guard,
            Err(AcquireError::NoLiveSlots) => {
                let waited = task.created_at.elapsed();
                task.resolve(Err(ConvertError::PoolExhausted { waited }));
                return;
            }
            Err(AcquireError::Timeout) => {
                // The pool is alive but saturated or restarting; keep
                // waiting unless someone gave up on this task meanwhile.
                if ctx.shutdown.is_cancelled() {
                    task.resolve(Err(ConvertError::Terminated));
                    return;
                }
                if task.cancel.is_cancelled() {
                    task.resolve(Err(ConvertError::Cancelled));
                    return;
                }
            }
        }
    };

    let report = execute(ctx, &mut guard, &task).await;
    let ordinal = guard.ordinal();

    if report.instance_failed {
        if let Err(err) = &report.result {
            ctx.events.emit(PoolEvent::InstanceDied {
                ordinal,
                reason: err.to_string(),
            });
        }
        ctx.pool.release(guard, ReleaseOutcome::Failure, 0);

        match report.result {
            Ok(conversion) => {
                // Export landed but the close afterwards failed; the
                // target exists, so the task is done and only the
                // instance needs help.
                task.resolve(Ok(conversion));
            }
            Err(err) if retryable(&err) => {
                task.retries += 1;
                if task.retries <= ctx.config.max_retries {
                    ctx.events.emit(PoolEvent::TaskRequeued {
                        task_id: task.id,
                        retries: task.retries,
                    });
                    ctx.queue.requeue(task);
                } else {
                    let attempts = task.retries;
                    let terminal = match err {
                        ConvertError::Office(source) => ConvertError::Exhausted { attempts, source },
                        other => other,
                    };
                    task.resolve(Err(terminal));
                }
            }
            Err(err) => task.resolve(Err(err)),
        }
    } else {
        ctx.pool
            .release(guard, ReleaseOutcome::Success, ctx.config.tasks_per_instance);
        task.resolve(report.result);
    }
}

/// Instance-health errors are worth another instance; content errors are not.
fn retryable(err: &ConvertError) -> bool {
    matches!(err, ConvertError::Office(e) if !e.is_content())
}

struct ExecReport {
    result: Result<Conversion, ConvertError>,
    /// True when the instance must be handed to the monitor.
    instance_failed: bool,
}

fn failed(err: OfficeError) -> ExecReport {
    ExecReport {
        result: Err(ConvertError::Office(err)),
        instance_failed: true,
    }
}

async fn execute(
    ctx: &WorkerContext,
    guard: &mut PooledInstance,
    task: &ConversionTask,
) -> ExecReport {
    let request = &task.request;
    let started = Instant::now();
    let instance = guard.instance_mut();

    let doc = match instance.load(&request.source).await {
        Ok(doc) => doc,
        Err(e) if e.is_content() => {
            return ExecReport {
                result: Err(e.into()),
                instance_failed: false,
            };
        }
        Err(e) => return failed(e),
    };

    let chain = request
        .chain
        .clone()
        .unwrap_or_else(|| ctx.default_chain.clone());
    let chain_result = {
        let mut filter_ctx = FilterContext::new(instance, &task.cancel);
        chain.run(&mut filter_ctx, &doc).await
    };

    let outcome = match chain_result {
        Ok(outcome) => outcome,
        Err(FilterError::Engine(e)) if !e.is_content() => return failed(e),
        Err(err) => {
            let mapped = match err {
                FilterError::Cancelled => ConvertError::Cancelled,
                FilterError::Engine(e) => ConvertError::Office(e),
                other => ConvertError::Filter(other),
            };
            return close_then(instance, &doc, Err(mapped)).await;
        }
    };

    let conversion = |exported: bool| Conversion {
        task_id: task.id,
        target: request.target.clone(),
        attempts: task.retries + 1,
        elapsed: started.elapsed(),
        exported,
    };

    if outcome == ChainOutcome::ShortCircuited {
        return close_then(instance, &doc, Ok(conversion(false))).await;
    }

    if task.cancel.is_cancelled() {
        return close_then(instance, &doc, Err(ConvertError::Cancelled)).await;
    }

    let options = match resolve_export_options(request, &doc) {
        Ok(options) => options,
        Err(e) => return close_then(instance, &doc, Err(e)).await,
    };

    match instance.export(&doc, &request.target, &options).await {
        Ok(()) => close_then(instance, &doc, Ok(conversion(true))).await,
        Err(e) if e.is_content() => close_then(instance, &doc, Err(e.into())).await,
        Err(e) => failed(e),
    }
}

/// Close the document, downgrading the instance (not the task result) if
/// the close itself fails.
async fn close_then(
    instance: &mut OfficeInstance,
    doc: &DocumentHandle,
    result: Result<Conversion, ConvertError>,
) -> ExecReport {
    match instance.close(doc).await {
        Ok(()) => ExecReport {
            result,
            instance_failed: false,
        },
        Err(e) => {
            warn!(ordinal = instance.ordinal(), error = %e, "close failed after task");
            ExecReport {
                result,
                instance_failed: true,
            }
        }
    }
}

/// Pick the engine export filter from the target format and the loaded
/// document's classification, then fold in caller-supplied properties.
fn resolve_export_options(
    request: &ConversionRequest,
    doc: &DocumentHandle,
) -> Result<ExportOptions, ConvertError> {
    let family_name = || {
        doc.family()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "unclassified".to_string())
    };

    let extension = request.format.clone().or_else(|| {
        request
            .target
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
    });
    let Some(extension) = extension else {
        return Err(ConvertError::UnsupportedConversion {
            family: family_name(),
            extension: "(none)".to_string(),
        });
    };

    let format = FormatRegistry::builtin()
        .by_extension(&extension)
        .ok_or_else(|| ConvertError::UnsupportedConversion {
            family: family_name(),
            extension: extension.clone(),
        })?;

    let family = doc
        .family()
        .ok_or_else(|| ConvertError::UnsupportedConversion {
            family: "unclassified".to_string(),
            extension: extension.clone(),
        })?;

    let mut options =
        format
            .export_options(family)
            .ok_or_else(|| ConvertError::UnsupportedConversion {
                family: family.to_string(),
                extension: extension.clone(),
            })?;

    for (name, value) in &request.properties {
        options.properties.insert(name.clone(), value.clone());
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use office_engine::Capability;
    use uuid::Uuid;

    fn doc(caps: Vec<Capability>) -> DocumentHandle {
        DocumentHandle::new(Uuid::new_v4(), caps)
    }

    #[rstest::rstest]
    #[case(vec![Capability::SlideDeck], "impress_pdf_Export")]
    #[case(vec![Capability::DrawingSurface, Capability::SlideDeck], "impress_pdf_Export")]
    #[case(vec![Capability::DrawingSurface], "draw_pdf_Export")]
    #[case(vec![Capability::TextFlow], "writer_pdf_Export")]
    #[case(vec![Capability::SpreadsheetGrid], "calc_pdf_Export")]
    fn export_filter_follows_classification(
        #[case] caps: Vec<Capability>,
        #[case] expected: &str,
    ) {
        let request = ConversionRequest::new("input.bin", "output.pdf");
        let options = resolve_export_options(&request, &doc(caps)).unwrap();
        assert_eq!(options.filter, expected);
    }

    #[test]
    fn explicit_format_overrides_target_extension() {
        let request = ConversionRequest::new("a.odt", "a.out").with_format("pdf");
        let options = resolve_export_options(&request, &doc(vec![Capability::TextFlow])).unwrap();
        assert_eq!(options.filter, "writer_pdf_Export");
    }

    #[test]
    fn impossible_conversions_are_content_errors() {
        // A text document cannot become an OpenDocument drawing.
        let request = ConversionRequest::new("a.odt", "a.odg");
        let err = resolve_export_options(&request, &doc(vec![Capability::TextFlow])).unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedConversion { .. }));
        assert!(!retryable(&err));
    }

    #[test]
    fn caller_properties_are_merged_into_the_store_options() {
        let request = ConversionRequest::new("a.odt", "a.pdf")
            .with_property("ReduceImageResolution", serde_json::Value::Bool(true));
        let options = resolve_export_options(&request, &doc(vec![Capability::TextFlow])).unwrap();
        assert_eq!(
            options.properties.get("ReduceImageResolution"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[test]
    fn only_instance_health_errors_are_retryable() {
        assert!(retryable(&ConvertError::Office(OfficeError::Communication {
            operation: "export",
            reason: "connection reset".into(),
        })));
        assert!(!retryable(&ConvertError::Cancelled));
        assert!(!retryable(&ConvertError::Office(OfficeError::Load {
            path: "a.odt".into(),
            reason: "corrupt".into(),
        })));
    }
}
