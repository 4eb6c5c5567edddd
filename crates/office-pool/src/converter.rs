//! Caller-facing converter.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use office_engine::{EngineBackend, InstanceState, LocalBackend, OfficeInstance};
use office_filter::{FilterChain, RefreshFilter};

use crate::config::PoolConfig;
use crate::dispatcher::{WorkerContext, spawn_workers};
use crate::error::ConvertError;
use crate::events::{PoolEvent, PoolEvents};
use crate::monitor::HealthMonitor;
use crate::pool::InstancePool;
use crate::task::{Conversion, ConversionRequest, ConversionTask, SubmittedTask, TaskQueue};

/// Builds a [`Converter`].
pub struct ConverterBuilder {
    config: PoolConfig,
    backend: Option<Arc<dyn EngineBackend>>,
    default_chain: FilterChain,
}

impl ConverterBuilder {
    fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            backend: None,
            default_chain: FilterChain::of(RefreshFilter),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.config.pool_size = pool_size;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Use a custom engine backend instead of spawning local processes.
    pub fn backend(mut self, backend: Arc<dyn EngineBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Chain applied to tasks that do not bring their own.
    pub fn default_chain(mut self, chain: FilterChain) -> Self {
        self.default_chain = chain;
        self
    }

    /// Start the engine instances and the dispatch machinery.
    ///
    /// Fails only if no instance at all could be started; slots that
    /// failed to come up are left to the health monitor's backoff path.
    pub async fn build(self) -> Result<Converter, ConvertError> {
        let config = self.config;
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(LocalBackend::new(config.office.clone())));

        let pool = InstancePool::new(config.pool_size);
        let events = PoolEvents::new();

        let launches = futures::future::join_all(
            (0..config.pool_size as u32).map(|ordinal| backend.launch(ordinal)),
        )
        .await;

        let mut started = 0usize;
        let mut first_error: Option<ConvertError> = None;
        for (index, result) in launches.into_iter().enumerate() {
            match result {
                Ok(session) => {
                    pool.install(index, OfficeInstance::new(index as u32, session));
                    events.emit(PoolEvent::InstanceStarted {
                        ordinal: index as u32,
                    });
                    started += 1;
                }
                Err(e) => {
                    warn!(ordinal = index, error = %e, "instance failed to start; monitor will retry");
                    let slot = pool.slot(index);
                    slot.restart_failures
                        .store(1, std::sync::atomic::Ordering::SeqCst);
                    slot.transition(InstanceState::Dead);
                    first_error.get_or_insert(ConvertError::Start {
                        reason: e.to_string(),
                    });
                }
            }
        }
        if started == 0 {
            return Err(first_error.unwrap_or(ConvertError::Start {
                reason: "pool size is zero".to_string(),
            }));
        }
        info!(
            started,
            pool_size = config.pool_size,
            "engine pool is up"
        );

        let queue = Arc::new(TaskQueue::new(config.queue_capacity));
        let shutdown = CancellationToken::new();

        let workers = spawn_workers(Arc::new(WorkerContext {
            queue: Arc::clone(&queue),
            pool: pool.clone(),
            config: config.clone(),
            events: events.clone(),
            default_chain: self.default_chain,
            shutdown: shutdown.clone(),
        }));

        let monitor = HealthMonitor::new(
            pool.clone(),
            Arc::clone(&backend),
            &config,
            events.clone(),
            shutdown.clone(),
        )
        .spawn();

        Ok(Converter {
            queue,
            pool,
            events,
            shutdown,
            workers,
            monitor: Some(monitor),
        })
    }
}

/// Document converter over a pool of engine instances.
///
/// Obtained via [`Converter::builder`]. Submissions go through a bounded
/// queue; dispatch, retries, and instance recovery happen in background
/// tasks until [`Converter::shutdown`].
pub struct Converter {
    queue: Arc<TaskQueue>,
    pool: InstancePool,
    events: PoolEvents,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl Converter {
    pub fn builder() -> ConverterBuilder {
        ConverterBuilder::new()
    }

    /// Enqueue a conversion. Fails fast with
    /// [`ConvertError::Backpressure`] when the queue is full.
    pub fn submit(&self, request: ConversionRequest) -> Result<SubmittedTask, ConvertError> {
        let (task, handle) = ConversionTask::new(request);
        self.queue.submit(task)?;
        Ok(handle)
    }

    /// Submit and await in one go.
    pub async fn convert(&self, request: ConversionRequest) -> Result<Conversion, ConvertError> {
        self.submit(request)?.wait().await
    }

    /// Operational events: restarts, permanent death, requeues.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// Tasks admitted but not yet picked up by a worker.
    pub fn queued_tasks(&self) -> usize {
        self.queue.len()
    }

    /// Instances not permanently dead.
    pub fn live_instances(&self) -> usize {
        self.pool.live_slots()
    }

    /// Graceful shutdown: refuse new work, fail queued tasks, let
    /// in-flight tasks finish, then stop every engine instance.
    pub async fn shutdown(mut self) {
        for task in self.queue.close() {
            task.resolve(Err(ConvertError::Terminated));
        }
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
        self.shutdown.cancel();
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.await;
        }
        for index in 0..self.pool.slots().len() {
            if let Some(instance) = self.pool.slot(index).take() {
                instance.shutdown().await;
            }
        }
        info!("converter shut down");
    }
}

impl Drop for Converter {
    fn drop(&mut self) {
        // Explicit shutdown already did all of this; make drop idempotent
        // so an early exit still stops background tasks and fails waiters.
        self.shutdown.cancel();
        for task in self.queue.close() {
            task.resolve(Err(ConvertError::Terminated));
        }
    }
}
