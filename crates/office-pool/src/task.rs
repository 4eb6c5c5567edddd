//! Conversion tasks and the bounded admission queue.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use office_filter::FilterChain;

use crate::error::ConvertError;

/// One conversion to perform.
#[derive(Clone, Default)]
pub struct ConversionRequest {
    pub source: PathBuf,
    pub target: PathBuf,
    /// Target format extension; derived from `target` when absent.
    pub format: Option<String>,
    /// Extra store properties merged into the resolved export options.
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Filters to run before export; the converter's default chain is
    /// used when absent.
    pub chain: Option<FilterChain>,
}

impl ConversionRequest {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_chain(mut self, chain: FilterChain) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }
}

/// Successful conversion report.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub task_id: Uuid,
    pub target: PathBuf,
    /// Total attempts used, first try included.
    pub attempts: u32,
    pub elapsed: Duration,
    /// False when a filter short-circuited the chain: the task finished
    /// deliberately without writing the target.
    pub exported: bool,
}

/// Caller's handle to a submitted task.
pub struct SubmittedTask {
    id: Uuid,
    cancel: CancellationToken,
    receiver: oneshot::Receiver<Result<Conversion, ConvertError>>,
}

impl SubmittedTask {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cancellation. Takes effect immediately for queued tasks and
    /// at the next suspension point for running ones.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Await the task's single resolution.
    pub async fn wait(self) -> Result<Conversion, ConvertError> {
        match self.receiver.await {
            Ok(result) => result,
            // The converter dropped the task without resolving it, which
            // only happens on teardown.
            Err(_) => Err(ConvertError::Terminated),
        }
    }
}

/// Internal, queue-owned side of a submission.
pub(crate) struct ConversionTask {
    pub id: Uuid,
    pub request: ConversionRequest,
    pub created_at: Instant,
    /// Instance-health retries consumed so far. Only ever increases.
    pub retries: u32,
    pub cancel: CancellationToken,
    reply: Option<oneshot::Sender<Result<Conversion, ConvertError>>>,
}

impl ConversionTask {
    pub fn new(request: ConversionRequest) -> (Self, SubmittedTask) {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        (
            Self {
                id,
                request,
                created_at: Instant::now(),
                retries: 0,
                cancel: cancel.clone(),
                reply: Some(tx),
            },
            SubmittedTask {
                id,
                cancel,
                receiver: rx,
            },
        )
    }

    /// Deliver the task's result. Each task resolves exactly once; the
    /// sender is consumed here and a second call is a no-op.
    pub fn resolve(mut self, result: Result<Conversion, ConvertError>) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(result);
        }
    }
}

/// Bounded FIFO queue in front of the pool.
///
/// Admission control applies to external submissions only: a requeued
/// retry is pushed to the back unconditionally, so a momentarily full
/// queue can never drop or deadlock a task that was already admitted.
pub(crate) struct TaskQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

struct QueueInner {
    tasks: VecDeque<ConversionTask>,
    closed: bool,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                tasks: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Admit a new task, or fail fast when the queue is full or closed.
    pub fn submit(&self, task: ConversionTask) -> Result<(), ConvertError> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(ConvertError::Terminated);
            }
            if inner.tasks.len() >= self.capacity {
                return Err(ConvertError::Backpressure {
                    capacity: self.capacity,
                });
            }
            inner.tasks.push_back(task);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Put a retried task at the back of the queue, bypassing admission.
    pub fn requeue(&self, task: ConversionTask) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                task.resolve(Err(ConvertError::Terminated));
                return;
            }
            inner.tasks.push_back(task);
        }
        self.notify.notify_one();
    }

    /// Next task, in admission order. Returns `None` once the queue is
    /// closed and drained.
    pub async fn pop(&self) -> Option<ConversionTask> {
        let future = self.notify.notified();
        tokio::pin!(future);
        loop {
            // Register for a wakeup before checking, so a submit landing
            // between the check and the await is not lost.
            future.as_mut().enable();
            {
                let mut inner = self.inner.lock();
                if let Some(task) = inner.tasks.pop_front() {
                    // Wake another worker in case more tasks are queued.
                    if !inner.tasks.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(task);
                }
                if inner.closed {
                    return None;
                }
            }
            future.as_mut().await;
            future.set(self.notify.notified());
        }
    }

    /// Close the queue and hand back whatever was still waiting.
    pub fn close(&self) -> Vec<ConversionTask> {
        let drained = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.tasks.drain(..).collect()
        };
        self.notify.notify_waiters();
        drained
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admission_is_fifo_and_bounded() {
        let queue = TaskQueue::new(2);
        let (a, _ha) = ConversionTask::new(ConversionRequest::new("a.odt", "a.pdf"));
        let (b, _hb) = ConversionTask::new(ConversionRequest::new("b.odt", "b.pdf"));
        let (c, _hc) = ConversionTask::new(ConversionRequest::new("c.odt", "c.pdf"));
        let a_id = a.id;
        let b_id = b.id;

        queue.submit(a).unwrap();
        queue.submit(b).unwrap();
        let err = queue.submit(c).unwrap_err();
        assert!(matches!(err, ConvertError::Backpressure { capacity: 2 }));

        assert_eq!(queue.pop().await.unwrap().id, a_id);
        assert_eq!(queue.pop().await.unwrap().id, b_id);
    }

    #[tokio::test]
    async fn requeue_bypasses_the_capacity_check() {
        let queue = TaskQueue::new(1);
        let (a, _ha) = ConversionTask::new(ConversionRequest::new("a.odt", "a.pdf"));
        let (b, _hb) = ConversionTask::new(ConversionRequest::new("b.odt", "b.pdf"));
        let b_id = b.id;
        queue.submit(a).unwrap();

        queue.requeue(b);
        assert_eq!(queue.len(), 2);

        queue.pop().await.unwrap();
        assert_eq!(queue.pop().await.unwrap().id, b_id);
    }

    #[tokio::test]
    async fn pop_wakes_up_for_later_submissions() {
        let queue = std::sync::Arc::new(TaskQueue::new(4));
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await.map(|t| t.id) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (task, _handle) = ConversionTask::new(ConversionRequest::new("a.odt", "a.pdf"));
        let id = task.id;
        queue.submit(task).unwrap();

        assert_eq!(popper.await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn close_drains_and_unblocks() {
        let queue = std::sync::Arc::new(TaskQueue::new(4));
        let (task, _handle) = ConversionTask::new(ConversionRequest::new("a.odt", "a.pdf"));
        queue.submit(task).unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                // First pop takes the task, second sees the closed queue.
                let first = queue.pop().await;
                let second = queue.pop().await;
                (first.is_some(), second.is_none())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let drained = queue.close();
        // The popper may or may not have grabbed the task first.
        let (got_first, got_none) = waiter.await.unwrap();
        assert!(got_none);
        assert!(got_first || drained.len() == 1);

        let (late, _h) = ConversionTask::new(ConversionRequest::new("b.odt", "b.pdf"));
        assert!(matches!(
            queue.submit(late),
            Err(ConvertError::Terminated)
        ));
    }

    #[tokio::test]
    async fn resolve_is_delivered_to_the_handle() {
        let (task, handle) = ConversionTask::new(ConversionRequest::new("a.odt", "a.pdf"));
        let id = task.id;
        task.resolve(Ok(Conversion {
            task_id: id,
            target: "a.pdf".into(),
            attempts: 1,
            elapsed: Duration::from_millis(5),
            exported: true,
        }));

        let conversion = handle.wait().await.unwrap();
        assert_eq!(conversion.task_id, id);
        assert!(conversion.exported);
    }

    #[tokio::test]
    async fn dropped_task_resolves_as_terminated() {
        let (task, handle) = ConversionTask::new(ConversionRequest::new("a.odt", "a.pdf"));
        drop(task);
        assert!(matches!(handle.wait().await, Err(ConvertError::Terminated)));
    }
}
