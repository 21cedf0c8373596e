//! Admission-controlled dispatch of render jobs
//!
//! # Architecture
//!
//! ```text
//!  submit() ──► queue ──► dispatch loop ──► acquire slot ──► spawn worker ──► backend.render()
//!     ▲                                      (FIFO, one at a time)               │
//!     └──────────────────────── oneshot result ◄───── drop slot ◄───────────────┘
//! ```
//!
//! The dispatch loop takes queued jobs in arrival order and waits for an
//! admission slot for each, so a waiting job can never be overtaken forever.
//! Every job carries a cancellation token: the caller cancels it when it gives
//! up (deadline, explicit cancel, or its future being dropped), which removes
//! a queued job from contention and aborts an in-flight render.
//!
//! A concurrency of `0` disables admission control entirely.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::backend::RenderBackend;
use crate::errors::SchedulerError;
use crate::layout::LayoutSpec;

type RenderResult = Result<Vec<u8>, SchedulerError>;

/// Default number of admission slots: the available parallelism, at least 1
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}

/// One request to turn a URL into PDF bytes
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub source_url: Url,
    pub layout: LayoutSpec,
    /// Point after which the job is abandoned, queued or not
    pub deadline: Instant,
}

impl RenderJob {
    /// Job whose deadline is `timeout` from now
    pub fn new(source_url: Url, layout: LayoutSpec, timeout: Duration) -> Self {
        Self {
            source_url,
            layout,
            deadline: Instant::now() + timeout,
        }
    }
}

struct QueuedJob {
    job: RenderJob,
    cancel: CancellationToken,
    reply: oneshot::Sender<RenderResult>,
}

/// Bounded-concurrency front of a [`RenderBackend`]
pub struct Scheduler {
    queue: Mutex<Option<mpsc::UnboundedSender<QueuedJob>>>,
    concurrency: usize,
}

impl Scheduler {
    /// Start a scheduler with `concurrency` slots (`0` = unbounded)
    ///
    /// Spawns the dispatch loop, so this must be called inside a tokio runtime.
    pub fn new(backend: Arc<dyn RenderBackend>, concurrency: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let slots = (concurrency > 0).then(|| Arc::new(Semaphore::new(concurrency)));

        debug!(concurrency, "renderer concurrency");
        tokio::spawn(dispatch(rx, slots, backend));

        Self {
            queue: Mutex::new(Some(tx)),
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn is_closed(&self) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Render `job`, waiting for a slot first
    ///
    /// Dropping the returned future cancels the job.
    pub async fn submit(&self, job: RenderJob) -> RenderResult {
        self.submit_with_cancel(job, &CancellationToken::new()).await
    }

    /// Like [`submit`](Self::submit), additionally aborted when `cancel` fires
    pub async fn submit_with_cancel(
        &self,
        job: RenderJob,
        cancel: &CancellationToken,
    ) -> RenderResult {
        let deadline = job.deadline;
        let token = cancel.child_token();
        let _abort_on_drop = token.clone().drop_guard();
        let (reply, result) = oneshot::channel();

        {
            let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let tx = queue.as_ref().ok_or(SchedulerError::Closed)?;
            tx.send(QueuedJob {
                job,
                cancel: token.clone(),
                reply,
            })
            .map_err(|_| SchedulerError::Closed)?;
        }

        tokio::select! {
            biased;
            outcome = result => outcome.unwrap_or(Err(SchedulerError::WorkerLost)),
            _ = token.cancelled() => Err(SchedulerError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => Err(SchedulerError::DeadlineExceeded),
        }
    }

    /// Stop accepting submissions
    ///
    /// Jobs already queued or running are left to finish or be cancelled by
    /// their callers. Calling this more than once is harmless.
    pub fn close(&self) {
        let sender = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            debug!("scheduler closed");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.close();
    }
}

async fn dispatch(
    mut queue: mpsc::UnboundedReceiver<QueuedJob>,
    slots: Option<Arc<Semaphore>>,
    backend: Arc<dyn RenderBackend>,
) {
    while let Some(queued) = queue.recv().await {
        if queued.cancel.is_cancelled() {
            continue;
        }

        let permit = match &slots {
            None => None,
            Some(slots) => tokio::select! {
                biased;
                _ = queued.cancel.cancelled() => {
                    debug!(url = %queued.job.source_url, "job cancelled while queued");
                    continue;
                }
                _ = tokio::time::sleep_until(queued.job.deadline) => {
                    debug!(url = %queued.job.source_url, "job deadline passed while queued");
                    let _ = queued.reply.send(Err(SchedulerError::DeadlineExceeded));
                    continue;
                }
                permit = Arc::clone(slots).acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
            },
        };

        debug!(url = %queued.job.source_url, "job admitted");
        tokio::spawn(run_job(Arc::clone(&backend), queued, permit));
    }
    debug!("render queue closed");
}

async fn run_job(
    backend: Arc<dyn RenderBackend>,
    queued: QueuedJob,
    permit: Option<OwnedSemaphorePermit>,
) {
    let QueuedJob { job, cancel, reply } = queued;

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SchedulerError::Cancelled),
        rendered = tokio::time::timeout_at(job.deadline, backend.render(&job.source_url, &job.layout)) => {
            match rendered {
                Ok(Ok(pdf)) => Ok(pdf),
                Ok(Err(e)) => {
                    warn!(url = %job.source_url, error = %e, "render failed");
                    Err(SchedulerError::Backend(e))
                }
                Err(_elapsed) => Err(SchedulerError::DeadlineExceeded),
            }
        }
    };

    // Slot goes back before the caller hears about the result
    drop(permit);
    let _ = reply.send(outcome);
}
