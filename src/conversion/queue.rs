use super::{ConversionExecutor, ConversionRequest};
use crate::pipeline::CancellationToken;
use crate::state::{ConversionEvent, ConversionListener};
use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use vidconvert_common::RequestId;

/// Name of the conversion worker thread.
pub const WORKER_THREAD_NAME: &str = "video-convert";

struct QueueEntry {
    request: Arc<ConversionRequest>,
    listener: Arc<dyn ConversionListener>,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    worker_active: bool,
}

struct QueueInner {
    executor: ConversionExecutor,
    state: Mutex<QueueState>,
    idle: Condvar,
    cancel: CancellationToken,
    pending_ids: Mutex<HashSet<String>>,
}

/// FIFO of conversion requests served by one background worker.
///
/// The head of the queue is the request being converted. It stays in the
/// queue until its terminal callback has been delivered; only then is it
/// removed and the next request started.
#[derive(Clone)]
pub struct ConversionQueue {
    inner: Arc<QueueInner>,
}

impl ConversionQueue {
    pub fn new(executor: ConversionExecutor) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                executor,
                state: Mutex::new(QueueState::default()),
                idle: Condvar::new(),
                cancel: CancellationToken::new(),
                pending_ids: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Append `request`. Starts the worker if none is running.
    pub fn enqueue(
        &self,
        request: ConversionRequest,
        listener: Arc<dyn ConversionListener>,
    ) -> Result<RequestId> {
        let id = request.id;
        let output = request.destination.clone();
        let start_worker = {
            let mut state = self.inner.state.lock();
            state.entries.push_back(QueueEntry {
                request: Arc::new(request),
                listener,
            });
            debug!(id = %id, depth = state.entries.len(), "Request queued");
            !std::mem::replace(&mut state.worker_active, true)
        };

        if let Some(tx) = self.inner.executor.event_sender() {
            if tx.send(ConversionEvent::queued(id, output)).is_err() {
                debug!("No subscribers for conversion event");
            }
        }

        if start_worker {
            let inner = Arc::clone(&self.inner);
            let spawned = std::thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_string())
                .spawn(move || inner.run_worker());
            if let Err(e) = spawned {
                let mut state = self.inner.state.lock();
                state.worker_active = false;
                state.entries.retain(|entry| entry.request.id != id);
                self.inner.idle.notify_all();
                return Err(e).context("Failed to spawn conversion worker");
            }
        }
        Ok(id)
    }

    /// Ask the running conversion to stop. Queued requests are untouched;
    /// the canceled one reports failure and is then removed.
    pub fn cancel_active(&self) {
        let state = self.inner.state.lock();
        if let Some(head) = state.entries.front() {
            info!(id = %head.request.id, "Canceling active conversion");
            self.inner.cancel.cancel();
        }
    }

    /// Id of the request currently being converted.
    pub fn active(&self) -> Option<RequestId> {
        self.inner.state.lock().entries.front().map(|e| e.request.id)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until the worker has drained the queue. Returns false on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let mut state = self.inner.state.lock();
        !self
            .inner
            .idle
            .wait_while_for(&mut state, |s| s.worker_active, timeout)
            .timed_out()
    }

    /// Remember a caller tag whose conversion is still to be enqueued.
    pub fn add_pending_id(&self, id: impl Into<String>) {
        self.inner.pending_ids.lock().insert(id.into());
    }

    pub fn remove_pending_id(&self, id: &str) -> bool {
        self.inner.pending_ids.lock().remove(id)
    }

    /// Whether `correlation_id` is waiting to be enqueued or is in the queue.
    pub fn is_request_pending(&self, correlation_id: &str) -> bool {
        if self.inner.pending_ids.lock().contains(correlation_id) {
            return true;
        }
        self.inner
            .state
            .lock()
            .entries
            .iter()
            .any(|e| e.request.correlation_id.as_deref() == Some(correlation_id))
    }
}

impl QueueInner {
    fn run_worker(&self) {
        debug!("Conversion worker started");
        loop {
            let entry = {
                let mut state = self.state.lock();
                match state.entries.front() {
                    Some(entry) => (Arc::clone(&entry.request), Arc::clone(&entry.listener)),
                    None => {
                        state.worker_active = false;
                        self.idle.notify_all();
                        debug!("Conversion worker idle");
                        return;
                    }
                }
            };
            let (request, listener) = entry;

            let outcome = self.executor.execute(&request, listener, &self.cancel);
            if !outcome.is_completed() {
                debug!(id = %request.id, "Request ended without output");
            }
            self.finish(&request);
        }
    }

    /// Drop the finished head and clear a cancel aimed at it.
    fn finish(&self, request: &ConversionRequest) {
        let mut state = self.state.lock();
        match state.entries.front() {
            Some(head) if head.request.id == request.id => {
                state.entries.pop_front();
            }
            _ => error!(id = %request.id, "Finished request was not at the queue head"),
        }
        self.cancel.reset();
        if let Some(tag) = &request.correlation_id {
            self.pending_ids.lock().remove(tag);
        }
    }
}
