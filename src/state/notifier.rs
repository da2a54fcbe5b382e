use super::events::{ConversionEvent, EventSender};
use crate::conversion::ConversionRequest;
use crate::pipeline::ConversionError;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receives the lifecycle of each request it was enqueued with.
///
/// All calls happen on the conversion worker thread, in order: at most one
/// `on_started`, any number of `on_progress`, then exactly one of
/// `on_completed` or `on_failed`.
pub trait ConversionListener: Send + Sync {
    fn on_started(&self, request: &ConversionRequest, output: &Path);

    fn on_progress(&self, _request: &ConversionRequest, _output: &Path, _flushes: u64) {}

    fn on_completed(&self, request: &ConversionRequest, output: &Path, output_len: u64);

    fn on_failed(&self, request: &ConversionRequest, output: &Path, error: &ConversionError);
}

/// Listener that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl ConversionListener for LoggingListener {
    fn on_started(&self, request: &ConversionRequest, output: &Path) {
        info!(id = %request.id, output = ?output, "Conversion started");
    }

    fn on_completed(&self, request: &ConversionRequest, output: &Path, output_len: u64) {
        info!(id = %request.id, output = ?output, bytes = output_len, "Conversion completed");
    }

    fn on_failed(&self, request: &ConversionRequest, output: &Path, error: &ConversionError) {
        warn!(id = %request.id, output = ?output, error = %error, "Conversion failed");
    }
}

/// Turns pipeline flushes and the final outcome into listener calls and
/// broadcast events for one request.
pub struct ProgressNotifier<'a> {
    request: &'a ConversionRequest,
    listener: Arc<dyn ConversionListener>,
    events: Option<EventSender>,
    started: bool,
    flushes: u64,
    finished: bool,
}

impl<'a> ProgressNotifier<'a> {
    pub fn new(
        request: &'a ConversionRequest,
        listener: Arc<dyn ConversionListener>,
        events: Option<EventSender>,
    ) -> Self {
        Self {
            request,
            listener,
            events,
            started: false,
            flushes: 0,
            finished: false,
        }
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn broadcast(&self, event: ConversionEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                debug!("No subscribers for conversion event");
            }
        }
    }

    fn output(&self) -> &'a Path {
        self.request.destination()
    }

    fn start_once(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.listener.on_started(self.request, self.output());
        self.broadcast(ConversionEvent::started(
            self.request.id,
            self.output().to_path_buf(),
        ));
    }

    /// Muxed data reached the output file.
    pub fn flushed(&mut self) {
        if self.finished {
            return;
        }
        self.start_once();
        self.flushes += 1;
        self.listener.on_progress(self.request, self.output(), self.flushes);
        self.broadcast(ConversionEvent::progress(
            self.request.id,
            self.output().to_path_buf(),
            self.flushes,
        ));
    }

    /// Terminal success. A request that never flushed still gets its
    /// "started" first.
    pub fn completed(&mut self, output_len: u64) {
        if self.finished {
            return;
        }
        self.start_once();
        self.finished = true;
        self.listener.on_completed(self.request, self.output(), output_len);
        self.broadcast(ConversionEvent::completed(
            self.request.id,
            self.output().to_path_buf(),
            output_len,
        ));
    }

    /// Terminal failure. Never preceded by a "started" it did not already send.
    pub fn failed(&mut self, error: &ConversionError) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.listener.on_failed(self.request, self.output(), error);
        self.broadcast(ConversionEvent::failed(
            self.request.id,
            self.output().to_path_buf(),
            error.to_string(),
            error.kind(),
            error.is_canceled(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::events::event_channel;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl ConversionListener for Recorder {
        fn on_started(&self, _: &ConversionRequest, _: &Path) {
            self.calls.lock().push("started".into());
        }

        fn on_progress(&self, _: &ConversionRequest, _: &Path, flushes: u64) {
            self.calls.lock().push(format!("progress:{flushes}"));
        }

        fn on_completed(&self, _: &ConversionRequest, _: &Path, len: u64) {
            self.calls.lock().push(format!("completed:{len}"));
        }

        fn on_failed(&self, _: &ConversionRequest, _: &Path, error: &ConversionError) {
            self.calls.lock().push(format!("failed:{}", error.kind()));
        }
    }

    #[test]
    fn test_started_fires_once_before_completion() {
        let request = ConversionRequest::new("in.mp4", "out.mp4");
        let recorder = Arc::new(Recorder::default());
        let mut notifier = ProgressNotifier::new(&request, recorder.clone(), None);

        assert!(!notifier.has_started());
        notifier.flushed();
        assert!(notifier.has_started());
        notifier.flushed();
        notifier.completed(4096);
        assert!(notifier.is_finished());
        notifier.completed(1);
        notifier.failed(&ConversionError::Canceled);

        assert_eq!(
            *recorder.calls.lock(),
            vec!["started", "progress:1", "progress:2", "completed:4096"]
        );
    }

    #[test]
    fn test_completion_without_flush_still_starts() {
        let request = ConversionRequest::new("in.mp4", "out.mp4");
        let recorder = Arc::new(Recorder::default());
        let mut notifier = ProgressNotifier::new(&request, recorder.clone(), None);
        notifier.completed(0);
        assert_eq!(*recorder.calls.lock(), vec!["started", "completed:0"]);
    }

    #[test]
    fn test_failure_before_flush_has_no_started() {
        let request = ConversionRequest::new("in.mp4", "out.mp4");
        let recorder = Arc::new(Recorder::default());
        let (tx, mut rx) = event_channel();
        let mut notifier = ProgressNotifier::new(&request, recorder.clone(), Some(tx));

        notifier.failed(&ConversionError::InputUnreadable("gone".into()));
        notifier.flushed();

        assert_eq!(*recorder.calls.lock(), vec!["failed:input_unreadable"]);
        let event = rx.try_recv().unwrap();
        assert!(event.is_terminal());
        assert!(rx.try_recv().is_err());
    }
}
