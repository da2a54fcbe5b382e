use super::ConversionRequest;
use crate::pipeline::{CancellationToken, ConversionError, PipelineReport, TranscodePipeline};
use crate::state::{ActiveConversion, ConversionListener, CrashGuardStore, EventSender, ProgressNotifier};
use std::sync::Arc;
use tracing::{error, info};

/// Result of one executed request.
#[derive(Debug)]
pub enum ConversionOutcome {
    Completed(PipelineReport),
    Failed(ConversionError),
}

impl ConversionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ConversionOutcome::Completed(_))
    }
}

/// Runs single requests: crash guard, pipeline, then exactly one
/// terminal notification.
pub struct ConversionExecutor {
    pipeline: TranscodePipeline,
    crash_guard: Arc<dyn CrashGuardStore>,
    event_tx: Option<EventSender>,
}

impl ConversionExecutor {
    pub fn new(pipeline: TranscodePipeline, crash_guard: Arc<dyn CrashGuardStore>) -> Self {
        Self {
            pipeline,
            crash_guard,
            event_tx: None,
        }
    }

    /// Executor that also broadcasts lifecycle events.
    pub fn with_events(
        pipeline: TranscodePipeline,
        crash_guard: Arc<dyn CrashGuardStore>,
        event_tx: EventSender,
    ) -> Self {
        Self {
            pipeline,
            crash_guard,
            event_tx: Some(event_tx),
        }
    }

    pub fn event_sender(&self) -> Option<EventSender> {
        self.event_tx.clone()
    }

    pub fn pipeline(&self) -> &TranscodePipeline {
        &self.pipeline
    }

    /// Convert `request`, reporting to `listener` on this thread.
    pub fn execute(
        &self,
        request: &ConversionRequest,
        listener: Arc<dyn ConversionListener>,
        cancel: &CancellationToken,
    ) -> ConversionOutcome {
        let mut notifier = ProgressNotifier::new(request, listener, self.event_tx.clone());

        let Some(guard) = ActiveConversion::enter(Arc::clone(&self.crash_guard)) else {
            let err = ConversionError::InputUnreadable(
                "previous conversion did not finish cleanly".to_string(),
            );
            error!(id = %request.id, "Refusing conversion after unclean exit");
            notifier.failed(&err);
            return ConversionOutcome::Failed(err);
        };

        info!(
            id = %request.id,
            source = ?request.source,
            output = ?request.destination,
            "Processing conversion"
        );
        let result = self.pipeline.run(request, cancel, &mut || notifier.flushed());
        drop(guard);

        match result {
            Ok(report) => {
                notifier.completed(report.output_len);
                ConversionOutcome::Completed(report)
            }
            Err(e) => {
                if e.is_canceled() {
                    info!(id = %request.id, "Conversion canceled");
                } else {
                    error!(id = %request.id, error = %e, "Conversion failed");
                }
                notifier.failed(&e);
                ConversionOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::LoopbackBackend;
    use crate::pipeline::PipelineOptions;
    use crate::quirks::PlatformInfo;
    use crate::state::{LoggingListener, MemoryCrashGuard};
    use assert_matches::assert_matches;

    fn executor(guard: Arc<dyn CrashGuardStore>) -> ConversionExecutor {
        let pipeline = TranscodePipeline::new(
            Arc::new(LoopbackBackend::new()),
            PlatformInfo::default(),
            PipelineOptions::default(),
        );
        ConversionExecutor::new(pipeline, guard)
    }

    #[test]
    fn test_unclean_guard_fails_without_running() {
        let guard: Arc<dyn CrashGuardStore> = Arc::new(MemoryCrashGuard::new(false));
        let dir = tempfile::tempdir().unwrap();
        let request = ConversionRequest::new(dir.path().join("in.mp4"), dir.path().join("out.mp4"));

        let outcome = executor(Arc::clone(&guard)).execute(
            &request,
            Arc::new(LoggingListener),
            &CancellationToken::new(),
        );
        assert_matches!(outcome, ConversionOutcome::Failed(ConversionError::InputUnreadable(_)));
        assert!(guard.last_run_clean());
        assert!(!dir.path().join("out.mp4").exists());
    }

    #[test]
    fn test_guard_is_clean_after_failure() {
        let guard: Arc<dyn CrashGuardStore> = Arc::new(MemoryCrashGuard::default());
        let request = ConversionRequest::new("/missing/in.mp4", "/missing/out.mp4");
        let outcome = executor(Arc::clone(&guard)).execute(
            &request,
            Arc::new(LoggingListener),
            &CancellationToken::new(),
        );
        assert!(!outcome.is_completed());
        assert!(guard.last_run_clean());
    }
}
