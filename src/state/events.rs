use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use vidconvert_common::RequestId;

/// Buffered events per subscriber before the oldest are dropped.
pub const EVENT_CAPACITY: usize = 256;

/// Lifecycle event of one conversion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ConversionEvent {
    /// The request was accepted into the queue.
    Queued {
        id: RequestId,
        output: PathBuf,
        at: DateTime<Utc>,
    },
    /// First muxed data reached the output file.
    Started {
        id: RequestId,
        output: PathBuf,
        at: DateTime<Utc>,
    },
    /// More muxed data reached the output file.
    Progress {
        id: RequestId,
        output: PathBuf,
        flushes: u64,
        at: DateTime<Utc>,
    },
    Completed {
        id: RequestId,
        output: PathBuf,
        bytes: u64,
        at: DateTime<Utc>,
    },
    Failed {
        id: RequestId,
        output: PathBuf,
        error: String,
        kind: String,
        canceled: bool,
        at: DateTime<Utc>,
    },
}

impl ConversionEvent {
    pub fn id(&self) -> RequestId {
        match self {
            ConversionEvent::Queued { id, .. }
            | ConversionEvent::Started { id, .. }
            | ConversionEvent::Progress { id, .. }
            | ConversionEvent::Completed { id, .. }
            | ConversionEvent::Failed { id, .. } => *id,
        }
    }

    /// Whether no further events follow for this request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversionEvent::Completed { .. } | ConversionEvent::Failed { .. }
        )
    }

    pub fn queued(id: RequestId, output: PathBuf) -> Self {
        ConversionEvent::Queued {
            id,
            output,
            at: Utc::now(),
        }
    }

    pub fn started(id: RequestId, output: PathBuf) -> Self {
        ConversionEvent::Started {
            id,
            output,
            at: Utc::now(),
        }
    }

    pub fn progress(id: RequestId, output: PathBuf, flushes: u64) -> Self {
        ConversionEvent::Progress {
            id,
            output,
            flushes,
            at: Utc::now(),
        }
    }

    pub fn completed(id: RequestId, output: PathBuf, bytes: u64) -> Self {
        ConversionEvent::Completed {
            id,
            output,
            bytes,
            at: Utc::now(),
        }
    }

    pub fn failed(id: RequestId, output: PathBuf, error: String, kind: &str, canceled: bool) -> Self {
        ConversionEvent::Failed {
            id,
            output,
            error,
            kind: kind.to_string(),
            canceled,
            at: Utc::now(),
        }
    }
}

pub type EventSender = broadcast::Sender<ConversionEvent>;

/// New event channel with the default capacity.
pub fn event_channel() -> (EventSender, broadcast::Receiver<ConversionEvent>) {
    broadcast::channel(EVENT_CAPACITY)
}
