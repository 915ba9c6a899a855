use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::records::CaseRecordSet;

/// One entry in a lookup's progress sequence. The payload only exists on the
/// terminal `success` variant, so an inconsistent event shape cannot be
/// constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProgressEvent {
    Processing {
        message: String,
        progress: u8,
    },
    Success {
        message: String,
        progress: u8,
        data: CaseRecordSet,
    },
    Error {
        message: String,
        progress: u8,
    },
}

impl ProgressEvent {
    pub fn processing(message: impl Into<String>, progress: u8) -> Self {
        ProgressEvent::Processing {
            message: message.into(),
            progress,
        }
    }

    pub fn success(message: impl Into<String>, data: CaseRecordSet) -> Self {
        ProgressEvent::Success {
            message: message.into(),
            progress: 100,
            data,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            message: message.into(),
            progress: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Processing { .. })
    }

    pub fn progress(&self) -> u8 {
        match self {
            ProgressEvent::Processing { progress, .. }
            | ProgressEvent::Success { progress, .. }
            | ProgressEvent::Error { progress, .. } => *progress,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ProgressEvent::Processing { message, .. }
            | ProgressEvent::Success { message, .. }
            | ProgressEvent::Error { message, .. } => message,
        }
    }
}

/// Producer half of a lookup's progress sequence. Emission never blocks:
/// events sent after the consumer disconnected are dropped.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    pub fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("progress consumer disconnected, dropping event");
        }
    }
}

/// Single-producer progress channel. The stream ends when the sender side is
/// dropped, which happens after the terminal event.
pub fn progress_channel() -> (ProgressSender, UnboundedReceiverStream<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { tx }, UnboundedReceiverStream::new(rx))
}
