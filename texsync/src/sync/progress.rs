use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetching,
    Scanning,
    Comparing,
    Downloading,
    Deleting,
    Complete,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Fetching => "fetching",
            Stage::Scanning => "scanning",
            Stage::Comparing => "comparing",
            Stage::Downloading => "downloading",
            Stage::Deleting => "deleting",
            Stage::Complete => "complete",
        }
    }
}

/// Sync progress payload: `{stage, message, current, total}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
    pub current: Option<u32>,
    pub total: Option<u32>,
}

impl ProgressEvent {
    pub fn stage(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            current: None,
            total: None,
        }
    }

    pub fn counted(stage: Stage, message: impl Into<String>, current: u32, total: u32) -> Self {
        Self {
            stage,
            message: message.into(),
            current: Some(current),
            total: Some(total),
        }
    }

    pub fn percent(&self) -> Option<u8> {
        match (self.current, self.total) {
            (Some(current), Some(total)) if total > 0 => {
                Some((u64::from(current.min(total)) * 100 / u64::from(total)) as u8)
            }
            _ if self.stage == Stage::Complete => Some(100),
            _ => None,
        }
    }
}

/// Installation progress payload: `{stage, message, percent}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallProgress {
    pub stage: Stage,
    pub message: String,
    pub percent: Option<u8>,
}

impl From<ProgressEvent> for InstallProgress {
    fn from(event: ProgressEvent) -> Self {
        let percent = event.percent();
        Self {
            stage: event.stage,
            message: event.message,
            percent,
        }
    }
}

/// Ordered, lossless event sink. A dropped receiver is not an error: the
/// consumer is a passive observer.
pub struct ProgressReporter<E = ProgressEvent> {
    tx: Option<mpsc::UnboundedSender<E>>,
}

impl<E: From<ProgressEvent>> ProgressReporter<E> {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn silent() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        tracing::debug!(
            stage = event.stage.as_str(),
            current = ?event.current,
            total = ?event.total,
            "{}",
            event.message
        );
        if let Some(tx) = &self.tx {
            let _ = tx.send(E::from(event));
        }
    }

    pub fn stage(&self, stage: Stage, message: impl Into<String>) {
        self.emit(ProgressEvent::stage(stage, message));
    }

    pub fn complete(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::stage(Stage::Complete, message));
    }
}
