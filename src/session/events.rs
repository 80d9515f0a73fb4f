use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::RecorderError;
use crate::transcode::TranscodeReport;
use crate::voice::{ChannelKey, GuildKey};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    UserRequested,
    ChannelEmpty,
    ReconnectFailed,
    RetriesExhausted,
    Shutdown,
}

impl StopReason {
    /// Whether the segment in progress is still transcoded when stopping for this reason.
    pub fn flushes_partial(&self) -> bool {
        matches!(
            self,
            StopReason::UserRequested | StopReason::ChannelEmpty | StopReason::Shutdown
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::UserRequested => "stopped by command",
            StopReason::ChannelEmpty => "everyone left the voice channel",
            StopReason::ReconnectFailed => "the voice connection dropped and could not be restored",
            StopReason::RetriesExhausted => "capture kept failing",
            StopReason::Shutdown => "the bot is shutting down",
        };
        f.write_str(text)
    }
}

/// Notification for the front end, addressed to the session's reply channel.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub guild: GuildKey,
    pub reply_channel: ChannelKey,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone)]
pub enum SessionEventKind {
    SegmentSaved { index: u32, report: TranscodeReport },
    SegmentFailed { index: u32, error: String },
    CaptureRetry { attempt: u32, max_attempts: u32, error: String },
    ConnectionInterrupted { index: u32 },
    Reconnected,
    SessionEnded {
        reason: StopReason,
        /// Underlying failure, when one caused the stop
        detail: Option<String>,
    },
}

impl SessionEvent {
    /// Text posted to the reply channel.
    pub fn message(&self) -> String {
        match &self.kind {
            SessionEventKind::SegmentSaved { index, report } => format!(
                "Saved segment {}.\nLocation: {}",
                index,
                report.output.display()
            ),
            SessionEventKind::SegmentFailed { index, error } => format!(
                "Failed to save segment {} ({}). Check the logs for details.",
                index, error
            ),
            SessionEventKind::CaptureRetry {
                attempt,
                max_attempts,
                error,
            } => format!(
                "Recording error ({}). Retrying ({}/{}).",
                error, attempt, max_attempts
            ),
            SessionEventKind::ConnectionInterrupted { index } => format!(
                "{} during segment {}. Waiting to reconnect.",
                capitalize(&RecorderError::ConnectionLost.to_string()),
                index
            ),
            SessionEventKind::Reconnected => "Reconnected to the voice channel.".to_string(),
            SessionEventKind::SessionEnded {
                reason,
                detail: None,
            } => format!("Recording stopped: {}.", reason),
            SessionEventKind::SessionEnded {
                reason,
                detail: Some(detail),
            } => format!("Recording stopped: {} ({}).", reason, detail),
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Send `event`, tolerating a front end that has gone away.
pub(crate) async fn emit(tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    if let Err(e) = tx.send(event).await {
        debug!("No listener for session event: {:?}", e.0.kind);
    }
}
