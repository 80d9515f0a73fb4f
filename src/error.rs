use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the recording core.
///
/// The user-facing variants (`AlreadyRecording`, `NotInVoiceChannel`,
/// `NotRecording`) are reported back to the command's text channel and never
/// change session state.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("already recording in this server")]
    AlreadyRecording,

    #[error("you must be in a voice channel to use this command")]
    NotInVoiceChannel,

    #[error("not currently recording in this server")]
    NotRecording,

    #[error("this command only works inside a server")]
    NotInGuild,

    #[error("voice connection lost")]
    ConnectionLost,

    #[error("reconnect failed: {0}")]
    ReconnectFailed(#[source] VoiceError),

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures reported by a voice connection implementation.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("failed to join voice channel: {0}")]
    Join(String),

    #[error("voice connection is not connected")]
    NotConnected,

    #[error("voice capture error: {0}")]
    Capture(String),

    #[error("failed to leave voice channel: {0}")]
    Leave(String),
}

/// Per-segment transcoding failures. None of these abort a recording.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("no audio was captured")]
    EmptyCapture,

    #[error("captured audio too small ({bytes} bytes, minimum {minimum})")]
    UndersizedCapture { bytes: usize, minimum: usize },

    #[error("temporary WAV too small ({bytes} bytes)")]
    WavTooSmall { bytes: u64 },

    #[error("failed to write WAV: {0}")]
    Wav(#[from] hound::Error),

    #[error("encoder could not be started ({program}): {source}")]
    EncoderUnavailable {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("encoder exited with {status}: {stderr}")]
    EncoderFailed {
        status: String,
        stderr: String,
        fallback: Option<PathBuf>,
    },

    #[error("encoder timed out after {secs}s")]
    EncoderTimedOut { secs: u64 },

    #[error("encoder reported success but {0:?} was not created")]
    OutputMissing(PathBuf),

    #[error("encoded file {path:?} too small ({bytes} bytes, minimum {minimum})")]
    OutputUndersized {
        path: PathBuf,
        bytes: u64,
        minimum: u64,
    },

    #[error("I/O error during transcoding: {0}")]
    Io(#[from] io::Error),

    #[error("transcode worker failed: {0}")]
    Join(String),
}

impl RecorderError {
    /// Rejections caused by how the command was used rather than a fault.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            RecorderError::AlreadyRecording
                | RecorderError::NotInVoiceChannel
                | RecorderError::NotRecording
                | RecorderError::NotInGuild
        )
    }
}

impl TranscodeError {
    /// True when the encoder was never invoked because the capture was unusable.
    pub fn is_capture_rejection(&self) -> bool {
        matches!(
            self,
            TranscodeError::EmptyCapture | TranscodeError::UndersizedCapture { .. }
        )
    }
}

pub type Result<T, E = RecorderError> = std::result::Result<T, E>;
