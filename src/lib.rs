pub mod audio;
pub mod commands;
pub mod config;
pub mod discord;
pub mod error;
pub mod session;
pub mod transcode;
pub mod voice;

pub use audio::{AudioSink, CapturedAudio, MergePolicy, PcmFormat, SpeakerId};
pub use commands::Command;
pub use config::Config;
pub use error::{RecorderError, TranscodeError, VoiceError};
pub use session::{
    CommandOrigin, Session, SessionConfig, SessionEvent, SessionEventKind, SessionManager,
    SessionStatus, StopReason, StopSummary, TestRecordReport, Watchdog,
};
pub use transcode::{OutputFormat, SegmentEncoder, TranscodeReport, Transcoder};
pub use voice::{ChannelKey, GuildKey, VoiceConnection, VoiceGateway};
