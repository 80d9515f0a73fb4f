use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::audio::SpeakerId;
use crate::transcode::TranscodeReport;
use crate::voice::{ChannelKey, GuildKey};

/// Snapshot of a recording session
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub guild: GuildKey,

    pub voice_channel: ChannelKey,

    /// Whether the session is still accepting segments
    pub is_running: bool,

    /// When the recording started
    pub started_at: DateTime<Utc>,

    /// Elapsed time in seconds
    pub duration_secs: f64,

    /// Segment currently being captured
    pub segment_index: u32,

    pub segments_saved: u32,

    pub segments_failed: u32,

    pub output_dir: PathBuf,
}

/// What a finished session left behind
#[derive(Debug, Clone)]
pub struct StopSummary {
    pub guild: GuildKey,
    pub output_dir: PathBuf,
    /// Number of segments closed, successful or not
    pub segments_closed: u32,
    pub segments_saved: u32,
    pub segments_failed: u32,
    pub duration_secs: f64,
}

/// Outcome of a `test_record` capture
#[derive(Debug, Clone)]
pub struct TestRecordReport {
    pub output: PathBuf,
    /// Bytes captured per speaker
    pub speakers: Vec<(SpeakerId, usize)>,
    pub result: Result<TranscodeReport, String>,
}

impl TestRecordReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}
