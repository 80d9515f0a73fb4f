use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::audio::PcmFormat;
use crate::config::{Config, RetryConfig};
use crate::transcode::OutputFormat;
use crate::voice::GuildKey;

/// Runtime settings shared by every recording session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Root directory; sessions write to `<root>/<guild>_<timestamp>/`
    pub recordings_path: PathBuf,

    /// Length of each segment before rotating files
    /// Default: 600 seconds (10 minutes)
    pub segment_length: Duration,

    /// How often liveness is checked while waiting for a segment to fill
    pub tick: Duration,

    /// PCM layout written to the intermediate WAV
    pub format: PcmFormat,

    pub output_format: OutputFormat,

    /// Length of the `test_record` diagnostic capture
    pub test_duration: Duration,

    pub retry: RetryConfig,

    pub watchdog_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionConfig {
    fn from(cfg: &Config) -> Self {
        let rec = &cfg.recording;
        Self {
            recordings_path: rec.recordings_path.clone(),
            segment_length: rec.segment_length(),
            tick: rec.tick(),
            format: PcmFormat::new(rec.sample_rate, rec.channels),
            output_format: rec.format,
            test_duration: rec.test_duration(),
            retry: cfg.retry.clone(),
            watchdog_interval: cfg.watchdog.interval(),
        }
    }
}

impl SessionConfig {
    pub fn session_dir(&self, guild: GuildKey, now: DateTime<Local>) -> PathBuf {
        self.recordings_path
            .join(format!("{}_{}", guild, now.format("%Y%m%d_%H%M%S")))
    }

    pub fn segment_path(&self, session_dir: &Path, index: u32) -> PathBuf {
        session_dir.join(format!(
            "segment_{}.{}",
            index,
            self.output_format.extension()
        ))
    }

    pub fn test_dir(&self) -> PathBuf {
        self.recordings_path.join("test")
    }

    pub fn test_path(&self, now: DateTime<Local>) -> PathBuf {
        self.test_dir().join(format!(
            "test_{}.{}",
            now.format("%Y%m%d_%H%M%S"),
            self.output_format.extension()
        ))
    }
}
