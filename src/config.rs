use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::audio::MergePolicy;
use crate::transcode::OutputFormat;

/// Sample rate of the PCM the voice client decodes to. Configured rates must divide it.
pub const VOICE_SAMPLE_RATE: u32 = 48_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub discord: DiscordConfig,
    pub recording: RecordingConfig,
    pub retry: RetryConfig,
    pub encoder: EncoderConfig,
    pub watchdog: WatchdogConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub token: String,
    pub command_prefix: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            command_prefix: "!".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub recordings_path: PathBuf,
    pub segment_length_secs: u64,
    /// Granularity of the liveness checks while a segment is being captured.
    pub tick_secs: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: OutputFormat,
    pub merge: MergePolicy,
    pub test_duration_secs: u64,
    pub keep_debug_wav: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            recordings_path: PathBuf::from("recordings"),
            segment_length_secs: 600,
            tick_secs: 10,
            sample_rate: VOICE_SAMPLE_RATE,
            channels: 2,
            format: OutputFormat::Mp3,
            merge: MergePolicy::Concatenate,
            test_duration_secs: 30,
            keep_debug_wav: false,
        }
    }
}

impl RecordingConfig {
    pub fn segment_length(&self) -> Duration {
        Duration::from_secs(self.segment_length_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn test_duration(&self) -> Duration {
        Duration::from_secs(self.test_duration_secs)
    }

    pub fn debug_dir(&self) -> Option<PathBuf> {
        self.keep_debug_wav
            .then(|| self.recordings_path.join("debug"))
    }
}

/// Retry policy for failures while attaching capture to a voice connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (1-based), doubling each time up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub ffmpeg_path: PathBuf,
    pub timeout_secs: u64,
    pub min_capture_bytes: usize,
    pub min_output_bytes: u64,
    /// Keep the raw WAV next to the segment when the encoder fails.
    pub wav_fallback: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            timeout_secs: 300,
            min_capture_bytes: 1_000,
            min_output_bytes: 1_000,
            wav_fallback: true,
        }
    }
}

impl EncoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Prefer an `ffmpeg` binary shipped next to the bot, otherwise rely on `PATH`.
fn default_ffmpeg_path() -> PathBuf {
    let local = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };
    let local = Path::new(".").join(local);
    if local.is_file() {
        local
    } else {
        PathBuf::from("ffmpeg")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl WatchdogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            file_name: "bot.log".to_string(),
        }
    }
}

impl Config {
    /// Load defaults, then the optional file at `path`, then `RECORDER_*` env overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("RECORDER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        let mut cfg: Config = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;

        if cfg.discord.token.is_empty() {
            if let Ok(token) = std::env::var("DISCORD_TOKEN") {
                cfg.discord.token = token;
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let rec = &self.recording;

        if rec.segment_length_secs == 0 {
            bail!("recording.segment_length_secs must be greater than zero");
        }
        if rec.tick_secs == 0 {
            bail!("recording.tick_secs must be greater than zero");
        }
        if rec.test_duration_secs == 0 {
            bail!("recording.test_duration_secs must be greater than zero");
        }
        if !(1..=2).contains(&rec.channels) {
            bail!("recording.channels must be 1 or 2, got {}", rec.channels);
        }
        if rec.sample_rate == 0 || VOICE_SAMPLE_RATE % rec.sample_rate != 0 {
            bail!(
                "recording.sample_rate must divide {} Hz, got {}",
                VOICE_SAMPLE_RATE,
                rec.sample_rate
            );
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.watchdog.interval_secs == 0 {
            bail!("watchdog.interval_secs must be greater than zero");
        }

        Ok(())
    }
}
