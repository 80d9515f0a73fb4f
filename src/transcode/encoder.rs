use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info, warn};

use super::format::OutputFormat;
use crate::audio::{CapturedAudio, MergePolicy, PcmFormat, SpeakerId};
use crate::config::EncoderConfig;
use crate::error::TranscodeError;

/// Result of a successful transcode.
#[derive(Debug, Clone)]
pub struct TranscodeReport {
    pub output: PathBuf,
    pub output_bytes: u64,
    pub capture_bytes: usize,
    pub speakers: Vec<(SpeakerId, usize)>,
    pub duration: Duration,
}

/// Turns a detached capture into a compressed file on disk.
#[async_trait]
pub trait SegmentEncoder: Send + Sync {
    async fn transcode(
        &self,
        captured: CapturedAudio,
        output: &Path,
    ) -> Result<TranscodeReport, TranscodeError>;
}

/// Encoder backed by an external `ffmpeg` process.
///
/// Each call merges the capture into a temporary WAV, runs ffmpeg on it and
/// validates the result. The temporary directory is removed on every exit path.
pub struct Transcoder {
    config: EncoderConfig,
    merge: MergePolicy,
    debug_dir: Option<PathBuf>,
}

impl Transcoder {
    pub fn new(config: EncoderConfig, merge: MergePolicy) -> Self {
        Self {
            config,
            merge,
            debug_dir: None,
        }
    }

    /// Also keep a copy of every merged WAV in `dir`.
    pub fn with_debug_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dir = dir;
        self
    }

    pub fn program(&self) -> &Path {
        &self.config.ffmpeg_path
    }

    /// Run `ffmpeg -version` and return its first line.
    pub async fn version(&self) -> Result<String, TranscodeError> {
        let output = Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| TranscodeError::EncoderUnavailable {
                program: self.config.ffmpeg_path.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(TranscodeError::EncoderFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                fallback: None,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }

    fn check_capture(&self, captured: &CapturedAudio) -> Result<usize, TranscodeError> {
        info!("Speakers captured: {}", captured.speaker_count());
        for (speaker, bytes) in captured.speaker_sizes() {
            info!("Speaker {}: {} bytes", speaker, bytes);
        }

        let total = captured.total_bytes();
        info!("Total captured: {} bytes", total);

        if captured.is_empty() {
            warn!("Capture is empty, skipping encode");
            return Err(TranscodeError::EmptyCapture);
        }

        if total < self.config.min_capture_bytes {
            warn!(
                "Capture too small ({} bytes), skipping encode",
                total
            );
            return Err(TranscodeError::UndersizedCapture {
                bytes: total,
                minimum: self.config.min_capture_bytes,
            });
        }

        Ok(total)
    }

    async fn keep_debug_copy(&self, wav_path: &Path, output: &Path) {
        let Some(dir) = &self.debug_dir else {
            return;
        };

        let target = dir.join(debug_file_name(output, chrono::Local::now()));

        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::copy(wav_path, &target).await
        }
        .await;

        match result {
            Ok(_) => info!("Saved debug WAV: {}", target.display()),
            Err(e) => warn!("Failed to save debug WAV {}: {}", target.display(), e),
        }
    }

    async fn run_encoder(&self, wav_path: &Path, output: &Path) -> Result<(), TranscodeError> {
        let mut cmd = Command::new(&self.config.ffmpeg_path);
        cmd.arg("-hide_banner").arg("-y").arg("-i").arg(wav_path);

        match OutputFormat::from_path(output) {
            Some(format) => {
                cmd.args(format.codec_args());
            }
            None => warn!(
                "Unknown output extension for {}, letting the encoder pick a codec",
                output.display()
            ),
        }

        cmd.arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("Running encoder: {:?}", cmd.as_std());

        let result = tokio::time::timeout(self.config.timeout(), cmd.output())
            .await
            .map_err(|_| TranscodeError::EncoderTimedOut {
                secs: self.config.timeout_secs,
            })?
            .map_err(|source| TranscodeError::EncoderUnavailable {
                program: self.config.ffmpeg_path.display().to_string(),
                source,
            })?;

        if result.status.success() {
            info!("Encoder finished successfully");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
        error!("Encoder failed ({}): {}", result.status, stderr);

        let fallback = if self.config.wav_fallback {
            let wav_target = output.with_extension("wav");
            match tokio::fs::copy(wav_path, &wav_target).await {
                Ok(_) => {
                    info!("Encoder failed, kept raw WAV instead: {}", wav_target.display());
                    Some(wav_target)
                }
                Err(e) => {
                    warn!("Failed to keep fallback WAV {}: {}", wav_target.display(), e);
                    None
                }
            }
        } else {
            None
        };

        Err(TranscodeError::EncoderFailed {
            status: result.status.to_string(),
            stderr,
            fallback,
        })
    }

    async fn verify_output(&self, output: &Path) -> Result<u64, TranscodeError> {
        let bytes = match tokio::fs::metadata(output).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!("Encoder did not create {}", output.display());
                return Err(TranscodeError::OutputMissing(output.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        if bytes < self.config.min_output_bytes {
            error!("Encoded file {} too small: {} bytes", output.display(), bytes);
            return Err(TranscodeError::OutputUndersized {
                path: output.to_path_buf(),
                bytes,
                minimum: self.config.min_output_bytes,
            });
        }

        Ok(bytes)
    }
}

#[async_trait]
impl SegmentEncoder for Transcoder {
    async fn transcode(
        &self,
        captured: CapturedAudio,
        output: &Path,
    ) -> Result<TranscodeReport, TranscodeError> {
        let capture_bytes = self.check_capture(&captured)?;
        let speakers = captured.speaker_sizes();

        let temp_dir = tempfile::Builder::new()
            .prefix("voice-recorder-")
            .tempdir()?;
        let wav_path = temp_dir.path().join("capture.wav");

        info!("Writing temporary WAV: {}", wav_path.display());

        let merge = self.merge;
        let wav_target = wav_path.clone();
        let (wav_bytes, duration) =
            tokio::task::spawn_blocking(move || write_wav(&captured, merge, &wav_target))
                .await
                .map_err(|e| TranscodeError::Join(e.to_string()))??;

        if wav_bytes < self.config.min_capture_bytes as u64 {
            error!("Temporary WAV too small: {} bytes", wav_bytes);
            return Err(TranscodeError::WavTooSmall { bytes: wav_bytes });
        }

        self.keep_debug_copy(&wav_path, output).await;

        self.run_encoder(&wav_path, output).await?;
        let output_bytes = self.verify_output(output).await?;

        if let Err(e) = temp_dir.close() {
            warn!("Failed to remove temporary directory: {}", e);
        }

        info!(
            "Saved {} ({} bytes, {:.1}s of audio)",
            output.display(),
            output_bytes,
            duration.as_secs_f64()
        );

        Ok(TranscodeReport {
            output: output.to_path_buf(),
            output_bytes,
            capture_bytes,
            speakers,
            duration,
        })
    }
}

/// Debug copies are named after the session directory and segment they belong to,
/// so concurrent sessions never overwrite each other.
fn debug_file_name(output: &Path, now: chrono::DateTime<chrono::Local>) -> String {
    let session = output
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string());
    let segment = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "segment".to_string());

    format!(
        "debug_{}_{}_{}.wav",
        session,
        segment,
        now.format("%Y%m%d_%H%M%S")
    )
}

/// Merge `captured` and write it as 16-bit PCM WAV. Returns the file size and audio duration.
pub fn write_wav(
    captured: &CapturedAudio,
    merge: MergePolicy,
    path: &Path,
) -> Result<(u64, Duration), TranscodeError> {
    let format: PcmFormat = captured.format;
    let samples = merge.merge(captured);

    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer: hound::WavWriter<BufWriter<File>> = hound::WavWriter::create(path, spec)?;
    for &sample in &samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    let bytes = std::fs::metadata(path)?.len();
    Ok((bytes, format.duration_of(samples.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_with(program: &str) -> EncoderConfig {
        EncoderConfig {
            ffmpeg_path: PathBuf::from(program),
            ..EncoderConfig::default()
        }
    }

    #[tokio::test]
    async fn test_empty_capture_never_invokes_encoder() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("segment_1.mp3");
        let transcoder = Transcoder::new(config_with("/nonexistent/ffmpeg"), MergePolicy::Concatenate);

        let captured = CapturedAudio::empty(PcmFormat::new(48_000, 2));
        let err = transcoder.transcode(captured, &output).await.unwrap_err();

        // A missing binary would have surfaced as EncoderUnavailable
        assert!(matches!(err, TranscodeError::EmptyCapture));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_undersized_capture_is_rejected() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("segment_1.mp3");
        let transcoder = Transcoder::new(config_with("/nonexistent/ffmpeg"), MergePolicy::Concatenate);

        let mut captured = CapturedAudio::empty(PcmFormat::new(48_000, 2));
        captured.push(SpeakerId(1), 0, vec![0; 100]);

        let err = transcoder.transcode(captured, &output).await.unwrap_err();
        assert!(matches!(
            err,
            TranscodeError::UndersizedCapture { bytes: 200, minimum: 1000 }
        ));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_missing_encoder_is_reported() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("segment_1.mp3");
        let transcoder = Transcoder::new(config_with("/nonexistent/ffmpeg"), MergePolicy::Concatenate);

        let mut captured = CapturedAudio::empty(PcmFormat::new(48_000, 2));
        captured.push(SpeakerId(1), 0, vec![0; 4_800]);

        let err = transcoder.transcode(captured, &output).await.unwrap_err();
        assert!(matches!(err, TranscodeError::EncoderUnavailable { .. }));
    }

    #[test]
    fn test_debug_file_name_includes_session_and_segment() {
        use chrono::TimeZone;

        let now = chrono::Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let a = debug_file_name(Path::new("recordings/1_20240101_115900/segment_3.mp3"), now);
        let b = debug_file_name(Path::new("recordings/2_20240101_115900/segment_3.mp3"), now);

        assert_eq!(a, "debug_1_20240101_115900_segment_3_20240101_120000.wav");
        assert_ne!(a, b);
    }

    #[test]
    fn test_write_wav_header_matches_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");

        let mut captured = CapturedAudio::empty(PcmFormat::new(16_000, 1));
        captured.push(SpeakerId(1), 0, vec![1; 16_000]);
        captured.push(SpeakerId(2), 0, vec![2; 16_000]);

        let (bytes, duration) = write_wav(&captured, MergePolicy::Concatenate, &path).unwrap();
        assert_eq!(bytes, 44 + 32_000 * 2);
        assert_eq!(duration, Duration::from_secs(2));

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
    }
}
