// In-memory voice gateway and encoder used by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use voice_recorder::audio::{AudioSink, CapturedAudio, PcmFormat, SpeakerId};
use voice_recorder::config::RetryConfig;
use voice_recorder::transcode::{SegmentEncoder, TranscodeReport};
use voice_recorder::voice::{ChannelKey, GuildKey, VoiceConnection, VoiceGateway};
use voice_recorder::{
    CommandOrigin, OutputFormat, SessionConfig, SessionEvent, SessionEventKind, TranscodeError,
    VoiceError,
};

pub const GUILD: GuildKey = GuildKey(1001);
pub const VOICE: ChannelKey = ChannelKey(2001);
pub const TEXT: ChannelKey = ChannelKey(3001);

pub fn origin(guild: GuildKey, voice: Option<ChannelKey>) -> CommandOrigin {
    CommandOrigin {
        guild,
        voice_channel: voice,
        reply_channel: TEXT,
    }
}

pub fn session_config(root: &Path) -> SessionConfig {
    SessionConfig {
        recordings_path: root.to_path_buf(),
        segment_length: Duration::from_secs(600),
        tick: Duration::from_secs(10),
        format: PcmFormat::new(48_000, 2),
        output_format: OutputFormat::Mp3,
        test_duration: Duration::from_secs(30),
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 30_000,
        },
        watchdog_interval: Duration::from_secs(60),
    }
}

/// One second of stereo audio per speaker.
pub fn two_speakers() -> Vec<(SpeakerId, Vec<i16>)> {
    vec![
        (SpeakerId(11), vec![100; 96_000]),
        (SpeakerId(22), vec![-100; 96_000]),
    ]
}

pub fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEventKind> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    kinds
}

pub struct FakeConnection {
    guild: GuildKey,
    channel: ChannelKey,
    connected: AtomicBool,
    fail_capture: bool,
    feed: Vec<(SpeakerId, Vec<i16>)>,
    sink: Mutex<Option<Arc<AudioSink>>>,
    pub captures_started: AtomicU32,
    pub disconnects: AtomicU32,
}

impl FakeConnection {
    /// Simulate the voice link dropping.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn capturing(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn capture_count(&self) -> u32 {
        self.captures_started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    fn guild(&self) -> GuildKey {
        self.guild
    }

    fn channel(&self) -> ChannelKey {
        self.channel
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn start_capture(&self, sink: Arc<AudioSink>) -> Result<(), VoiceError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(VoiceError::NotConnected);
        }
        if self.fail_capture {
            return Err(VoiceError::Capture("receiver refused".to_string()));
        }

        for (speaker, samples) in &self.feed {
            sink.record(*speaker, 0, samples.clone());
        }
        *self.sink.lock().unwrap() = Some(sink);
        self.captures_started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_capture(&self) -> Result<(), VoiceError> {
        self.sink.lock().unwrap().take();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VoiceError> {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out `FakeConnection`s and keeps every one it created.
#[derive(Default)]
pub struct FakeGateway {
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    fail_connect: AtomicBool,
    fail_capture: AtomicBool,
    feed: Mutex<Vec<(SpeakerId, Vec<i16>)>>,
}

impl FakeGateway {
    pub fn with_feed(feed: Vec<(SpeakerId, Vec<i16>)>) -> Arc<Self> {
        let gateway = Self::default();
        *gateway.feed.lock().unwrap() = feed;
        Arc::new(gateway)
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_capture(&self, fail: bool) {
        self.fail_capture.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn connection(&self, n: usize) -> Arc<FakeConnection> {
        Arc::clone(&self.connections.lock().unwrap()[n])
    }

    pub fn last(&self) -> Arc<FakeConnection> {
        let connections = self.connections.lock().unwrap();
        Arc::clone(connections.last().unwrap())
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn connect(
        &self,
        guild: GuildKey,
        channel: ChannelKey,
    ) -> Result<Arc<dyn VoiceConnection>, VoiceError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(VoiceError::Join("gateway unavailable".to_string()));
        }

        let connection = Arc::new(FakeConnection {
            guild,
            channel,
            connected: AtomicBool::new(true),
            fail_capture: self.fail_capture.load(Ordering::SeqCst),
            feed: self.feed.lock().unwrap().clone(),
            sink: Mutex::new(None),
            captures_started: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
        });
        self.connections.lock().unwrap().push(Arc::clone(&connection));
        Ok(connection)
    }
}

/// Records each capture it receives and writes a placeholder output file.
#[derive(Default)]
pub struct FakeEncoder {
    pub calls: Mutex<Vec<EncodeCall>>,
    fail: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct EncodeCall {
    pub output: PathBuf,
    pub speakers: usize,
    pub bytes: usize,
}

impl FakeEncoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<EncodeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn outputs(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.output.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }
}

#[async_trait]
impl SegmentEncoder for FakeEncoder {
    async fn transcode(
        &self,
        captured: CapturedAudio,
        output: &Path,
    ) -> Result<TranscodeReport, TranscodeError> {
        self.calls.lock().unwrap().push(EncodeCall {
            output: output.to_path_buf(),
            speakers: captured.speaker_count(),
            bytes: captured.total_bytes(),
        });

        if captured.is_empty() {
            return Err(TranscodeError::EmptyCapture);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TranscodeError::EncoderFailed {
                status: "exit status: 1".to_string(),
                stderr: "simulated failure".to_string(),
                fallback: None,
            });
        }

        // Blocking write so paused-clock tests never wait on the blocking pool
        std::fs::write(output, b"encoded")?;

        Ok(TranscodeReport {
            output: output.to_path_buf(),
            output_bytes: 7,
            capture_bytes: captured.total_bytes(),
            speakers: captured.speaker_sizes(),
            duration: Duration::from_secs(1),
        })
    }
}
