use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

/// Identifier of a speaker in a voice channel (the platform user id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpeakerId(pub u64);

impl fmt::Display for SpeakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Layout of 16-bit interleaved PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    pub const BYTES_PER_SAMPLE: usize = 2;

    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Number of frames covering `offset` at this sample rate.
    pub fn frames_in(&self, offset: Duration) -> u64 {
        (offset.as_micros() * self.sample_rate as u128 / 1_000_000) as u64
    }

    pub fn duration_of(&self, samples: usize) -> Duration {
        let frames = (samples / self.channels.max(1) as usize) as u128;
        let nanos = frames * 1_000_000_000 / self.sample_rate.max(1) as u128;
        Duration::from_nanos(nanos as u64)
    }
}

/// A contiguous run of samples from one speaker, placed on the sink's timeline.
#[derive(Debug, Clone)]
pub struct AudioSpan {
    /// Offset of the first frame, counted from the moment the sink was attached.
    pub start_frame: u64,
    /// Interleaved i16 samples.
    pub samples: Vec<i16>,
}

/// Everything one speaker said while the sink was attached.
#[derive(Debug, Clone, Default)]
pub struct SpeakerTrack {
    spans: Vec<AudioSpan>,
    sample_count: usize,
}

impl SpeakerTrack {
    pub fn spans(&self) -> &[AudioSpan] {
        &self.spans
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn byte_len(&self) -> usize {
        self.sample_count * PcmFormat::BYTES_PER_SAMPLE
    }

    fn push(&mut self, span: AudioSpan) {
        self.sample_count += span.samples.len();
        self.spans.push(span);
    }
}

/// Per-speaker audio detached from a sink, ready for transcoding.
#[derive(Debug, Clone)]
pub struct CapturedAudio {
    pub format: PcmFormat,
    speakers: BTreeMap<SpeakerId, SpeakerTrack>,
}

impl CapturedAudio {
    pub fn empty(format: PcmFormat) -> Self {
        Self {
            format,
            speakers: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.speakers.is_empty()
    }

    pub fn speaker_count(&self) -> usize {
        self.speakers.len()
    }

    /// Tracks in speaker-id order.
    pub fn tracks(&self) -> impl Iterator<Item = (&SpeakerId, &SpeakerTrack)> {
        self.speakers.iter()
    }

    pub fn total_bytes(&self) -> usize {
        self.speakers.values().map(SpeakerTrack::byte_len).sum()
    }

    pub fn speaker_sizes(&self) -> Vec<(SpeakerId, usize)> {
        self.speakers
            .iter()
            .map(|(id, track)| (*id, track.byte_len()))
            .collect()
    }

    /// Append a span for `speaker`. Used by the sink and by tests building captures directly.
    pub fn push(&mut self, speaker: SpeakerId, start_frame: u64, samples: Vec<i16>) {
        if samples.is_empty() {
            return;
        }
        self.speakers
            .entry(speaker)
            .or_default()
            .push(AudioSpan {
                start_frame,
                samples,
            });
    }
}

#[derive(Debug)]
struct SinkState {
    audio: CapturedAudio,
    detached: bool,
}

/// Accumulates per-speaker PCM for as long as it is attached to a voice connection.
///
/// The voice client pushes decoded audio from its own tasks, so the state is
/// kept behind a short-lived lock. Once [`AudioSink::detach`] is called the
/// sink ignores further audio.
#[derive(Debug)]
pub struct AudioSink {
    format: PcmFormat,
    state: Mutex<SinkState>,
}

impl AudioSink {
    pub fn new(format: PcmFormat) -> Self {
        Self {
            format,
            state: Mutex::new(SinkState {
                audio: CapturedAudio::empty(format),
                detached: false,
            }),
        }
    }

    /// Record `samples` spoken by `speaker`, starting `start_frame` frames after attach.
    pub fn record(&self, speaker: SpeakerId, start_frame: u64, samples: Vec<i16>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.detached {
            debug!(speaker = %speaker, "dropping audio for detached sink");
            return;
        }
        state.audio.push(speaker, start_frame, samples);
    }

    pub fn bytes_captured(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.audio.total_bytes()
    }

    /// Detach the sink and take everything captured so far.
    ///
    /// A second call returns an empty capture.
    pub fn detach(&self) -> CapturedAudio {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.detached = true;
        std::mem::replace(&mut state.audio, CapturedAudio::empty(self.format))
    }
}
