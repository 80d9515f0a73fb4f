// Merging per-speaker tracks into the single waveform handed to the encoder.
//
// Two policies:
// - Concatenate: every speaker's samples back to back, in speaker order. This
//   does not overlay simultaneous speech.
// - Mix: each span is placed at its capture offset on a shared timeline and
//   overlapping samples are summed with clipping.

use serde::Deserialize;
use tracing::debug;

use super::sink::CapturedAudio;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    #[default]
    Concatenate,
    Mix,
}

impl MergePolicy {
    /// Merge all tracks of `captured` into one interleaved sample buffer.
    pub fn merge(&self, captured: &CapturedAudio) -> Vec<i16> {
        match self {
            MergePolicy::Concatenate => concatenate(captured),
            MergePolicy::Mix => mix(captured),
        }
    }
}

fn concatenate(captured: &CapturedAudio) -> Vec<i16> {
    let total: usize = captured.tracks().map(|(_, t)| t.sample_count()).sum();
    let mut merged = Vec::with_capacity(total);

    for (_speaker, track) in captured.tracks() {
        for span in track.spans() {
            merged.extend_from_slice(&span.samples);
        }
    }

    merged
}

fn mix(captured: &CapturedAudio) -> Vec<i16> {
    let channels = captured.format.channels.max(1) as usize;

    // Timeline length is the end of the latest span
    let len = captured
        .tracks()
        .flat_map(|(_, t)| t.spans())
        .map(|span| span.start_frame as usize * channels + span.samples.len())
        .max()
        .unwrap_or(0);

    let mut sums = vec![0i32; len];

    for (speaker, track) in captured.tracks() {
        for span in track.spans() {
            let start = span.start_frame as usize * channels;
            for (slot, &sample) in sums[start..start + span.samples.len()]
                .iter_mut()
                .zip(&span.samples)
            {
                *slot += sample as i32;
            }
        }
        debug!(
            "Mixed speaker {}: {} spans, {} samples",
            speaker,
            track.spans().len(),
            track.sample_count()
        );
    }

    sums.into_iter()
        .map(|sum| sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
        .collect()
}
