use super::sink::PcmFormat;

/// Convert interleaved PCM from `from` to `to`: channel conversion first, then
/// decimation. Only integer downsampling ratios are supported; other rates are
/// passed through unchanged (configuration rejects them up front).
pub fn convert(samples: &[i16], from: PcmFormat, to: PcmFormat) -> Vec<i16> {
    let rechanneled = match (from.channels, to.channels) {
        (2, 1) => stereo_to_mono(samples),
        (1, 2) => mono_to_stereo(samples),
        _ => samples.to_vec(),
    };

    downsample(rechanneled, from.sample_rate, to.sample_rate, to.channels)
}

/// Downsample by decimation, keeping whole frames.
fn downsample(samples: Vec<i16>, from_rate: u32, to_rate: u32, channels: u16) -> Vec<i16> {
    if to_rate == 0 || from_rate <= to_rate || from_rate % to_rate != 0 {
        return samples;
    }

    let ratio = (from_rate / to_rate) as usize;
    let channels = channels.max(1) as usize;

    samples
        .chunks_exact(channels)
        .step_by(ratio)
        .flatten()
        .copied()
        .collect()
}

/// Average left and right.
fn stereo_to_mono(samples: &[i16]) -> Vec<i16> {
    samples
        .chunks_exact(2)
        .map(|frame| ((frame[0] as i32 + frame[1] as i32) / 2) as i16)
        .collect()
}

fn mono_to_stereo(samples: &[i16]) -> Vec<i16> {
    samples.iter().flat_map(|&s| [s, s]).collect()
}
