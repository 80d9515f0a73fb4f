pub mod convert;
pub mod mixer;
pub mod sink;

pub use convert::convert;
pub use mixer::MergePolicy;
pub use sink::{AudioSink, AudioSpan, CapturedAudio, PcmFormat, SpeakerId, SpeakerTrack};
