mod encoder;
mod format;

pub use encoder::{write_wav, SegmentEncoder, TranscodeReport, Transcoder};
pub use format::OutputFormat;
