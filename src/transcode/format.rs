use std::path::Path;

use serde::Deserialize;

/// Compressed output formats, chosen by file extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp3,
    Ogg,
    Opus,
    Flac,
    M4a,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Ogg => "ogg",
            OutputFormat::Opus => "opus",
            OutputFormat::Flac => "flac",
            OutputFormat::M4a => "m4a",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => Some(OutputFormat::Mp3),
            "ogg" => Some(OutputFormat::Ogg),
            "opus" => Some(OutputFormat::Opus),
            "flac" => Some(OutputFormat::Flac),
            "m4a" => Some(OutputFormat::M4a),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// ffmpeg codec and quality arguments. Quality is fixed high.
    pub fn codec_args(&self) -> &'static [&'static str] {
        match self {
            OutputFormat::Mp3 => &["-codec:a", "libmp3lame", "-qscale:a", "2"],
            OutputFormat::Ogg => &["-codec:a", "libvorbis", "-qscale:a", "6"],
            OutputFormat::Opus => &["-codec:a", "libopus", "-b:a", "128k"],
            OutputFormat::Flac => &["-codec:a", "flac"],
            OutputFormat::M4a => &["-codec:a", "aac", "-b:a", "192k"],
        }
    }
}
