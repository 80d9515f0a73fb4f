//! Voice connection abstraction
//!
//! The session core only sees these traits. The Discord implementation lives
//! in `crate::discord`; tests use in-memory fakes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::audio::AudioSink;
use crate::error::VoiceError;

/// Identifier of a chat server (guild). One recording session per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuildKey(pub u64);

impl fmt::Display for GuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a voice or text channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey(pub u64);

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live link to one voice channel.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn guild(&self) -> GuildKey;

    fn channel(&self) -> ChannelKey;

    async fn is_connected(&self) -> bool;

    /// Start feeding received audio into `sink`. Replaces any previously attached sink.
    async fn start_capture(&self, sink: Arc<AudioSink>) -> Result<(), VoiceError>;

    /// Stop feeding audio. Must succeed when nothing is attached.
    async fn stop_capture(&self) -> Result<(), VoiceError>;

    /// Leave the channel. Must succeed when already disconnected.
    async fn disconnect(&self) -> Result<(), VoiceError>;
}

/// Factory for voice connections.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(
        &self,
        guild: GuildKey,
        channel: ChannelKey,
    ) -> Result<Arc<dyn VoiceConnection>, VoiceError>;
}
