// songbird implementation of the voice traits.
//
// Discord delivers decoded voice as 48 kHz stereo i16 in 20 ms ticks, keyed by
// RTP SSRC. Speaking-state updates map SSRCs to user ids; the tick handler
// converts each speaker's audio to the configured format and pushes it into
// the attached sink with its offset since attach.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::error::JoinError;
use songbird::model::payload::Speaking;
use songbird::{Call, CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, Songbird};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::audio::{self, AudioSink, PcmFormat, SpeakerId};
use crate::config::VOICE_SAMPLE_RATE;
use crate::error::VoiceError;
use crate::voice::{ChannelKey, GuildKey, VoiceConnection, VoiceGateway};

/// Layout of the PCM songbird decodes to
const DECODED_FORMAT: PcmFormat = PcmFormat {
    sample_rate: VOICE_SAMPLE_RATE,
    channels: 2,
};

type SsrcMap = Arc<StdMutex<HashMap<u32, u64>>>;

pub struct SongbirdGateway {
    songbird: Arc<Songbird>,
    format: PcmFormat,
}

impl SongbirdGateway {
    pub fn new(songbird: Arc<Songbird>, format: PcmFormat) -> Self {
        Self { songbird, format }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn connect(
        &self,
        guild: GuildKey,
        channel: ChannelKey,
    ) -> Result<Arc<dyn VoiceConnection>, VoiceError> {
        info!(guild = %guild, channel = %channel, "Joining voice channel");

        let call = self
            .songbird
            .join(GuildId::new(guild.0), ChannelId::new(channel.0))
            .await
            .map_err(|e| VoiceError::Join(e.to_string()))?;

        Ok(Arc::new(SongbirdConnection {
            songbird: Arc::clone(&self.songbird),
            call,
            guild,
            channel,
            format: self.format,
            ssrc_users: Arc::new(StdMutex::new(HashMap::new())),
        }))
    }
}

pub struct SongbirdConnection {
    songbird: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    guild: GuildKey,
    channel: ChannelKey,
    format: PcmFormat,
    /// SSRC -> user id, learned from speaking updates
    ssrc_users: SsrcMap,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn guild(&self) -> GuildKey {
        self.guild
    }

    fn channel(&self) -> ChannelKey {
        self.channel
    }

    async fn is_connected(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }

    async fn start_capture(&self, sink: Arc<AudioSink>) -> Result<(), VoiceError> {
        let mut call = self.call.lock().await;
        if call.current_connection().is_none() {
            return Err(VoiceError::NotConnected);
        }

        call.remove_all_global_events();

        call.add_global_event(
            Event::Core(CoreEvent::SpeakingStateUpdate),
            SpeakerTracker {
                ssrc_users: Arc::clone(&self.ssrc_users),
            },
        );
        call.add_global_event(
            Event::Core(CoreEvent::VoiceTick),
            CaptureReceiver {
                sink,
                attached_at: Instant::now(),
                target: self.format,
                ssrc_users: Arc::clone(&self.ssrc_users),
            },
        );

        debug!(guild = %self.guild, "Capture attached");
        Ok(())
    }

    async fn stop_capture(&self) -> Result<(), VoiceError> {
        self.call.lock().await.remove_all_global_events();
        debug!(guild = %self.guild, "Capture detached");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VoiceError> {
        match self.songbird.remove(GuildId::new(self.guild.0)).await {
            Ok(()) | Err(JoinError::NoCall) => {
                info!(guild = %self.guild, "Left voice channel");
                Ok(())
            }
            Err(e) => Err(VoiceError::Leave(e.to_string())),
        }
    }
}

/// Records which user owns each SSRC.
struct SpeakerTracker {
    ssrc_users: SsrcMap,
}

#[async_trait]
impl VoiceEventHandler for SpeakerTracker {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::SpeakingStateUpdate(Speaking {
            ssrc,
            user_id: Some(user_id),
            ..
        }) = ctx
        {
            debug!("SSRC {} belongs to user {}", ssrc, user_id.0);
            self.ssrc_users
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(*ssrc, user_id.0);
        }
        None
    }
}

/// Feeds decoded voice into one sink.
struct CaptureReceiver {
    sink: Arc<AudioSink>,
    attached_at: Instant,
    target: PcmFormat,
    ssrc_users: SsrcMap,
}

impl CaptureReceiver {
    fn speaker(&self, ssrc: u32) -> SpeakerId {
        let users = self
            .ssrc_users
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match users.get(&ssrc) {
            Some(user) => SpeakerId(*user),
            None => SpeakerId(u64::from(ssrc)),
        }
    }
}

#[async_trait]
impl VoiceEventHandler for CaptureReceiver {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::VoiceTick(tick) = ctx {
            let start_frame = self.target.frames_in(self.attached_at.elapsed());

            for (ssrc, data) in &tick.speaking {
                let Some(decoded) = data.decoded_voice.as_ref() else {
                    continue;
                };
                let samples = audio::convert(decoded, DECODED_FORMAT, self.target);
                self.sink.record(self.speaker(*ssrc), start_frame, samples);
            }
        }
        None
    }
}
