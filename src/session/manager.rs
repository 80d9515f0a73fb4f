use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::Local;
use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::config::SessionConfig;
use super::events::{SessionEvent, SessionEventKind, StopReason};
use super::segment_loop::{self, LoopContext};
use super::session::Session;
use super::stats::{SessionStatus, StopSummary, TestRecordReport};
use super::store::SessionStore;
use super::watchdog::Watchdog;
use crate::audio::AudioSink;
use crate::error::{RecorderError, Result};
use crate::transcode::SegmentEncoder;
use crate::voice::{ChannelKey, GuildKey, VoiceConnection, VoiceGateway};

/// Capacity of the notification channel
const EVENT_BUFFER: usize = 100;

/// Where a command came from.
#[derive(Debug, Clone, Copy)]
pub struct CommandOrigin {
    pub guild: GuildKey,
    /// The requester's current voice channel, if any
    pub voice_channel: Option<ChannelKey>,
    /// Text channel the command was sent in
    pub reply_channel: ChannelKey,
}

/// Owns every recording session and their lifecycle.
pub struct SessionManager {
    store: Arc<SessionStore>,
    gateway: Arc<dyn VoiceGateway>,
    ctx: Arc<LoopContext>,

    /// Serialises start/stop/test so two requests for one guild cannot race
    lifecycle: Mutex<()>,

    /// Guilds with a `test_record` capture in progress
    testing: StdMutex<HashSet<GuildKey>>,
}

impl SessionManager {
    /// Create a manager and the receiver for its notifications.
    pub fn new(
        config: SessionConfig,
        gateway: Arc<dyn VoiceGateway>,
        encoder: Arc<dyn SegmentEncoder>,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let store = Arc::new(SessionStore::new());

        let ctx = Arc::new(LoopContext {
            store: Arc::clone(&store),
            encoder,
            config,
            events: events_tx,
        });

        let manager = Self {
            store,
            gateway,
            ctx,
            lifecycle: Mutex::new(()),
            testing: StdMutex::new(HashSet::new()),
        };

        (manager, events_rx)
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.ctx.config
    }

    fn is_testing(&self, guild: GuildKey) -> bool {
        self.testing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&guild)
    }

    /// Fail with `AlreadyRecording` if `guild` has a session or a test capture running.
    pub async fn ensure_idle(&self, guild: GuildKey) -> Result<()> {
        if self.store.contains(guild).await || self.is_testing(guild) {
            return Err(RecorderError::AlreadyRecording);
        }
        Ok(())
    }

    /// Start recording the requester's voice channel.
    pub async fn start(&self, origin: CommandOrigin) -> Result<Arc<Session>> {
        let voice_channel = origin.voice_channel.ok_or(RecorderError::NotInVoiceChannel)?;

        let _guard = self.lifecycle.lock().await;
        self.ensure_idle(origin.guild).await?;

        let connection = self.gateway.connect(origin.guild, voice_channel).await?;

        let output_dir = self.ctx.config.session_dir(origin.guild, Local::now());
        prepare_dir(&connection, &output_dir).await?;

        let session = Session::new(
            origin.guild,
            origin.reply_channel,
            output_dir,
            connection,
        );
        let session = self.store.create(session).await?;

        let handle = tokio::spawn(segment_loop::run(
            Arc::clone(&self.ctx),
            Arc::clone(&session),
        ));
        session.set_loop_handle(handle).await;

        info!(
            guild = %origin.guild,
            channel = %voice_channel,
            "Recording started: {}",
            session.output_dir().display()
        );

        Ok(session)
    }

    /// Stop recording, transcoding the segment in progress.
    pub async fn stop(&self, guild: GuildKey) -> Result<StopSummary> {
        let _guard = self.lifecycle.lock().await;

        let session = self
            .store
            .get(guild)
            .await
            .ok_or(RecorderError::NotRecording)?;

        Ok(self.end(&session, StopReason::UserRequested).await)
    }

    pub async fn status(&self, guild: GuildKey) -> Option<SessionStatus> {
        match self.store.get(guild).await {
            Some(session) => Some(session.status().await),
            None => None,
        }
    }

    /// React to a member leaving `channel`. Ends the guild's session when no
    /// non-bot members remain in the channel it records.
    pub async fn handle_member_left(
        &self,
        guild: GuildKey,
        channel: ChannelKey,
        remaining_members: usize,
    ) -> Option<StopSummary> {
        if remaining_members > 0 {
            return None;
        }

        let _guard = self.lifecycle.lock().await;

        let session = self.store.get(guild).await?;
        if session.voice_channel().await != channel {
            return None;
        }

        info!(guild = %guild, channel = %channel, "Everyone left, stopping recording");

        let reason = StopReason::ChannelEmpty;
        let summary = self.end(&session, reason).await;
        self.ctx
            .emit(
                &session,
                SessionEventKind::SessionEnded {
                    reason,
                    detail: None,
                },
            )
            .await;

        Some(summary)
    }

    /// Stop `session`: signal the loop, stop capture, wait for the final
    /// segment, disconnect and remove it from the store.
    async fn end(&self, session: &Arc<Session>, reason: StopReason) -> StopSummary {
        session.request_stop(reason);

        if let Err(e) = session.connection().await.stop_capture().await {
            warn!(guild = %session.key(), "Failed to stop capture: {}", e);
        }

        if let Some(handle) = session.take_loop_handle().await {
            if let Err(e) = handle.await {
                error!(guild = %session.key(), "Segment loop panicked: {}", e);
            }
        }

        // The watchdog may have swapped the connection while we waited
        if let Err(e) = session.connection().await.disconnect().await {
            warn!(guild = %session.key(), "Failed to disconnect: {}", e);
        }

        self.store.remove_if(session).await;

        let status = session.status().await;
        info!(guild = %session.key(), "Recording stopped ({})", reason);

        StopSummary {
            guild: session.key(),
            output_dir: status.output_dir,
            segments_closed: status.segment_index - 1,
            segments_saved: status.segments_saved,
            segments_failed: status.segments_failed,
            duration_secs: status.duration_secs,
        }
    }

    /// Fixed-length diagnostic capture into the test directory.
    pub async fn test_record(&self, origin: CommandOrigin) -> Result<TestRecordReport> {
        let voice_channel = origin.voice_channel.ok_or(RecorderError::NotInVoiceChannel)?;

        let connection = {
            let _guard = self.lifecycle.lock().await;
            self.ensure_idle(origin.guild).await?;

            let connection = self.gateway.connect(origin.guild, voice_channel).await?;
            prepare_dir(&connection, &self.ctx.config.test_dir()).await?;

            self.testing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(origin.guild);
            connection
        };

        let result = self.run_test_capture(&connection).await;

        if let Err(e) = connection.disconnect().await {
            warn!(guild = %origin.guild, "Failed to disconnect after test: {}", e);
        }
        self.testing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&origin.guild);

        result
    }

    async fn run_test_capture(
        &self,
        connection: &Arc<dyn VoiceConnection>,
    ) -> Result<TestRecordReport> {
        let config = &self.ctx.config;
        let output = config.test_path(Local::now());
        let sink = Arc::new(AudioSink::new(config.format));

        connection.start_capture(Arc::clone(&sink)).await?;
        info!(
            guild = %connection.guild(),
            "Test recording for {}s",
            config.test_duration.as_secs()
        );

        tokio::time::sleep(config.test_duration).await;

        if let Err(e) = connection.stop_capture().await {
            warn!(guild = %connection.guild(), "Failed to stop test capture: {}", e);
        }

        let captured = sink.detach();
        let speakers = captured.speaker_sizes();

        let result = self
            .ctx
            .encoder
            .transcode(captured, &output)
            .await
            .map_err(|e| e.to_string());

        match &result {
            Ok(report) => info!("Test recording saved: {} ({} bytes)", report.output.display(), report.output_bytes),
            Err(e) => error!("Test recording failed: {}", e),
        }

        Ok(TestRecordReport {
            output,
            speakers,
            result,
        })
    }

    /// Build the connection watchdog for this manager's sessions.
    pub fn watchdog(&self) -> Watchdog {
        Watchdog::new(
            Arc::clone(&self.store),
            Arc::clone(&self.gateway),
            self.ctx.events.clone(),
            self.ctx.config.watchdog_interval,
        )
    }

    pub fn spawn_watchdog(&self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.watchdog().run(cancel))
    }

    /// Stop every session, flushing their current segments.
    pub async fn shutdown(&self) -> Vec<StopSummary> {
        let _guard = self.lifecycle.lock().await;

        let sessions = self.store.sessions().await;
        info!("Shutting down {} active session(s)", sessions.len());

        join_all(
            sessions
                .iter()
                .map(|session| self.end(session, StopReason::Shutdown)),
        )
        .await
    }
}

/// Create `dir` for a freshly joined connection, leaving the channel if that fails.
async fn prepare_dir(connection: &Arc<dyn VoiceConnection>, dir: &Path) -> Result<()> {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        error!("Failed to create {}: {}", dir.display(), e);
        if let Err(e) = connection.disconnect().await {
            warn!(guild = %connection.guild(), "Failed to disconnect: {}", e);
        }
        return Err(e.into());
    }
    Ok(())
}
