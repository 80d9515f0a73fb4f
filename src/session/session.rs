use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::info;

use super::events::StopReason;
use super::stats::SessionStatus;
use crate::voice::{ChannelKey, GuildKey, VoiceConnection};

/// One guild's recording session.
///
/// Shared between the segment loop, the watchdog and command handlers. The
/// loop owns segment progression; handlers own `running` and removal.
pub struct Session {
    key: GuildKey,

    /// Text channel that receives notifications
    reply_channel: ChannelKey,

    /// Where segment files are written; fixed for the life of the session
    output_dir: PathBuf,

    started_at: DateTime<Utc>,

    /// Live voice link; replaced in place by the watchdog on reconnect
    connection: RwLock<Arc<dyn VoiceConnection>>,

    /// Index of the segment being captured (starts at 1)
    segment_index: AtomicU32,

    segments_saved: AtomicU32,

    segments_failed: AtomicU32,

    is_running: AtomicBool,

    stop_reason: StdMutex<Option<StopReason>>,

    /// Early-exit signal for the segment loop
    cancel: CancellationToken,

    /// Handle for the segment loop task
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        key: GuildKey,
        reply_channel: ChannelKey,
        output_dir: PathBuf,
        connection: Arc<dyn VoiceConnection>,
    ) -> Self {
        Self {
            key,
            reply_channel,
            output_dir,
            started_at: Utc::now(),
            connection: RwLock::new(connection),
            segment_index: AtomicU32::new(1),
            segments_saved: AtomicU32::new(0),
            segments_failed: AtomicU32::new(0),
            is_running: AtomicBool::new(true),
            stop_reason: StdMutex::new(None),
            cancel: CancellationToken::new(),
            loop_handle: Mutex::new(None),
        }
    }

    pub fn key(&self) -> GuildKey {
        self.key
    }

    pub fn reply_channel(&self) -> ChannelKey {
        self.reply_channel
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub async fn connection(&self) -> Arc<dyn VoiceConnection> {
        Arc::clone(&*self.connection.read().await)
    }

    /// Voice channel of the current connection.
    pub async fn voice_channel(&self) -> ChannelKey {
        self.connection.read().await.channel()
    }

    /// Swap in a new connection, returning the old one.
    pub async fn replace_connection(
        &self,
        connection: Arc<dyn VoiceConnection>,
    ) -> Arc<dyn VoiceConnection> {
        let mut guard = self.connection.write().await;
        std::mem::replace(&mut *guard, connection)
    }

    pub fn segment_index(&self) -> u32 {
        self.segment_index.load(Ordering::SeqCst)
    }

    pub fn segments_saved(&self) -> u32 {
        self.segments_saved.load(Ordering::SeqCst)
    }

    pub fn segments_failed(&self) -> u32 {
        self.segments_failed.load(Ordering::SeqCst)
    }

    /// Close the current segment and move to the next index. Returns the new index.
    pub(crate) fn complete_segment(&self, saved: bool) -> u32 {
        if saved {
            self.segments_saved.fetch_add(1, Ordering::SeqCst);
        } else {
            self.segments_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.segment_index.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Mark the session as stopping and wake the segment loop.
    ///
    /// The first reason recorded wins. Returns false if the session was already stopping.
    pub fn request_stop(&self, reason: StopReason) -> bool {
        let first = self.is_running.swap(false, Ordering::SeqCst);
        if first {
            *self
                .stop_reason
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(reason);
            info!(guild = %self.key, "Stop requested: {}", reason);
        }
        self.cancel.cancel();
        first
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self
            .stop_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves once a stop has been requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub(crate) async fn set_loop_handle(&self, handle: JoinHandle<()>) {
        *self.loop_handle.lock().await = Some(handle);
    }

    pub(crate) async fn take_loop_handle(&self) -> Option<JoinHandle<()>> {
        self.loop_handle.lock().await.take()
    }

    pub async fn status(&self) -> SessionStatus {
        let duration = Utc::now().signed_duration_since(self.started_at);

        SessionStatus {
            guild: self.key,
            voice_channel: self.voice_channel().await,
            is_running: self.is_running(),
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            segment_index: self.segment_index(),
            segments_saved: self.segments_saved(),
            segments_failed: self.segments_failed(),
            output_dir: self.output_dir.clone(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("output_dir", &self.output_dir)
            .field("segment_index", &self.segment_index())
            .field("is_running", &self.is_running())
            .finish()
    }
}
