use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::{emit, SessionEvent, SessionEventKind, StopReason};
use super::session::Session;
use super::store::SessionStore;
use crate::error::RecorderError;
use crate::voice::VoiceGateway;

/// Counts from one sweep over the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub reconnected: usize,
    pub ended: usize,
}

/// Periodically restores dropped voice connections.
///
/// Each sweep gives a disconnected session exactly one reconnect attempt; if
/// that fails the session is ended and removed.
pub struct Watchdog {
    store: Arc<SessionStore>,
    gateway: Arc<dyn VoiceGateway>,
    events: mpsc::Sender<SessionEvent>,
    interval: Duration,
}

impl Watchdog {
    pub fn new(
        store: Arc<SessionStore>,
        gateway: Arc<dyn VoiceGateway>,
        events: mpsc::Sender<SessionEvent>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            events,
            interval,
        }
    }

    /// Sweep every `interval` until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Connection watchdog started ({}s interval)", self.interval.as_secs());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Connection watchdog shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    debug!(
                        checked = report.checked,
                        reconnected = report.reconnected,
                        ended = report.ended,
                        "Watchdog sweep complete"
                    );
                }
            }
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for session in self.store.sessions().await {
            if !session.is_running() {
                continue;
            }
            report.checked += 1;

            let connection = session.connection().await;
            if connection.is_connected().await {
                continue;
            }

            warn!(guild = %session.key(), "Voice connection lost, reconnecting");

            match self
                .gateway
                .connect(session.key(), connection.channel())
                .await
            {
                Ok(new_connection) => {
                    session.replace_connection(new_connection).await;
                    info!(guild = %session.key(), channel = %connection.channel(), "Reconnected");
                    report.reconnected += 1;
                    self.notify(&session, SessionEventKind::Reconnected).await;
                }
                Err(e) => {
                    let err = RecorderError::ReconnectFailed(e);
                    error!(guild = %session.key(), "{}", err);
                    self.end(&session, err).await;
                    report.ended += 1;
                }
            }
        }

        report
    }

    async fn end(&self, session: &Arc<Session>, cause: RecorderError) {
        let reason = StopReason::ReconnectFailed;
        session.request_stop(reason);
        self.store.remove_if(session).await;

        if let Err(e) = session.connection().await.disconnect().await {
            debug!(guild = %session.key(), "Disconnect after failed reconnect: {}", e);
        }

        self.notify(
            session,
            SessionEventKind::SessionEnded {
                reason,
                detail: Some(cause.to_string()),
            },
        )
        .await;
    }

    async fn notify(&self, session: &Session, kind: SessionEventKind) {
        emit(
            &self.events,
            SessionEvent {
                guild: session.key(),
                reply_channel: session.reply_channel(),
                kind,
            },
        )
        .await;
    }
}
