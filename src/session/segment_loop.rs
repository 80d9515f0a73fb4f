// Per-session segment rotation.
//
// Recording -> Rotating -> Recording ... -> Stopped
//
// Each pass attaches a fresh sink, waits for the segment budget in ticks while
// checking that the session is still current, still running and still
// connected, then detaches the sink and hands the capture to the encoder.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::events::{emit, SessionEvent, SessionEventKind, StopReason};
use super::session::Session;
use super::store::SessionStore;
use crate::audio::{AudioSink, CapturedAudio};
use crate::transcode::SegmentEncoder;
use crate::voice::VoiceConnection;

/// Shared dependencies of every segment loop.
pub(crate) struct LoopContext {
    pub store: Arc<SessionStore>,
    pub encoder: Arc<dyn SegmentEncoder>,
    pub config: SessionConfig,
    pub events: mpsc::Sender<SessionEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOutcome {
    /// Segment budget used up with the session healthy
    Elapsed,
    /// Connection dropped mid-segment
    Disconnected,
    /// Session removed or no longer running
    Stopped,
}

impl LoopContext {
    pub(crate) async fn emit(&self, session: &Session, kind: SessionEventKind) {
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

    async fn is_active(&self, session: &Arc<Session>) -> bool {
        session.is_running() && self.store.is_current(session).await
    }

    /// Sleep for `duration` unless a stop is requested first. Returns false on stop.
    async fn pause(&self, session: &Session, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = session.cancelled() => false,
        }
    }

    async fn wait_segment(
        &self,
        session: &Arc<Session>,
        connection: &Arc<dyn VoiceConnection>,
        sink: &AudioSink,
    ) -> WaitOutcome {
        let mut remaining = self.config.segment_length;

        while !remaining.is_zero() {
            if !self.is_active(session).await {
                return WaitOutcome::Stopped;
            }
            if !connection.is_connected().await {
                return WaitOutcome::Disconnected;
            }

            let step = remaining.min(self.config.tick);
            if !self.pause(session, step).await {
                return WaitOutcome::Stopped;
            }
            remaining = remaining.saturating_sub(step);
            debug!(
                guild = %session.key(),
                "{:.0}s left in segment, {} bytes captured",
                remaining.as_secs_f64(),
                sink.bytes_captured()
            );
        }

        if !self.is_active(session).await {
            return WaitOutcome::Stopped;
        }

        WaitOutcome::Elapsed
    }

    /// Transcode `captured` as segment `index` and advance the session, whatever the outcome.
    async fn rotate(&self, session: &Session, index: u32, captured: CapturedAudio) {
        let path = self.config.segment_path(session.output_dir(), index);
        info!(guild = %session.key(), segment = index, "Closing segment: {}", path.display());

        let result = self.encoder.transcode(captured, &path).await;
        let next = session.complete_segment(result.is_ok());

        match result {
            Ok(report) => {
                info!(guild = %session.key(), segment = index, "Segment saved ({} bytes)", report.output_bytes);
                self.emit(session, SessionEventKind::SegmentSaved { index, report })
                    .await;
            }
            Err(e) => {
                if e.is_capture_rejection() {
                    warn!(guild = %session.key(), segment = index, "Segment skipped: {}", e);
                } else {
                    error!(guild = %session.key(), segment = index, "Segment failed: {}", e);
                }
                self.emit(
                    session,
                    SessionEventKind::SegmentFailed {
                        index,
                        error: e.to_string(),
                    },
                )
                .await;
            }
        }

        debug!(guild = %session.key(), "Next segment: {}", next);
    }

    /// End the session from inside the loop.
    async fn end_session(
        &self,
        session: &Arc<Session>,
        reason: StopReason,
        detail: Option<String>,
    ) {
        session.request_stop(reason);
        self.store.remove_if(session).await;

        let connection = session.connection().await;
        if let Err(e) = connection.stop_capture().await {
            warn!(guild = %session.key(), "Failed to stop capture: {}", e);
        }
        if let Err(e) = connection.disconnect().await {
            warn!(guild = %session.key(), "Failed to disconnect: {}", e);
        }

        self.emit(session, SessionEventKind::SessionEnded { reason, detail })
            .await;
    }
}

/// Drive `session` until it stops.
pub(crate) async fn run(ctx: Arc<LoopContext>, session: Arc<Session>) {
    info!(guild = %session.key(), "Segment loop started");

    let max_attempts = ctx.config.retry.max_attempts;
    let mut failures: u32 = 0;

    loop {
        if !ctx.is_active(&session).await {
            break;
        }

        let connection = session.connection().await;

        if !connection.is_connected().await {
            debug!(guild = %session.key(), "Voice connection down, waiting for reconnect");
            if !ctx.pause(&session, ctx.config.tick).await {
                break;
            }
            continue;
        }

        let index = session.segment_index();
        let sink = Arc::new(AudioSink::new(ctx.config.format));

        if let Err(e) = connection.start_capture(Arc::clone(&sink)).await {
            failures += 1;
            warn!(
                guild = %session.key(),
                segment = index,
                "Failed to start capture (attempt {}/{}): {}",
                failures, max_attempts, e
            );

            if failures >= max_attempts {
                error!(guild = %session.key(), "Giving up after {} failed attempts", failures);
                ctx.end_session(&session, StopReason::RetriesExhausted, Some(e.to_string()))
                    .await;
                break;
            }

            ctx.emit(
                &session,
                SessionEventKind::CaptureRetry {
                    attempt: failures,
                    max_attempts,
                    error: e.to_string(),
                },
            )
            .await;

            if !ctx.pause(&session, ctx.config.retry.backoff(failures)).await {
                break;
            }
            continue;
        }

        failures = 0;
        info!(guild = %session.key(), segment = index, "Recording segment");

        let outcome = ctx.wait_segment(&session, &connection, &sink).await;

        if let Err(e) = connection.stop_capture().await {
            warn!(guild = %session.key(), "Failed to stop capture: {}", e);
        }
        let captured = sink.detach();

        match outcome {
            WaitOutcome::Elapsed => ctx.rotate(&session, index, captured).await,
            WaitOutcome::Disconnected => {
                warn!(guild = %session.key(), segment = index, "Connection dropped, closing partial segment");
                ctx.emit(&session, SessionEventKind::ConnectionInterrupted { index })
                    .await;
                ctx.rotate(&session, index, captured).await;
            }
            WaitOutcome::Stopped => {
                match session.stop_reason() {
                    Some(reason) if reason.flushes_partial() => {
                        ctx.rotate(&session, index, captured).await;
                    }
                    _ => info!(
                        guild = %session.key(),
                        segment = index,
                        "Discarding partial segment ({} bytes)",
                        captured.total_bytes()
                    ),
                }
                break;
            }
        }
    }

    info!(guild = %session.key(), "Segment loop stopped");
}
