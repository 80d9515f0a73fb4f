// Integration tests for the recording session lifecycle
//
// The voice gateway and encoder are in-memory fakes; the clock is paused so
// ten-minute segments run instantly.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::*;
use tempfile::TempDir;
use voice_recorder::{
    ChannelKey, GuildKey, RecorderError, SessionEventKind, SessionManager, StopReason,
    TranscodeError, Transcoder, VoiceConnection,
};

fn manager_with(
    root: &TempDir,
    gateway: &Arc<FakeGateway>,
    encoder: &Arc<FakeEncoder>,
) -> (
    SessionManager,
    tokio::sync::mpsc::Receiver<voice_recorder::SessionEvent>,
) {
    SessionManager::new(
        session_config(root.path()),
        Arc::clone(gateway) as _,
        Arc::clone(encoder) as _,
    )
}

#[tokio::test(start_paused = true)]
async fn test_first_segment_rotates_after_segment_length() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, mut events) = manager_with(&root, &gateway, &encoder);

    let session = manager.start(origin(GUILD, Some(VOICE))).await?;
    assert!(session.output_dir().starts_with(root.path()));
    assert!(session
        .output_dir()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("1001_"));

    tokio::time::sleep(Duration::from_secs(605)).await;

    let calls = encoder.calls();
    assert_eq!(calls.len(), 1, "Exactly one segment should be closed");
    assert_eq!(calls[0].output, session.output_dir().join("segment_1.mp3"));
    assert_eq!(calls[0].speakers, 2);
    assert_eq!(calls[0].bytes, 2 * 96_000 * 2);
    assert!(calls[0].output.exists());

    assert_eq!(session.segment_index(), 2);
    assert!(manager.store().contains(GUILD).await);

    let kinds = drain(&mut events);
    assert!(matches!(
        kinds.as_slice(),
        [SessionEventKind::SegmentSaved { index: 1, .. }]
    ));

    manager.stop(GUILD).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_second_record_is_rejected_and_changes_nothing() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, _events) = manager_with(&root, &gateway, &encoder);

    let session = manager.start(origin(GUILD, Some(VOICE))).await?;
    let before = session.status().await;

    let err = manager
        .start(origin(GUILD, Some(ChannelKey(2002))))
        .await
        .unwrap_err();
    assert!(matches!(err, RecorderError::AlreadyRecording));

    let current = manager.store().get(GUILD).await.unwrap();
    assert!(Arc::ptr_eq(&current, &session));

    let after = current.status().await;
    assert_eq!(after.voice_channel, VOICE);
    assert_eq!(after.output_dir, before.output_dir);
    assert_eq!(after.segment_index, before.segment_index);
    assert_eq!(gateway.connect_count(), 1);

    manager.stop(GUILD).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_record_outside_voice_channel_creates_nothing() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, _events) = manager_with(&root, &gateway, &encoder);

    let err = manager.start(origin(GUILD, None)).await.unwrap_err();
    assert!(matches!(err, RecorderError::NotInVoiceChannel));

    assert!(manager.store().is_empty().await);
    assert_eq!(gateway.connect_count(), 0);
    assert_eq!(std::fs::read_dir(root.path())?.count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_join_leaves_no_directory() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    gateway.set_fail_connect(true);
    let encoder = FakeEncoder::new();
    let (manager, _events) = manager_with(&root, &gateway, &encoder);

    let err = manager.start(origin(GUILD, Some(VOICE))).await.unwrap_err();
    assert!(matches!(err, RecorderError::Voice(_)));

    let err = manager
        .test_record(origin(GUILD, Some(VOICE)))
        .await
        .unwrap_err();
    assert!(matches!(err, RecorderError::Voice(_)));

    assert!(manager.store().is_empty().await);
    assert_eq!(std::fs::read_dir(root.path())?.count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unwritable_recordings_path_disconnects() -> Result<()> {
    let root = TempDir::new()?;
    let blocker = root.path().join("not-a-dir");
    std::fs::write(&blocker, b"")?;

    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, _events) = SessionManager::new(
        session_config(&blocker),
        Arc::clone(&gateway) as _,
        Arc::clone(&encoder) as _,
    );

    let err = manager.start(origin(GUILD, Some(VOICE))).await.unwrap_err();
    assert!(matches!(err, RecorderError::Io(_)));
    assert_eq!(gateway.connect_count(), 1);
    assert_eq!(gateway.last().disconnect_count(), 1);
    assert!(manager.store().is_empty().await);

    // The guild is not left marked busy
    manager.ensure_idle(GUILD).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_ensure_idle_tracks_recording() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, _events) = manager_with(&root, &gateway, &encoder);

    manager.ensure_idle(GUILD).await?;

    manager.start(origin(GUILD, Some(VOICE))).await?;
    assert!(matches!(
        manager.ensure_idle(GUILD).await,
        Err(RecorderError::AlreadyRecording)
    ));
    // Other guilds are unaffected
    manager.ensure_idle(GuildKey(1002)).await?;

    manager.stop(GUILD).await?;
    manager.ensure_idle(GUILD).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_when_not_recording() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, _events) = manager_with(&root, &gateway, &encoder);

    let err = manager.stop(GUILD).await.unwrap_err();
    assert!(matches!(err, RecorderError::NotRecording));
    assert!(manager.status(GUILD).await.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_flushes_current_segment() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, _events) = manager_with(&root, &gateway, &encoder);

    let session = manager.start(origin(GUILD, Some(VOICE))).await?;

    // Two full segments, then part of the third
    tokio::time::sleep(Duration::from_secs(1250)).await;
    assert_eq!(session.segment_index(), 3);

    let summary = manager.stop(GUILD).await?;
    assert_eq!(summary.segments_closed, 3);
    assert_eq!(summary.segments_saved, 3);
    assert_eq!(summary.segments_failed, 0);

    assert_eq!(
        encoder.outputs(),
        vec!["segment_1.mp3", "segment_2.mp3", "segment_3.mp3"]
    );
    assert!(session.output_dir().join("segment_3.mp3").exists());

    assert!(!manager.store().contains(GUILD).await);
    assert!(!session.is_running());
    assert_eq!(session.stop_reason(), Some(StopReason::UserRequested));

    let connection = gateway.last();
    assert_eq!(connection.disconnect_count(), 1);
    assert!(!connection.capturing());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_status_reports_progress() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, _events) = manager_with(&root, &gateway, &encoder);

    manager.start(origin(GUILD, Some(VOICE))).await?;
    tokio::time::sleep(Duration::from_secs(650)).await;

    let status = manager.status(GUILD).await.unwrap();
    assert!(status.is_running);
    assert_eq!(status.guild, GUILD);
    assert_eq!(status.voice_channel, VOICE);
    assert_eq!(status.segment_index, 2);
    assert_eq!(status.segments_saved, 1);

    manager.stop(GUILD).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_segment_still_advances_index() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    encoder.set_fail(true);
    let (manager, mut events) = manager_with(&root, &gateway, &encoder);

    let session = manager.start(origin(GUILD, Some(VOICE))).await?;
    tokio::time::sleep(Duration::from_secs(605)).await;

    assert_eq!(session.segment_index(), 2);
    assert_eq!(session.segments_failed(), 1);
    assert!(session.is_running(), "A failed segment must not end the session");

    let kinds = drain(&mut events);
    assert!(matches!(
        kinds.as_slice(),
        [SessionEventKind::SegmentFailed { index: 1, .. }]
    ));

    manager.stop(GUILD).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_silent_segment_never_reaches_encoder_binary() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(Vec::new());
    let transcoder = Arc::new(Transcoder::new(
        voice_recorder::config::EncoderConfig {
            ffmpeg_path: "/nonexistent/ffmpeg".into(),
            ..Default::default()
        },
        Default::default(),
    ));
    let (manager, mut events) = SessionManager::new(
        session_config(root.path()),
        Arc::clone(&gateway) as _,
        transcoder,
    );

    let session = manager.start(origin(GUILD, Some(VOICE))).await?;
    tokio::time::sleep(Duration::from_secs(605)).await;

    assert_eq!(session.segment_index(), 2);
    assert!(!session.output_dir().join("segment_1.mp3").exists());

    let kinds = drain(&mut events);
    match kinds.as_slice() {
        [SessionEventKind::SegmentFailed { index: 1, error }] => {
            assert_eq!(error, &TranscodeError::EmptyCapture.to_string());
        }
        other => panic!("unexpected events: {:?}", other),
    }

    manager.stop(GUILD).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_restores_dropped_connection() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, mut events) = manager_with(&root, &gateway, &encoder);

    let session = manager.start(origin(GUILD, Some(VOICE))).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;

    gateway.connection(0).drop_link();
    tokio::time::sleep(Duration::from_secs(30)).await;

    // The partial segment is closed when the link drops
    assert_eq!(encoder.outputs(), vec!["segment_1.mp3"]);
    assert_eq!(session.segment_index(), 2);

    let report = manager.watchdog().sweep().await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.reconnected, 1);
    assert_eq!(report.ended, 0);
    assert_eq!(gateway.connect_count(), 2);

    tokio::time::sleep(Duration::from_secs(20)).await;

    let replacement = gateway.connection(1);
    assert_eq!(replacement.channel(), VOICE);
    assert_eq!(replacement.capture_count(), 1);
    assert!(session.is_running());
    assert!(manager.store().contains(GUILD).await);

    let kinds = drain(&mut events);
    assert!(kinds
        .iter()
        .any(|k| matches!(k, SessionEventKind::ConnectionInterrupted { index: 1 })));
    assert!(kinds.iter().any(|k| matches!(k, SessionEventKind::Reconnected)));

    manager.stop(GUILD).await?;
    assert_eq!(replacement.disconnect_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_ends_session_when_reconnect_fails() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, mut events) = manager_with(&root, &gateway, &encoder);

    let session = manager.start(origin(GUILD, Some(VOICE))).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;

    gateway.connection(0).drop_link();
    gateway.set_fail_connect(true);
    tokio::time::sleep(Duration::from_secs(30)).await;

    let report = manager.watchdog().sweep().await;
    assert_eq!(report.reconnected, 0);
    assert_eq!(report.ended, 1);

    tokio::time::sleep(Duration::from_secs(20)).await;

    assert!(!manager.store().contains(GUILD).await);
    assert!(!session.is_running());
    assert_eq!(session.stop_reason(), Some(StopReason::ReconnectFailed));

    let kinds = drain(&mut events);
    let detail = kinds.iter().find_map(|k| match k {
        SessionEventKind::SessionEnded {
            reason: StopReason::ReconnectFailed,
            detail,
        } => detail.clone(),
        _ => None,
    });
    assert!(detail.unwrap().contains("gateway unavailable"));

    // The guild can record again
    gateway.set_fail_connect(false);
    manager.start(origin(GUILD, Some(VOICE))).await?;
    manager.stop(GUILD).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_skips_healthy_sessions() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, _events) = manager_with(&root, &gateway, &encoder);

    manager.start(origin(GUILD, Some(VOICE))).await?;
    manager.start(origin(GuildKey(1002), Some(ChannelKey(2002)))).await?;

    let report = manager.watchdog().sweep().await;
    assert_eq!(report.checked, 2);
    assert_eq!(report.reconnected, 0);
    assert_eq!(report.ended, 0);
    assert_eq!(gateway.connect_count(), 2);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_empty_channel_stops_recording() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, mut events) = manager_with(&root, &gateway, &encoder);

    let session = manager.start(origin(GUILD, Some(VOICE))).await?;
    tokio::time::sleep(Duration::from_secs(100)).await;

    // Someone is still there
    assert!(manager.handle_member_left(GUILD, VOICE, 1).await.is_none());
    // A different channel emptied
    assert!(manager
        .handle_member_left(GUILD, ChannelKey(9999), 0)
        .await
        .is_none());
    assert!(manager.store().contains(GUILD).await);

    let summary = manager.handle_member_left(GUILD, VOICE, 0).await.unwrap();
    assert_eq!(summary.segments_closed, 1);
    assert_eq!(encoder.outputs(), vec!["segment_1.mp3"]);

    assert!(!manager.store().contains(GUILD).await);
    assert_eq!(session.stop_reason(), Some(StopReason::ChannelEmpty));
    assert_eq!(gateway.last().disconnect_count(), 1);

    let kinds = drain(&mut events);
    assert!(kinds.iter().any(|k| matches!(
        k,
        SessionEventKind::SessionEnded {
            reason: StopReason::ChannelEmpty,
            detail: None,
        }
    )));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_capture_failures_end_session_after_max_attempts() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    gateway.set_fail_capture(true);
    let encoder = FakeEncoder::new();
    let (manager, mut events) = manager_with(&root, &gateway, &encoder);

    let session = manager.start(origin(GUILD, Some(VOICE))).await?;

    // Backoff is 2s then 4s before the third and final attempt
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(!manager.store().contains(GUILD).await);
    assert_eq!(session.stop_reason(), Some(StopReason::RetriesExhausted));
    assert_eq!(session.segment_index(), 1);
    assert!(encoder.calls().is_empty());
    assert_eq!(gateway.last().disconnect_count(), 1);

    let kinds = drain(&mut events);
    let retries = kinds
        .iter()
        .filter(|k| matches!(k, SessionEventKind::CaptureRetry { .. }))
        .count();
    assert_eq!(retries, 2);
    assert!(matches!(
        kinds.last(),
        Some(SessionEventKind::SessionEnded {
            reason: StopReason::RetriesExhausted,
            detail: Some(_),
        })
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_record_produces_report() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, _events) = manager_with(&root, &gateway, &encoder);

    let report = manager.test_record(origin(GUILD, Some(VOICE))).await?;

    assert!(report.succeeded());
    assert_eq!(report.speakers.len(), 2);
    assert!(report.output.starts_with(root.path().join("test")));
    assert!(report.output.exists());

    // Test captures leave no session behind
    assert!(manager.store().is_empty().await);
    assert_eq!(gateway.last().disconnect_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_record_rejected_while_recording() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, _events) = manager_with(&root, &gateway, &encoder);

    manager.start(origin(GUILD, Some(VOICE))).await?;

    let err = manager
        .test_record(origin(GUILD, Some(VOICE)))
        .await
        .unwrap_err();
    assert!(matches!(err, RecorderError::AlreadyRecording));
    assert_eq!(gateway.connect_count(), 1);

    manager.stop(GUILD).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_every_session() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, _events) = manager_with(&root, &gateway, &encoder);

    manager.start(origin(GUILD, Some(VOICE))).await?;
    manager.start(origin(GuildKey(1002), Some(ChannelKey(2002)))).await?;
    tokio::time::sleep(Duration::from_secs(30)).await;

    let summaries = manager.shutdown().await;
    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.segments_saved == 1));
    assert_eq!(encoder.calls().len(), 2);
    assert!(manager.store().is_empty().await);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_guilds_record_independently() -> Result<()> {
    let root = TempDir::new()?;
    let gateway = FakeGateway::with_feed(two_speakers());
    let encoder = FakeEncoder::new();
    let (manager, _events) = manager_with(&root, &gateway, &encoder);

    let first = manager.start(origin(GUILD, Some(VOICE))).await?;
    tokio::time::sleep(Duration::from_secs(300)).await;
    let second = manager
        .start(origin(GuildKey(1002), Some(ChannelKey(2002))))
        .await?;
    tokio::time::sleep(Duration::from_secs(305)).await;

    assert_eq!(first.segment_index(), 2);
    assert_eq!(second.segment_index(), 1);
    assert_ne!(first.output_dir(), second.output_dir());

    manager.stop(GUILD).await?;
    assert!(second.is_running());
    manager.stop(GuildKey(1002)).await?;
    Ok(())
}
