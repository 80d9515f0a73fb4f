//! Discord front end
//!
//! - `voice`: songbird-backed `VoiceGateway` / `VoiceConnection`
//! - `handler`: serenity event handler for commands and voice-state changes
//!
//! `run` wires both to a `SessionManager` and drives the gateway until shutdown.

mod handler;
mod voice;

pub use handler::Handler;
pub use voice::{SongbirdConnection, SongbirdGateway};

use std::sync::Arc;

use anyhow::{Context, Result};
use serenity::http::Http;
use serenity::model::id::ChannelId;
use serenity::prelude::GatewayIntents;
use serenity::Client;
use songbird::driver::DecodeMode;
use songbird::{SerenityInit, Songbird};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::session::{SessionConfig, SessionEvent, SessionManager};
use crate::transcode::SegmentEncoder;

/// Gateway intents the bot needs: guild/voice caches, message content for
/// commands and members for display names.
pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
}

/// Connect to Discord and serve commands until `shutdown` fires or the client
/// stops. Active recordings are flushed before returning.
pub async fn run(
    config: &Config,
    encoder: Arc<dyn SegmentEncoder>,
    shutdown: CancellationToken,
) -> Result<()> {
    let songbird = Songbird::serenity_from_config(
        songbird::Config::default().decode_mode(DecodeMode::Decode),
    );

    let session_config = SessionConfig::from(config);
    let gateway = Arc::new(SongbirdGateway::new(
        Arc::clone(&songbird),
        session_config.format,
    ));

    let (manager, events) = SessionManager::new(session_config, gateway, encoder);
    let manager = Arc::new(manager);

    let handler = Handler::new(Arc::clone(&manager), config.discord.command_prefix.clone());

    let mut client = Client::builder(&config.discord.token, intents())
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await
        .context("Failed to create Discord client")?;

    let forwarder = tokio::spawn(forward_events(Arc::clone(&client.http), events));
    let watchdog = manager.spawn_watchdog(shutdown.child_token());
    let shard_manager = Arc::clone(&client.shard_manager);

    info!("Connecting to Discord");

    let outcome = tokio::select! {
        result = client.start() => result.context("Discord client stopped"),
        _ = shutdown.cancelled() => {
            info!("Shutdown requested");
            Ok(())
        }
    };

    shutdown.cancel();

    for summary in manager.shutdown().await {
        info!(
            guild = %summary.guild,
            "Closed {} segment(s): {}",
            summary.segments_closed,
            summary.output_dir.display()
        );
    }

    if let Err(e) = watchdog.await {
        error!("Watchdog task failed: {}", e);
    }
    shard_manager.shutdown_all().await;
    forwarder.abort();

    outcome
}

/// Post session notifications to the text channel each session was started from.
pub async fn forward_events(http: Arc<Http>, mut events: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        let channel = ChannelId::new(event.reply_channel.0);
        let text = handler::truncate(event.message());

        if let Err(e) = channel.say(&http, text).await {
            error!(guild = %event.guild, "Failed to post notification: {}", e);
        }
    }
}
