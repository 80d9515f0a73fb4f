use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use voice_recorder::{discord, Config, Transcoder};

#[derive(Parser, Debug)]
#[command(name = "voice-recorder", about = "Discord voice channel recorder")]
struct Args {
    /// Config file path, without extension
    #[arg(long, default_value = "config/voice-recorder")]
    config: String,

    /// Check that the encoder runs, then exit
    #[arg(long)]
    check_encoder: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    let file_appender =
        tracing_appender::rolling::never(&cfg.logging.directory, &cfg.logging.file_name);
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    info!("Voice Recorder v{}", env!("CARGO_PKG_VERSION"));
    info!("Recordings: {}", cfg.recording.recordings_path.display());
    info!(
        "Segments: {}s, format: {}, {} Hz x{}",
        cfg.recording.segment_length_secs,
        cfg.recording.format.extension(),
        cfg.recording.sample_rate,
        cfg.recording.channels
    );

    let transcoder = Transcoder::new(cfg.encoder.clone(), cfg.recording.merge)
        .with_debug_dir(cfg.recording.debug_dir());

    match transcoder.version().await {
        Ok(version) => info!("Encoder: {}", version),
        Err(e) if args.check_encoder => return Err(e).context("Encoder check failed"),
        Err(e) => warn!(
            "Encoder {} not usable, segments will fail until it is installed: {}",
            transcoder.program().display(),
            e
        ),
    }

    if args.check_encoder {
        return Ok(());
    }

    if cfg.discord.token.is_empty() {
        bail!("No Discord token configured (set DISCORD_TOKEN or discord.token)");
    }

    std::fs::create_dir_all(&cfg.recording.recordings_path).with_context(|| {
        format!(
            "Failed to create recordings directory {}",
            cfg.recording.recordings_path.display()
        )
    })?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    if let Err(e) = discord::run(&cfg, Arc::new(transcoder), shutdown).await {
        error!("Bot stopped with error: {:#}", e);
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
