use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use copilot_live::audio::{AudioSource, AudioSourceFactory, CaptureFactory};
use copilot_live::events::{BroadcastSink, EventSink, FanoutSink, LogSink};
use copilot_live::llm::{provider_from_settings, LlmService};
use copilot_live::screenshot::{FileScreenshotProvider, NoScreenshotProvider, ScreenshotProvider};
use copilot_live::{
    create_router, spawn_config_supervisor, AppState, Config, ConfigStore, LiveSessionManager,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "copilot-live", version, about = "Live interview copilot session service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API and the live session manager
    Serve(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Config file, with or without extension
    #[arg(long, default_value = "config/copilot-live")]
    config: String,

    /// Replay a WAV file instead of capturing the input device
    #[arg(long)]
    audio_file: Option<PathBuf>,

    /// Loop the WAV file
    #[arg(long, requires = "audio_file")]
    loop_audio: bool,

    /// Image served for the screenshot tool
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Start the live session right away
    #[arg(long)]
    autostart: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let cfg = Config::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config))?;

    info!("Copilot Live v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let store = Arc::new(ConfigStore::new(cfg.settings.clone()));
    let provider = provider_from_settings(&cfg.settings)
        .await
        .context("Failed to create LLM provider")?;
    let llm = Arc::new(LlmService::new(provider));

    let source = match args.audio_file {
        Some(path) => AudioSource::File {
            path,
            looping: args.loop_audio,
        },
        None => AudioSource::Device,
    };
    let capture: Arc<dyn CaptureFactory> = Arc::new(AudioSourceFactory::new(source));

    let screenshots: Arc<dyn ScreenshotProvider> = match args.screenshot {
        Some(path) => Arc::new(FileScreenshotProvider::new(path)),
        None => Arc::new(NoScreenshotProvider),
    };

    let broadcast = BroadcastSink::new(256);
    let events: Arc<dyn EventSink> = Arc::new(FanoutSink::new(vec![
        Arc::new(broadcast.clone()),
        Arc::new(LogSink),
    ]));

    let manager = Arc::new(LiveSessionManager::new(
        Arc::clone(&store),
        llm,
        capture,
        screenshots,
        events,
        cfg.session.clone(),
    ));

    let shutdown = CancellationToken::new();
    let supervisor =
        spawn_config_supervisor(Arc::clone(&manager), Arc::clone(&store), shutdown.clone());

    if args.autostart {
        if let Err(e) = manager.start().await {
            error!("Autostart failed: {:#}", e);
        }
    }

    let app = create_router(AppState::new(
        Arc::clone(&manager),
        store,
        broadcast,
        shutdown.clone(),
    ));
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down");
            signal.cancel();
        })
        .await
        .context("HTTP server failed")?;

    manager.stop().await;
    if let Err(e) = supervisor.await {
        error!("Config supervisor panicked: {}", e);
    }

    Ok(())
}
