//! Binary entrypoint for photo-kiosk.
//!
//! Delegates all logic to the library crate; no local modules here.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use photo_kiosk::config::{self, Configuration};
use photo_kiosk::events::FrameEvent;
use photo_kiosk::server::proxy::{self, AppState};
use photo_kiosk::server::rate_limit::{MemoryStore, RateLimiter};
use photo_kiosk::server::upstream::PexelsClient;
use photo_kiosk::tasks::cache::{self, PhotoCache};
use photo_kiosk::tasks::fetcher::Fetcher;
use photo_kiosk::tasks::loader;
use photo_kiosk::tasks::slideshow::{self, EngineChannels};

/// Simple CLI
#[derive(Debug, Parser)]
#[command(name = "photo-kiosk", about = "Rate-limited photo proxy and slideshow frame")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the edge photo proxy
    Serve,
    /// Run the slideshow frame client
    Frame,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("photo_kiosk={level}").parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let cfg = config::from_yaml_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    cfg.validate().context("validating configuration")?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown requested");
            cancel.cancel();
        }
    });

    match cli.command {
        Command::Serve => run_server(cfg, cancel).await,
        Command::Frame => run_frame(cfg, cancel).await,
    }
}

async fn run_server(cfg: Configuration, cancel: CancellationToken) -> Result<()> {
    let server_cfg = cfg.server;
    let api_key = std::env::var(&server_cfg.api_key_env)
        .with_context(|| format!("missing upstream API key in ${}", server_cfg.api_key_env))?;

    let limiter = Arc::new(RateLimiter::new(
        Arc::new(MemoryStore::new()),
        server_cfg.rate_limit,
        server_cfg.rate_window,
        server_cfg.rate_grace,
    ));
    let search = Arc::new(PexelsClient::new(
        server_cfg.upstream_endpoint.clone(),
        api_key,
        server_cfg.upstream_timeout,
    )?);

    proxy::serve(server_cfg.bind_address, AppState { limiter, search }, cancel).await
}

async fn run_frame(cfg: Configuration, cancel: CancellationToken) -> Result<()> {
    let frame_cfg = cfg.frame;
    let cache = Arc::new(PhotoCache::new(
        frame_cfg.cache_path.clone(),
        frame_cfg.cache_ttl,
    ));
    let fetcher = Arc::new(Fetcher::new(
        frame_cfg.api_endpoint.clone(),
        frame_cfg.fetch_timeout,
        cache.clone(),
    )?);

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (load_tx, load_rx) = mpsc::channel(32);
    let (ready_tx, ready_rx) = mpsc::channel(32);
    let (invalid_tx, invalid_rx) = mpsc::channel(32);
    let (frame_tx, mut frame_rx) = mpsc::channel(32);

    let loader_client = reqwest::Client::builder()
        .timeout(frame_cfg.fetch_timeout)
        .build()?;

    let loader_task = tokio::spawn(loader::run(
        loader_client,
        load_rx,
        ready_tx,
        invalid_tx,
        cancel.clone(),
        4,
    ));
    let checker_task = tokio::spawn(cache::run_expiry_checker(
        cache.clone(),
        fetcher.in_flight_handle(),
        fetcher.online_handle(),
        cmd_tx.clone(),
        frame_cfg.cache_check_period,
        cancel.clone(),
    ));
    let engine_task = tokio::spawn(slideshow::run(
        frame_cfg,
        fetcher,
        cache,
        EngineChannels {
            commands: cmd_rx,
            to_loader: load_tx,
            slide_ready: ready_rx,
            slide_invalid: invalid_rx,
            frame_events: frame_tx,
        },
        cancel.clone(),
    ));

    // Display glue stand-in: the frame's screen updates reduce to log lines.
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe_event = frame_rx.recv() => match maybe_event {
                Some(event) => log_frame_event(event),
                None => break,
            }
        }
    }

    let _ = loader_task.await;
    let _ = checker_task.await;
    let _ = engine_task.await;
    Ok(())
}

fn log_frame_event(event: FrameEvent) {
    match event {
        FrameEvent::LoadingStarted => info!("loading photos"),
        FrameEvent::LoadingFinished => info!("photos ready"),
        FrameEvent::PhotoShown {
            index,
            keyword,
            photo,
        } => info!(
            index,
            %keyword,
            photographer = %photo.photographer.name,
            id = %photo.id,
            "showing slide"
        ),
        FrameEvent::Notice(text) => warn!(%text, "notice"),
        FrameEvent::Degraded => warn!("running on fallback imagery"),
    }
}
