use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use eframe::egui;
use rand::{rngs::StdRng, SeedableRng};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use presenter_overlay::{
    app::OverlayApp,
    config::AppConfig,
    control::{self, ControlAction},
    coordinator::{self, CoordinatorClient},
    dispatch::Viewport,
    overlay::OverlayView,
    pipeline::OverlayPipeline,
    presenter::PresenterConfig,
    session::{PageLocation, SessionIdentityProvider},
    store::KvStore,
    stream::{session_endpoint, StreamingClient},
};

#[derive(Debug, Parser)]
#[command(name = "presenter-overlay", version, about = "Live audience comments over a presentation")]
struct Cli {
    /// Path to config.json. Defaults to the OS config directory.
    #[arg(long, global = true, env = "PRESENTER_OVERLAY_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the comment overlay for a presentation page.
    Overlay {
        /// URL of the presentation being shown.
        #[arg(long)]
        page: String,
        /// Fixed seed for comment placement.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Inspect the session or change presenter settings.
    Control {
        #[command(subcommand)]
        action: ControlAction,
    },
    /// Run the relay between the overlay and the control panel.
    Coordinator {
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let (config, config_path) = AppConfig::load_or_create(cli.config)?;
    let store = match &config.store_path {
        Some(path) => KvStore::open(path.clone())?,
        None => KvStore::open_default()?,
    };
    info!(
        config = %config_path.display(),
        store = %store.path().display(),
        "config loaded"
    );

    match cli.command {
        Command::Overlay { page, seed } => run_overlay(config, store, &page, seed).await,
        Command::Control { action } => control::run_control(&config, store, action).await,
        Command::Coordinator { bind } => {
            let bind = bind.unwrap_or_else(|| config.coordinator_bind.clone());
            coordinator::run_coordinator(&bind, store).await
        }
    }
}

async fn run_overlay(config: AppConfig, store: KvStore, page: &str, seed: Option<u64>) -> Result<()> {
    let location = PageLocation::parse(page)?;
    let mut identity = SessionIdentityProvider::new(store.clone(), config.form_base_url.clone());
    let session = identity.create(&location)?;
    info!(session = %session, form = %identity.form_url(&session), "overlay session ready");

    let relay = CoordinatorClient::for_bind(&config.coordinator_bind)?;
    {
        let relay = relay.clone();
        let data = session.to_string();
        tokio::spawn(async move {
            if let Err(err) = relay.save_session_data(&data).await {
                warn!(?err, "coordinator unavailable; control panel falls back to the store");
            }
        });
    }

    let presenter = PresenterConfig::load(&store)?;
    let client = StreamingClient::new(config.backoff());
    let endpoint = session_endpoint(&config.stream_scheme, &config.stream_host, &session)?;
    let messages = client.open(endpoint);
    let config_events = match relay.config_events_url() {
        Ok(url) => Some(client.open(url)),
        Err(err) => {
            warn!(?err, "config events disabled");
            None
        }
    };

    let (updates_tx, updates_rx) = crossbeam_channel::unbounded();
    let (viewport_tx, viewport_rx) = watch::channel(Viewport::from(config.fallback_viewport));
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let pipeline = OverlayPipeline::new(
        rng,
        presenter.clone(),
        viewport_rx,
        updates_tx,
        config.special_dwell(),
    );
    let shutdown = CancellationToken::new();
    let pipeline_task = tokio::spawn(pipeline.run(messages, config_events, shutdown.clone()));

    let viewport = egui::ViewportBuilder::default()
        .with_title("Presenter Overlay")
        .with_transparent(true)
        .with_decorations(false)
        .with_maximized(true)
        .with_always_on_top()
        .with_mouse_passthrough(true)
        .with_taskbar(false);
    let native_options = eframe::NativeOptions {
        viewport,
        renderer: eframe::Renderer::Glow,
        ..Default::default()
    };

    let view = OverlayView::new(presenter);
    let scroll = config.comment_scroll();
    let fonts_dir = config.fonts_dir.clone();
    let result = eframe::run_native(
        "Presenter Overlay",
        native_options,
        Box::new(move |cc| {
            Ok(Box::new(OverlayApp::new(
                &cc.egui_ctx,
                view,
                updates_rx,
                viewport_tx,
                scroll,
                &fonts_dir,
            )))
        }),
    )
    .map_err(|err| anyhow!("failed starting overlay window: {err}"));

    shutdown.cancel();
    if let Err(err) = pipeline_task.await {
        warn!(?err, "overlay pipeline task failed");
    }
    if let Err(err) = relay.save_session_data("").await {
        debug!(?err, "coordinator unavailable while clearing session");
    }
    if let Err(err) = identity.remove() {
        warn!(?err, "failed removing session from store");
    }
    info!(session = %session, "overlay closed");
    result
}
