//! ==============================================================================
//! main.rs - autochain feed entry point
//! ==============================================================================
//!
//! purpose:
//!     runs the live-data side of the dashboard: ingestion adapters, the
//!     reconciliation store, and the http surface the browser reads from.
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                     autochain-feed                           │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//!     │  │ pull        │  │ push        │  │ simulator           │  │
//!     │  │ (GET 2s)    │  │ (websocket) │  │ (optional, offline) │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  │
//!     │         └────────────────┼────────────────────┘             │
//!     │                    ┌─────┴─────┐                            │
//!     │                    │   store   │ <- store.rs                │
//!     │                    └─────┬─────┘                            │
//!     │                    ┌─────┴─────┐                            │
//!     │                    │  server   │ <- server.rs (port 3000)   │
//!     │                    └───────────┘                            │
//!     └─────────────────────────────────────────────────────────────┘
//!
//! shutdown (ctrl-c): adapters first, then the store, then the server.
//!
//! ==============================================================================

use anyhow::{Context, Result};
use autochain_feed::adapters::{self, AdapterHandle, PullAdapter, PushAdapter, SimulatedSensor};
use autochain_feed::config::FeedConfig;
use autochain_feed::server::{self, AppState};
use autochain_feed::store::{ReconciliationStore, SourceKind};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  AutoChain IoT Tracker - live sensor feed");
    println!("===========================================================");

    // step 1: load configuration
    let config = FeedConfig::load_or_default(std::env::args().nth(1).map(PathBuf::from));
    config.print_summary();

    // step 2: logging (RUST_LOG wins over the config file)
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // step 3: the store
    let store = ReconciliationStore::new(config.store_config()).spawn();

    // step 4: adapters
    let mut sources: Vec<AdapterHandle> = Vec::new();
    if config.pull.enabled {
        let pull = PullAdapter::new(config.pull_settings()).context("failed to build http client")?;
        info!(endpoint = pull.endpoint(), "polling agent");
        sources.push(adapters::spawn(pull, store.sink(SourceKind::Pull)));
    }
    if config.push.enabled {
        let push = PushAdapter::new(config.push_settings());
        sources.push(adapters::spawn(push, store.sink(SourceKind::Push)));
    }
    if config.simulator.enabled {
        let sim = SimulatedSensor::new(config.simulator_settings());
        sources.push(adapters::spawn(sim, store.sink(SourceKind::Simulator)));
    }
    if sources.is_empty() {
        error!("no data source enabled; the dashboard will stay in loading");
    }

    // step 5: web server in background
    let stop_server = CancellationToken::new();
    let state = AppState {
        view: store.subscribe(),
        chart_points: config.store.chart_points,
        image_base: config.server.image_base.clone(),
        images_dir: config.images_dir(),
    };
    let bind = config.server.bind.clone();
    let server_stop = stop_server.clone();
    let web = tokio::spawn(async move {
        info!(%bind, "dashboard live");
        if let Err(e) = server::run_server(&bind, state, server_stop.cancelled_owned()).await {
            error!("web server error: {:#}", e);
        }
    });

    // step 6: wait for ctrl-c, then tear down in order
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutting down");

    for source in sources {
        source.shutdown().await;
    }
    if let Some(final_state) = store.shutdown().await {
        info!(history = final_state.history().len(), "store stopped");
    }
    stop_server.cancel();
    let _ = web.await;

    Ok(())
}
