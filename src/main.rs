//! Ultra-low-latency live streaming coordinator.
//!
//! Takes exactly one positional argument, the path to a JSON configuration
//! file. No flags. Any failure before the listener binds is printed to
//! stderr and exits non-zero.

#![allow(dead_code)]

mod api;
mod config;
mod dash;
mod error;
mod ffmpeg;
mod http;
mod instance;
mod log;
mod path;
mod resources;
mod server;
mod state;
mod util;

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Root;
use crate::error::Result;
use crate::ffmpeg::FfprobeProber;
use crate::instance::Instance;
use crate::log::Log;
use crate::server::Server;
use crate::state::AppState;

const APP_NAME: &str = "rise-server";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "startup failed");
        eprintln!("{APP_NAME}: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .ok_or_else(|| error::Error::BadRequest("usage: rise-server <config.json>".into()))?;

    let raw = std::fs::read_to_string(&config_path)
        .map_err(|e| error::Error::Internal(format!("reading {config_path}: {e}")))?;
    let root = Root::from_json(&raw)?;

    tracing::info!("{} v{} starting", APP_NAME, VERSION);

    let log = match &root.log.path {
        Some(path) => Log::new_file(std::path::PathBuf::from(path))?,
        None => Log::new_memory(),
    };

    let server = Arc::new(Server::new());
    let instance = Instance::new(server.clone(), log);
    instance.mount_ambient_resources().await?;

    let prober: Arc<dyn crate::config::defaults::ProbeFn> = Arc::new(FfprobeProber::default());
    mount_api(&server, &instance, prober.clone()).await?;

    instance.apply_configuration(root.clone(), prober.as_ref()).await?;

    let app = http::create_router(AppState::new(instance));
    let addr = SocketAddr::from(([0, 0, 0, 0], root.network.port));
    tracing::info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(error::Error::from)?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| error::Error::Internal(e.to_string()))?;

    Ok(())
}

async fn mount_api(
    server: &Arc<Server>,
    instance: &Arc<Instance>,
    prober: Arc<dyn crate::config::defaults::ProbeFn>,
) -> Result<()> {
    server
        .add(
            &path::Path::parse("api/config").expect("literal path"),
            Arc::new(api::ConfigResource::new(instance.clone(), prober.clone())),
        )
        .await?;
    server
        .add(&path::Path::parse("api/probe").expect("literal path"), Arc::new(api::ProbeResource::new(prober)))
        .await?;
    server
        .add(
            &path::Path::parse("api/channel").expect("literal path"),
            Arc::new(api::ChannelControlResource::new(instance.clone())),
        )
        .await?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "rise_server=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
