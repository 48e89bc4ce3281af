use crate::access::AccessPolicy;
use crate::config::Config;
use crate::runtime::CtrRuntime;
use crate::state::AppState;
use anyhow::Context;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber;

mod access;
mod config;
mod image_reference;
mod runtime;
mod secret_string;
mod state;
mod webserver;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    info!("Starting kube-prewarm {}", env!("CARGO_PKG_VERSION"));

    let config = match env::var("CONFIG_FILE") {
        Ok(path) => config::load_config(path)?,
        Err(_) => {
            info!("CONFIG_FILE not set, using default configuration");
            Config::default()
        }
    };

    // The deployment manifest supplies the listening port
    let port = match env::var("PORT") {
        Ok(port) => port.parse().context("Invalid PORT value")?,
        Err(_) => config.webserver.port,
    };

    let access = AccessPolicy::from_config(&config.access)?;
    let puller = CtrRuntime::new(config.runtime.clone(), config.registries.clone());
    let state = AppState {
        puller,
        access: Arc::new(access),
    };

    let shutdown = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
            shutdown.cancel();
        });
    }

    let app = webserver::create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await?;

    info!("Webserver stopped");
    Ok(())
}
