use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use secrecy::SecretString;
use tokio::sync::mpsc;

use tether_credentials::{CredentialSync, DurableStore, HttpDurableStore};
use tether_link::{
    ConnectionController, HttpProcessor, InboundRelay, LinkState, MessageProcessor, RetryPolicy,
    WsProtocolClient,
};
use tether_server::{AppState, ServerConfig, ShutdownCoordinator};
use tether_settings::TetherSettings;
use tether_store::{CredentialCache, Database};
use tether_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "tether", about = "Messaging bridge with an HTTP control surface")]
struct Args {
    /// Settings file (defaults to ~/.tether/settings.json)
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Override the HTTP port
    #[arg(long)]
    port: Option<u16>,
}

fn retry_policy(settings: &TetherSettings) -> RetryPolicy {
    RetryPolicy {
        max_attempts: settings.retry.max_attempts,
        base_delay: settings.retry.base_delay(),
        max_delay: settings.retry.max_delay(),
        multiplier: settings.retry.multiplier,
        sync_delay: settings.retry.sync_delay(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut settings = match &args.settings {
        Some(path) => tether_settings::load_settings_from_path(path),
        None => tether_settings::load_settings(),
    }
    .context("failed to load settings")?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let data_dir = settings.storage.resolved_data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

    let telemetry = init_telemetry(TelemetryConfig {
        level: settings.logging.level.clone(),
        log_to_sqlite: settings.logging.log_to_sqlite,
        log_db_path: settings.storage.logs_db(),
    });
    tracing::info!(
        server_name = %settings.server.server_name,
        data_dir = %data_dir.display(),
        persisted_logs = telemetry.logs().is_some(),
        "starting tether"
    );

    let db = Database::open(&settings.storage.credentials_db()).context("failed to open credential cache")?;
    let durable: Option<Arc<dyn DurableStore>> = if settings.credential_store.url.is_empty() {
        tracing::warn!("no durable credential store configured, credentials are local only");
        None
    } else {
        Some(Arc::new(HttpDurableStore::new(
            settings.credential_store.url.clone(),
            settings.server.server_name.clone(),
            Duration::from_millis(settings.credential_store.timeout_ms),
        )))
    };
    let credentials = CredentialSync::new(CredentialCache::new(db), durable);

    let coordinator = ShutdownCoordinator::new();
    let link = LinkState::new();
    let client = Arc::new(WsProtocolClient::new(
        settings.protocol.url.clone(),
        Duration::from_millis(settings.protocol.connect_timeout_ms),
        Duration::from_millis(settings.protocol.request_timeout_ms),
    ));
    let mut controller = ConnectionController::new(
        link.clone(),
        client,
        credentials.clone(),
        retry_policy(&settings),
        coordinator.token(),
    );

    coordinator.register("credential_push", credentials.spawn_push_worker(coordinator.token()));

    if settings.processor.url.is_empty() {
        tracing::warn!("no processor configured, inbound messages will be dropped");
    } else {
        let processor: Arc<dyn MessageProcessor> = Arc::new(HttpProcessor::new(
            settings.processor.url.clone(),
            Duration::from_millis(settings.processor.timeout_ms),
        ));
        let relay = Arc::new(InboundRelay::new(
            processor,
            controller.sender().clone(),
            link,
            SecretString::from(settings.processor.secret.clone()),
        ));
        let (tx, rx) = mpsc::channel(64);
        controller = controller.with_inbound(tx);
        coordinator.register("relay", relay.spawn(rx, coordinator.token()));
    }

    if settings.server.api_secret.is_empty() {
        tracing::warn!("no API secret configured, /api routes will reject every request");
    }
    let state = AppState::new(
        controller.clone(),
        &settings.server.server_name,
        SecretString::from(settings.server.api_secret.clone()),
    )
    .with_logs(telemetry.shared_logs());
    let server_config = ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
    };
    let server = tether_server::start(&server_config, state, coordinator.token())
        .await
        .context("failed to start control server")?;
    coordinator.register("control_server", server.task);

    controller.start().await;
    tracing::info!(addr = %server.addr, "tether ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");

    controller.shutdown().await;
    let aborted = coordinator.graceful_shutdown(None).await;
    if !aborted.is_empty() {
        tracing::warn!(tasks = ?aborted, "forced shutdown");
    }
    Ok(())
}
