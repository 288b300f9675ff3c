use settings::Settings;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::adapter::tedee::{TedeeBridge, WEBHOOK_PATH};
use crate::core::state::StateStore;

mod adapter;
mod core;
mod settings;

#[tokio::main(flavor = "multi_thread")]
pub async fn main() {
    let settings = Settings::new().expect("Error reading configuration");
    settings.monitoring.init().expect("Error initializing monitoring");

    if let Err(e) = settings.bridge.validate() {
        tracing::error!("{}", e);
        return;
    }

    let store = StateStore::new();
    let (webhook_tx, webhook_rx) = mpsc::channel(16);

    let runner = settings
        .bridge
        .new_runner(store.clone(), webhook_rx)
        .await
        .expect("Error initializing Tedee adapter");

    let server = settings
        .http_server
        .start_server(move || vec![TedeeBridge::new_web_service(webhook_tx.clone())])
        .expect("Error starting HTTP server");

    let callback_url = format!(
        "http://{}:{}{}",
        settings.http_server.external_host,
        server.port(),
        WEBHOOK_PATH
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Error waiting for shutdown signal: {}", e);
                return;
            }
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    tracing::info!("Starting main loop");
    runner.run(&callback_url, shutdown).await;

    if let Err(e) = server.stop().await {
        tracing::error!("Error stopping HTTP server: {:?}", e);
    }
}
