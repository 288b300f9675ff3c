mod auth;
mod callback;
mod client;
mod dispatcher;
mod error;
mod model;
mod poll;
mod projection;
mod registry;
mod runner;
mod webhook;

use std::time::Duration;

use anyhow::bail;
use serde::Deserialize;
use tokio::sync::mpsc;

use auth::Credential;
use client::{RetryPolicy, TedeeHttpClient};
use runner::RunnerTimings;

pub use runner::TedeeRunner;
pub use webhook::{WEBHOOK_PATH, WebhookDelivery};

use crate::core::state::StateStore;

#[derive(Debug, Deserialize, Clone)]
pub struct TedeeBridge {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_interval")]
    pub interval: i64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_refresh_delay_secs")]
    pub refresh_delay_secs: u64,
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,
    #[serde(default = "default_callback_purge_pause_ms")]
    pub callback_purge_pause_ms: u64,
}

fn default_interval() -> i64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    180
}

fn default_refresh_delay_secs() -> u64 {
    10
}

fn default_settle_delay_secs() -> u64 {
    5
}

fn default_callback_purge_pause_ms() -> u64 {
    500
}

impl TedeeBridge {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ip.trim().is_empty() || self.token.trim().is_empty() {
            bail!("Please set bridge IP and token in the configuration");
        }
        Ok(())
    }

    pub fn new_web_service(tx: mpsc::Sender<WebhookDelivery>) -> actix_web::Scope {
        webhook::new_actix_web_scope(tx)
    }

    pub async fn new_runner(
        &self,
        store: StateStore,
        webhook_rx: mpsc::Receiver<WebhookDelivery>,
    ) -> anyhow::Result<TedeeRunner> {
        self.validate()?;

        let client = TedeeHttpClient::for_bridge(
            &self.ip,
            Credential::new(self.token.clone()),
            Duration::from_secs(self.request_timeout_secs),
            self.retry.clone(),
        )?;

        let timings = RunnerTimings {
            poll_interval: Duration::from_secs(poll::clamp_interval(self.interval)),
            refresh_delay: Duration::from_secs(self.refresh_delay_secs),
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            purge_pause: Duration::from_millis(self.callback_purge_pause_ms),
        };

        tracing::info!("Using bridge {} with poll interval {:?}", self.ip, timings.poll_interval);

        Ok(TedeeRunner::new(client, store, webhook_rx, timings).await)
    }
}
