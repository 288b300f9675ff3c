use std::time::Duration;

use infrastructure::HttpClientConfig;
use reqwest::Method;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::auth::Credential;
use super::error::BridgeError;
use crate::core::resilience::ExponentialBackoff;

pub const API_VERSION: &str = "v1.0";

#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Callback {
    pub id: Value,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
struct NewCallback<'a> {
    url: &'a str,
    method: &'a str,
    headers: Vec<Value>,
}

struct BridgeRequest<'a> {
    method: Method,
    path: String,
    mode: Option<i64>,
    body: Option<&'a Value>,
}

#[derive(Debug, Clone)]
pub struct TedeeHttpClient {
    client: ClientWithMiddleware,
    base_url: String,
    credential: Credential,
    retry: RetryPolicy,
}

impl TedeeHttpClient {
    pub fn new(
        base_url: &str,
        credential: Credential,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let user_agent = format!("tedee-bridge v{}", env!("CARGO_PKG_VERSION"));
        let client = HttpClientConfig::new(user_agent, timeout).new_tracing_client()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            credential,
            retry,
        })
    }

    pub fn for_bridge(
        bridge_ip: &str,
        credential: Credential,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        Self::new(&format!("http://{}/{}", bridge_ip, API_VERSION), credential, timeout, retry)
    }
}

impl TedeeHttpClient {
    #[tracing::instrument(skip(self))]
    pub async fn get_bridge(&self) -> Result<Value, BridgeError> {
        self.send_json(Method::GET, "/bridge").await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_locks(&self) -> Result<Vec<Value>, BridgeError> {
        self.send_json(Method::GET, "/lock").await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_callbacks(&self) -> Result<Vec<Callback>, BridgeError> {
        self.send_json(Method::GET, "/callback").await
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_callback(&self, url: &str) -> Result<String, BridgeError> {
        let body = serde_json::to_value(NewCallback {
            url,
            method: "POST",
            headers: vec![],
        })
        .map_err(BridgeError::Decode)?;

        self.execute(BridgeRequest {
            method: Method::POST,
            path: "/callback".to_owned(),
            mode: None,
            body: Some(&body),
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_callback(&self, callback_id: &str) -> Result<String, BridgeError> {
        self.execute(BridgeRequest {
            method: Method::DELETE,
            path: format!("/callback/{}", callback_id),
            mode: None,
            body: None,
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn send_command(&self, device_id: &str, command: &str, mode: Option<i64>) -> Result<String, BridgeError> {
        self.execute(BridgeRequest {
            method: Method::POST,
            path: format!("/lock/{}/{}", device_id, command),
            mode,
            body: None,
        })
        .await
    }

    async fn send_json<T: serde::de::DeserializeOwned>(&self, method: Method, path: &str) -> Result<T, BridgeError> {
        let body = self
            .execute(BridgeRequest {
                method,
                path: path.to_owned(),
                mode: None,
                body: None,
            })
            .await?;

        tracing::debug!("Bridge response for {}: {}", path, body);

        serde_json::from_str(&body).map_err(BridgeError::Decode)
    }

    async fn execute(&self, request: BridgeRequest<'_>) -> Result<String, BridgeError> {
        let mut backoff = self.retry.backoff();

        loop {
            let result = self.attempt(&request).await;

            match result {
                Err(e) if e.is_retryable() && backoff.attempts() < self.retry.max_retries => {
                    let delay = backoff.next_delay();
                    backoff.bump();
                    tracing::debug!(
                        "Retrying {} {} in {:?} (retry {} of {}): {}",
                        request.method,
                        request.path,
                        delay,
                        backoff.attempts(),
                        self.retry.max_retries,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn attempt(&self, request: &BridgeRequest<'_>) -> Result<String, BridgeError> {
        let url = format!("{}{}", self.base_url, request.path);

        //token embeds the current timestamp, so every attempt needs a new one
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .header("api_token", self.credential.api_token());

        if let Some(mode) = request.mode {
            builder = builder.header("mode", mode.to_string());
        }

        if let Some(body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(BridgeError::from_transport)?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BridgeError::from_transport(e.into()))?;

        if status.as_u16() >= 400 {
            return Err(BridgeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}
