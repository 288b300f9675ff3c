use std::time::Duration;

use super::client::TedeeHttpClient;
use super::model::id_to_string;

/// Keeps exactly one webhook registration on the bridge pointing at this process.
pub struct CallbackRegistration {
    client: TedeeHttpClient,
    purge_pause: Duration,
}

impl CallbackRegistration {
    pub fn new(client: TedeeHttpClient, purge_pause: Duration) -> Self {
        Self { client, purge_pause }
    }

    /// Failures are logged only, the adapter keeps working on polling alone.
    pub async fn register(&self, callback_url: &str) -> bool {
        self.purge().await;

        tracing::debug!("Registering webhook {}", callback_url);
        match self.client.add_callback(callback_url).await {
            Ok(body) => {
                tracing::debug!("Bridge response: {}", body);
                tracing::info!("Webhook registered");
                true
            }
            Err(e) => {
                tracing::error!("Couldn't register webhook: {}", e);
                if let Some(body) = e.response_body() {
                    tracing::error!("Bridge response: {}", body);
                }
                false
            }
        }
    }

    /// Deletes every registration the bridge knows about, one at a time.
    pub async fn purge(&self) {
        let callbacks = match self.client.get_callbacks().await {
            Ok(callbacks) => callbacks,
            Err(e) => {
                tracing::error!("Error listing webhooks: {}", e);
                if let Some(body) = e.response_body() {
                    tracing::error!("Bridge response: {}", body);
                }
                return;
            }
        };

        for (index, callback) in callbacks.iter().enumerate() {
            let Some(id) = id_to_string(&callback.id) else {
                tracing::warn!("Skipping webhook without id: {:?}", callback);
                continue;
            };

            if index > 0 {
                tokio::time::sleep(self.purge_pause).await;
            }

            tracing::debug!("Deleting webhook {} ({:?})", id, callback.url);
            if let Err(e) = self.client.delete_callback(&id).await {
                tracing::error!("Error deleting webhook {}: {}", id, e);
            }
        }
    }
}
