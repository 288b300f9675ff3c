use actix_web::web::{self, Bytes};
use actix_web::{HttpResponse, Responder};
use serde_json::Value;
use tokio::sync::mpsc;

use super::model::{id_to_string, sanitize_id};
use super::projection::StateProjector;
use super::registry::{BRIDGE_ID, DeviceRegistry};
use crate::core::state::StateStore;

pub const WEBHOOK_PATH: &str = "/webhook";

/// Body of a push notification as sent by the bridge.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub body: Value,
}

#[derive(Clone)]
struct WebhookApiState {
    tx: mpsc::Sender<WebhookDelivery>,
}

pub fn new_actix_web_scope(tx: mpsc::Sender<WebhookDelivery>) -> actix_web::Scope {
    web::scope(WEBHOOK_PATH)
        .route("", web::post().to(handle_webhook))
        .app_data(web::Data::new(WebhookApiState { tx }))
}

//bridge only needs to know about delivery, so always answer 200
async fn handle_webhook(state: web::Data<WebhookApiState>, body: Bytes) -> impl Responder {
    let body: Value = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("Error parsing webhook body {:?}: {:?}", String::from_utf8_lossy(&body), e);
            return HttpResponse::Ok().body("OK");
        }
    };

    tracing::debug!("Webhook received: {}", body);

    if let Err(e) = state.tx.send(WebhookDelivery { body }).await {
        tracing::error!("Error forwarding webhook: {:?}", e);
    }

    HttpResponse::Ok().body("OK")
}

pub struct WebhookIngestion {
    store: StateStore,
    registry: DeviceRegistry,
    projector: StateProjector,
    first_received: bool,
}

impl WebhookIngestion {
    pub fn new(store: StateStore, registry: DeviceRegistry, projector: StateProjector) -> Self {
        Self {
            store,
            registry,
            projector,
            first_received: false,
        }
    }

    pub async fn ingest(&mut self, delivery: &WebhookDelivery) {
        if !self.first_received {
            self.first_received = true;
            tracing::info!("Webhook message received");
        }

        let Some(data) = delivery.body.get("data").filter(|data| data.is_object()) else {
            tracing::debug!("Webhook without data: {}", delivery.body);
            return;
        };

        let writes = match data.get("deviceId").and_then(id_to_string) {
            Some(raw_id) => {
                let device_id = sanitize_id(&raw_id);
                let remote = self.registry.has_remote(&device_id).await;
                self.projector.project(&device_id, data, remote)
            }
            None => self.projector.project(BRIDGE_ID, data, false),
        };

        self.store.apply(writes).await;
    }
}
