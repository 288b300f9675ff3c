use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::RwLock;

use super::client::TedeeHttpClient;
use super::model::{Device, REMOTE_CHANNEL, RemoteSlot, UNLOCK_MODES, remote_slot_id};
use super::projection::StateProjector;
use crate::core::state::{CONNECTION_STATE, ObjectMeta, StateStore};

pub const BRIDGE_ID: &str = "bridge";

/// Devices known from the last discovery run, in bridge order.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<Vec<Device>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, devices: Vec<Device>) {
        *self.devices.write().await = devices;
    }

    pub async fn get(&self, id: &str) -> Option<Device> {
        self.devices.read().await.iter().find(|d| d.id == id).cloned()
    }

    pub async fn all(&self) -> Vec<Device> {
        self.devices.read().await.clone()
    }

    pub async fn has_remote(&self, id: &str) -> bool {
        self.devices
            .read()
            .await
            .iter()
            .any(|d| d.id == id && !d.remote_commands().is_empty())
    }
}

fn slot_meta(slot: RemoteSlot) -> ObjectMeta {
    match slot {
        RemoteSlot::Refresh => ObjectMeta::state("True = Refresh").writable().with_default(json!(false)),
        RemoteSlot::Lock => ObjectMeta::state("True = Lock / False = Unlock")
            .writable()
            .with_default(json!(false)),
        RemoteSlot::Unlock => ObjectMeta::state("Unlock mode (0 = normal, 2 = force, 3 = without pull, 4 = unlock or pull)")
            .writable()
            .with_default(json!(0))
            .with_states(&UNLOCK_MODES),
        RemoteSlot::Pull => ObjectMeta::state("True = Pull").writable().with_default(json!(false)),
    }
}

pub struct Discovery {
    client: TedeeHttpClient,
    store: StateStore,
    registry: DeviceRegistry,
    projector: StateProjector,
}

impl Discovery {
    pub fn new(client: TedeeHttpClient, store: StateStore, registry: DeviceRegistry, projector: StateProjector) -> Self {
        Self {
            client,
            store,
            registry,
            projector,
        }
    }

    /// Fetches bridge info and the device list and (re)creates registry entries and command slots.
    pub async fn discover(&self) -> Vec<Device> {
        self.discover_bridge().await;

        let payloads = match self.client.get_locks().await {
            Ok(payloads) => payloads,
            Err(e) => {
                tracing::error!("Error getting devices from bridge: {}", e);
                if let Some(body) = e.response_body() {
                    tracing::error!("Bridge response: {}", body);
                }
                self.store.set_state(CONNECTION_STATE, false, true).await;
                return self.registry.all().await;
            }
        };

        tracing::info!("Found {} devices", payloads.len());

        let mut devices = vec![];
        for payload in payloads {
            match Device::from_payload(&payload) {
                Ok(device) => devices.push(device),
                Err(e) => tracing::warn!("Skipping unusable device {}: {:?}", payload, e),
            }
        }

        self.registry.replace(devices.clone()).await;

        for device in devices.iter() {
            self.create_objects(device).await;
            let writes = self
                .projector
                .project(&device.id, &device.attributes, !device.remote_commands().is_empty());
            self.store.apply(writes).await;
        }

        devices
    }

    async fn discover_bridge(&self) {
        tracing::info!("Getting bridge info");

        match self.client.get_bridge().await {
            Ok(bridge) => {
                self.store.set_state(CONNECTION_STATE, true, true).await;

                let name = bridge.get("name").and_then(Value::as_str).unwrap_or(BRIDGE_ID);
                self.store.extend_object(BRIDGE_ID, ObjectMeta::device(name)).await;
                self.store.apply(self.projector.project(BRIDGE_ID, &bridge, false)).await;
            }
            Err(e) => {
                tracing::error!("Error getting bridge info: {}", e);
                if let Some(body) = e.response_body() {
                    tracing::error!("Bridge response: {}", body);
                }
            }
        }
    }

    async fn create_objects(&self, device: &Device) {
        self.store.ensure_object(&device.id, ObjectMeta::device(&device.name)).await;

        let commands = device.remote_commands();
        if commands.is_empty() {
            return;
        }

        let channel_id = format!("{}.{}", device.id, REMOTE_CHANNEL);
        self.store.ensure_object(&channel_id, ObjectMeta::channel("Remote Controls")).await;

        for slot in commands {
            self.store
                .extend_object(&remote_slot_id(&device.id, *slot), slot_meta(*slot))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapter::tedee::auth::Credential;
    use crate::adapter::tedee::client::RetryPolicy;
    use crate::adapter::tedee::model::DeviceType;
    use mockito::Server;

    fn discovery_for(server: &Server, store: &StateStore, registry: &DeviceRegistry) -> Discovery {
        let client = TedeeHttpClient::new(
            &format!("{}/v1.0", server.url()),
            Credential::new("secret"),
            Duration::from_secs(5),
            RetryPolicy {
                max_retries: 0,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
        )
        .unwrap();

        Discovery::new(client, store.clone(), registry.clone(), StateProjector::default())
    }

    async fn mock_bridge(server: &mut Server, locks: &str) -> (mockito::Mock, mockito::Mock) {
        let bridge = server
            .mock("GET", "/v1.0/bridge")
            .with_status(200)
            .with_body(r#"{"name":"Hallway bridge","serialNumber":"B-1"}"#)
            .create_async()
            .await;
        let locks = server
            .mock("GET", "/v1.0/lock")
            .with_status(200)
            .with_body(locks)
            .create_async()
            .await;
        (bridge, locks)
    }

    #[tokio::test]
    async fn discovers_lock_with_sanitized_id_and_slots() {
        let mut server = Server::new_async().await;
        let _mocks = mock_bridge(&mut server, r#"[{"id":"123 A","name":"Front door","type":2,"state":6}]"#).await;

        let store = StateStore::new();
        let registry = DeviceRegistry::new();
        discovery_for(&server, &store, &registry).discover().await;

        let device = registry.get("123_A").await.unwrap();
        assert_eq!(device.device_type, DeviceType::LockPro);
        assert_eq!(device.bridge_id, "123 A");

        for slot in ["refresh", "lock", "unlock", "pull"] {
            let meta = store.get_object(&format!("123_A.remote.{}", slot)).await;
            assert!(meta.is_some_and(|m| m.writable), "missing slot {}", slot);
        }

        let lock = store.get_state("123_A.remote.lock").await.unwrap();
        assert_eq!(lock.value, json!(true));
        assert!(lock.ack);

        assert_eq!(store.get_state(CONNECTION_STATE).await.map(|s| s.value), Some(json!(true)));
        assert_eq!(
            store.get_object(BRIDGE_ID).await.map(|o| o.name),
            Some("Hallway bridge".to_owned())
        );
        assert_eq!(
            store.get_state("bridge.serialNumber").await.map(|s| s.value),
            Some(json!("B-1"))
        );
    }

    #[tokio::test]
    async fn keypads_get_no_command_slots() {
        let mut server = Server::new_async().await;
        let _mocks = mock_bridge(&mut server, r#"[{"id":77,"name":"Keypad","type":3,"state":6}]"#).await;

        let store = StateStore::new();
        let registry = DeviceRegistry::new();
        discovery_for(&server, &store, &registry).discover().await;

        assert!(registry.get("77").await.is_some());
        assert!(!registry.has_remote("77").await);
        assert!(store.get_object("77.remote").await.is_none());
        assert!(store.get_state("77.remote.lock").await.is_none());
        assert_eq!(store.get_state("77.state").await.map(|s| s.value), Some(json!(6)));
    }

    #[tokio::test]
    async fn rediscovery_is_idempotent() {
        let mut server = Server::new_async().await;
        let _mocks = mock_bridge(
            &mut server,
            r#"[{"id":1,"name":"Front","type":2,"state":2},{"id":2,"name":"Back","type":4,"state":6}]"#,
        )
        .await;

        let store = StateStore::new();
        let registry = DeviceRegistry::new();
        let discovery = discovery_for(&server, &store, &registry);

        discovery.discover().await;
        let devices = registry.all().await;
        let objects = store.object_ids().await;
        let states = store.state_ids().await;

        discovery.discover().await;

        assert_eq!(registry.all().await, devices);
        assert_eq!(store.object_ids().await, objects);
        assert_eq!(store.state_ids().await, states);
        assert_eq!(devices.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn failed_device_fetch_clears_connection() {
        let mut server = Server::new_async().await;
        let _bridge = server
            .mock("GET", "/v1.0/bridge")
            .with_status(200)
            .with_body(r#"{"name":"Hallway bridge"}"#)
            .create_async()
            .await;
        let _locks = server
            .mock("GET", "/v1.0/lock")
            .with_status(401)
            .with_body(r#"{"error":"unauthorized"}"#)
            .create_async()
            .await;

        let store = StateStore::new();
        let registry = DeviceRegistry::new();
        let devices = discovery_for(&server, &store, &registry).discover().await;

        assert!(devices.is_empty());
        assert_eq!(store.get_state(CONNECTION_STATE).await.map(|s| s.value), Some(json!(false)));
    }
}
