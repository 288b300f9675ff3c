use serde_json::Value;

use super::client::TedeeHttpClient;
use super::model::{Device, REMOTE_CHANNEL, RemoteSlot};
use super::registry::DeviceRegistry;
use crate::core::state::StateChange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    Lock,
    Unlock { mode: i64 },
    Pull,
}

impl BridgeCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeCommand::Lock => "lock",
            BridgeCommand::Unlock { .. } => "unlock",
            BridgeCommand::Pull => "pull",
        }
    }

    pub fn mode(&self) -> Option<i64> {
        match self {
            BridgeCommand::Unlock { mode } => Some(*mode),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Re-fetch all devices, nothing is sent to a lock
    Refresh,
    Command(Device, BridgeCommand),
}

/// Maps a slot write to the command it stands for. `None` for slots that are not commands.
pub fn command_for(slot: RemoteSlot, value: &Value) -> Option<BridgeCommand> {
    match slot {
        RemoteSlot::Refresh => None,
        RemoteSlot::Lock if value == &Value::Bool(false) => Some(BridgeCommand::Unlock { mode: 0 }),
        RemoteSlot::Lock => Some(BridgeCommand::Lock),
        RemoteSlot::Unlock => Some(BridgeCommand::Unlock {
            mode: value.as_i64().unwrap_or(0),
        }),
        RemoteSlot::Pull => Some(BridgeCommand::Pull),
    }
}

#[derive(Clone)]
pub struct CommandDispatcher {
    client: TedeeHttpClient,
    registry: DeviceRegistry,
}

impl CommandDispatcher {
    pub fn new(client: TedeeHttpClient, registry: DeviceRegistry) -> Self {
        Self { client, registry }
    }

    /// Only unacknowledged writes to `{device}.remote.{slot}` are dispatched.
    pub async fn resolve(&self, change: &StateChange) -> Option<Dispatch> {
        if change.ack {
            return None;
        }

        let mut segments = change.id.split('.');
        let (Some(device_id), Some(channel), Some(slot_name), None) =
            (segments.next(), segments.next(), segments.next(), segments.next())
        else {
            return None;
        };

        if channel != REMOTE_CHANNEL {
            return None;
        }

        let Some(slot) = RemoteSlot::from_name(slot_name) else {
            tracing::warn!("Unknown remote command {} for device {}", slot_name, device_id);
            return None;
        };

        if slot == RemoteSlot::Refresh {
            return Some(Dispatch::Refresh);
        }

        let Some(device) = self.registry.get(device_id).await else {
            tracing::warn!("Ignoring {} for unknown device {}", slot_name, device_id);
            return None;
        };

        if !device.remote_commands().contains(&slot) {
            tracing::warn!("Device {} does not support {}", device_id, slot_name);
            return None;
        }

        command_for(slot, &change.value).map(|command| Dispatch::Command(device, command))
    }

    #[tracing::instrument(name = "execute_command Tedee", skip(self, device), fields(device = %device.id))]
    pub async fn execute(&self, device: &Device, command: &BridgeCommand) {
        tracing::info!("Sending {} to {} (mode {:?})", command.name(), device.name, command.mode());

        match self
            .client
            .send_command(&device.bridge_id, command.name(), command.mode())
            .await
        {
            Ok(body) => tracing::info!("Bridge accepted {}: {}", command.name(), body),
            Err(e) => {
                tracing::error!("Error sending {} to {}: {}", command.name(), device.id, e);
                if let Some(body) = e.response_body() {
                    tracing::error!("Bridge response: {}", body);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapter::tedee::auth::Credential;
    use crate::adapter::tedee::client::RetryPolicy;
    use mockito::Server;
    use serde_json::json;

    fn user_write(id: &str, value: Value) -> StateChange {
        StateChange {
            id: id.to_owned(),
            value,
            ack: false,
        }
    }

    async fn dispatcher_with_lock(base_url: &str) -> CommandDispatcher {
        let client = TedeeHttpClient::new(
            base_url,
            Credential::new("secret"),
            Duration::from_secs(5),
            RetryPolicy {
                max_retries: 0,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
        )
        .unwrap();

        let registry = DeviceRegistry::new();
        registry
            .replace(vec![
                Device::from_payload(&json!({ "id": 123, "name": "Front door", "type": 2, "state": 6 })).unwrap(),
                Device::from_payload(&json!({ "id": 9, "name": "Keypad", "type": 3 })).unwrap(),
            ])
            .await;

        CommandDispatcher::new(client, registry)
    }

    #[test]
    fn lock_false_means_unlock_with_default_mode() {
        assert_eq!(
            command_for(RemoteSlot::Lock, &json!(false)),
            Some(BridgeCommand::Unlock { mode: 0 })
        );
        assert_eq!(command_for(RemoteSlot::Lock, &json!(true)), Some(BridgeCommand::Lock));
    }

    #[test]
    fn unlock_value_is_mode() {
        assert_eq!(
            command_for(RemoteSlot::Unlock, &json!(2)),
            Some(BridgeCommand::Unlock { mode: 2 })
        );
        assert_eq!(
            command_for(RemoteSlot::Unlock, &json!(true)),
            Some(BridgeCommand::Unlock { mode: 0 })
        );
        assert_eq!(
            command_for(RemoteSlot::Unlock, &Value::Null),
            Some(BridgeCommand::Unlock { mode: 0 })
        );
    }

    #[test]
    fn pull_is_forwarded() {
        assert_eq!(command_for(RemoteSlot::Pull, &json!(true)), Some(BridgeCommand::Pull));
        assert_eq!(command_for(RemoteSlot::Refresh, &json!(true)), None);
    }

    #[tokio::test]
    async fn acknowledged_writes_are_not_dispatched() {
        let dispatcher = dispatcher_with_lock("http://127.0.0.1:1/v1.0").await;
        let change = StateChange {
            id: "123.remote.lock".to_owned(),
            value: json!(true),
            ack: true,
        };

        assert_eq!(dispatcher.resolve(&change).await, None);
    }

    #[tokio::test]
    async fn non_remote_writes_are_ignored() {
        let dispatcher = dispatcher_with_lock("http://127.0.0.1:1/v1.0").await;

        assert_eq!(dispatcher.resolve(&user_write("123.state", json!(6))).await, None);
        assert_eq!(dispatcher.resolve(&user_write("123.other.lock", json!(true))).await, None);
        assert_eq!(dispatcher.resolve(&user_write("123.remote.lock.x", json!(true))).await, None);
        assert_eq!(dispatcher.resolve(&user_write("123.remote.open", json!(true))).await, None);
    }

    #[tokio::test]
    async fn refresh_resolves_without_device_lookup() {
        let dispatcher = dispatcher_with_lock("http://127.0.0.1:1/v1.0").await;

        assert_eq!(
            dispatcher.resolve(&user_write("unknown.remote.refresh", json!(true))).await,
            Some(Dispatch::Refresh)
        );
    }

    #[tokio::test]
    async fn commands_require_known_capable_device() {
        let dispatcher = dispatcher_with_lock("http://127.0.0.1:1/v1.0").await;

        assert_eq!(dispatcher.resolve(&user_write("999.remote.lock", json!(true))).await, None);
        assert_eq!(dispatcher.resolve(&user_write("9.remote.lock", json!(true))).await, None);

        match dispatcher.resolve(&user_write("123.remote.lock", json!(false))).await {
            Some(Dispatch::Command(device, command)) => {
                assert_eq!(device.id, "123");
                assert_eq!(command, BridgeCommand::Unlock { mode: 0 });
            }
            other => panic!("Unexpected dispatch: {:?}", other),
        }
    }

    #[tokio::test]
    async fn lock_false_sends_unlock_request() {
        let mut server = Server::new_async().await;
        let unlock = server
            .mock("POST", "/v1.0/lock/123/unlock")
            .match_header("mode", "0")
            .with_status(202)
            .expect(1)
            .create_async()
            .await;
        let lock = server
            .mock("POST", "/v1.0/lock/123/lock")
            .expect(0)
            .create_async()
            .await;

        let dispatcher = dispatcher_with_lock(&format!("{}/v1.0", server.url())).await;

        let Some(Dispatch::Command(device, command)) =
            dispatcher.resolve(&user_write("123.remote.lock", json!(false))).await
        else {
            panic!("Expected a command");
        };
        dispatcher.execute(&device, &command).await;

        unlock.assert_async().await;
        lock.assert_async().await;
    }

    #[tokio::test]
    async fn failed_command_is_logged_not_propagated() {
        let mut server = Server::new_async().await;
        let pull = server
            .mock("POST", "/v1.0/lock/123/pull")
            .with_status(409)
            .with_body("busy")
            .expect(1)
            .create_async()
            .await;

        let dispatcher = dispatcher_with_lock(&format!("{}/v1.0", server.url())).await;
        let device = dispatcher.registry.get("123").await.unwrap();

        dispatcher.execute(&device, &BridgeCommand::Pull).await;

        pull.assert_async().await;
    }
}
