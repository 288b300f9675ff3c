use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::callback::CallbackRegistration;
use super::client::TedeeHttpClient;
use super::dispatcher::{CommandDispatcher, Dispatch};
use super::poll::{PendingRefresh, Poller};
use super::projection::StateProjector;
use super::registry::{DeviceRegistry, Discovery};
use super::webhook::{WebhookDelivery, WebhookIngestion};
use crate::core::state::{CONNECTION_STATE, StateChange, StateStore};

#[derive(Debug, Clone)]
pub struct RunnerTimings {
    pub poll_interval: Duration,
    pub refresh_delay: Duration,
    pub settle_delay: Duration,
    pub purge_pause: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RunnerEvent {
    CommandCompleted,
    RefreshDue,
}

/// Owns all adapter state and processes state writes, webhooks and timers in arrival order.
pub struct TedeeRunner {
    store: StateStore,
    discovery: Discovery,
    callbacks: CallbackRegistration,
    dispatcher: CommandDispatcher,
    ingestion: WebhookIngestion,
    poller: Poller,
    pending_refresh: PendingRefresh<RunnerEvent>,
    state_changes: mpsc::UnboundedReceiver<StateChange>,
    webhook_rx: mpsc::Receiver<WebhookDelivery>,
    events_tx: mpsc::Sender<RunnerEvent>,
    events_rx: mpsc::Receiver<RunnerEvent>,
    timings: RunnerTimings,
}

impl TedeeRunner {
    pub async fn new(
        client: TedeeHttpClient,
        store: StateStore,
        webhook_rx: mpsc::Receiver<WebhookDelivery>,
        timings: RunnerTimings,
    ) -> Self {
        let registry = DeviceRegistry::new();
        let projector = StateProjector::default();
        let (events_tx, events_rx) = mpsc::channel(16);

        let state_changes = store.subscribe("*.remote.*").await;

        Self {
            discovery: Discovery::new(client.clone(), store.clone(), registry.clone(), projector.clone()),
            callbacks: CallbackRegistration::new(client.clone(), timings.purge_pause),
            dispatcher: CommandDispatcher::new(client.clone(), registry.clone()),
            ingestion: WebhookIngestion::new(store.clone(), registry.clone(), projector.clone()),
            poller: Poller::new(client, store.clone(), registry, projector),
            pending_refresh: PendingRefresh::new(timings.refresh_delay, events_tx.clone(), RunnerEvent::RefreshDue),
            store,
            state_changes,
            webhook_rx,
            events_tx,
            events_rx,
            timings,
        }
    }

    pub async fn run(mut self, callback_url: &str, shutdown: CancellationToken) {
        self.store.set_state(CONNECTION_STATE, false, true).await;

        self.discovery.discover().await;
        self.callbacks.register(callback_url).await;

        let settle = tokio::time::sleep(self.timings.settle_delay);
        tokio::pin!(settle);
        let mut settled = false;

        let mut poll_timer = tokio::time::interval_at(
            Instant::now() + self.timings.poll_interval,
            self.timings.poll_interval,
        );
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                _ = &mut settle, if !settled => {
                    settled = true;
                    self.poller.spawn_update();
                }

                _ = poll_timer.tick() => {
                    self.poller.spawn_update();
                }

                Some(change) = self.state_changes.recv() => {
                    self.handle_state_change(change).await;
                }

                Some(delivery) = self.webhook_rx.recv() => {
                    self.ingestion.ingest(&delivery).await;
                    self.pending_refresh.arm();
                }

                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event);
                }
            }
        }

        self.shutdown().await;
    }

    async fn handle_state_change(&mut self, change: StateChange) {
        match self.dispatcher.resolve(&change).await {
            None => {}
            Some(Dispatch::Refresh) => {
                tracing::info!("Refresh requested via {}", change.id);
                self.poller.spawn_update();
            }
            Some(Dispatch::Command(device, command)) => {
                let dispatcher = self.dispatcher.clone();
                let events_tx = self.events_tx.clone();

                tokio::spawn(async move {
                    dispatcher.execute(&device, &command).await;
                    if events_tx.send(RunnerEvent::CommandCompleted).await.is_err() {
                        tracing::debug!("Runner stopped before command {} completed", command.name());
                    }
                });
            }
        }
    }

    fn handle_event(&mut self, event: RunnerEvent) {
        match event {
            RunnerEvent::CommandCompleted => self.pending_refresh.arm(),
            RunnerEvent::RefreshDue => {
                self.poller.spawn_update();
            }
        }
    }

    async fn shutdown(mut self) {
        tracing::info!("Shutting down Tedee adapter");

        self.pending_refresh.cancel();
        self.callbacks.purge().await;
        self.store.set_state(CONNECTION_STATE, false, true).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::tedee::auth::Credential;
    use crate::adapter::tedee::client::RetryPolicy;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;

    fn timings() -> RunnerTimings {
        RunnerTimings {
            poll_interval: Duration::from_secs(3600),
            refresh_delay: Duration::from_millis(50),
            settle_delay: Duration::from_secs(3600),
            purge_pause: Duration::from_millis(1),
        }
    }

    async fn runner_for(server: &ServerGuard, store: &StateStore) -> (TedeeRunner, mpsc::Sender<WebhookDelivery>) {
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

        let (webhook_tx, webhook_rx) = mpsc::channel(4);
        (TedeeRunner::new(client, store.clone(), webhook_rx, timings()).await, webhook_tx)
    }

    async fn mock_startup(server: &mut ServerGuard) -> Vec<mockito::Mock> {
        vec![
            server
                .mock("GET", "/v1.0/bridge")
                .with_status(200)
                .with_body(r#"{"name":"Bridge"}"#)
                .create_async()
                .await,
            server
                .mock("GET", "/v1.0/callback")
                .with_status(200)
                .with_body("[]")
                .create_async()
                .await,
            server
                .mock("POST", "/v1.0/callback")
                .with_status(201)
                .create_async()
                .await,
        ]
    }

    async fn wait_for(mock: &mockito::Mock) {
        for _ in 0..100 {
            if mock.matched_async().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn end_to_end_discovery() {
        let mut server = Server::new_async().await;
        let _bridge = server
            .mock("GET", "/v1.0/bridge")
            .with_status(200)
            .with_body(r#"{"name":"Bridge"}"#)
            .create_async()
            .await;
        let list_callbacks = server
            .mock("GET", "/v1.0/callback")
            .with_status(200)
            .with_body("[]")
            .expect(2)
            .create_async()
            .await;
        let add_callback = server
            .mock("POST", "/v1.0/callback")
            .with_status(201)
            .expect(1)
            .create_async()
            .await;
        let _locks = server
            .mock("GET", "/v1.0/lock")
            .with_status(200)
            .with_body(r#"[{"id":"123 A","name":"Front door","type":2,"state":6}]"#)
            .create_async()
            .await;

        let store = StateStore::new();
        let (runner, _webhook_tx) = runner_for(&server, &store).await;
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        runner.run("http://127.0.0.1:29170/webhook", shutdown).await;

        for slot in ["refresh", "lock", "unlock", "pull"] {
            assert!(store.get_object(&format!("123_A.remote.{}", slot)).await.is_some());
        }
        assert_eq!(store.get_state("123_A.remote.lock").await.map(|s| s.value), Some(json!(true)));
        assert_eq!(store.get_state(CONNECTION_STATE).await.map(|s| s.value), Some(json!(false)));

        //once before registering, once on shutdown
        list_callbacks.assert_async().await;
        add_callback.assert_async().await;
    }

    #[tokio::test]
    async fn refresh_write_polls_without_command() {
        let mut server = Server::new_async().await;
        let _startup = mock_startup(&mut server).await;
        let locks = server
            .mock("GET", "/v1.0/lock")
            .with_status(200)
            .with_body(r#"[{"id":123,"name":"Front door","type":2,"state":6}]"#)
            .expect(2)
            .create_async()
            .await;
        let commands = server
            .mock("POST", Matcher::Regex(r"^/v1\.0/lock/.+".to_owned()))
            .expect(0)
            .create_async()
            .await;

        let store = StateStore::new();
        let (runner, _webhook_tx) = runner_for(&server, &store).await;
        let shutdown = CancellationToken::new();
        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { runner.run("http://127.0.0.1:29170/webhook", shutdown).await })
        };

        while store.get_object("123.remote.refresh").await.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        store.write("123.remote.refresh", true).await;

        wait_for(&locks).await;

        shutdown.cancel();
        task.await.unwrap();

        locks.assert_async().await;
        commands.assert_async().await;
    }

    #[tokio::test]
    async fn command_write_sends_command_and_schedules_refresh() {
        let mut server = Server::new_async().await;
        let _startup = mock_startup(&mut server).await;
        let locks = server
            .mock("GET", "/v1.0/lock")
            .with_status(200)
            .with_body(r#"[{"id":123,"name":"Front door","type":2,"state":2}]"#)
            .expect(2)
            .create_async()
            .await;
        let lock = server
            .mock("POST", "/v1.0/lock/123/lock")
            .with_status(202)
            .expect(1)
            .create_async()
            .await;

        let store = StateStore::new();
        let (runner, _webhook_tx) = runner_for(&server, &store).await;
        let shutdown = CancellationToken::new();
        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { runner.run("http://127.0.0.1:29170/webhook", shutdown).await })
        };

        while store.get_object("123.remote.lock").await.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        store.write("123.remote.lock", true).await;

        wait_for(&lock).await;
        wait_for(&locks).await;

        shutdown.cancel();
        task.await.unwrap();

        lock.assert_async().await;
        locks.assert_async().await;
    }

    #[tokio::test]
    async fn webhook_updates_state() {
        let mut server = Server::new_async().await;
        let _startup = mock_startup(&mut server).await;
        let _locks = server
            .mock("GET", "/v1.0/lock")
            .with_status(200)
            .with_body(r#"[{"id":123,"name":"Front door","type":2,"state":6}]"#)
            .create_async()
            .await;

        let store = StateStore::new();
        let (runner, webhook_tx) = runner_for(&server, &store).await;
        let shutdown = CancellationToken::new();
        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { runner.run("http://127.0.0.1:29170/webhook", shutdown).await })
        };

        webhook_tx
            .send(WebhookDelivery {
                body: json!({ "event": "lock-status-changed", "data": { "deviceId": 123, "state": 7 } }),
            })
            .await
            .unwrap();

        for _ in 0..100 {
            if store.get_state("123.remote.pull").await.map(|s| s.value) == Some(json!(true)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(store.get_state("123.state").await.map(|s| s.value), Some(json!(7)));
        assert_eq!(store.get_state("123.remote.pull").await.map(|s| s.value), Some(json!(true)));
    }
}
