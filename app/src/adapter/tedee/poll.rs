use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::client::TedeeHttpClient;
use super::model::{id_to_string, sanitize_id};
use super::projection::StateProjector;
use super::registry::DeviceRegistry;
use crate::core::state::{CONNECTION_STATE, StateStore};

pub const MIN_INTERVAL_SECS: u64 = 1;
pub const MAX_INTERVAL_SECS: u64 = 2_147_483_647;

/// Operator input may be zero or negative, the result is always within bounds.
pub fn clamp_interval(interval_secs: i64) -> u64 {
    match u64::try_from(interval_secs) {
        Ok(secs) if secs > MAX_INTERVAL_SECS => {
            tracing::info!("Set interval to maximum {}", MAX_INTERVAL_SECS);
            MAX_INTERVAL_SECS
        }
        Ok(secs) if secs >= MIN_INTERVAL_SECS => secs,
        _ => {
            tracing::info!("Set interval to minimum {}", MIN_INTERVAL_SECS);
            MIN_INTERVAL_SECS
        }
    }
}

/// Allows a single device fetch at a time. A fetch requested while one is running
/// is remembered and runs once the current one finishes.
#[derive(Clone, Default)]
struct PollGuard {
    in_flight: Arc<AtomicBool>,
    rerun: Arc<AtomicBool>,
}

struct PollPermit {
    in_flight: Arc<AtomicBool>,
}

impl PollGuard {
    fn try_acquire(&self) -> Option<PollPermit> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| PollPermit {
                in_flight: self.in_flight.clone(),
            })
    }

    fn request_rerun(&self) {
        self.rerun.store(true, Ordering::SeqCst);
    }

    fn take_rerun(&self) -> bool {
        self.rerun.swap(false, Ordering::SeqCst)
    }
}

impl Drop for PollPermit {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct Poller {
    client: TedeeHttpClient,
    store: StateStore,
    registry: DeviceRegistry,
    projector: StateProjector,
    guard: PollGuard,
}

impl Poller {
    pub fn new(client: TedeeHttpClient, store: StateStore, registry: DeviceRegistry, projector: StateProjector) -> Self {
        Self {
            client,
            store,
            registry,
            projector,
            guard: PollGuard::default(),
        }
    }

    /// Starts a background fetch. While one is still running, the request is queued
    /// behind it instead and `None` is returned.
    pub fn spawn_update(&self) -> Option<JoinHandle<()>> {
        let permit = match self.guard.try_acquire() {
            Some(permit) => permit,
            None => {
                self.guard.request_rerun();
                //the running fetch may have released the guard before seeing the request
                let permit = self.guard.try_acquire()?;
                self.guard.take_rerun();
                permit
            }
        };

        let poller = self.clone();
        Some(tokio::spawn(async move {
            let mut permit = permit;
            loop {
                poller.update_devices().await;
                drop(permit);

                if !poller.guard.take_rerun() {
                    break;
                }

                tracing::debug!("Device update requested while in progress, updating again");
                match poller.guard.try_acquire() {
                    Some(next) => permit = next,
                    None => break,
                }
            }
        }))
    }

    /// Re-fetches all device states without touching registry entries or objects.
    pub async fn update_devices(&self) {
        let payloads = match self.client.get_locks().await {
            Ok(payloads) => payloads,
            Err(e) if e.is_busy() => {
                tracing::info!("Bridge is busy, skipping device update: {}", e);
                return;
            }
            Err(e) => {
                tracing::error!("Error updating devices: {}", e);
                if let Some(body) = e.response_body() {
                    tracing::error!("Bridge response: {}", body);
                }
                return;
            }
        };

        self.store.set_state(CONNECTION_STATE, true, true).await;

        for payload in payloads {
            let Some(raw_id) = payload.get("id").and_then(id_to_string) else {
                tracing::warn!("Skipping device update without id: {}", payload);
                continue;
            };

            let device_id = sanitize_id(&raw_id);
            let remote = self.registry.has_remote(&device_id).await;
            self.store
                .apply(self.projector.project(&device_id, &payload, remote))
                .await;
        }
    }
}

/// Re-poll request that fires once after the last arming.
pub struct PendingRefresh<T> {
    delay: Duration,
    tx: mpsc::Sender<T>,
    message: T,
    handle: Option<JoinHandle<()>>,
}

impl<T: Clone + Send + 'static> PendingRefresh<T> {
    pub fn new(delay: Duration, tx: mpsc::Sender<T>, message: T) -> Self {
        Self {
            delay,
            tx,
            message,
            handle: None,
        }
    }

    pub fn arm(&mut self) {
        self.cancel();

        let tx = self.tx.clone();
        let message = self.message.clone();
        let delay = self.delay;

        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(message).await.is_err() {
                tracing::debug!("Refresh receiver gone, dropping scheduled refresh");
            }
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl<T> Drop for PendingRefresh<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
