use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{RwLock, mpsc};

pub const CONNECTION_STATE: &str = "info.connection";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Device,
    Channel,
    State,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub kind: ObjectKind,
    pub name: String,
    pub writable: bool,
    pub default: Option<Value>,
    pub states: Vec<(i64, String)>,
}

impl ObjectMeta {
    pub fn device(name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Device, name)
    }

    pub fn channel(name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Channel, name)
    }

    pub fn state(name: impl Into<String>) -> Self {
        Self::new(ObjectKind::State, name)
    }

    fn new(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            writable: false,
            default: None,
            states: vec![],
        }
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_states(mut self, states: &[(i64, &str)]) -> Self {
        self.states = states.iter().map(|(code, label)| (*code, label.to_string())).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub value: Value,
    pub ack: bool,
    /// Human-readable label of a coded value. The value itself stays canonical.
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateWrite {
    pub id: String,
    pub value: Value,
    pub ack: bool,
    pub label: Option<String>,
}

impl StateWrite {
    pub fn ack(id: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
            ack: true,
            label: None,
        }
    }

    pub fn with_label(mut self, label: Option<&str>) -> Self {
        self.label = label.map(str::to_owned);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub id: String,
    pub value: Value,
    pub ack: bool,
}

struct Subscription {
    pattern: StatePattern,
    tx: mpsc::UnboundedSender<StateChange>,
}

#[derive(Default)]
struct StoreInner {
    objects: BTreeMap<String, ObjectMeta>,
    states: BTreeMap<String, State>,
    subscriptions: Vec<Subscription>,
}

/// In-process object and state tree with change notifications.
#[derive(Clone, Default)]
pub struct StateStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the object only if it does not exist yet. Returns true if created.
    pub async fn ensure_object(&self, id: &str, meta: ObjectMeta) -> bool {
        let mut inner = self.inner.write().await;
        if inner.objects.contains_key(id) {
            return false;
        }

        inner.objects.insert(id.to_owned(), meta);
        true
    }

    pub async fn extend_object(&self, id: &str, meta: ObjectMeta) {
        self.inner.write().await.objects.insert(id.to_owned(), meta);
    }

    #[cfg(test)]
    pub async fn get_object(&self, id: &str) -> Option<ObjectMeta> {
        self.inner.read().await.objects.get(id).cloned()
    }

    #[cfg(test)]
    pub async fn object_ids(&self) -> Vec<String> {
        self.inner.read().await.objects.keys().cloned().collect()
    }

    #[cfg(test)]
    pub async fn get_state(&self, id: &str) -> Option<State> {
        self.inner.read().await.states.get(id).cloned()
    }

    #[cfg(test)]
    pub async fn state_ids(&self) -> Vec<String> {
        self.inner.read().await.states.keys().cloned().collect()
    }

    pub async fn set_state(&self, id: &str, value: impl Into<Value>, ack: bool) {
        self.apply(vec![StateWrite {
            id: id.to_owned(),
            value: value.into(),
            ack,
            label: None,
        }])
        .await;
    }

    /// User-originated write, i.e. not acknowledged by the adapter.
    #[cfg(test)]
    pub async fn write(&self, id: &str, value: impl Into<Value>) {
        self.set_state(id, value, false).await;
    }

    pub async fn apply(&self, writes: Vec<StateWrite>) {
        let mut inner = self.inner.write().await;

        for write in writes {
            let change = StateChange {
                id: write.id.clone(),
                value: write.value.clone(),
                ack: write.ack,
            };

            inner.states.insert(
                write.id,
                State {
                    value: write.value,
                    ack: write.ack,
                    label: write.label,
                },
            );

            inner.subscriptions.retain(|sub| {
                if !sub.pattern.matches(&change.id) {
                    return true;
                }
                sub.tx.send(change.clone()).is_ok()
            });
        }
    }

    /// Delivers every subsequent change of a matching state id, in write order.
    pub async fn subscribe(&self, pattern: &str) -> mpsc::UnboundedReceiver<StateChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.subscriptions.push(Subscription {
            pattern: StatePattern::new(pattern),
            tx,
        });
        rx
    }
}

/// Glob over state ids where `*` matches any (possibly empty) run of characters.
#[derive(Debug, Clone)]
pub struct StatePattern {
    parts: Vec<String>,
}

impl StatePattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            parts: pattern.split('*').map(str::to_owned).collect(),
        }
    }

    pub fn matches(&self, id: &str) -> bool {
        let (first, rest) = match self.parts.split_first() {
            Some(split) => split,
            None => return id.is_empty(),
        };

        let Some(mut remaining) = id.strip_prefix(first.as_str()) else {
            return false;
        };

        let Some((last, middle)) = rest.split_last() else {
            return remaining.is_empty();
        };

        for part in middle {
            match remaining.find(part.as_str()) {
                Some(pos) => remaining = &remaining[pos + part.len()..],
                None => return false,
            }
        }

        remaining.len() >= last.len() && remaining.ends_with(last.as_str())
    }
}
