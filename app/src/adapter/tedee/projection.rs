use serde_json::{Value, json};

use super::model::{DeviceType, LockState, RemoteSlot, remote_slot_id};
use crate::core::flatten::flatten;
use crate::core::state::StateWrite;

type Labeler = fn(i64) -> Option<&'static str>;

/// Maps leaf keys carrying coded enums to their label lookup.
#[derive(Clone)]
pub struct CodeTables {
    tables: Vec<(&'static str, Labeler)>,
}

impl Default for CodeTables {
    fn default() -> Self {
        Self {
            tables: vec![
                ("type", device_type_label as Labeler),
                ("deviceType", device_type_label as Labeler),
                ("state", lock_state_label as Labeler),
            ],
        }
    }
}

fn device_type_label(code: i64) -> Option<&'static str> {
    DeviceType::from_code(code).label()
}

fn lock_state_label(code: i64) -> Option<&'static str> {
    LockState::from_code(code).label()
}

impl CodeTables {
    /// Only top-level keys of the projected payload carry coded values.
    fn label(&self, target_id: &str, path: &str, value: &Value) -> Option<&'static str> {
        let key = path.strip_prefix(target_id)?.strip_prefix('.')?;
        if key.contains('.') {
            return None;
        }
        let code = value.as_i64()?;

        self.tables
            .iter()
            .find(|(name, _)| *name == key)
            .and_then(|(_, labeler)| labeler(code))
    }
}

#[derive(Clone, Default)]
pub struct StateProjector {
    code_tables: CodeTables,
}

impl StateProjector {
    /// Flattens `payload` below `target_id`. With `remote` set, a top-level lock state
    /// code also yields the derived command slot toggles of that device.
    pub fn project(&self, target_id: &str, payload: &Value, remote: bool) -> Vec<StateWrite> {
        let mut writes: Vec<StateWrite> = flatten(target_id, payload)
            .into_iter()
            .map(|(path, value)| {
                let label = self.code_tables.label(target_id, &path, &value);
                StateWrite::ack(path, value).with_label(label)
            })
            .collect();

        if remote {
            if let Some(code) = payload.get("state").and_then(Value::as_i64) {
                writes.extend(derived_remote_states(target_id, LockState::from_code(code)));
            }
        }

        writes
    }
}

/// Command slot toggles implied by a lock state. Acknowledged, so they never count as user commands.
pub fn derived_remote_states(device_id: &str, state: LockState) -> Vec<StateWrite> {
    let mut writes = vec![];

    if matches!(state, LockState::Unlocked | LockState::Pulled | LockState::Updating) {
        writes.push(StateWrite::ack(remote_slot_id(device_id, RemoteSlot::Lock), false));
        writes.push(StateWrite::ack(remote_slot_id(device_id, RemoteSlot::Unlock), json!(0)));
    }

    match state {
        LockState::Pulled => {
            writes.push(StateWrite::ack(remote_slot_id(device_id, RemoteSlot::Pull), true));
        }
        LockState::Locked => {
            writes.push(StateWrite::ack(remote_slot_id(device_id, RemoteSlot::Lock), true));
            writes.push(StateWrite::ack(remote_slot_id(device_id, RemoteSlot::Pull), false));
        }
        _ => {}
    }

    writes
}
