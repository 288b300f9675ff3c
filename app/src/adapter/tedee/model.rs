use serde::Deserialize;
use serde_json::Value;

use crate::core::flatten::sanitize_segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Bridge,
    LockPro,
    Keypad,
    LockGo,
    Gate,
    Other(i64),
}

impl DeviceType {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => DeviceType::Bridge,
            2 => DeviceType::LockPro,
            3 => DeviceType::Keypad,
            4 => DeviceType::LockGo,
            5 => DeviceType::Gate,
            other => DeviceType::Other(other),
        }
    }

    pub fn label(&self) -> Option<&'static str> {
        match self {
            DeviceType::Bridge => Some("Bridge"),
            DeviceType::LockPro => Some("Lock PRO"),
            DeviceType::Keypad => Some("Keypad"),
            DeviceType::LockGo => Some("Lock GO"),
            DeviceType::Gate => Some("Gate"),
            DeviceType::Other(_) => None,
        }
    }

    pub fn remote_commands(&self) -> &'static [RemoteSlot] {
        match self {
            DeviceType::LockPro | DeviceType::LockGo => &RemoteSlot::ALL,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Uncalibrated,
    Calibrating,
    Unlocked,
    SemiLocked,
    Unlocking,
    Locking,
    Locked,
    Pulled,
    Pulling,
    Unknown,
    Updating,
    Other(i64),
}

impl LockState {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => LockState::Uncalibrated,
            1 => LockState::Calibrating,
            2 => LockState::Unlocked,
            3 => LockState::SemiLocked,
            4 => LockState::Unlocking,
            5 => LockState::Locking,
            6 => LockState::Locked,
            7 => LockState::Pulled,
            8 => LockState::Pulling,
            9 => LockState::Unknown,
            18 => LockState::Updating,
            other => LockState::Other(other),
        }
    }

    pub fn label(&self) -> Option<&'static str> {
        match self {
            LockState::Uncalibrated => Some("Uncalibrated"),
            LockState::Calibrating => Some("Calibrating"),
            LockState::Unlocked => Some("Unlocked"),
            LockState::SemiLocked => Some("Semi Locked"),
            LockState::Unlocking => Some("Unlocking"),
            LockState::Locking => Some("Locking"),
            LockState::Locked => Some("Locked"),
            LockState::Pulled => Some("Pulled"),
            LockState::Pulling => Some("Pulling"),
            LockState::Unknown => Some("Unknown"),
            LockState::Updating => Some("Updating"),
            LockState::Other(_) => None,
        }
    }
}

/// User-writable command slot below `{device}.remote`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteSlot {
    Refresh,
    Lock,
    Unlock,
    Pull,
}

impl RemoteSlot {
    pub const ALL: [RemoteSlot; 4] = [RemoteSlot::Refresh, RemoteSlot::Lock, RemoteSlot::Unlock, RemoteSlot::Pull];

    pub fn name(&self) -> &'static str {
        match self {
            RemoteSlot::Refresh => "refresh",
            RemoteSlot::Lock => "lock",
            RemoteSlot::Unlock => "unlock",
            RemoteSlot::Pull => "pull",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        RemoteSlot::ALL.into_iter().find(|slot| slot.name() == name)
    }
}

pub const REMOTE_CHANNEL: &str = "remote";

pub fn remote_slot_id(device_id: &str, slot: RemoteSlot) -> String {
    format!("{}.{}.{}", device_id, REMOTE_CHANNEL, slot.name())
}

/// Unlock modes as understood by the bridge.
pub const UNLOCK_MODES: [(i64, &str); 4] = [
    (0, "Normal"),
    (2, "Force"),
    (3, "Without pull"),
    (4, "Unlock or pull"),
];

pub fn sanitize_id(raw: &str) -> String {
    sanitize_segment(raw)
}

/// Bridge ids arrive as numbers in device lists and webhooks.
pub fn id_to_string(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Sanitized id used in the state tree
    pub id: String,
    /// Id as reported by the bridge, used in command URLs
    pub bridge_id: String,
    pub name: String,
    pub device_type: DeviceType,
    pub lock_state: Option<LockState>,
    pub attributes: Value,
}

#[derive(Deserialize)]
struct DeviceDto {
    id: Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    device_type: Option<i64>,
    #[serde(default)]
    state: Option<i64>,
}

impl Device {
    pub fn from_payload(payload: &Value) -> anyhow::Result<Self> {
        let dto = DeviceDto::deserialize(payload)?;
        let bridge_id = id_to_string(&dto.id).ok_or_else(|| anyhow::anyhow!("Device without usable id"))?;
        let id = sanitize_id(&bridge_id);

        Ok(Self {
            name: dto.name.unwrap_or_else(|| id.clone()),
            id,
            bridge_id,
            device_type: DeviceType::from_code(dto.device_type.unwrap_or_default()),
            lock_state: dto.state.map(LockState::from_code),
            attributes: payload.clone(),
        })
    }

    pub fn remote_commands(&self) -> &'static [RemoteSlot] {
        self.device_type.remote_commands()
    }
}
