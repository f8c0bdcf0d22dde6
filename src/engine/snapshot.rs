use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::*;

use super::Engine;

/// On-disk state image: location id → entry. Fully-default locations are
/// omitted on export; key order carries no meaning.
pub type Snapshot = BTreeMap<String, SnapshotEntry>;

/// One location's serialized snapshot.
///
/// Deserialization is tolerant: unknown fields are ignored, malformed
/// fields warn and fall back to the vacant defaults, and malformed
/// timestamps degrade to `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotEntry {
    pub is_occupied: bool,
    pub occupied_until: Option<Timestamp>,
    pub active_occupants: Vec<String>,
    pub active_holds: Vec<String>,
    pub lock_state: LockState,
}

impl From<&LocationRuntimeState> for SnapshotEntry {
    fn from(state: &LocationRuntimeState) -> Self {
        Self {
            is_occupied: state.is_occupied,
            occupied_until: state.occupied_until,
            active_occupants: state.active_occupants.iter().cloned().collect(),
            active_holds: state.active_holds.iter().cloned().collect(),
            lock_state: state.lock_state,
        }
    }
}

impl SnapshotEntry {
    fn into_state(self) -> LocationRuntimeState {
        LocationRuntimeState {
            is_occupied: self.is_occupied,
            occupied_until: self.occupied_until,
            active_occupants: self.active_occupants.into_iter().collect(),
            active_holds: self.active_holds.into_iter().collect(),
            lock_state: self.lock_state,
        }
    }

    fn from_value(value: &Value) -> Self {
        Self {
            is_occupied: bool_field(value, "is_occupied"),
            occupied_until: timestamp_field(value, "occupied_until"),
            active_occupants: string_list_field(value, "active_occupants"),
            active_holds: string_list_field(value, "active_holds"),
            lock_state: lock_field(value, "lock_state"),
        }
    }
}

impl<'de> Deserialize<'de> for SnapshotEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

fn bool_field(value: &Value, key: &str) -> bool {
    match value.get(key) {
        Some(Value::Bool(b)) => *b,
        None | Some(Value::Null) => false,
        Some(other) => {
            warn!("snapshot: malformed {key}: {other}");
            false
        }
    }
}

fn timestamp_field(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    match value.get(key) {
        Some(Value::String(raw)) => match DateTime::parse_from_rfc3339(raw) {
            Ok(parsed) => Some(parsed.with_timezone(&Utc)),
            Err(e) => {
                warn!("snapshot: malformed {key} {raw:?}: {e}");
                None
            }
        },
        None | Some(Value::Null) => None,
        Some(other) => {
            warn!("snapshot: malformed {key}: {other}");
            None
        }
    }
}

fn string_list_field(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                other => {
                    warn!("snapshot: non-string entry in {key}: {other}");
                    None
                }
            })
            .collect(),
        None | Some(Value::Null) => Vec::new(),
        Some(other) => {
            warn!("snapshot: malformed {key}: {other}");
            Vec::new()
        }
    }
}

fn lock_field(value: &Value, key: &str) -> LockState {
    match value.get(key) {
        Some(Value::String(s)) if s == "LOCKED_FROZEN" => LockState::LockedFrozen,
        Some(Value::String(s)) if s == "UNLOCKED" => LockState::Unlocked,
        None | Some(Value::Null) => LockState::Unlocked,
        Some(other) => {
            warn!("snapshot: malformed {key}: {other}");
            LockState::Unlocked
        }
    }
}

impl Engine {
    /// Export every non-default snapshot.
    pub fn export_state(&self) -> Snapshot {
        self.states
            .iter()
            .filter(|(_, state)| !state.is_default())
            .map(|(id, state)| (id.clone(), SnapshotEntry::from(state)))
            .collect()
    }

    /// Replace the runtime state from a snapshot, with stale-data
    /// protection:
    ///
    /// 1. locked entries restore verbatim (locks are timeless);
    /// 2. entries with live holds or occupants restore verbatim;
    /// 3. entries whose timer already expired restore vacant;
    /// 4. everything else restores verbatim.
    ///
    /// Entries for unconfigured locations are skipped; configured locations
    /// missing from the snapshot reset to the vacant default. The caller is
    /// expected to follow up with `check_timeouts(now)`.
    pub fn restore_state(&mut self, snapshot: &Snapshot, now: Timestamp) -> EngineResult {
        for state in self.states.values_mut() {
            *state = LocationRuntimeState::default();
        }

        for (id, entry) in snapshot {
            if !self.configs.contains_key(id) {
                warn!("restore: skipping unknown location {id}");
                continue;
            }
            let state = entry.clone().into_state();
            let mut restored = if state.lock_state == LockState::LockedFrozen {
                state
            } else if !state.active_occupants.is_empty() || !state.active_holds.is_empty() {
                state
            } else if state.occupied_until.is_some_and(|t| t <= now) {
                debug!("restore: {id} timer already expired, restoring vacant");
                LocationRuntimeState::default()
            } else {
                state
            };
            // Repair inconsistent entries: live presence implies occupied,
            // and a vacant location carries no timer (the sweep only
            // watches occupied ones, so a stray timer would never clear).
            if !restored.active_holds.is_empty() || !restored.active_occupants.is_empty() {
                restored.is_occupied = true;
            } else if !restored.is_occupied && restored.occupied_until.is_some() {
                warn!("restore: {id} is vacant but carries a timer, dropping it");
                restored.occupied_until = None;
            }
            self.states.insert(id.clone(), restored);
        }

        EngineResult {
            transitions: Vec::new(),
            next_expiration: self.next_expiration(),
        }
    }
}
