use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// UTC wall-clock instant — the only time type. The engine never reads a
/// clock; every instant is supplied by the caller.
pub type Timestamp = DateTime<Utc>;

/// Type of location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationKind {
    /// A physical area with sensors of its own.
    #[default]
    Area,
    /// A container that exists only to aggregate children (a floor, a zone).
    Virtual,
}

/// How a location derives occupancy it did not sense itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OccupancyStrategy {
    #[default]
    Independent,
    /// Reports occupied whenever its parent is occupied, even without
    /// sensors of its own.
    FollowParent,
}

/// The mechanical behavior of an occupancy event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Transient signal (motion, door trip); starts or extends a timer.
    Momentary,
    /// Continuous assertion begins (radar, media start); pauses the timer.
    HoldStart,
    /// Continuous assertion ends; starts the trailing timer.
    HoldEnd,
    /// Direct override.
    Manual,
    LockChange,
    /// Internal bubble-up; never originates from a sensor.
    Propagated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockState {
    #[default]
    Unlocked,
    LockedFrozen,
}

/// Static rule set for one location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationConfig {
    pub id: String,
    pub parent_id: Option<String>,
    pub kind: LocationKind,
    pub occupancy_strategy: OccupancyStrategy,
    /// If false, occupancy stops here and never bubbles to the parent.
    pub contributes_to_parent: bool,
    /// Timeout per event category, in whole minutes. Categories missing
    /// here fall back to the engine defaults.
    pub timeouts: BTreeMap<String, i64>,
}

impl LocationConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            kind: LocationKind::default(),
            occupancy_strategy: OccupancyStrategy::default(),
            contributes_to_parent: true,
            timeouts: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_kind(mut self, kind: LocationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_strategy(mut self, strategy: OccupancyStrategy) -> Self {
        self.occupancy_strategy = strategy;
        self
    }

    pub fn contributes(mut self, contributes: bool) -> Self {
        self.contributes_to_parent = contributes;
        self
    }

    pub fn with_timeout(mut self, category: impl Into<String>, minutes: i64) -> Self {
        self.timeouts.insert(category.into(), minutes);
        self
    }
}

/// Runtime snapshot for one location. Immutable: transitions replace the
/// whole snapshot, never mutate one in place.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocationRuntimeState {
    pub is_occupied: bool,
    /// Instant at which the location goes vacant, unless a hold or identity
    /// keeps it open. Absent while occupied means indefinitely occupied.
    pub occupied_until: Option<Timestamp>,
    /// Identities currently believed present.
    pub active_occupants: BTreeSet<String>,
    /// Source ids of devices currently asserting presence.
    pub active_holds: BTreeSet<String>,
    pub lock_state: LockState,
}

impl LocationRuntimeState {
    /// Vacant, unlocked, nothing tracked: the snapshot every location
    /// starts with.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Occupied with no expiry: only an explicit event can vacate it.
    pub fn is_indefinite(&self) -> bool {
        self.is_occupied && self.occupied_until.is_none()
    }
}

/// An occupancy event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyEvent {
    pub location_id: String,
    pub event_type: EventType,
    /// Config key for the timeout lookup (e.g. `"motion"`, `"presence"`).
    pub category: String,
    /// Device id, or the child location id for propagated events.
    pub source_id: String,
    pub timestamp: Timestamp,
    pub occupant_id: Option<String>,
    /// Explicit duration override; wins over the config lookup.
    pub duration: Option<Duration>,
    /// `MANUAL` only: `true` forces occupied, `false` forces vacant, absent
    /// processes the event as an ordinary pulse.
    pub force_state: Option<bool>,
    /// `LOCK_CHANGE` only: the lock value to set. Absent toggles.
    pub lock_state: Option<LockState>,
}

impl OccupancyEvent {
    pub fn new(
        location_id: impl Into<String>,
        event_type: EventType,
        category: impl Into<String>,
        source_id: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            location_id: location_id.into(),
            event_type,
            category: category.into(),
            source_id: source_id.into(),
            timestamp,
            occupant_id: None,
            duration: None,
            force_state: None,
            lock_state: None,
        }
    }

    pub fn with_occupant(mut self, occupant_id: impl Into<String>) -> Self {
        self.occupant_id = Some(occupant_id.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_force(mut self, occupied: bool) -> Self {
        self.force_state = Some(occupied);
        self
    }

    pub fn with_lock(mut self, lock_state: LockState) -> Self {
        self.lock_state = Some(lock_state);
        self
    }
}

/// What changed, relative to the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Occupied,
    Extended,
    Vacated,
    IdentityChanged,
    HoldChanged,
    LockChanged,
}

/// Which driver produced the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    /// Direct result of a caller-supplied event.
    Event,
    /// Synthetic bubble-up from a descendant.
    Propagated,
    /// Timer expiry during a timeout sweep.
    Timeout,
}

/// A record of one observable state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub location_id: String,
    pub previous: LocationRuntimeState,
    pub current: LocationRuntimeState,
    pub kind: TransitionKind,
    pub cause: TransitionCause,
}

/// Instructions for the host: what changed, and when to call back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineResult {
    /// Transitions in walk order: originating location first, ancestors
    /// bottom-up.
    pub transitions: Vec<Transition>,
    /// Earliest instant any location expires. The host should arm a timer
    /// and call `check_timeouts` at (or after) this instant.
    pub next_expiration: Option<Timestamp>,
}
