//! Pure, deterministic hierarchical occupancy engine.
//!
//! Locations (rooms, floors, zones) form a configured parent/child forest.
//! The engine consumes occupancy events (motion pulses, presence holds,
//! manual overrides, lock changes) and maintains an immutable runtime
//! snapshot per location: whether it is occupied, who is believed present,
//! and when it next transitions.
//!
//! The engine is time-agnostic and I/O-free. The caller supplies `now` on
//! every call and receives the earliest instant the engine wants to be
//! re-invoked (`next_expiration`); a host collaborator owns timers,
//! transport, and persistence.
//!
//! ```
//! use chrono::{Duration, TimeZone, Utc};
//! use dwell::{Engine, EventType, LocationConfig, OccupancyEvent};
//!
//! let mut engine = Engine::new(vec![
//!     LocationConfig::new("main_floor"),
//!     LocationConfig::new("kitchen")
//!         .with_parent("main_floor")
//!         .with_timeout("motion", 10),
//! ])
//! .unwrap();
//!
//! let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
//! let event = OccupancyEvent::new("kitchen", EventType::Momentary, "motion", "pir", now);
//! let result = engine.handle_event(&event, now).unwrap();
//!
//! // The kitchen is occupied and so is the floor above it.
//! assert!(engine.state("kitchen").unwrap().is_occupied);
//! assert!(engine.state("main_floor").unwrap().is_occupied);
//!
//! // Wake me up when the kitchen timer runs out.
//! assert_eq!(result.next_expiration, Some(now + Duration::minutes(10)));
//! engine.check_timeouts(now + Duration::minutes(10));
//! assert!(!engine.state("kitchen").unwrap().is_occupied);
//! ```

pub mod engine;
mod limits;
pub mod model;

pub use engine::snapshot::{Snapshot, SnapshotEntry};
pub use engine::{Engine, EngineError, HierarchyIndex};
pub use model::{
    EngineResult, EventType, LocationConfig, LocationKind, LocationRuntimeState, LockState,
    OccupancyEvent, OccupancyStrategy, Timestamp, Transition, TransitionCause, TransitionKind,
};
