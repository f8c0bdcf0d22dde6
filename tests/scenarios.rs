//! End-to-end scenarios exercising the public engine API: pulses, holds,
//! identity, hierarchy, locks, and snapshot round trips.

use chrono::{Duration, TimeZone, Utc};

use dwell::{
    Engine, EventType, LocationConfig, LockState, OccupancyEvent, OccupancyStrategy, Snapshot,
    SnapshotEntry, Timestamp, TransitionKind,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

fn mins(m: i64) -> Duration {
    Duration::minutes(m)
}

fn kitchen_only() -> Engine {
    Engine::new(vec![
        LocationConfig::new("kitchen")
            .with_timeout("motion", 10)
            .with_timeout("presence", 2),
    ])
    .unwrap()
}

fn momentary(location: &str, ts: Timestamp) -> OccupancyEvent {
    OccupancyEvent::new(location, EventType::Momentary, "motion", "pir", ts)
}

#[test]
fn motion_pulse_starts_a_timer() {
    init_tracing();
    let mut engine = kitchen_only();

    let result = engine.handle_event(&momentary("kitchen", t0()), t0()).unwrap();
    let kitchen = engine.state("kitchen").unwrap();
    assert!(kitchen.is_occupied);
    assert_eq!(kitchen.occupied_until, Some(t0() + mins(10)));
    assert_eq!(result.next_expiration, Some(t0() + mins(10)));

    let result = engine.check_timeouts(t0() + mins(10));
    assert_eq!(result.transitions.len(), 1);
    assert_eq!(result.transitions[0].kind, TransitionKind::Vacated);
    assert!(engine.state("kitchen").unwrap().is_default());
    assert_eq!(result.next_expiration, None);
}

#[test]
fn timer_never_shortens() {
    init_tracing();
    let mut engine = kitchen_only();
    engine.handle_event(&momentary("kitchen", t0()), t0()).unwrap();

    let later = t0() + mins(5);
    engine
        .handle_event(&momentary("kitchen", later).with_duration(mins(3)), later)
        .unwrap();
    // 12:05 + 3m would be 12:08; the running 12:10 timer wins.
    assert_eq!(
        engine.state("kitchen").unwrap().occupied_until,
        Some(t0() + mins(10))
    );
}

#[test]
fn hold_release_uses_fudge_factor() {
    init_tracing();
    let mut engine = kitchen_only();

    let result = engine
        .handle_event(
            &OccupancyEvent::new("kitchen", EventType::HoldStart, "presence", "radar", t0()),
            t0(),
        )
        .unwrap();
    let kitchen = engine.state("kitchen").unwrap();
    assert_eq!(kitchen.active_holds, ["radar".to_string()].into());
    assert_eq!(kitchen.occupied_until, None);
    assert_eq!(result.next_expiration, None);

    let release = Utc.with_ymd_and_hms(2025, 1, 1, 12, 30, 0).unwrap();
    let result = engine
        .handle_event(
            &OccupancyEvent::new("kitchen", EventType::HoldEnd, "presence", "radar", release),
            release,
        )
        .unwrap();
    let kitchen = engine.state("kitchen").unwrap();
    assert!(kitchen.active_holds.is_empty());
    assert_eq!(kitchen.occupied_until, Some(release + mins(2)));
    assert_eq!(result.next_expiration, Some(release + mins(2)));
}

#[test]
fn ghost_identity_does_not_survive_vacancy() {
    init_tracing();
    let mut engine = kitchen_only();

    engine
        .handle_event(&momentary("kitchen", t0()).with_occupant("Mike"), t0())
        .unwrap();
    assert!(engine.state("kitchen").unwrap().active_occupants.contains("Mike"));

    engine.check_timeouts(t0() + mins(10));
    let kitchen = engine.state("kitchen").unwrap();
    assert!(!kitchen.is_occupied);
    assert!(kitchen.active_occupants.is_empty());
}

#[test]
fn individual_departure_leaves_the_other_occupant() {
    init_tracing();
    let mut engine = kitchen_only();

    for (source, occupant) in [("ble_mike", "Mike"), ("ble_marla", "Marla")] {
        engine
            .handle_event(
                &OccupancyEvent::new("kitchen", EventType::HoldStart, "presence", source, t0())
                    .with_occupant(occupant),
                t0(),
            )
            .unwrap();
    }

    let departure = t0() + mins(5);
    engine
        .handle_event(
            &OccupancyEvent::new("kitchen", EventType::HoldEnd, "presence", "ble_mike", departure)
                .with_occupant("Mike"),
            departure,
        )
        .unwrap();

    let kitchen = engine.state("kitchen").unwrap();
    assert_eq!(kitchen.active_occupants, ["Marla".to_string()].into());
    assert_eq!(kitchen.active_holds, ["ble_marla".to_string()].into());
    assert!(kitchen.is_occupied);
    assert_eq!(kitchen.occupied_until, None);
}

#[test]
fn hierarchy_vacates_on_its_own_timers() {
    init_tracing();
    let mut engine = Engine::new(vec![
        LocationConfig::new("main_floor").with_timeout("propagated", 5),
        LocationConfig::new("kitchen").with_parent("main_floor"),
    ])
    .unwrap();

    engine
        .handle_event(&momentary("kitchen", t0()).with_duration(mins(10)), t0())
        .unwrap();
    assert_eq!(
        engine.state("kitchen").unwrap().occupied_until,
        Some(t0() + mins(10))
    );
    assert_eq!(
        engine.state("main_floor").unwrap().occupied_until,
        Some(t0() + mins(10))
    );

    // No early vacancy for the floor: nothing expires before 12:10.
    let result = engine.check_timeouts(t0() + mins(9));
    assert!(result.transitions.is_empty());

    let result = engine.check_timeouts(t0() + mins(10));
    let vacated: Vec<&str> = result.transitions.iter().map(|t| t.location_id.as_str()).collect();
    assert_eq!(vacated, ["kitchen", "main_floor"]);
    assert!(engine.state("main_floor").unwrap().is_default());
}

#[test]
fn lock_gate_full_cycle() {
    init_tracing();
    let mut engine = kitchen_only();
    engine.handle_event(&momentary("kitchen", t0()), t0()).unwrap();

    engine
        .handle_event(
            &OccupancyEvent::new("kitchen", EventType::LockChange, "manual", "user", t0())
                .with_lock(LockState::LockedFrozen),
            t0(),
        )
        .unwrap();

    // Frozen: motion is discarded.
    let result = engine.handle_event(&momentary("kitchen", t0() + mins(1)), t0() + mins(1)).unwrap();
    assert!(result.transitions.is_empty());

    // Frozen: a manual force-vacant still lands, and keeps the lock.
    engine
        .handle_event(
            &OccupancyEvent::new("kitchen", EventType::Manual, "manual", "button", t0() + mins(2))
                .with_force(false),
            t0() + mins(2),
        )
        .unwrap();
    let kitchen = engine.state("kitchen").unwrap();
    assert!(!kitchen.is_occupied);
    assert_eq!(kitchen.lock_state, LockState::LockedFrozen);

    // Unlocked again: motion behaves normally.
    engine
        .handle_event(
            &OccupancyEvent::new("kitchen", EventType::LockChange, "manual", "user", t0() + mins(3))
                .with_lock(LockState::Unlocked),
            t0() + mins(3),
        )
        .unwrap();
    engine.handle_event(&momentary("kitchen", t0() + mins(4)), t0() + mins(4)).unwrap();
    assert!(engine.state("kitchen").unwrap().is_occupied);
}

#[test]
fn restore_applies_stale_data_protection() {
    init_tracing();
    let late = Utc.with_ymd_and_hms(2025, 1, 1, 13, 0, 0).unwrap();
    let stale_entry = SnapshotEntry {
        is_occupied: true,
        occupied_until: Some(t0()),
        active_occupants: vec![],
        active_holds: vec![],
        lock_state: LockState::Unlocked,
    };

    // Expired timer, nothing live behind it: restored vacant.
    let snapshot: Snapshot = [("kitchen".to_string(), stale_entry.clone())].into();
    let mut engine = kitchen_only();
    engine.restore_state(&snapshot, late);
    assert!(engine.state("kitchen").unwrap().is_default());

    // Same timer but a live hold: restored verbatim.
    let held_entry = SnapshotEntry {
        active_holds: vec!["radar".into()],
        ..stale_entry.clone()
    };
    let snapshot: Snapshot = [("kitchen".to_string(), held_entry)].into();
    let mut engine = kitchen_only();
    engine.restore_state(&snapshot, late);
    let kitchen = engine.state("kitchen").unwrap();
    assert!(kitchen.is_occupied);
    assert!(kitchen.active_holds.contains("radar"));

    // Same timer but frozen: locks are timeless, restored verbatim.
    let frozen_entry = SnapshotEntry {
        lock_state: LockState::LockedFrozen,
        ..stale_entry
    };
    let snapshot: Snapshot = [("kitchen".to_string(), frozen_entry)].into();
    let mut engine = kitchen_only();
    engine.restore_state(&snapshot, late);
    let kitchen = engine.state("kitchen").unwrap();
    assert!(kitchen.is_occupied);
    assert_eq!(kitchen.lock_state, LockState::LockedFrozen);
    assert_eq!(kitchen.occupied_until, Some(t0()));
}

// ── Universal invariants ─────────────────────────────────

const HOUSE: [&str; 5] = ["home", "main_floor", "kitchen", "living_room", "backyard"];

fn busy_house() -> Engine {
    Engine::new(vec![
        LocationConfig::new("home"),
        LocationConfig::new("main_floor").with_parent("home"),
        LocationConfig::new("kitchen")
            .with_parent("main_floor")
            .with_timeout("motion", 10)
            .with_timeout("presence", 2),
        LocationConfig::new("living_room")
            .with_parent("main_floor")
            .with_strategy(OccupancyStrategy::FollowParent),
        LocationConfig::new("backyard").with_parent("home").contributes(false),
    ])
    .unwrap()
}

/// A scripted day: pulses, identity, holds, a lock cycle, a forced
/// vacancy, and sweeps in between.
fn script() -> Vec<(OccupancyEvent, Timestamp)> {
    let s = |m: i64| t0() + mins(m);
    vec![
        (momentary("kitchen", s(0)).with_occupant("Mike"), s(0)),
        (momentary("backyard", s(1)), s(1)),
        (
            OccupancyEvent::new("kitchen", EventType::HoldStart, "presence", "radar", s(2)),
            s(2),
        ),
        (
            OccupancyEvent::new("main_floor", EventType::LockChange, "manual", "user", s(3))
                .with_lock(LockState::LockedFrozen),
            s(3),
        ),
        (momentary("living_room", s(4)), s(4)),
        (
            OccupancyEvent::new("main_floor", EventType::LockChange, "manual", "user", s(5))
                .with_lock(LockState::Unlocked),
            s(5),
        ),
        (
            OccupancyEvent::new("kitchen", EventType::HoldEnd, "presence", "radar", s(6)),
            s(6),
        ),
        (
            OccupancyEvent::new("kitchen", EventType::Manual, "manual", "button", s(7))
                .with_force(false),
            s(7),
        ),
        (momentary("kitchen", s(8)), s(8)),
    ]
}

fn assert_invariants(engine: &Engine) {
    for id in HOUSE {
        let state = engine.state(id).unwrap();
        if !state.is_occupied {
            // Vacancy means nothing lingers: no identity, no holds, no timer.
            assert!(state.active_occupants.is_empty(), "{id}: occupants on vacant");
            assert!(state.active_holds.is_empty(), "{id}: holds on vacant");
            assert_eq!(state.occupied_until, None, "{id}: timer on vacant");
        }
        if !state.active_holds.is_empty() || !state.active_occupants.is_empty() {
            assert!(state.is_occupied, "{id}: held but not occupied");
        }
    }
}

fn oracle_of(engine: &Engine) -> Option<Timestamp> {
    HOUSE
        .iter()
        .map(|id| engine.state(id).unwrap())
        .filter(|s| s.active_holds.is_empty() && s.lock_state == LockState::Unlocked)
        .filter_map(|s| s.occupied_until)
        .min()
}

#[test]
fn invariants_hold_across_a_scripted_day() {
    init_tracing();
    let mut engine = busy_house();

    for (event, now) in script() {
        let result = engine.handle_event(&event, now).unwrap();
        assert_invariants(&engine);
        assert_eq!(result.next_expiration, oracle_of(&engine));

        let sweep = engine.check_timeouts(now + mins(1));
        assert_invariants(&engine);
        assert_eq!(sweep.next_expiration, oracle_of(&engine));
    }
}

#[test]
fn identical_inputs_give_identical_results() {
    init_tracing();
    let mut left = busy_house();
    let mut right = busy_house();

    for (event, now) in script() {
        let a = left.handle_event(&event, now).unwrap();
        let b = right.handle_event(&event, now).unwrap();
        assert_eq!(a, b);
        assert_eq!(left.check_timeouts(now + mins(1)), right.check_timeouts(now + mins(1)));
    }
    assert_eq!(left.export_state(), right.export_state());
}

#[test]
fn export_restore_round_trip_is_idempotent() {
    init_tracing();
    let mut engine = busy_house();
    let s = |m: i64| t0() + mins(m);

    engine.handle_event(&momentary("kitchen", s(0)).with_occupant("Mike"), s(0)).unwrap();
    engine
        .handle_event(
            &OccupancyEvent::new("kitchen", EventType::HoldStart, "presence", "radar", s(1)),
            s(1),
        )
        .unwrap();
    engine
        .handle_event(
            &OccupancyEvent::new("backyard", EventType::LockChange, "manual", "user", s(2))
                .with_lock(LockState::LockedFrozen),
            s(2),
        )
        .unwrap();

    let snapshot = engine.export_state();
    let now = s(3);

    let mut restored = busy_house();
    restored.restore_state(&snapshot, now);
    restored.check_timeouts(now);
    engine.check_timeouts(now);

    for id in HOUSE {
        assert_eq!(
            restored.state(id).unwrap(),
            engine.state(id).unwrap(),
            "{id} differs after round trip"
        );
    }
    assert_eq!(restored.export_state(), snapshot);
}
