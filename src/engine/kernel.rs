use std::collections::BTreeSet;

use chrono::Duration;

use crate::model::*;

/// Fallback timeout for pulse events whose category is not configured.
pub(crate) const DEFAULT_PULSE_MINUTES: i64 = 10;

/// Fallback trailing timeout applied when the last hold releases.
pub(crate) const DEFAULT_TRAILING_MINUTES: i64 = 2;

/// Replacement snapshot for a location going vacant. Identity does not
/// survive vacancy; only the lock carries over.
pub(crate) fn vacated(state: &LocationRuntimeState) -> LocationRuntimeState {
    LocationRuntimeState {
        lock_state: state.lock_state,
        ..LocationRuntimeState::default()
    }
}

fn effective_duration(
    event: &OccupancyEvent,
    config: &LocationConfig,
    fallback_minutes: i64,
) -> Duration {
    if let Some(duration) = event.duration {
        return duration;
    }
    let minutes = config
        .timeouts
        .get(&event.category)
        .copied()
        .unwrap_or(fallback_minutes);
    Duration::minutes(minutes)
}

/// Classify an observable change between two snapshots. `None` means the
/// snapshots are equal and no transition is emitted.
fn classify(old: &LocationRuntimeState, new: &LocationRuntimeState) -> Option<TransitionKind> {
    if old == new {
        return None;
    }
    let kind = match (old.is_occupied, new.is_occupied) {
        (false, true) => TransitionKind::Occupied,
        (true, false) => TransitionKind::Vacated,
        _ => {
            if old.lock_state != new.lock_state {
                TransitionKind::LockChanged
            } else if old.active_holds != new.active_holds {
                TransitionKind::HoldChanged
            } else if old.active_occupants != new.active_occupants {
                TransitionKind::IdentityChanged
            } else {
                TransitionKind::Extended
            }
        }
    };
    Some(kind)
}

/// Apply one event to one location snapshot. Pure: no clock reads, no
/// lookups beyond `config`, inputs untouched.
///
/// `merged_occupants` carries a child's identity set for synthetic
/// propagation events; `None` for sensor-originated events.
pub(crate) fn apply(
    state: &LocationRuntimeState,
    event: &OccupancyEvent,
    now: Timestamp,
    config: &LocationConfig,
    merged_occupants: Option<&BTreeSet<String>>,
) -> Option<(LocationRuntimeState, TransitionKind)> {
    // Lock gate: a frozen location only listens to MANUAL and LOCK_CHANGE.
    if state.lock_state == LockState::LockedFrozen
        && !matches!(event.event_type, EventType::Manual | EventType::LockChange)
    {
        return None;
    }

    if event.event_type == EventType::LockChange {
        let next = event.lock_state.unwrap_or(match state.lock_state {
            LockState::Unlocked => LockState::LockedFrozen,
            LockState::LockedFrozen => LockState::Unlocked,
        });
        let mut new_state = state.clone();
        new_state.lock_state = next;
        return classify(state, &new_state).map(|kind| (new_state, kind));
    }

    if event.event_type == EventType::Manual {
        match event.force_state {
            Some(true) => {
                let mut new_state = state.clone();
                new_state.is_occupied = true;
                // Holds dominate a finite manual override.
                new_state.occupied_until = if new_state.active_holds.is_empty() {
                    event.duration.map(|d| now + d)
                } else {
                    None
                };
                return classify(state, &new_state).map(|kind| (new_state, kind));
            }
            Some(false) => {
                let new_state = vacated(state);
                return classify(state, &new_state).map(|kind| (new_state, kind));
            }
            None => {} // processed as an ordinary pulse below
        }
    }

    // Identity update.
    let mut occupants = state.active_occupants.clone();
    if let Some(who) = &event.occupant_id {
        match event.event_type {
            EventType::HoldStart | EventType::Momentary => {
                occupants.insert(who.clone());
            }
            EventType::HoldEnd => {
                occupants.remove(who);
            }
            _ => {}
        }
    }
    if let Some(merged) = merged_occupants {
        occupants.extend(merged.iter().cloned());
    }

    // Hold-set update.
    let mut holds = state.active_holds.clone();
    match event.event_type {
        EventType::HoldStart => {
            holds.insert(event.source_id.clone());
        }
        EventType::HoldEnd => {
            holds.remove(&event.source_id);
        }
        _ => {}
    }

    // Expiration.
    let mut occupied_until = state.occupied_until;
    let mut is_occupied = state.is_occupied;

    if !holds.is_empty() {
        // Held: indefinitely occupied, no timer.
        occupied_until = None;
        is_occupied = true;
    } else {
        match event.event_type {
            EventType::Momentary | EventType::Propagated | EventType::Manual => {
                // Pulse: timers never shorten. A pulse cannot re-hold an
                // indefinite location; it pins a concrete expiry on it.
                let expiry =
                    event.timestamp + effective_duration(event, config, DEFAULT_PULSE_MINUTES);
                occupied_until = Some(match occupied_until {
                    Some(current) => current.max(expiry),
                    None => expiry,
                });
                is_occupied = true;
            }
            EventType::HoldEnd => {
                // Releasing a hold that was never taken is a no-op; the
                // trailing timer engages only when the set became empty.
                if !state.active_holds.is_empty() {
                    if occupants.is_empty() {
                        let trailing =
                            effective_duration(event, config, DEFAULT_TRAILING_MINUTES);
                        occupied_until = Some(now + trailing);
                    } else {
                        occupied_until = None; // identities keep it open
                    }
                    is_occupied = true;
                }
            }
            EventType::HoldStart | EventType::LockChange => {
                unreachable!("handled before the expiration phase")
            }
        }
    }

    // Normalization: an expired timer with nothing live behind it means
    // vacant, and vacancy clears identity.
    if holds.is_empty() && occupants.is_empty() {
        match occupied_until {
            Some(t) if t > now => is_occupied = true,
            Some(_) => is_occupied = false,
            None => {} // keep the branch outcome (manual indefinite, or untouched)
        }
    } else {
        is_occupied = true;
    }

    let new_state = if is_occupied {
        LocationRuntimeState {
            is_occupied: true,
            occupied_until,
            active_occupants: occupants,
            active_holds: holds,
            lock_state: state.lock_state,
        }
    } else {
        vacated(state)
    };

    classify(state, &new_state).map(|kind| (new_state, kind))
}
