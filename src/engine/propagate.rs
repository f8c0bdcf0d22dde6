use chrono::Duration;
use tracing::debug;

use crate::model::*;

use super::{Engine, kernel};

const PROPAGATED_CATEGORY: &str = "propagated";

/// Whether a location's state change is worth telling its parent about.
///
/// Becoming occupied, extending a timer, entering or leaving the indefinite
/// state, and identity changes all propagate. Vacating propagates only so a
/// hold keyed by this child can be released; plain vacancy never bubbles.
fn should_propagate(old: &LocationRuntimeState, new: &LocationRuntimeState) -> bool {
    match (old.is_occupied, new.is_occupied) {
        (false, true) => true,
        (true, false) => true,
        (false, false) => false,
        (true, true) => match (old.occupied_until, new.occupied_until) {
            (Some(a), Some(b)) if b > a => true,
            (Some(_), None) => true,
            (None, Some(_)) => true,
            _ => old.active_occupants != new.active_occupants,
        },
    }
}

/// Choose the synthetic event the parent should see for the child's new
/// state, or `None` when there is nothing to say.
fn synthetic_event(
    child_id: &str,
    child: &LocationRuntimeState,
    parent_id: &str,
    parent: &LocationRuntimeState,
    now: Timestamp,
) -> Option<OccupancyEvent> {
    let parent_holds_child = parent.active_holds.contains(child_id);

    if child.is_indefinite() {
        // An indefinite child holds the parent, keyed by the child's id.
        return Some(OccupancyEvent::new(
            parent_id,
            EventType::HoldStart,
            PROPAGATED_CATEGORY,
            child_id,
            now,
        ));
    }

    if let Some(until) = child.occupied_until {
        let remaining = until - now;
        if remaining <= Duration::zero() {
            // Already expired; only a held parent needs to hear about it.
            return parent_holds_child.then(|| {
                OccupancyEvent::new(parent_id, EventType::HoldEnd, PROPAGATED_CATEGORY, child_id, now)
            });
        }
        if parent_holds_child {
            // Release the hold; the explicit duration lands the parent's
            // trailing timer exactly on the child's own expiry.
            return Some(
                OccupancyEvent::new(parent_id, EventType::HoldEnd, PROPAGATED_CATEGORY, child_id, now)
                    .with_duration(remaining),
            );
        }
        return Some(
            OccupancyEvent::new(
                parent_id,
                EventType::Propagated,
                PROPAGATED_CATEGORY,
                child_id,
                now,
            )
            .with_duration(remaining),
        );
    }

    // Child vacant: vacancy does not bubble, but it does release a hold.
    parent_holds_child.then(|| {
        OccupancyEvent::new(parent_id, EventType::HoldEnd, PROPAGATED_CATEGORY, child_id, now)
    })
}

impl Engine {
    /// Walk the ancestor chain after a kernel transition, applying synthetic
    /// events until a filter stops the walk or a parent absorbs the change
    /// without an observable transition.
    pub(super) fn propagate_up(
        &mut self,
        origin_id: &str,
        origin_old: &LocationRuntimeState,
        origin_new: &LocationRuntimeState,
        now: Timestamp,
        out: &mut Vec<Transition>,
    ) {
        let mut child_id = origin_id.to_string();
        let mut old = origin_old.clone();
        let mut new = origin_new.clone();

        loop {
            if !should_propagate(&old, &new) {
                return;
            }
            let Some(child_config) = self.configs.get(&child_id) else {
                return;
            };
            // The backyard filter: a non-contributing child stops the walk.
            if !child_config.contributes_to_parent {
                return;
            }
            let Some(parent_id) = child_config.parent_id.clone() else {
                return;
            };
            let Some(parent_state) = self.states.get(&parent_id).cloned() else {
                return;
            };
            // The lock filter: propagated events never pierce a frozen parent.
            if parent_state.lock_state == LockState::LockedFrozen {
                return;
            }

            let Some(event) = synthetic_event(&child_id, &new, &parent_id, &parent_state, now)
            else {
                return;
            };
            let merged = match event.event_type {
                EventType::HoldStart | EventType::Propagated => Some(new.active_occupants.clone()),
                _ => None,
            };

            let parent_config = self
                .configs
                .get(&parent_id)
                .expect("validated parent is configured");
            let Some((parent_new, kind)) =
                kernel::apply(&parent_state, &event, now, parent_config, merged.as_ref())
            else {
                return;
            };

            debug!("{parent_id}: {kind:?} (propagated from {child_id})");
            self.states.insert(parent_id.clone(), parent_new.clone());
            out.push(Transition {
                location_id: parent_id.clone(),
                previous: parent_state.clone(),
                current: parent_new.clone(),
                kind,
                cause: TransitionCause::Propagated,
            });

            child_id = parent_id;
            old = parent_state;
            new = parent_new;
        }
    }
}
