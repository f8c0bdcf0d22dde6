mod error;
mod hierarchy;
mod kernel;
mod propagate;
pub mod snapshot;

pub use error::EngineError;
pub use hierarchy::HierarchyIndex;

use std::collections::BTreeMap;

use tracing::debug;

use crate::limits::MAX_LOCATIONS;
use crate::model::*;

/// The occupancy engine: a validated location forest plus one immutable
/// runtime snapshot per location.
///
/// Time-agnostic and I/O-free: every call takes `now` from the caller and
/// returns the next instant the engine wants to be polled
/// ([`EngineResult::next_expiration`]). Single-threaded by contract; callers
/// serialize externally.
pub struct Engine {
    pub(crate) configs: BTreeMap<String, LocationConfig>,
    hierarchy: HierarchyIndex,
    pub(crate) states: BTreeMap<String, LocationRuntimeState>,
}

impl Engine {
    /// Validate the configuration forest and initialize every location to
    /// the default vacant snapshot.
    pub fn new(configs: Vec<LocationConfig>) -> Result<Self, EngineError> {
        if configs.len() > MAX_LOCATIONS {
            return Err(EngineError::LimitExceeded("too many locations"));
        }
        let mut config_map = BTreeMap::new();
        for config in configs {
            let id = config.id.clone();
            if config_map.insert(id.clone(), config).is_some() {
                return Err(EngineError::DuplicateLocation(id));
            }
        }
        let hierarchy = HierarchyIndex::build(&config_map)?;
        let states = config_map
            .keys()
            .map(|id| (id.clone(), LocationRuntimeState::default()))
            .collect();
        Ok(Self {
            configs: config_map,
            hierarchy,
            states,
        })
    }

    /// Run the transition kernel on the targeted location, bubble the
    /// change up the ancestor chain, and recompute the wake-up instant.
    pub fn handle_event(
        &mut self,
        event: &OccupancyEvent,
        now: Timestamp,
    ) -> Result<EngineResult, EngineError> {
        let config = self
            .configs
            .get(&event.location_id)
            .ok_or_else(|| EngineError::UnknownLocation(event.location_id.clone()))?;
        let state = self
            .states
            .get(&event.location_id)
            .expect("every configured location has a snapshot");

        let mut transitions = Vec::new();
        if let Some((new_state, kind)) = kernel::apply(state, event, now, config, None) {
            debug!(
                "{}: {kind:?} ({:?} from {})",
                event.location_id, event.event_type, event.source_id
            );
            let previous = self
                .states
                .insert(event.location_id.clone(), new_state.clone())
                .expect("every configured location has a snapshot");
            transitions.push(Transition {
                location_id: event.location_id.clone(),
                previous: previous.clone(),
                current: new_state.clone(),
                kind,
                cause: TransitionCause::Event,
            });
            self.propagate_up(&event.location_id, &previous, &new_state, now, &mut transitions);
        }

        Ok(EngineResult {
            transitions,
            next_expiration: self.next_expiration(),
        })
    }

    /// Vacate every location whose timer has run out. Holds block the
    /// sweep; lingering identities do not, since vacancy clears them. A frozen
    /// location ignores expiry until it is unlocked.
    ///
    /// Vacancy never propagates: a parent vacates in the same call only
    /// because its own timer also ran out.
    pub fn check_timeouts(&mut self, now: Timestamp) -> EngineResult {
        let expired: Vec<String> = self
            .states
            .iter()
            .filter(|(_, state)| {
                state.is_occupied
                    && state.lock_state == LockState::Unlocked
                    && state.active_holds.is_empty()
                    && state.occupied_until.is_some_and(|t| t <= now)
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut swept = Vec::new();
        for id in expired {
            let previous = self
                .states
                .get(&id)
                .expect("expired id came from the state map")
                .clone();
            let vacant = kernel::vacated(&previous);
            self.states.insert(id.clone(), vacant.clone());
            swept.push((id, previous, vacant));
        }

        // Transition emission is decided against the post-sweep states, so
        // a parent and child expiring together read consistently.
        let mut transitions = Vec::new();
        for (id, previous, current) in swept {
            if self.follows_occupied_ancestor(&id) {
                // A follower still covered by an occupied ancestor has not
                // observably vacated; its fields are cleared quietly.
                debug!("{id}: timer expired, still covered by ancestor");
                continue;
            }
            debug!("{id}: vacated (timer expired)");
            transitions.push(Transition {
                location_id: id,
                previous,
                current,
                kind: TransitionKind::Vacated,
                cause: TransitionCause::Timeout,
            });
        }

        EngineResult {
            transitions,
            next_expiration: self.next_expiration(),
        }
    }

    /// Effective snapshot for a location.
    ///
    /// A `FOLLOW_PARENT` location that is vacant on its own reports occupied
    /// while its parent is effectively occupied; its stored snapshot (and
    /// `occupied_until`) is not rewritten.
    pub fn state(&self, location_id: &str) -> Result<LocationRuntimeState, EngineError> {
        if !self.configs.contains_key(location_id) {
            return Err(EngineError::UnknownLocation(location_id.to_string()));
        }
        let mut state = self
            .states
            .get(location_id)
            .expect("every configured location has a snapshot")
            .clone();
        if !state.is_occupied
            && state.lock_state == LockState::Unlocked
            && self.follows_occupied_ancestor(location_id)
        {
            state.is_occupied = true;
        }
        Ok(state)
    }

    /// Child ids of a location, for host-side tree displays.
    pub fn children(&self, location_id: &str) -> &[String] {
        self.hierarchy.children(location_id)
    }

    /// The validated parent/child adjacency.
    pub fn hierarchy(&self) -> &HierarchyIndex {
        &self.hierarchy
    }

    fn follows_occupied_ancestor(&self, id: &str) -> bool {
        self.configs
            .get(id)
            .is_some_and(|c| c.occupancy_strategy == OccupancyStrategy::FollowParent)
            && self
                .hierarchy
                .parent(id)
                .is_some_and(|parent| self.effectively_occupied(parent))
    }

    /// Occupancy as reported, following `FOLLOW_PARENT` chains upward. A
    /// frozen location never follows; the freeze fixes its report.
    fn effectively_occupied(&self, id: &str) -> bool {
        let Some(state) = self.states.get(id) else {
            return false;
        };
        if state.is_occupied {
            return true;
        }
        if state.lock_state == LockState::LockedFrozen {
            return false;
        }
        let Some(config) = self.configs.get(id) else {
            return false;
        };
        config.occupancy_strategy == OccupancyStrategy::FollowParent
            && self
                .hierarchy
                .parent(id)
                .is_some_and(|parent| self.effectively_occupied(parent))
    }

    /// Scheduler oracle: the minimum `occupied_until` across all non-held,
    /// unlocked locations. Indefinitely-held locations need no timer, and a
    /// frozen location's timer is frozen with it.
    pub(crate) fn next_expiration(&self) -> Option<Timestamp> {
        self.states
            .values()
            .filter(|state| {
                state.active_holds.is_empty() && state.lock_state == LockState::Unlocked
            })
            .filter_map(|state| state.occupied_until)
            .min()
    }
}
