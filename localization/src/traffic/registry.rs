use std::collections::{HashMap, HashSet};

use super::ActorId;

/// Ordered list of live vehicles with a dense index per vehicle. The index
/// is the vehicle's slot in every output frame and decides which worker
/// range it falls into. Mutated only between cycles.
#[derive(Debug, Default, Clone)]
pub struct VehicleRegistry {
    actors: Vec<ActorId>,
    index: HashMap<ActorId, usize>,
}

/// Registration changes applied by one roster update.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RosterChange {
    pub added: Vec<ActorId>,
    pub removed: Vec<ActorId>,
}

impl VehicleRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        VehicleRegistry {
            actors: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn actors(&self) -> &[ActorId] {
        &self.actors
    }

    pub fn index_of(&self, actor: ActorId) -> Option<usize> {
        self.index.get(&actor).cloned()
    }

    pub fn contains(&self, actor: ActorId) -> bool {
        self.index.contains_key(&actor)
    }

    pub fn register(&mut self, actor: ActorId) -> bool {
        if self.index.contains_key(&actor) {
            return false;
        }
        self.index.insert(actor, self.actors.len());
        self.actors.push(actor);
        true
    }

    /// Removes `actor`, keeping the order of the remaining vehicles.
    pub fn deregister(&mut self, actor: ActorId) -> bool {
        match self.index.remove(&actor) {
            Some(idx) => {
                self.actors.remove(idx);
                for (i, a) in self.actors.iter().enumerate().skip(idx) {
                    self.index.insert(*a, i);
                }
                true
            }
            None => false,
        }
    }

    /// Makes the registry hold exactly the vehicles of `roster`. Known
    /// vehicles keep their relative order; new ones are appended in roster
    /// order.
    pub fn sync<I: IntoIterator<Item = ActorId>>(&mut self, roster: I) -> RosterChange {
        let roster: Vec<ActorId> = roster.into_iter().collect();
        let keep: HashSet<ActorId> = roster.iter().cloned().collect();

        let mut change = RosterChange::default();
        let stale: Vec<ActorId> = self.actors.iter().cloned().filter(|a| !keep.contains(a)).collect();
        for a in stale {
            self.deregister(a);
            change.removed.push(a);
        }
        for a in roster {
            if self.register(a) {
                change.added.push(a);
            }
        }
        change
    }
}
