use std::collections::HashMap;
use std::sync::Arc;

use super::buffer::PathBuffer;
use super::ActorId;

/// Path Buffers of all vehicles, keyed by actor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BufferDirectory {
    buffers: HashMap<ActorId, PathBuffer>,
}

impl BufferDirectory {
    pub fn with_capacity(capacity: usize) -> Self {
        BufferDirectory { buffers: HashMap::with_capacity(capacity) }
    }

    pub fn get(&self, actor: ActorId) -> Option<&PathBuffer> {
        self.buffers.get(&actor)
    }

    pub fn insert(&mut self, actor: ActorId, buffer: PathBuffer) -> Option<PathBuffer> {
        self.buffers.insert(actor, buffer)
    }

    pub fn remove(&mut self, actor: ActorId) -> Option<PathBuffer> {
        self.buffers.remove(&actor)
    }

    pub fn contains(&self, actor: ActorId) -> bool {
        self.buffers.contains_key(&actor)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn actors(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.buffers.keys().cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActorId, &PathBuffer)> {
        self.buffers.iter().map(|(a, b)| (*a, b))
    }
}

/// The active / standby pair of Buffer Directories.
///
/// The active instance is the one published last; readers hold it through
/// `Arc` handles. The stage writes only the standby instance and swaps the
/// roles after publishing. Should a reader still hold the standby instance
/// from two cycles ago, `standby_mut` copies it instead of writing under the
/// reader.
#[derive(Debug)]
pub struct DirectoryPair {
    instances: [Arc<BufferDirectory>; 2],
    active: usize,
}

impl DirectoryPair {
    pub fn with_capacity(capacity: usize) -> Self {
        DirectoryPair {
            instances: [Arc::new(BufferDirectory::with_capacity(capacity)),
                        Arc::new(BufferDirectory::with_capacity(capacity))],
            active: 0,
        }
    }

    pub fn active(&self) -> &Arc<BufferDirectory> {
        &self.instances[self.active]
    }

    pub fn standby(&self) -> &Arc<BufferDirectory> {
        &self.instances[1 - self.active]
    }

    pub fn standby_mut(&mut self) -> &mut BufferDirectory {
        Arc::make_mut(&mut self.instances[1 - self.active])
    }

    /// Makes the standby instance active.
    pub fn flip(&mut self) {
        self.active = 1 - self.active;
    }

    /// Removes `actor` from both instances.
    pub fn remove(&mut self, actor: ActorId) {
        for instance in self.instances.iter_mut() {
            if instance.contains(actor) {
                Arc::make_mut(instance).remove(actor);
            }
        }
    }
}
