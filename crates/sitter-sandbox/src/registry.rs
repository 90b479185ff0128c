//! Liveness tracking for guest resources.
//!
//! Every guest resource the host owns (parsers, trees, node descriptors,
//! queries and cursors) lives in a generational slot table. Handles carry a
//! [`HandleKey`] naming the session, the slot and the slot generation; a key
//! whose generation no longer matches, or that belongs to another session,
//! resolves to [`SitterError::UseAfterFree`] instead of a dangling address.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, SitterError};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique session id.
pub(crate) fn next_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Identifies one registered resource within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HandleKey {
    pub(crate) session: u64,
    slot: u32,
    generation: u32,
}

/// What a cursor is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CursorBinding {
    pub(crate) query: HandleKey,
    pub(crate) tree: HandleKey,
}

/// A guest resource owned by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resource {
    Parser {
        address: u32,
        timeout_micros: u64,
    },
    Tree {
        address: u32,
    },
    /// A host-allocated node descriptor, valid while `tree` is alive.
    Node {
        address: u32,
        tree: HandleKey,
    },
    Query {
        address: u32,
    },
    /// `epoch` advances whenever the guest may rewrite the capture array.
    Cursor {
        address: u32,
        binding: Option<CursorBinding>,
        epoch: u64,
    },
}

impl Resource {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Resource::Parser { .. } => "parser",
            Resource::Tree { .. } => "tree",
            Resource::Node { .. } => "node",
            Resource::Query { .. } => "query",
            Resource::Cursor { .. } => "query cursor",
        }
    }

    pub(crate) fn address(&self) -> u32 {
        match *self {
            Resource::Parser { address, .. }
            | Resource::Tree { address }
            | Resource::Node { address, .. }
            | Resource::Query { address }
            | Resource::Cursor { address, .. } => address,
        }
    }

    /// Release order at teardown: dependents before what they point into.
    fn teardown_rank(&self) -> u8 {
        match self {
            Resource::Cursor { .. } => 0,
            Resource::Query { .. } => 1,
            Resource::Node { .. } => 2,
            Resource::Tree { .. } => 3,
            Resource::Parser { .. } => 4,
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    resource: Option<Resource>,
}

/// Generational slot table of live resources.
#[derive(Debug)]
pub(crate) struct Registry {
    session: u64,
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Registry {
    pub(crate) fn new(session: u64) -> Self {
        Self {
            session,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, resource: Resource) -> HandleKey {
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize].resource = Some(resource);
                slot
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    resource: Some(resource),
                });
                (self.slots.len() - 1) as u32
            }
        };
        HandleKey {
            session: self.session,
            slot,
            generation: self.slots[slot as usize].generation,
        }
    }

    /// Look up a live resource. `kind` names the resource in the error.
    pub(crate) fn get(&self, key: HandleKey, kind: &'static str) -> Result<&Resource> {
        self.slot(key)
            .and_then(|slot| slot.resource.as_ref())
            .ok_or(SitterError::UseAfterFree { resource: kind })
    }

    pub(crate) fn get_mut(&mut self, key: HandleKey, kind: &'static str) -> Result<&mut Resource> {
        if key.session != self.session {
            return Err(SitterError::UseAfterFree { resource: kind });
        }
        self.slots
            .get_mut(key.slot as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.resource.as_mut())
            .ok_or(SitterError::UseAfterFree { resource: kind })
    }

    pub(crate) fn contains(&self, key: HandleKey) -> bool {
        self.slot(key).is_some_and(|slot| slot.resource.is_some())
    }

    /// Remove a resource, bumping the slot generation so stale keys miss.
    pub(crate) fn remove(&mut self, key: HandleKey, kind: &'static str) -> Result<Resource> {
        if key.session != self.session {
            return Err(SitterError::UseAfterFree { resource: kind });
        }
        let slot = self
            .slots
            .get_mut(key.slot as usize)
            .filter(|slot| slot.generation == key.generation)
            .ok_or(SitterError::UseAfterFree { resource: kind })?;
        let resource = slot
            .resource
            .take()
            .ok_or(SitterError::UseAfterFree { resource: kind })?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.slot);
        Ok(resource)
    }

    /// Remove every live resource, in teardown order.
    pub(crate) fn drain(&mut self) -> Vec<Resource> {
        let mut live: Vec<Resource> = self
            .slots
            .iter_mut()
            .filter_map(|slot| {
                let resource = slot.resource.take()?;
                slot.generation = slot.generation.wrapping_add(1);
                Some(resource)
            })
            .collect();
        self.free = (0..self.slots.len() as u32).collect();
        live.sort_by_key(Resource::teardown_rank);
        live
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.resource.is_some()).count()
    }

    fn slot(&self, key: HandleKey) -> Option<&Slot> {
        if key.session != self.session {
            return None;
        }
        self.slots
            .get(key.slot as usize)
            .filter(|slot| slot.generation == key.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut registry = Registry::new(1);
        let key = registry.insert(Resource::Tree { address: 64 });
        let resource = registry.get(key, "tree").unwrap();
        assert_eq!(resource.address(), 64);
        assert_eq!(resource.kind(), "tree");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_removed_key_is_use_after_free() {
        let mut registry = Registry::new(1);
        let key = registry.insert(Resource::Query { address: 8 });
        registry.remove(key, "query").unwrap();

        assert!(matches!(
            registry.get(key, "query"),
            Err(SitterError::UseAfterFree { resource: "query" })
        ));
        assert!(matches!(
            registry.remove(key, "query"),
            Err(SitterError::UseAfterFree { .. })
        ));
        assert!(!registry.contains(key));
    }

    #[test]
    fn test_reused_slot_rejects_stale_key() {
        let mut registry = Registry::new(1);
        let stale = registry.insert(Resource::Tree { address: 16 });
        registry.remove(stale, "tree").unwrap();

        let fresh = registry.insert(Resource::Tree { address: 32 });
        assert_eq!(fresh.slot, stale.slot);
        assert!(registry.get(stale, "tree").is_err());
        assert_eq!(registry.get(fresh, "tree").unwrap().address(), 32);
    }

    #[test]
    fn test_foreign_session_key_rejected() {
        let mut first = Registry::new(1);
        let mut second = Registry::new(2);
        let key = first.insert(Resource::Tree { address: 16 });
        second.insert(Resource::Tree { address: 16 });

        assert!(matches!(
            second.get(key, "tree"),
            Err(SitterError::UseAfterFree { resource: "tree" })
        ));
        assert!(second.get_mut(key, "tree").is_err());
        assert!(second.remove(key, "tree").is_err());
    }

    #[test]
    fn test_drain_orders_dependents_first() {
        let mut registry = Registry::new(1);
        let parser = registry.insert(Resource::Parser {
            address: 1,
            timeout_micros: 0,
        });
        let tree = registry.insert(Resource::Tree { address: 2 });
        registry.insert(Resource::Node {
            address: 3,
            tree,
        });
        registry.insert(Resource::Query { address: 4 });
        registry.insert(Resource::Cursor {
            address: 5,
            binding: None,
            epoch: 0,
        });

        let order: Vec<u32> = registry.drain().iter().map(Resource::address).collect();
        assert_eq!(order, vec![5, 4, 3, 2, 1]);
        assert_eq!(registry.len(), 0);
        assert!(registry.get(parser, "parser").is_err());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = next_session_id();
        let b = next_session_id();
        assert_ne!(a, b);
    }
}
