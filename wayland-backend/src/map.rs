//! Id allocation and the id → object mapping.

use std::collections::HashMap;
use std::sync::Arc;

use crate::client::ObjectData;
use crate::protocol::Interface;

/// Ids at or above this value were allocated by the server (for objects
/// created in response to an event, e.g. a `wl_data_offer` announced
/// before the client names it). Purely informational here since this
/// runtime never allocates server-range ids itself; it lets a debug dump
/// of the table tell which side created an object at a glance.
pub const SERVER_ID_LIMIT: u32 = 0xFF00_0000;

/// The `wl_display` singleton always lives at id 1.
pub const DISPLAY_ID: u32 = 1;

pub struct ObjectEntry {
    pub interface: &'static Interface,
    pub data: Arc<dyn ObjectData>,
}

/// Maps live object ids to their entry, and allocates new client-side ids.
///
/// Deleted ids are simply removed rather than tombstoned: the spec treats
/// server-side id reuse within a connection as out of scope, so there is
/// no need to distinguish "never allocated" from "allocated and deleted".
pub struct ObjectMap {
    next_client_id: u32,
    objects: HashMap<u32, ObjectEntry>,
}

impl ObjectMap {
    pub fn new() -> Self {
        ObjectMap { next_client_id: DISPLAY_ID, objects: HashMap::new() }
    }

    /// Allocate the next id. The very first call returns 1 and is expected
    /// to be immediately consumed by installing the Display.
    pub fn allocate_id(&mut self) -> u32 {
        let id = self.next_client_id;
        self.next_client_id += 1;
        id
    }

    pub fn register(&mut self, id: u32, interface: &'static Interface, data: Arc<dyn ObjectData>) {
        self.objects.insert(id, ObjectEntry { interface, data });
    }

    pub fn lookup(&self, id: u32) -> Option<&ObjectEntry> {
        self.objects.get(&id)
    }

    pub fn delete(&mut self, id: u32) -> Option<ObjectEntry> {
        self.objects.remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.objects.contains_key(&id)
    }
}

impl Default for ObjectMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ObjectId;
    use crate::wire::Message;
    use std::os::unix::io::OwnedFd;

    struct Noop;
    impl ObjectData for Noop {
        fn event(self: Arc<Self>, _: &crate::client::Backend, _: Message<OwnedFd>) -> Option<Arc<dyn ObjectData>> {
            None
        }
        fn destroyed(&self, _: ObjectId) {}
        fn interface(&self) -> &'static crate::protocol::Interface {
            &crate::protocol::ANONYMOUS_INTERFACE
        }
    }

    #[test]
    fn allocation_starts_at_display_and_increments() {
        let mut map = ObjectMap::new();
        assert_eq!(map.allocate_id(), 1);
        assert_eq!(map.allocate_id(), 2);
        assert_eq!(map.allocate_id(), 3);
    }

    #[test]
    fn lookup_after_register_and_delete() {
        let mut map = ObjectMap::new();
        let id = map.allocate_id();
        map.register(id, &crate::protocol::ANONYMOUS_INTERFACE, Arc::new(Noop));
        assert!(map.lookup(id).is_some());
        map.delete(id);
        assert!(map.lookup(id).is_none());
    }
}
