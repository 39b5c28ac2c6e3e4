// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-client resource tracking.
//!
//! A client that opens channels or registers destinations records them in a
//! [`ClientResources`]; when the client goes away everything it still holds
//! is released in one call. Entries live in a generational arena so a stale
//! handle can never release a slot that was reused.

use log::debug;

use crate::chnl::ChannelId;
use crate::msg::MsgQueueId;
use crate::transport::Transport;

/// Index into a [`ResourceArena`] plus the generation it was issued for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Slab with generation-checked handles.
pub struct ResourceArena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for ResourceArena<T> {
    fn default() -> Self {
        Self { slots: Vec::new(), free_head: None, len: 0 }
    }
}

impl<T> ResourceArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            if let Slot::Vacant { generation, next_free } = *slot {
                self.free_head = next_free;
                *slot = Slot::Occupied { generation, value };
                return Handle { index, generation };
            }
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied { generation: 0, value });
        Handle { index, generation: 0 }
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        match self.slots.get(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {}
            _ => return None,
        }
        let vacant = Slot::Vacant { generation: handle.generation.wrapping_add(1), next_free: self.free_head };
        let Slot::Occupied { value, .. } = core::mem::replace(slot, vacant) else {
            return None;
        };
        self.free_head = Some(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Removes every live entry, yielding them in index order.
    pub fn drain(&mut self) -> Vec<T> {
        let handles: Vec<Handle> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, .. } => Some(Handle { index: index as u32, generation: *generation }),
                Slot::Vacant { .. } => None,
            })
            .collect();
        handles.into_iter().filter_map(|handle| self.remove(handle)).collect()
    }
}

/// Something a client holds on the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    Channel(ChannelId),
    Destination(MsgQueueId),
}

/// The resources one client holds.
#[derive(Default)]
pub struct ClientResources {
    arena: ResourceArena<Resource>,
}

impl ClientResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, resource: Resource) -> Handle {
        self.arena.insert(resource)
    }

    /// Forgets a resource the client released itself.
    pub fn untrack(&mut self, handle: Handle) -> Option<Resource> {
        self.arena.remove(handle)
    }

    pub fn get(&self, handle: Handle) -> Option<Resource> {
        self.arena.get(handle).copied()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Closes channels and deregisters destinations still held. Release
    /// failures are logged; the entry is dropped either way. Returns the
    /// number of resources released successfully.
    pub fn release_all(&mut self, transport: &Transport) -> usize {
        let mut released = 0;
        for resource in self.arena.drain() {
            let result = match resource {
                Resource::Channel(id) => transport.close_channel(id),
                Resource::Destination(id) => transport.deregister_destination(id),
            };
            match result {
                Ok(()) => released += 1,
                Err(err) => debug!("dsp-bridge: releasing {resource:?}: {err}"),
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handle_cannot_reach_reused_slot() {
        let mut arena = ResourceArena::new();
        let first = arena.insert("a");
        assert_eq!(arena.remove(first), Some("a"));
        let second = arena.insert("b");
        assert_eq!(arena.get(first), None);
        assert_eq!(arena.remove(first), None);
        assert_eq!(arena.get(second), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn drain_empties_in_index_order() {
        let mut arena = ResourceArena::new();
        let handles: Vec<Handle> = (0..4).map(|value| arena.insert(value)).collect();
        arena.remove(handles[1]);
        assert_eq!(arena.drain(), vec![0, 2, 3]);
        assert!(arena.is_empty());
        let reused = arena.insert(9);
        assert_eq!(arena.get(reused), Some(&9));
    }

    #[test]
    fn client_tracks_and_untracks() {
        let mut client = ClientResources::new();
        let channel = client.track(Resource::Channel(3));
        let dest = client.track(Resource::Destination(7));
        assert_eq!(client.untrack(channel), Some(Resource::Channel(3)));
        assert_eq!(client.get(dest), Some(Resource::Destination(7)));
        assert_eq!(client.len(), 1);
    }
}
