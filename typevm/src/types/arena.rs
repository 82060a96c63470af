//! Reference-counted node arena
//!
//! Freed slots go to a free list and their generation is bumped, so a handle
//! that outlives its node is detected on the next dereference (panic) or
//! release (`VmError::DoubleRelease`).

use super::{Payload, Type, TypeFlags};
use crate::vm::VmError;

/// Generation-checked handle into a [`TypeArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId {
    index: u32,
    generation: u32,
}

impl TypeId {
    pub fn index(self) -> u32 {
        self.index
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    ty: Type,
}

#[derive(Debug, Default)]
pub struct TypeArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl TypeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a node with a reference count of zero.
    pub fn alloc(&mut self, mut ty: Type) -> TypeId {
        ty.ref_count = 0;
        ty.flags.remove(TypeFlags::DELETED);
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.ty = ty;
            return TypeId { index, generation: slot.generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, ty });
        TypeId { index, generation: 0 }
    }

    fn slot(&self, id: TypeId) -> Option<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation && !slot.ty.flags.contains(TypeFlags::DELETED))
    }

    pub fn is_live(&self, id: TypeId) -> bool {
        self.slot(id).is_some()
    }

    /// Dereference a handle. Panics when the node has been freed.
    pub fn get(&self, id: TypeId) -> &Type {
        match self.slot(id) {
            Some(slot) => &slot.ty,
            None => panic!("dereferenced deleted type {id:?}"),
        }
    }

    /// Mutable dereference. Panics when the node has been freed.
    pub fn get_mut(&mut self, id: TypeId) -> &mut Type {
        match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation && !slot.ty.flags.contains(TypeFlags::DELETED) => {
                &mut slot.ty
            }
            _ => panic!("dereferenced deleted type {id:?}"),
        }
    }

    /// Acquire one reference.
    pub fn use_type(&mut self, id: TypeId) -> TypeId {
        self.get_mut(id).ref_count += 1;
        id
    }

    /// Drop one reference; at zero the node and, transitively, the children
    /// it held are freed.
    pub fn release(&mut self, id: TypeId) -> Result<(), VmError> {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let slot = match self.slots.get_mut(id.index as usize) {
                Some(slot) if slot.generation == id.generation && !slot.ty.flags.contains(TypeFlags::DELETED) => slot,
                _ => return Err(VmError::DoubleRelease { index: id.index }),
            };
            if slot.ty.ref_count > 1 {
                slot.ty.ref_count -= 1;
                continue;
            }
            slot.ty.ref_count = 0;
            slot.ty.flags.insert(TypeFlags::DELETED);
            slot.generation = slot.generation.wrapping_add(1);
            match std::mem::take(&mut slot.ty.payload) {
                Payload::Child(child) => pending.push(child),
                Payload::List(children) => pending.extend(children),
                Payload::Table(buckets) | Payload::Closure { scopes: buckets, .. } => {
                    pending.extend(buckets.into_iter().flatten())
                }
                Payload::None | Payload::Address(_) => {}
            }
            slot.ty.text.clear();
            self.free.push(id.index);
            self.live -= 1;
        }
        Ok(())
    }

    /// Number of nodes not yet freed.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Find a child by hash: linear for sequences, bucket then chain for
    /// tables.
    pub fn find_child(&self, parent: TypeId, hash: u64) -> Option<TypeId> {
        match &self.get(parent).payload {
            Payload::List(children) => children.iter().copied().find(|c| self.get(*c).hash == hash),
            Payload::Child(child) => Some(*child).filter(|c| self.get(*c).hash == hash),
            Payload::Table(buckets) if !buckets.is_empty() => {
                let bucket = &buckets[(hash % buckets.len() as u64) as usize];
                bucket.iter().copied().find(|c| self.get(*c).hash == hash)
            }
            _ => None,
        }
    }

    /// Insert `child` into the hash table of `parent`, acquiring it. The first
    /// entry of a bucket stays its head; later collisions go right after it.
    pub fn add_hash_child(&mut self, parent: TypeId, child: TypeId) {
        self.use_type(child);
        let hash = self.get(child).hash;
        if let Payload::Table(buckets) = &mut self.get_mut(parent).payload {
            if buckets.is_empty() {
                buckets.push(Vec::new());
            }
            let count = buckets.len() as u64;
            let bucket = &mut buckets[(hash % count) as usize];
            if bucket.is_empty() {
                bucket.push(child);
            } else {
                bucket.insert(1, child);
            }
        }
    }

    /// Drop every node regardless of reference counts.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.live = 0;
    }
}

/// Empty hash table payload with `bucket_count` buckets.
pub fn table(bucket_count: usize) -> Payload {
    Payload::Table(vec![Vec::new(); bucket_count.max(1)])
}
