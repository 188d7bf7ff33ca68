// Copyright 2024 Helios Engine Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Entity identifiers and the entity registry.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// Unique entity identifier with a generation counter to handle recycling.
///
/// An `Entity` pairs a 32-bit index with a 32-bit generation. The index
/// locates the entity in sparse storage; the generation invalidates stale
/// handles when an index is recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    pub const INVALID_INDEX: u32 = u32::MAX;
    pub const INVALID_GENERATION: u32 = 0;

    /// The invalid entity (default-constructed handles compare equal to this)
    pub const INVALID: Entity = Entity {
        index: Self::INVALID_INDEX,
        generation: Self::INVALID_GENERATION,
    };

    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Index component of the handle
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation component of the handle
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// A handle is valid if neither half holds its reserved invalid value.
    ///
    /// Validity is a property of the handle itself; whether the entity is
    /// still alive is answered by [`Entities::is_alive`].
    pub fn is_valid(&self) -> bool {
        self.index != Self::INVALID_INDEX && self.generation != Self::INVALID_GENERATION
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::INVALID
    }
}

impl PartialOrd for Entity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index
            .cmp(&other.index)
            .then(self.generation.cmp(&other.generation))
    }
}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        if !self.is_valid() {
            state.write_u64(0);
            return;
        }
        state.write_u64(((self.generation as u64) << 32) | self.index as u64);
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Entity registry: allocates, recycles, and validates entity handles.
///
/// Reservation is lock-free so systems running in parallel can hand out fresh
/// handles without synchronizing on the world. Everything else (flush,
/// destroy) runs single-threaded during command application.
pub struct Entities {
    /// Stored generation per index; `INVALID_GENERATION` marks reserved-but-unflushed
    generations: Vec<u32>,

    /// Recycled indices available for reuse; only the cursor moves concurrently
    free_indices: Vec<u32>,

    /// Number of valid entries at the front of `free_indices`
    free_cursor: AtomicI64,

    /// Next never-used index
    next_index: AtomicU32,

    /// Live entity count; atomic because recycled reservations bump it lock-free
    alive_count: AtomicU32,

    /// Indices retired after generation overflow; never reused
    retired_count: u32,
}

impl Entities {
    pub fn new() -> Self {
        Self {
            generations: Vec::new(),
            free_indices: Vec::new(),
            free_cursor: AtomicI64::new(0),
            next_index: AtomicU32::new(0),
            alive_count: AtomicU32::new(0),
            retired_count: 0,
        }
    }

    /// Reserves an entity handle without allocating component storage.
    ///
    /// Lock-free: pops a recycled index via CAS on the free cursor, or takes a
    /// fresh index from the next-index counter. Fresh indices become alive
    /// once [`Entities::flush_reserved`] runs; recycled indices carry their
    /// stored generation and are alive immediately.
    pub fn reserve(&self) -> Entity {
        let mut cursor = self.free_cursor.load(Ordering::Relaxed);
        while cursor > 0 {
            match self.free_cursor.compare_exchange_weak(
                cursor,
                cursor - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    let index = self.free_indices[(cursor - 1) as usize];
                    self.alive_count.fetch_add(1, Ordering::Relaxed);
                    return Entity::new(index, self.generations[index as usize]);
                }
                Err(current) => cursor = current,
            }
        }

        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        assert!(
            index != Entity::INVALID_INDEX,
            "Entity index space exhausted"
        );

        // Fresh indices always start at generation 1; flush_reserved writes
        // the same value into the generation table.
        Entity::new(index, 1)
    }

    /// Materializes all reserved-but-unflushed indices into live generations.
    ///
    /// Single-threaded; invoked by the world between schedule steps.
    pub fn flush_reserved(&mut self) {
        let next_index = self.next_index.load(Ordering::Relaxed) as usize;

        if next_index > self.generations.len() {
            self.generations
                .resize(next_index, Entity::INVALID_GENERATION);
        }

        let mut new_entities = 0u32;
        for generation in &mut self.generations[..next_index] {
            if *generation == Entity::INVALID_GENERATION {
                *generation = 1;
                new_entities += 1;
            }
        }

        self.alive_count.fetch_add(new_entities, Ordering::Relaxed);
    }

    /// Creates an entity that is alive immediately.
    ///
    /// Single-threaded path used by `World::spawn`; equivalent to a reserve
    /// followed by materializing just that index.
    pub fn create(&mut self) -> Entity {
        let entity = self.reserve();
        let index = entity.index() as usize;
        if index >= self.generations.len() {
            self.generations
                .resize(index + 1, Entity::INVALID_GENERATION);
        }
        if self.generations[index] == Entity::INVALID_GENERATION {
            self.generations[index] = entity.generation();
            self.alive_count.fetch_add(1, Ordering::Relaxed);
        }
        entity
    }

    /// Destroys an entity, recycling its index with a bumped generation.
    ///
    /// Returns false if the handle was already stale. An index whose
    /// generation overflows is retired rather than recycled.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }

        let index = entity.index() as usize;
        let next_generation = self.generations[index].wrapping_add(1);
        self.generations[index] = next_generation;
        self.alive_count.fetch_sub(1, Ordering::Relaxed);

        if next_generation == Entity::INVALID_GENERATION {
            self.retired_count += 1;
            return true;
        }

        // The cursor must be published after the index is in place, so a
        // concurrent reserve never reads an unwritten slot.
        let cursor = self.free_cursor.load(Ordering::Relaxed).max(0) as usize;
        self.free_indices.truncate(cursor);
        self.free_indices.push(entity.index());
        self.free_cursor
            .store(self.free_indices.len() as i64, Ordering::Release);

        true
    }

    /// Checks whether a handle refers to a live entity.
    pub fn is_alive(&self, entity: Entity) -> bool {
        if !entity.is_valid() {
            return false;
        }
        let index = entity.index() as usize;
        index < self.generations.len() && self.generations[index] == entity.generation()
    }

    /// Number of live (flushed) entities
    pub fn alive_count(&self) -> u32 {
        self.alive_count.load(Ordering::Relaxed)
    }

    /// Number of indices retired after generation overflow
    pub fn retired_count(&self) -> u32 {
        self.retired_count
    }

    /// Clears the registry, invalidating every handle.
    pub fn clear(&mut self) {
        self.generations.clear();
        self.free_indices.clear();
        self.free_cursor.store(0, Ordering::Relaxed);
        self.next_index.store(0, Ordering::Relaxed);
        self.alive_count.store(0, Ordering::Relaxed);
        self.retired_count = 0;
    }
}

impl Default for Entities {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_entity() {
        let entity = Entity::default();
        assert!(!entity.is_valid());
        assert_eq!(entity, Entity::INVALID);
    }

    #[test]
    fn test_ordering_by_index_then_generation() {
        let a = Entity::new(1, 5);
        let b = Entity::new(2, 1);
        let c = Entity::new(1, 6);
        assert!(a < b);
        assert!(a < c);
        assert!(c < b);
    }

    #[test]
    fn test_reserve_then_flush() {
        let mut entities = Entities::new();

        let entity = entities.reserve();
        assert!(entity.is_valid());
        assert_eq!(entity.generation(), 1);

        // Fresh indices are not alive until flushed
        assert!(!entities.is_alive(entity));

        entities.flush_reserved();
        assert!(entities.is_alive(entity));
        assert_eq!(entities.alive_count(), 1);
    }

    #[test]
    fn test_destroy_invalidates_handle() {
        let mut entities = Entities::new();
        let entity = entities.reserve();
        entities.flush_reserved();

        assert!(entities.destroy(entity));
        assert!(!entities.is_alive(entity));
        assert_eq!(entities.alive_count(), 0);

        // Double destroy reports failure
        assert!(!entities.destroy(entity));
    }

    #[test]
    fn test_index_recycled_with_new_generation() {
        let mut entities = Entities::new();
        let first = entities.reserve();
        entities.flush_reserved();
        entities.destroy(first);

        let second = entities.reserve();
        assert_eq!(second.index(), first.index());
        assert_eq!(second.generation(), first.generation() + 1);

        // Recycled indices are alive immediately (generation already stored)
        assert!(entities.is_alive(second));
        assert!(!entities.is_alive(first));
    }

    #[test]
    fn test_concurrent_reservation_unique() {
        use std::sync::Arc;

        let entities = Arc::new(Entities::new());
        let mut handles = Vec::new();

        for _ in 0..4 {
            let entities = Arc::clone(&entities);
            handles.push(std::thread::spawn(move || {
                (0..256).map(|_| entities.reserve()).collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<Entity> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        let before = all.len();
        all.dedup();
        assert_eq!(before, all.len(), "reserved handles must be unique");
        assert_eq!(before, 4 * 256);
    }
}
