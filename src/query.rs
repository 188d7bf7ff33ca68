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

//! Query engine: with/without predicates resolved against cached archetype
//! lists, plus typed iteration over matching rows.

use std::marker::PhantomData;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::archetype::{Archetype, ArchetypeIndex};
#[cfg(test)]
use crate::archetype::Archetypes;
use crate::component::{
    component_type_id_of, Component, ComponentTypeId, ComponentTypeInfo, MAX_BUNDLE_COMPONENTS,
};
use crate::entity::Entity;
use crate::world::World;

/// Sorted-deduplicated with/without component predicate.
///
/// Two descriptors with the same sets hash identically regardless of the
/// order the caller listed the components in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDescriptor {
    with: SmallVec<[ComponentTypeId; 8]>,
    without: SmallVec<[ComponentTypeId; 4]>,
}

impl QueryDescriptor {
    pub fn new(
        with: impl IntoIterator<Item = ComponentTypeId>,
        without: impl IntoIterator<Item = ComponentTypeId>,
    ) -> Self {
        let mut with: SmallVec<[ComponentTypeId; 8]> = with.into_iter().collect();
        let mut without: SmallVec<[ComponentTypeId; 4]> = without.into_iter().collect();
        with.sort_unstable();
        with.dedup();
        without.sort_unstable();
        without.dedup();
        Self { with, without }
    }

    pub fn with_ids(&self) -> &[ComponentTypeId] {
        &self.with
    }

    pub fn without_ids(&self) -> &[ComponentTypeId] {
        &self.without
    }

    /// An archetype matches iff its id set is a superset of `with` and
    /// disjoint from `without`.
    pub fn matches(&self, archetype: &Archetype) -> bool {
        archetype.has_all(&self.with) && !archetype.has_any(&self.without)
    }

    /// Cache key; `with` and `without` are mixed with different salts so
    /// `Q(with: [A])` and `Q(without: [A])` never collide.
    pub fn hash(&self) -> u64 {
        let mut hash = 0u64;
        for id in &self.with {
            hash ^= id
                .wrapping_add(0x9e3779b9)
                .wrapping_add(hash << 6)
                .wrapping_add(hash >> 2);
        }
        for id in &self.without {
            hash ^= id
                .wrapping_add(0x517cc1b7)
                .wrapping_add(hash << 7)
                .wrapping_add(hash >> 3);
        }
        hash
    }
}

/// One cached query result with the snapshots needed to validate it
struct CachedQuery {
    descriptor: QueryDescriptor,
    matching: Vec<ArchetypeIndex>,
    /// Generation snapshot of every archetype in the store at cache time.
    /// Covering all archetypes (not only matches) catches empty archetypes
    /// that later gain rows and would newly match.
    archetype_generations: Vec<u64>,
    world_version: u64,
}

impl CachedQuery {
    fn is_valid(&self, world_version: u64, archetypes: &[Archetype]) -> bool {
        if self.world_version != world_version {
            return false;
        }
        if self.archetype_generations.len() != archetypes.len() {
            return false;
        }
        self.archetype_generations
            .iter()
            .zip(archetypes)
            .all(|(&cached, archetype)| cached == archetype.generation())
    }
}

/// LRU cache of query results, keyed by descriptor hash.
///
/// Internally synchronized so parallel systems can resolve queries against a
/// shared world.
pub struct QueryCache {
    entries: Mutex<LruCache<u64, CachedQuery>>,
    enabled: bool,
}

impl QueryCache {
    pub fn new(capacity: usize, enabled: bool) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped above zero");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            enabled,
        }
    }

    /// Returns the cached match list if present and still valid. Invalid
    /// entries are evicted on the spot.
    pub fn lookup(
        &self,
        descriptor: &QueryDescriptor,
        world_version: u64,
        archetypes: &[Archetype],
    ) -> Option<Vec<ArchetypeIndex>> {
        if !self.enabled {
            return None;
        }

        let hash = descriptor.hash();
        let mut entries = self.entries.lock();
        let cached = entries.get(&hash)?;

        if cached.descriptor != *descriptor {
            // Hash collision between distinct descriptors; treat as a miss
            return None;
        }

        if !cached.is_valid(world_version, archetypes) {
            entries.pop(&hash);
            return None;
        }

        Some(cached.matching.clone())
    }

    pub fn store(
        &self,
        descriptor: &QueryDescriptor,
        matching: Vec<ArchetypeIndex>,
        world_version: u64,
        archetypes: &[Archetype],
    ) {
        if !self.enabled {
            return;
        }

        let entry = CachedQuery {
            descriptor: descriptor.clone(),
            matching,
            archetype_generations: archetypes.iter().map(Archetype::generation).collect(),
            world_version,
        };
        self.entries.lock().put(descriptor.hash(), entry);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().len() == 0
    }
}

/// One element of a query tuple: `&T` declares a read, `&mut T` a write.
pub trait QueryParam {
    type Component: Component;
    const WRITES: bool;
    type Item<'w>;

    /// # Safety
    /// `base` must be the column base pointer for `Component` in the
    /// archetype being iterated, and `row` a live row. Exclusivity of `&mut`
    /// access is guaranteed by the scheduler's conflict analysis.
    unsafe fn fetch<'w>(base: *mut u8, row: usize) -> Self::Item<'w>;
}

impl<'a, T: Component> QueryParam for &'a T {
    type Component = T;
    const WRITES: bool = false;
    type Item<'w> = &'w T;

    unsafe fn fetch<'w>(base: *mut u8, row: usize) -> &'w T {
        &*(base as *const T).add(row)
    }
}

impl<'a, T: Component> QueryParam for &'a mut T {
    type Component = T;
    const WRITES: bool = true;
    type Item<'w> = &'w mut T;

    unsafe fn fetch<'w>(base: *mut u8, row: usize) -> &'w mut T {
        &mut *(base as *mut T).add(row)
    }
}

/// A tuple of [`QueryParam`]s fetched together per row.
pub trait QueryData {
    type Item<'w>;

    /// Component infos in tuple order
    fn component_infos() -> SmallVec<[ComponentTypeInfo; MAX_BUNDLE_COMPONENTS]>;

    /// Write flag per tuple element, parallel to `component_infos`
    fn write_flags() -> SmallVec<[bool; MAX_BUNDLE_COMPONENTS]>;

    /// # Safety
    /// `bases` must hold the column base pointers in tuple order for the
    /// archetype being iterated; `row` must be live.
    unsafe fn fetch<'w>(bases: &[*mut u8], row: usize) -> Self::Item<'w>;
}

macro_rules! impl_query_data {
    ($($P:ident => $idx:tt),+) => {
        impl<$($P: QueryParam),+> QueryData for ($($P,)+) {
            type Item<'w> = ($($P::Item<'w>,)+);

            fn component_infos() -> SmallVec<[ComponentTypeInfo; MAX_BUNDLE_COMPONENTS]> {
                let mut infos = SmallVec::new();
                $(infos.push(ComponentTypeInfo::of::<$P::Component>());)+
                infos
            }

            fn write_flags() -> SmallVec<[bool; MAX_BUNDLE_COMPONENTS]> {
                let mut flags = SmallVec::new();
                $(flags.push($P::WRITES);)+
                flags
            }

            unsafe fn fetch<'w>(bases: &[*mut u8], row: usize) -> Self::Item<'w> {
                ($($P::fetch(bases[$idx], row),)+)
            }
        }
    };
}

impl_query_data!(A => 0);
impl_query_data!(A => 0, B => 1);
impl_query_data!(A => 0, B => 1, C => 2);
impl_query_data!(A => 0, B => 1, C => 2, D => 3);
impl_query_data!(A => 0, B => 1, C => 2, D => 3, E => 4);
impl_query_data!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);
impl_query_data!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6);
impl_query_data!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6, H => 7);

/// Typed query over the world.
///
/// Iteration visits matching archetypes in cache order and rows in index
/// order. Structural mutations are impossible while a query is borrowed, so
/// iteration never observes a moved row.
pub struct Query<'w, Q: QueryData> {
    world: &'w World,
    without: SmallVec<[ComponentTypeId; 4]>,
    _marker: PhantomData<Q>,
}

impl<'w, Q: QueryData> Query<'w, Q> {
    /// Internal constructor; the world and system context expose this.
    ///
    /// # Safety contract (crate-internal)
    /// Callers with only a shared `&World` must guarantee that no other live
    /// access aliases the components this query writes. The scheduler's
    /// conflict analysis provides that guarantee for systems.
    pub(crate) fn new(world: &'w World) -> Self {
        Self {
            world,
            without: SmallVec::new(),
            _marker: PhantomData,
        }
    }

    /// Excludes archetypes containing `T`
    pub fn without<T: Component>(mut self) -> Self {
        self.without.push(component_type_id_of::<T>());
        self
    }

    /// The descriptor this query resolves with
    pub fn descriptor(&self) -> QueryDescriptor {
        QueryDescriptor::new(
            Q::component_infos().iter().map(|info| info.id),
            self.without.iter().copied(),
        )
    }

    /// Number of matching entities
    pub fn count(&self) -> usize {
        let matched = self.world.archetypes().matching(&self.descriptor());
        matched
            .iter()
            .filter_map(|&index| self.world.archetypes().archetype(index))
            .map(Archetype::len)
            .sum()
    }

    /// Iterate over `(Entity, components)` for every matching row
    pub fn iter(&self) -> QueryIter<'w, Q> {
        let matched = self.world.archetypes().matching(&self.descriptor());
        QueryIter {
            world: self.world,
            infos: Q::component_infos(),
            matched,
            next_archetype: 0,
            bases: SmallVec::new(),
            current: None,
            row: 0,
            row_count: 0,
            _marker: PhantomData,
        }
    }
}

/// Iterator produced by [`Query::iter`]
pub struct QueryIter<'w, Q: QueryData> {
    world: &'w World,
    infos: SmallVec<[ComponentTypeInfo; MAX_BUNDLE_COMPONENTS]>,
    matched: Vec<ArchetypeIndex>,
    next_archetype: usize,
    bases: SmallVec<[*mut u8; MAX_BUNDLE_COMPONENTS]>,
    current: Option<&'w Archetype>,
    row: usize,
    row_count: usize,
    _marker: PhantomData<Q>,
}

impl<'w, Q: QueryData> QueryIter<'w, Q> {
    fn advance_archetype(&mut self) -> bool {
        loop {
            let Some(&index) = self.matched.get(self.next_archetype) else {
                return false;
            };
            self.next_archetype += 1;

            let Some(archetype) = self.world.archetypes().archetype(index) else {
                continue;
            };
            if archetype.is_empty() {
                continue;
            }

            self.bases.clear();
            for info in &self.infos {
                let column = archetype
                    .column(info.id)
                    .expect("matched archetype has every queried column");
                self.bases.push(column.base_ptr());
            }

            self.current = Some(archetype);
            self.row = 0;
            self.row_count = archetype.len();
            return true;
        }
    }
}

impl<'w, Q: QueryData> Iterator for QueryIter<'w, Q> {
    type Item = (Entity, Q::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.row < self.row_count {
                let archetype = self.current.expect("row bounds imply a current archetype");
                let entity = archetype.entity_at(self.row);
                // SAFETY: bases point into the current archetype's columns in
                // tuple order; the row is live; exclusive access to written
                // components is guaranteed by the scheduler (or by `&mut
                // World` on the safe public path).
                let item = unsafe { Q::fetch(&self.bases, self.row) };
                self.row += 1;
                return Some((entity, item));
            }

            if !self.advance_archetype() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype::ArchetypesConfig;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity {
        dx: f32,
    }

    struct Frozen;

    #[test]
    fn test_descriptor_sorted_and_deduped() {
        let a = component_type_id_of::<Position>();
        let b = component_type_id_of::<Velocity>();

        let descriptor = QueryDescriptor::new([b, a, a], []);
        let mut expected = vec![a, b];
        expected.sort_unstable();
        assert_eq!(descriptor.with_ids(), expected.as_slice());
    }

    #[test]
    fn test_descriptor_hash_distinguishes_with_from_without() {
        let id = component_type_id_of::<Position>();
        let with = QueryDescriptor::new([id], []);
        let without = QueryDescriptor::new([], [id]);
        assert_ne!(with.hash(), without.hash());
    }

    #[test]
    fn test_cache_hit_returns_same_indices() {
        let mut archetypes = Archetypes::new(&ArchetypesConfig::default());
        let entity = Entity::new(0, 1);
        let infos = [ComponentTypeInfo::of::<Position>()];
        let location = archetypes.assign_fresh(entity, &infos);
        let column = archetypes.archetypes()[location.archetype]
            .column(component_type_id_of::<Position>())
            .unwrap();
        unsafe { std::ptr::write(column.ptr_at(location.row) as *mut Position, Position { x: 0.0 }) };

        let descriptor = QueryDescriptor::new([component_type_id_of::<Position>()], []);
        let first = archetypes.matching(&descriptor);
        let second = archetypes.matching(&descriptor);
        assert_eq!(first, second);
        assert_eq!(first, vec![location.archetype]);
    }

    #[test]
    fn test_cache_invalidated_by_new_archetype() {
        let mut archetypes = Archetypes::new(&ArchetypesConfig::default());
        let first = Entity::new(0, 1);
        let infos = [ComponentTypeInfo::of::<Position>()];
        let location = archetypes.assign_fresh(first, &infos);
        let column = archetypes.archetypes()[location.archetype]
            .column(component_type_id_of::<Position>())
            .unwrap();
        unsafe { std::ptr::write(column.ptr_at(location.row) as *mut Position, Position { x: 0.0 }) };

        let descriptor = QueryDescriptor::new([component_type_id_of::<Position>()], []);
        assert_eq!(archetypes.matching(&descriptor).len(), 1);

        // A new archetype that also matches must appear after invalidation
        let second = Entity::new(1, 1);
        let mut infos = vec![
            ComponentTypeInfo::of::<Position>(),
            ComponentTypeInfo::of::<Velocity>(),
        ];
        infos.sort();
        let location = archetypes.assign_fresh(second, &infos);
        let archetype = &archetypes.archetypes()[location.archetype];
        unsafe {
            std::ptr::write(
                archetype
                    .column(component_type_id_of::<Position>())
                    .unwrap()
                    .ptr_at(location.row) as *mut Position,
                Position { x: 1.0 },
            );
            std::ptr::write(
                archetype
                    .column(component_type_id_of::<Velocity>())
                    .unwrap()
                    .ptr_at(location.row) as *mut Velocity,
                Velocity { dx: 1.0 },
            );
        }

        assert_eq!(archetypes.matching(&descriptor).len(), 2);
    }

    #[test]
    fn test_empty_archetypes_skipped() {
        let mut archetypes = Archetypes::new(&ArchetypesConfig::default());
        let entity = Entity::new(0, 1);
        let infos = [ComponentTypeInfo::of::<Position>()];
        let location = archetypes.assign_fresh(entity, &infos);
        let column = archetypes.archetypes()[location.archetype]
            .column(component_type_id_of::<Position>())
            .unwrap();
        unsafe { std::ptr::write(column.ptr_at(location.row) as *mut Position, Position { x: 0.0 }) };

        archetypes.destroy(entity);

        let descriptor = QueryDescriptor::new([component_type_id_of::<Position>()], []);
        assert!(archetypes.matching(&descriptor).is_empty());
    }

    #[test]
    fn test_without_excludes() {
        let mut archetypes = Archetypes::new(&ArchetypesConfig::default());

        let plain = Entity::new(0, 1);
        let infos = [ComponentTypeInfo::of::<Position>()];
        let location = archetypes.assign_fresh(plain, &infos);
        let column = archetypes.archetypes()[location.archetype]
            .column(component_type_id_of::<Position>())
            .unwrap();
        unsafe { std::ptr::write(column.ptr_at(location.row) as *mut Position, Position { x: 0.0 }) };

        let frozen = Entity::new(1, 1);
        let mut infos = vec![
            ComponentTypeInfo::of::<Position>(),
            ComponentTypeInfo::of::<Frozen>(),
        ];
        infos.sort();
        let frozen_location = archetypes.assign_fresh(frozen, &infos);
        let archetype = &archetypes.archetypes()[frozen_location.archetype];
        unsafe {
            std::ptr::write(
                archetype
                    .column(component_type_id_of::<Position>())
                    .unwrap()
                    .ptr_at(frozen_location.row) as *mut Position,
                Position { x: 1.0 },
            );
        }

        let descriptor = QueryDescriptor::new(
            [component_type_id_of::<Position>()],
            [component_type_id_of::<Frozen>()],
        );
        let matched = archetypes.matching(&descriptor);
        assert_eq!(matched, vec![location.archetype]);
    }
}
