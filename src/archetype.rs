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

//! Archetype storage: columnar component data grouped by exact component set.
//!
//! Every live entity with at least one component lives in exactly one
//! archetype row. Adding or removing a component migrates the row between
//! archetypes; migrations are accelerated by per-archetype structural edges.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;

use ahash::AHashMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::component::{ComponentTypeId, ComponentTypeInfo};
use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::query::{QueryCache, QueryDescriptor};
use crate::utils::fnv1a_hash;

/// Sorted component-id set identifying an archetype
pub type ArchetypeSignature = SmallVec<[ComponentTypeId; 8]>;

/// Index of an archetype in the store's append-only vector.
///
/// Indices are stable for the lifetime of the store, so structural edges can
/// hold them instead of pointers.
pub type ArchetypeIndex = usize;

/// Where an entity's row lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: ArchetypeIndex,
    pub row: usize,
}

/// Type-erased component column: a contiguous aligned array of one component
/// type, one element per archetype row.
pub struct ComponentColumn {
    info: ComponentTypeInfo,
    data: NonNull<u8>,
    capacity: usize,
    len: usize,
}

// Columns own their buffer exclusively; sharing is governed by the scheduler.
unsafe impl Send for ComponentColumn {}
unsafe impl Sync for ComponentColumn {}

impl ComponentColumn {
    /// Create an empty column for the given component type
    pub fn new(info: ComponentTypeInfo) -> Self {
        // Dangling but aligned, so tag components and empty columns can hand
        // out valid references without allocating
        let dangling = info.align.max(1) as *mut u8;
        Self {
            info,
            data: unsafe { NonNull::new_unchecked(dangling) },
            capacity: 0,
            len: 0,
        }
    }

    /// An empty column with the same component type
    pub fn clone_empty(&self) -> Self {
        Self::new(self.info)
    }

    pub fn info(&self) -> &ComponentTypeInfo {
        &self.info
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn grow(&mut self, min_capacity: usize) {
        debug_assert!(self.info.size > 0);
        let new_capacity = (self.capacity * 2).max(min_capacity).max(4);

        let new_layout =
            Layout::from_size_align(new_capacity * self.info.size, self.info.align.max(1))
                .expect("component column layout overflow");
        let new_data = unsafe { alloc(new_layout) };
        let Some(new_data) = NonNull::new(new_data) else {
            handle_alloc_error(new_layout);
        };

        if self.capacity > 0 {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.data.as_ptr(),
                    new_data.as_ptr(),
                    self.len * self.info.size,
                );
                self.dealloc_buffer();
            }
        }

        self.data = new_data;
        self.capacity = new_capacity;
    }

    unsafe fn dealloc_buffer(&mut self) {
        if self.capacity > 0 && self.info.size > 0 {
            let layout =
                Layout::from_size_align_unchecked(self.capacity * self.info.size, self.info.align);
            dealloc(self.data.as_ptr(), layout);
        }
    }

    /// Reserve space for additional rows
    pub fn reserve(&mut self, additional: usize) {
        if self.info.size == 0 {
            return;
        }
        let needed = self.len + additional;
        if needed > self.capacity {
            self.grow(needed);
        }
    }

    /// Appends an uninitialized slot and returns its pointer.
    ///
    /// The caller must write a valid value before the column is read or
    /// dropped.
    pub fn push_uninit(&mut self) -> *mut u8 {
        if self.info.size == 0 {
            self.len += 1;
            return self.data.as_ptr();
        }
        if self.len == self.capacity {
            self.grow(self.len + 1);
        }
        let ptr = unsafe { self.data.as_ptr().add(self.len * self.info.size) };
        self.len += 1;
        ptr
    }

    /// Pointer to the element at `row`
    pub fn ptr_at(&self, row: usize) -> *mut u8 {
        debug_assert!(row < self.len);
        if self.info.size == 0 {
            return self.data.as_ptr();
        }
        unsafe { self.data.as_ptr().add(row * self.info.size) }
    }

    /// Base pointer of the column buffer
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Typed read access to the element at `row`
    ///
    /// # Safety
    /// `T` must be the column's component type and `row` must hold an
    /// initialized value.
    pub unsafe fn get<T>(&self, row: usize) -> &T {
        &*(self.ptr_at(row) as *const T)
    }

    /// Typed write access to the element at `row`
    ///
    /// # Safety
    /// Same requirements as [`ComponentColumn::get`], plus exclusivity.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut<T>(&self, row: usize) -> &mut T {
        &mut *(self.ptr_at(row) as *mut T)
    }

    /// Removes the element at `row`, dropping it and back-filling with the
    /// last element.
    pub fn swap_remove_drop(&mut self, row: usize) {
        debug_assert!(row < self.len);
        unsafe {
            if let Some(drop_fn) = self.info.drop_fn {
                drop_fn(self.ptr_at(row));
            }
            self.swap_remove_forget(row);
        }
    }

    /// Removes the element at `row` without dropping it (value was moved out)
    ///
    /// # Safety
    /// The value at `row` must have been copied elsewhere or be trivially
    /// discardable.
    pub unsafe fn swap_remove_forget(&mut self, row: usize) {
        debug_assert!(row < self.len);
        let last = self.len - 1;
        if row != last && self.info.size > 0 {
            std::ptr::copy_nonoverlapping(
                self.ptr_at(last),
                self.ptr_at(row),
                self.info.size,
            );
        }
        self.len -= 1;
    }
}

impl Drop for ComponentColumn {
    fn drop(&mut self) {
        if let Some(drop_fn) = self.info.drop_fn {
            for row in 0..self.len {
                unsafe {
                    drop_fn(self.ptr_at(row));
                }
            }
        }
        unsafe {
            self.dealloc_buffer();
        }
    }
}

/// Archetype: the equivalence class of entities sharing an exact component
/// set, with one column per component type.
pub struct Archetype {
    signature: ArchetypeSignature,
    columns: Vec<ComponentColumn>,
    entities: Vec<Entity>,

    /// Structural edge caches: component id -> archetype reached by adding /
    /// removing that component. Opportunistic; a miss falls back to a full
    /// lookup which then populates the edge.
    add_edges: FxHashMap<ComponentTypeId, ArchetypeIndex>,
    remove_edges: FxHashMap<ComponentTypeId, Option<ArchetypeIndex>>,

    /// Bumped on every structural mutation; the query cache compares this
    /// against its snapshot to detect staleness.
    generation: u64,
}

impl Archetype {
    /// Create a new archetype from sorted component infos
    fn new(infos: &[ComponentTypeInfo]) -> Self {
        debug_assert!(infos.windows(2).all(|w| w[0].id < w[1].id));
        Self {
            signature: infos.iter().map(|info| info.id).collect(),
            columns: infos.iter().map(|info| ComponentColumn::new(*info)).collect(),
            entities: Vec::new(),
            add_edges: FxHashMap::default(),
            remove_edges: FxHashMap::default(),
            generation: 0,
        }
    }

    /// Sorted component-id set
    pub fn signature(&self) -> &[ComponentTypeId] {
        &self.signature
    }

    /// Component infos in signature order
    pub fn component_infos(&self) -> impl Iterator<Item = &ComponentTypeInfo> {
        self.columns.iter().map(|column| column.info())
    }

    /// Entities in row order
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn entity_at(&self, row: usize) -> Entity {
        self.entities[row]
    }

    /// Row count
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Structural generation counter
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn bump_generation(&mut self) {
        self.generation += 1;
    }

    /// Column index for a component type
    pub fn column_index(&self, id: ComponentTypeId) -> Option<usize> {
        self.signature.binary_search(&id).ok()
    }

    pub fn has_component(&self, id: ComponentTypeId) -> bool {
        self.signature.binary_search(&id).is_ok()
    }

    /// True if every id is present; both inputs sorted
    pub fn has_all(&self, ids: &[ComponentTypeId]) -> bool {
        ids.iter().all(|id| self.has_component(*id))
    }

    /// True if any id is present; both inputs sorted
    pub fn has_any(&self, ids: &[ComponentTypeId]) -> bool {
        ids.iter().any(|id| self.has_component(*id))
    }

    /// Column for a component type
    pub fn column(&self, id: ComponentTypeId) -> Option<&ComponentColumn> {
        self.column_index(id).map(|idx| &self.columns[idx])
    }

    pub fn column_mut(&mut self, id: ComponentTypeId) -> Option<&mut ComponentColumn> {
        self.column_index(id).map(move |idx| &mut self.columns[idx])
    }

    pub(crate) fn column_at(&self, index: usize) -> &ComponentColumn {
        &self.columns[index]
    }

    /// Appends a row for `entity` with uninitialized columns; returns the row
    /// and pushes one uninitialized slot per column.
    ///
    /// Callers must initialize every non-tag column before the row is read.
    fn allocate_row(&mut self, entity: Entity) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        for column in &mut self.columns {
            column.push_uninit();
        }
        self.bump_generation();
        row
    }

    /// Removes a row, dropping its values. Returns the entity swapped into
    /// `row`, if any.
    fn swap_remove_row(&mut self, row: usize) -> Option<Entity> {
        for column in &mut self.columns {
            column.swap_remove_drop(row);
        }
        self.entities.swap_remove(row);
        self.bump_generation();
        if row < self.entities.len() {
            Some(self.entities[row])
        } else {
            None
        }
    }

    /// Removes a row whose values were already moved out. Returns the entity
    /// swapped into `row`, if any.
    ///
    /// # Safety
    /// Every column value at `row` must have been copied into another
    /// archetype (or be intentionally discarded for dropped columns, which
    /// the caller must drop itself beforehand).
    unsafe fn swap_remove_row_forget(&mut self, row: usize) -> Option<Entity> {
        for column in &mut self.columns {
            column.swap_remove_forget(row);
        }
        self.entities.swap_remove(row);
        self.bump_generation();
        if row < self.entities.len() {
            Some(self.entities[row])
        } else {
            None
        }
    }
}

/// Configuration for the archetype store
#[derive(Debug, Clone)]
pub struct ArchetypesConfig {
    /// Maximum number of cached query results (LRU evicted beyond this)
    pub query_cache_capacity: usize,
    /// Disabling the cache makes every query a full archetype scan
    pub use_query_cache: bool,
}

impl Default for ArchetypesConfig {
    fn default() -> Self {
        Self {
            query_cache_capacity: 256,
            use_query_cache: true,
        }
    }
}

/// Archetype store: owns all archetypes, the entity location map, the query
/// cache, and the world's structural version.
pub struct Archetypes {
    /// Append-only; indices are stable and usable in edge caches
    archetypes: Vec<Archetype>,
    by_signature: AHashMap<u64, ArchetypeIndex>,
    locations: AHashMap<u32, EntityLocation>,

    /// Bumped when a new archetype is created; cached query results that
    /// would have matched it must be rebuilt
    structural_version: u64,

    query_cache: QueryCache,
}

impl Archetypes {
    pub fn new(config: &ArchetypesConfig) -> Self {
        Self {
            archetypes: Vec::with_capacity(64),
            by_signature: AHashMap::with_capacity(64),
            locations: AHashMap::new(),
            structural_version: 0,
            query_cache: QueryCache::new(config.query_cache_capacity, config.use_query_cache),
        }
    }

    /// All archetypes, indexable by [`ArchetypeIndex`]
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn archetype(&self, index: ArchetypeIndex) -> Option<&Archetype> {
        self.archetypes.get(index)
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Current world structural version
    pub fn structural_version(&self) -> u64 {
        self.structural_version
    }

    /// Location of a live entity's row, if it has any components
    pub fn location_of(&self, entity: Entity) -> Option<EntityLocation> {
        self.locations.get(&entity.index()).copied()
    }

    fn signature_hash(infos: &[ComponentTypeInfo]) -> u64 {
        // Infos are sorted by id, so the hash is canonical for the set
        let mut bytes = [0u8; 8];
        let mut hash = 0xcbf29ce484222325u64;
        for info in infos {
            bytes.copy_from_slice(&info.id.to_le_bytes());
            hash ^= fnv1a_hash(&bytes);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }

    fn get_or_create(&mut self, sorted_infos: &[ComponentTypeInfo]) -> ArchetypeIndex {
        let hash = Self::signature_hash(sorted_infos);
        if let Some(&index) = self.by_signature.get(&hash) {
            return index;
        }

        let index = self.archetypes.len();
        self.archetypes.push(Archetype::new(sorted_infos));
        self.by_signature.insert(hash, index);
        self.structural_version += 1;
        index
    }

    /// Places `entity` into the archetype for exactly `sorted_infos`,
    /// removing it from its current archetype first. Returns the new location
    /// with one uninitialized slot per column for the caller to fill.
    pub fn assign_fresh(
        &mut self,
        entity: Entity,
        sorted_infos: &[ComponentTypeInfo],
    ) -> EntityLocation {
        if let Some(old) = self.locations.remove(&entity.index()) {
            self.remove_row(old);
        }

        let archetype = self.get_or_create(sorted_infos);
        let row = self.archetypes[archetype].allocate_row(entity);
        let location = EntityLocation { archetype, row };
        self.locations.insert(entity.index(), location);
        location
    }

    /// Migrates `entity` into the archetype that additionally has `added`.
    ///
    /// Shared columns are copied in O(columns); the new column's slot is left
    /// uninitialized and its pointer returned for the caller to write.
    /// Consults the add-edge cache before doing a full lookup.
    pub fn move_on_add(
        &mut self,
        entity: Entity,
        added: ComponentTypeInfo,
    ) -> Result<(EntityLocation, *mut u8)> {
        let Some(old) = self.location_of(entity) else {
            // First component: no current archetype, fall through to a fresh
            // single-component row.
            let location = self.assign_fresh(entity, &[added]);
            let ptr = self.archetypes[location.archetype]
                .column(added.id)
                .expect("freshly created column")
                .ptr_at(location.row);
            return Ok((location, ptr));
        };

        if self.archetypes[old.archetype].has_component(added.id) {
            return Err(EcsError::CommandError(format!(
                "component '{}' already present on entity {entity}",
                added.name
            )));
        }

        let cached = self.archetypes[old.archetype]
            .add_edges
            .get(&added.id)
            .copied();
        let target = match cached {
            Some(target) => target,
            None => {
                let mut infos: Vec<ComponentTypeInfo> = self.archetypes[old.archetype]
                    .component_infos()
                    .copied()
                    .collect();
                let insert_at = infos.partition_point(|info| info.id < added.id);
                infos.insert(insert_at, added);

                let target = self.get_or_create(&infos);
                let source = &mut self.archetypes[old.archetype];
                source.add_edges.insert(added.id, target);
                source.bump_generation();
                target
            }
        };

        let location = self.transfer_row(entity, old, target);
        let ptr = self.archetypes[location.archetype]
            .column(added.id)
            .expect("target archetype has the added column")
            .ptr_at(location.row);
        Ok((location, ptr))
    }

    /// Migrates `entity` out of the archetype containing `removed`.
    ///
    /// The removed component is dropped. Returns the new location, or `None`
    /// when the last component was removed and the entity has no archetype.
    pub fn move_on_remove(
        &mut self,
        entity: Entity,
        removed: ComponentTypeId,
    ) -> Result<Option<EntityLocation>> {
        let Some(old) = self.location_of(entity) else {
            return Err(EcsError::ComponentNotFound);
        };

        if !self.archetypes[old.archetype].has_component(removed) {
            return Err(EcsError::ComponentNotFound);
        }

        let cached = self.archetypes[old.archetype]
            .remove_edges
            .get(&removed)
            .copied();
        let target = match cached {
            Some(target) => target,
            None => {
                let infos: Vec<ComponentTypeInfo> = self.archetypes[old.archetype]
                    .component_infos()
                    .filter(|info| info.id != removed)
                    .copied()
                    .collect();

                let target = if infos.is_empty() {
                    None
                } else {
                    Some(self.get_or_create(&infos))
                };
                let source = &mut self.archetypes[old.archetype];
                source.remove_edges.insert(removed, target);
                source.bump_generation();
                target
            }
        };

        let Some(target) = target else {
            // Last component removed: drop the row entirely
            self.locations.remove(&entity.index());
            self.remove_row(old);
            return Ok(None);
        };

        // Drop the removed component before the forget-remove below
        let source = &mut self.archetypes[old.archetype];
        if let Some(column) = source.column_mut(removed) {
            if let Some(drop_fn) = column.info().drop_fn {
                unsafe {
                    drop_fn(column.ptr_at(old.row));
                }
            }
        }

        let location = self.transfer_row(entity, old, target);
        Ok(Some(location))
    }

    /// Moves a row between archetypes, copying every column both share.
    fn transfer_row(
        &mut self,
        entity: Entity,
        old: EntityLocation,
        target: ArchetypeIndex,
    ) -> EntityLocation {
        debug_assert_ne!(old.archetype, target);

        let (source_arch, target_arch) = if old.archetype < target {
            let (left, right) = self.archetypes.split_at_mut(target);
            (&mut left[old.archetype], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(old.archetype);
            (&mut right[0], &mut left[target])
        };

        let new_row = target_arch.allocate_row(entity);

        for column in &mut target_arch.columns {
            let id = column.info().id;
            let size = column.info().size;
            if size == 0 {
                continue;
            }
            if let Some(source_column) = source_arch.column(id) {
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        source_column.ptr_at(old.row),
                        column.ptr_at(new_row),
                        size,
                    );
                }
            }
        }

        // Values were moved (or dropped by the caller for vanished columns)
        let swapped = unsafe { source_arch.swap_remove_row_forget(old.row) };
        if let Some(swapped) = swapped {
            if let Some(location) = self.locations.get_mut(&swapped.index()) {
                location.row = old.row;
            }
        }

        let location = EntityLocation {
            archetype: target,
            row: new_row,
        };
        self.locations.insert(entity.index(), location);
        location
    }

    /// Erases an entity's row, dropping its components. Returns false if the
    /// entity had no row.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        let Some(location) = self.locations.remove(&entity.index()) else {
            return false;
        };
        self.remove_row(location);
        true
    }

    fn remove_row(&mut self, location: EntityLocation) {
        let swapped = self.archetypes[location.archetype].swap_remove_row(location.row);
        if let Some(swapped) = swapped {
            if let Some(swapped_location) = self.locations.get_mut(&swapped.index()) {
                swapped_location.row = location.row;
            }
        }
    }

    /// Archetype indices matching a query descriptor, cached.
    ///
    /// Takes `&self`: the cache synchronizes internally so parallel systems
    /// can resolve queries concurrently.
    pub fn matching(&self, descriptor: &QueryDescriptor) -> Vec<ArchetypeIndex> {
        if let Some(cached) =
            self.query_cache
                .lookup(descriptor, self.structural_version, &self.archetypes)
        {
            return cached;
        }

        let matching: Vec<ArchetypeIndex> = self
            .archetypes
            .iter()
            .enumerate()
            .filter(|(_, archetype)| !archetype.is_empty() && descriptor.matches(archetype))
            .map(|(index, _)| index)
            .collect();

        self.query_cache.store(
            descriptor,
            matching.clone(),
            self.structural_version,
            &self.archetypes,
        );

        matching
    }

    /// Clears all cached query results
    pub fn clear_query_cache(&self) {
        self.query_cache.clear();
    }

    /// Drops all archetypes and locations
    pub fn clear(&mut self) {
        self.archetypes.clear();
        self.by_signature.clear();
        self.locations.clear();
        self.structural_version += 1;
        self.query_cache.clear();
    }
}
