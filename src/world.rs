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

//! World: central entity, component, resource, and event storage.

use smallvec::SmallVec;
use tracing::debug;

use crate::archetype::{Archetypes, ArchetypesConfig, EntityLocation};
use crate::command::{Command, CommandQueue};
use crate::component::{
    component_type_id_of, Bundle, Component, ComponentTypeInfo, MAX_BUNDLE_COMPONENTS,
};
use crate::entity::{Entities, Entity};
use crate::error::{EcsError, Result};
use crate::event::{EntityDestroyedEvent, EntitySpawnedEvent, Event, EventManager};
use crate::query::{Query, QueryData};
use crate::resource::{Res, ResMut, Resource, Resources};

/// Central ECS world.
///
/// Structural mutation (spawn, destroy, add/remove component) is
/// single-threaded; during parallel stages systems defer it through command
/// buffers, which the scheduler applies here at stage boundaries.
pub struct World {
    entities: Entities,
    archetypes: Archetypes,
    resources: Resources,
    events: EventManager,
    commands: CommandQueue,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(&ArchetypesConfig::default())
    }

    pub fn with_config(config: &ArchetypesConfig) -> Self {
        Self {
            entities: Entities::new(),
            archetypes: Archetypes::new(config),
            resources: Resources::new(),
            events: EventManager::new(),
            commands: CommandQueue::new(),
        }
    }

    // ========== Entities ==========

    /// Spawns an entity with the given bundle of components.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Entity {
        let entity = self.entities.create();

        let infos = B::type_infos();
        let mut sorted: SmallVec<[ComponentTypeInfo; MAX_BUNDLE_COMPONENTS]> = infos.clone();
        sorted.sort();
        debug_assert!(
            sorted.windows(2).all(|w| w[0].id != w[1].id),
            "bundle contains duplicate component types"
        );

        let location = self.archetypes.assign_fresh(entity, &sorted);
        let archetype = &self.archetypes.archetypes()[location.archetype];

        // Column pointers in the bundle's declaration order
        let ptrs: SmallVec<[*mut u8; MAX_BUNDLE_COMPONENTS]> = infos
            .iter()
            .map(|info| {
                archetype
                    .column(info.id)
                    .expect("assign_fresh created every column")
                    .ptr_at(location.row)
            })
            .collect();

        // SAFETY: each pointer targets the uninitialized slot of the matching
        // component's column at the new row.
        unsafe {
            bundle.write_components(&ptrs);
        }

        if self.events.is_registered::<EntitySpawnedEvent>() {
            self.events.write(EntitySpawnedEvent { entity });
        }

        entity
    }

    /// Creates an entity with no components
    pub fn create_entity(&mut self) -> Entity {
        let entity = self.entities.create();
        if self.events.is_registered::<EntitySpawnedEvent>() {
            self.events.write(EntitySpawnedEvent { entity });
        }
        entity
    }

    /// Reserves an entity handle; lock-free, usable from parallel systems.
    ///
    /// The entity has no components until a deferred command gives it some,
    /// and fresh indices only become alive at the next flush.
    pub fn reserve_entity(&self) -> Entity {
        self.entities.reserve()
    }

    /// Destroys an entity and its components.
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<()> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::EntityNotFound);
        }

        self.archetypes.destroy(entity);
        self.entities.destroy(entity);

        if self.events.is_registered::<EntityDestroyedEvent>() {
            self.events.write(EntityDestroyedEvent { entity });
        }
        Ok(())
    }

    /// Destroys an entity if alive; returns whether anything was destroyed.
    pub fn try_destroy_entity(&mut self, entity: Entity) -> bool {
        self.destroy_entity(entity).is_ok()
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn entity_count(&self) -> u32 {
        self.entities.alive_count()
    }

    // ========== Components ==========

    /// Adds a component, replacing the existing value if already present.
    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) -> Result<()> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::EntityNotFound);
        }

        let id = component_type_id_of::<T>();
        if let Some(location) = self.archetypes.location_of(entity) {
            let archetype = &self.archetypes.archetypes()[location.archetype];
            if let Some(column) = archetype.column(id) {
                let ptr = column.ptr_at(location.row) as *mut T;
                // SAFETY: the slot holds an initialized T; replace drops it
                unsafe {
                    let _previous = std::ptr::replace(ptr, component);
                }
                return Ok(());
            }
        }

        let (_, ptr) = self
            .archetypes
            .move_on_add(entity, ComponentTypeInfo::of::<T>())?;
        // SAFETY: move_on_add returns the uninitialized slot of T's column
        unsafe {
            std::ptr::write(ptr as *mut T, component);
        }
        Ok(())
    }

    /// Removes a component, migrating the entity to the smaller archetype.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<()> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::EntityNotFound);
        }
        self.archetypes
            .move_on_remove(entity, component_type_id_of::<T>())
            .map(|_| ())
    }

    /// Shared reference to a component, or `None` when absent
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        if !self.entities.is_alive(entity) {
            return None;
        }
        let location = self.archetypes.location_of(entity)?;
        let archetype = self.archetypes.archetype(location.archetype)?;
        let column = archetype.column(component_type_id_of::<T>())?;
        // SAFETY: the column stores T and the row is live
        Some(unsafe { column.get::<T>(location.row) })
    }

    /// Mutable reference to a component, or `None` when absent
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        if !self.entities.is_alive(entity) {
            return None;
        }
        let location = self.archetypes.location_of(entity)?;
        let archetype = self.archetypes.archetype(location.archetype)?;
        let column = archetype.column(component_type_id_of::<T>())?;
        // SAFETY: the column stores T, the row is live, and `&mut self`
        // guarantees exclusivity on this path
        Some(unsafe { column.get_mut::<T>(location.row) })
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.archetypes
            .location_of(entity)
            .and_then(|location| self.archetypes.archetype(location.archetype))
            .map(|archetype| archetype.has_component(component_type_id_of::<T>()))
            .unwrap_or(false)
    }

    /// Location of the entity's archetype row, if it has components
    pub fn entity_location(&self, entity: Entity) -> Option<EntityLocation> {
        self.archetypes.location_of(entity)
    }

    // ========== Queries ==========

    /// Typed query over the world. `&mut self` guarantees exclusivity for
    /// any `&mut T` elements; systems get the same API through their context.
    pub fn query<Q: QueryData>(&mut self) -> Query<'_, Q> {
        Query::new(self)
    }

    // ========== Resources ==========

    /// Inserts a resource, replacing any existing one of the same type
    pub fn insert_resource<R: Resource>(&mut self, resource: R) {
        self.resources.insert(resource);
    }

    pub fn try_insert_resource<R: Resource>(&mut self, resource: R) -> Result<()> {
        self.resources.try_insert(resource)
    }

    pub fn emplace_resource<R: Resource + Default>(&mut self) {
        self.resources.emplace::<R>();
    }

    pub fn get_resource<R: Resource>(&self) -> Option<Res<'_, R>> {
        self.resources.get::<R>()
    }

    pub fn get_resource_mut<R: Resource>(&self) -> Option<ResMut<'_, R>> {
        self.resources.get_mut::<R>()
    }

    pub fn has_resource<R: Resource>(&self) -> bool {
        self.resources.contains::<R>()
    }

    pub fn remove_resource<R: Resource>(&mut self) -> Option<R> {
        self.resources.remove::<R>()
    }

    // ========== Events ==========

    /// Registers an event type; writing unregistered events is a
    /// precondition violation.
    pub fn add_event<E: Event>(&mut self) {
        self.events.register_event::<E>();
    }

    pub fn has_event_registered<E: Event>(&self) -> bool {
        self.events.is_registered::<E>()
    }

    pub fn write_event<E: Event>(&mut self, event: E) {
        self.events.write(event);
    }

    pub fn write_events_bulk<E: Event>(&mut self, events: &[E]) {
        self.events.write_bulk(events);
    }

    /// Reads previous-frame events, then current-frame ones
    pub fn read_events<E: Event>(&self) -> Vec<E> {
        self.events.read::<E>()
    }

    pub fn has_events<E: Event>(&self) -> bool {
        self.events.has_events::<E>()
    }

    pub fn manual_clear_events<E: Event>(&mut self) {
        self.events.manual_clear::<E>();
    }

    // ========== Commands ==========

    /// Enqueues a command for the next `update`
    pub fn enqueue_command(&mut self, command: Command) {
        self.commands.enqueue(command);
    }

    pub fn queued_command_count(&self) -> usize {
        self.commands.len()
    }

    /// Applies a batch of commands immediately, in order. Used by the
    /// scheduler when draining per-system buffers.
    pub(crate) fn apply_commands(&mut self, commands: Vec<Command>) {
        for command in commands {
            command.apply(self);
        }
    }

    // ========== Frame maintenance ==========

    /// Materializes reserved entities; part of the world's structural
    /// finalizer between schedule steps.
    pub fn flush_reserved_entities(&mut self) {
        self.entities.flush_reserved();
    }

    /// Per-frame maintenance: flush reserved entities, apply queued
    /// commands, then advance the event double buffer.
    pub fn update(&mut self) {
        self.flush_reserved_entities();

        let queued = self.commands.dequeue_all();
        if !queued.is_empty() {
            debug!(count = queued.len(), "applying queued world commands");
            self.apply_commands(queued);
        }

        self.events.update();
    }

    /// Drops every entity, component, resource, and event.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.archetypes.clear();
        self.resources.clear();
        self.events.clear();
        self.commands.clear();
    }

    // ========== Internal accessors ==========

    pub fn entities(&self) -> &Entities {
        &self.entities
    }

    pub fn archetypes(&self) -> &Archetypes {
        &self.archetypes
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.archetype_count()
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut Resources {
        &mut self.resources
    }

    pub fn event_manager(&self) -> &EventManager {
        &self.events
    }

    pub fn event_manager_mut(&mut self) -> &mut EventManager {
        &mut self.events
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    struct Frozen;

    #[derive(Default)]
    struct Score(u32);
    impl Resource for Score {}

    #[test]
    fn test_spawn_and_read_back() {
        let mut world = World::new();
        let entity = world.spawn((Position { x: 1.0, y: 2.0 }, Velocity { dx: 0.5, dy: 0.0 }));

        assert!(world.is_alive(entity));
        assert_eq!(
            world.get_component::<Position>(entity),
            Some(&Position { x: 1.0, y: 2.0 })
        );
        assert_eq!(
            world.get_component::<Velocity>(entity),
            Some(&Velocity { dx: 0.5, dy: 0.0 })
        );
    }

    #[test]
    fn test_destroy_then_everything_absent() {
        let mut world = World::new();
        let entity = world.spawn((Position { x: 0.0, y: 0.0 },));

        world.destroy_entity(entity).unwrap();
        assert!(!world.is_alive(entity));
        assert_eq!(world.get_component::<Position>(entity), None);
        assert!(world.destroy_entity(entity).is_err());
        assert!(!world.try_destroy_entity(entity));
    }

    #[test]
    fn test_stale_handle_after_recycle() {
        let mut world = World::new();
        let first = world.spawn((Position { x: 1.0, y: 1.0 },));
        world.destroy_entity(first).unwrap();

        let second = world.spawn((Position { x: 2.0, y: 2.0 },));
        assert_eq!(second.index(), first.index());
        assert!(!world.is_alive(first));
        assert_eq!(world.get_component::<Position>(first), None);
        assert_eq!(
            world.get_component::<Position>(second),
            Some(&Position { x: 2.0, y: 2.0 })
        );
    }

    #[test]
    fn test_add_component_migrates() {
        let mut world = World::new();
        let entity = world.spawn((Position { x: 3.0, y: 4.0 },));

        world
            .add_component(entity, Velocity { dx: 1.0, dy: 1.0 })
            .unwrap();
        assert!(world.has_component::<Position>(entity));
        assert!(world.has_component::<Velocity>(entity));
        assert_eq!(
            world.get_component::<Position>(entity),
            Some(&Position { x: 3.0, y: 4.0 })
        );
    }

    #[test]
    fn test_add_existing_component_replaces() {
        let mut world = World::new();
        let entity = world.spawn((Position { x: 1.0, y: 1.0 },));
        let before = world.archetype_count();

        world
            .add_component(entity, Position { x: 9.0, y: 9.0 })
            .unwrap();
        assert_eq!(
            world.get_component::<Position>(entity),
            Some(&Position { x: 9.0, y: 9.0 })
        );
        assert_eq!(world.archetype_count(), before);
    }

    #[test]
    fn test_remove_component_round_trip() {
        let mut world = World::new();
        let entity = world.spawn((Position { x: 0.0, y: 0.0 },));
        let original = world.entity_location(entity).unwrap();

        world
            .add_component(entity, Velocity { dx: 0.0, dy: 0.0 })
            .unwrap();
        world.remove_component::<Velocity>(entity).unwrap();

        let restored = world.entity_location(entity).unwrap();
        assert_eq!(restored.archetype, original.archetype);
        assert!(world.remove_component::<Velocity>(entity).is_err());
    }

    #[test]
    fn test_query_iterates_matching_rows() {
        let mut world = World::new();
        world.spawn((Position { x: 1.0, y: 0.0 }, Velocity { dx: 1.0, dy: 0.0 }));
        world.spawn((Position { x: 2.0, y: 0.0 },));
        world.spawn((Position { x: 3.0, y: 0.0 }, Velocity { dx: 3.0, dy: 0.0 }));

        let mut seen = 0;
        for (_, (position, velocity)) in world.query::<(&mut Position, &Velocity)>().iter() {
            position.y += velocity.dx;
            seen += 1;
        }
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_query_without_filter() {
        let mut world = World::new();
        world.spawn((Position { x: 1.0, y: 0.0 },));
        world.spawn((Position { x: 2.0, y: 0.0 }, Frozen));

        let count = world.query::<(&Position,)>().without::<Frozen>().count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_builtin_events_emitted_only_when_registered() {
        let mut world = World::new();

        // Not registered: spawn emits nothing and panics on read, so check
        // registration state instead
        let silent = world.spawn((Position { x: 0.0, y: 0.0 },));
        assert!(!world.has_event_registered::<EntitySpawnedEvent>());
        world.destroy_entity(silent).unwrap();

        world.add_event::<EntitySpawnedEvent>();
        world.add_event::<EntityDestroyedEvent>();

        let entity = world.spawn((Position { x: 0.0, y: 0.0 },));
        let spawned = world.read_events::<EntitySpawnedEvent>();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].entity, entity);

        world.destroy_entity(entity).unwrap();
        let destroyed = world.read_events::<EntityDestroyedEvent>();
        assert_eq!(destroyed.len(), 1);
        assert_eq!(destroyed[0].entity, entity);
    }

    #[test]
    fn test_resource_api() {
        let mut world = World::new();
        world.insert_resource(Score(5));
        assert!(world.has_resource::<Score>());
        assert_eq!(world.get_resource::<Score>().unwrap().0, 5);

        world.get_resource_mut::<Score>().unwrap().0 = 6;
        assert_eq!(world.remove_resource::<Score>().unwrap().0, 6);
        assert!(!world.has_resource::<Score>());
    }

    #[test]
    fn test_reserved_entity_alive_after_update() {
        let mut world = World::new();
        let reserved = world.reserve_entity();
        assert!(!world.is_alive(reserved));

        world.update();
        assert!(world.is_alive(reserved));
    }

    #[test]
    fn test_queued_commands_apply_on_update() {
        let mut world = World::new();
        let entity = world.spawn((Position { x: 0.0, y: 0.0 },));

        world.enqueue_command(Command::DestroyEntity(entity));
        assert!(world.is_alive(entity));

        world.update();
        assert!(!world.is_alive(entity));
    }

    #[test]
    fn test_exactly_one_archetype_row_per_entity() {
        let mut world = World::new();
        let entities: Vec<Entity> = (0..16)
            .map(|i| {
                if i % 2 == 0 {
                    world.spawn((Position { x: i as f32, y: 0.0 },))
                } else {
                    world.spawn((Position { x: i as f32, y: 0.0 }, Velocity { dx: 0.0, dy: 0.0 }))
                }
            })
            .collect();

        let archetypes = world.archetypes();
        for &entity in &entities {
            let rows: usize = archetypes
                .archetypes()
                .iter()
                .map(|archetype| {
                    archetype
                        .entities()
                        .iter()
                        .filter(|&&candidate| candidate == entity)
                        .count()
                })
                .sum();
            assert_eq!(rows, 1, "entity {entity} must occupy exactly one row");
        }
    }
}
