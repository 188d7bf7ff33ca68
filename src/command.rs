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

//! Deferred world mutations.
//!
//! Systems never mutate the world structurally while running; they enqueue
//! commands that the scheduler applies single-threaded at stage boundaries,
//! in enqueue order.

use tracing::{debug, error};

use crate::component::{Bundle, Component};
use crate::entity::Entity;
use crate::event::{event_type_id_of, Event, EventTypeId};
use crate::world::World;

/// A one-shot world mutation.
///
/// Known shapes get dedicated variants; everything else goes through the
/// thunk escape hatch. Commands never return data; failures are reported via
/// assertions or logs.
pub enum Command {
    DestroyEntity(Entity),
    DestroyEntities(Vec<Entity>),
    /// Like `DestroyEntity` but silently skips dead entities
    TryDestroyEntity(Entity),
    TryDestroyEntities(Vec<Entity>),
    ClearEvents(EventTypeId),
    ClearAllEvents,
    Thunk(Box<dyn FnOnce(&mut World) + Send>),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::DestroyEntity(entity) => f.debug_tuple("DestroyEntity").field(entity).finish(),
            Command::DestroyEntities(entities) => {
                f.debug_tuple("DestroyEntities").field(&entities.len()).finish()
            }
            Command::TryDestroyEntity(entity) => {
                f.debug_tuple("TryDestroyEntity").field(entity).finish()
            }
            Command::TryDestroyEntities(entities) => f
                .debug_tuple("TryDestroyEntities")
                .field(&entities.len())
                .finish(),
            Command::ClearEvents(type_id) => f.debug_tuple("ClearEvents").field(type_id).finish(),
            Command::ClearAllEvents => write!(f, "ClearAllEvents"),
            Command::Thunk(_) => write!(f, "Thunk(...)"),
        }
    }
}

impl Command {
    /// Applies the command to the world.
    pub(crate) fn apply(self, world: &mut World) {
        match self {
            Command::DestroyEntity(entity) => {
                if world.destroy_entity(entity).is_err() {
                    error!(%entity, "destroy command targeted a dead entity");
                    debug_assert!(false, "destroy command targeted dead entity {entity}");
                }
            }
            Command::DestroyEntities(entities) => {
                for entity in entities {
                    if world.destroy_entity(entity).is_err() {
                        error!(%entity, "destroy command targeted a dead entity");
                        debug_assert!(false, "destroy command targeted dead entity {entity}");
                    }
                }
            }
            Command::TryDestroyEntity(entity) => {
                if world.destroy_entity(entity).is_err() {
                    debug!(%entity, "try-destroy skipped dead entity");
                }
            }
            Command::TryDestroyEntities(entities) => {
                for entity in entities {
                    if world.destroy_entity(entity).is_err() {
                        debug!(%entity, "try-destroy skipped dead entity");
                    }
                }
            }
            Command::ClearEvents(type_id) => {
                world.event_manager_mut().clear_type_id(type_id);
            }
            Command::ClearAllEvents => {
                world.event_manager_mut().clear_all_queues();
            }
            Command::Thunk(thunk) => {
                thunk(world);
            }
        }
    }
}

/// Per-system view over a deferred command list.
///
/// Obtained from [`crate::system::SystemContext::commands`]; pushes land in
/// the system's local storage and flush at the stage boundary.
pub struct CommandBuffer<'a> {
    commands: &'a mut Vec<Command>,
}

impl<'a> CommandBuffer<'a> {
    pub(crate) fn new(commands: &'a mut Vec<Command>) -> Self {
        Self { commands }
    }

    /// Destroys an entity at the next flush. Targeting a dead entity is a
    /// programmer error.
    pub fn destroy(&mut self, entity: Entity) {
        self.commands.push(Command::DestroyEntity(entity));
    }

    /// Destroys a batch of entities, in order
    pub fn destroy_batch(&mut self, entities: impl IntoIterator<Item = Entity>) {
        self.commands
            .push(Command::DestroyEntities(entities.into_iter().collect()));
    }

    /// Destroys an entity if still alive at flush time
    pub fn try_destroy(&mut self, entity: Entity) {
        self.commands.push(Command::TryDestroyEntity(entity));
    }

    pub fn try_destroy_batch(&mut self, entities: impl IntoIterator<Item = Entity>) {
        self.commands
            .push(Command::TryDestroyEntities(entities.into_iter().collect()));
    }

    /// Clears both event stores of `E` at the next flush
    pub fn clear_events<E: Event>(&mut self) {
        self.commands
            .push(Command::ClearEvents(event_type_id_of::<E>()));
    }

    /// Clears every event queue at the next flush (registrations survive)
    pub fn clear_all_events(&mut self) {
        self.commands.push(Command::ClearAllEvents);
    }

    /// Arbitrary deferred world mutation
    pub fn push(&mut self, thunk: impl FnOnce(&mut World) + Send + 'static) {
        self.commands.push(Command::Thunk(Box::new(thunk)));
    }

    /// Spawns an entity with the bundle at the next flush
    pub fn spawn<B: Bundle>(&mut self, bundle: B) {
        self.push(move |world| {
            world.spawn(bundle);
        });
    }

    /// Adds (or replaces) a component on an entity at the next flush
    pub fn insert<T: Component>(&mut self, entity: Entity, component: T) {
        self.push(move |world| {
            if let Err(err) = world.add_component(entity, component) {
                debug!(%entity, %err, "deferred insert failed");
            }
        });
    }

    /// Removes a component from an entity at the next flush
    pub fn remove<T: Component>(&mut self, entity: Entity) {
        self.push(move |world| {
            if let Err(err) = world.remove_component::<T>(entity) {
                debug!(%entity, %err, "deferred remove failed");
            }
        });
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// World-level command queue, drained during `World::update`.
///
/// Single-threaded; commands run in enqueue order.
#[derive(Default)]
pub struct CommandQueue {
    commands: Vec<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, capacity: usize) {
        self.commands.reserve(capacity);
    }

    pub fn enqueue(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn enqueue_bulk(&mut self, commands: impl IntoIterator<Item = Command>) {
        self.commands.extend(commands);
    }

    /// Takes every queued command, leaving the queue empty
    pub fn dequeue_all(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_records_in_order() {
        let mut commands = Vec::new();
        let mut buffer = CommandBuffer::new(&mut commands);

        let entity = Entity::new(0, 1);
        buffer.destroy(entity);
        buffer.clear_all_events();
        assert_eq!(buffer.len(), 2);

        assert!(matches!(commands[0], Command::DestroyEntity(_)));
        assert!(matches!(commands[1], Command::ClearAllEvents));
    }

    #[test]
    fn test_queue_dequeue_all_empties() {
        let mut queue = CommandQueue::new();
        queue.enqueue(Command::ClearAllEvents);
        queue.enqueue(Command::TryDestroyEntity(Entity::new(0, 1)));

        let drained = queue.dequeue_all();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
    }
}
