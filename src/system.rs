//! System trait, the per-system execution context, and system-local storage.

use bumpalo::Bump;

use crate::access::AccessPolicy;
use crate::command::{Command, CommandBuffer};
use crate::entity::Entity;
use crate::error::Result;
use crate::event::{Event, EventQueue};
use crate::query::{Query, QueryData};
use crate::resource::{Res, ResMut, Resource};
use crate::world::World;

/// Trait for systems.
///
/// The access policy is static: it must cover everything `update` touches,
/// and the scheduler serializes conflicting systems based on it alone.
///
/// ```ignore
/// struct Movement;
///
/// impl System for Movement {
///     fn name(&self) -> &'static str {
///         "Movement"
///     }
///
///     fn access_policy(&self) -> AccessPolicy {
///         AccessPolicy::new()
///             .query::<(&mut Transform, &Velocity)>()
///             .read_resource::<Time>()
///     }
///
///     fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<()> {
///         let delta = ctx.read_resource::<Time>().delta_seconds();
///         for (_, (transform, velocity)) in ctx.query::<(&mut Transform, &Velocity)>().iter() {
///             transform.translate(velocity.scaled(delta));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait System: Send + Sync + 'static {
    /// System name, used in logs and conflict diagnostics
    fn name(&self) -> &'static str;

    /// Static declaration of all data this system reads and writes
    fn access_policy(&self) -> AccessPolicy;

    /// Runs the system for one schedule step
    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<()>;
}

/// Boxed system
pub type BoxedSystem = Box<dyn System>;

/// Storage a system owns for the duration of a stage: deferred commands, a
/// local event queue, and a frame arena for scratch allocations.
///
/// Keeping these per-system removes all contention on the world during
/// parallel execution; the scheduler drains them at stage boundaries.
pub struct SystemLocalStorage {
    commands: Vec<Command>,
    events: EventQueue,
    arena: Bump,
}

impl SystemLocalStorage {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            events: EventQueue::new(),
            arena: Bump::new(),
        }
    }

    pub fn commands_mut(&mut self) -> &mut Vec<Command> {
        &mut self.commands
    }

    /// Takes all queued commands, leaving the buffer empty
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn events_mut(&mut self) -> &mut EventQueue {
        &mut self.events
    }

    /// Scratch arena; reset at stage boundaries, so nothing allocated from it
    /// may outlive the system's `update` call.
    pub fn arena(&self) -> &Bump {
        &self.arena
    }

    pub fn reset_arena(&mut self) {
        self.arena.reset();
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.events.is_empty()
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.events.clear_all();
        self.arena.reset();
    }
}

impl Default for SystemLocalStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// The validated view of the world handed to a running system.
///
/// Every accessor checks the system's declared [`AccessPolicy`] in debug
/// builds; an undeclared access is a correctness bug in the system, not a
/// recoverable condition.
pub struct SystemContext<'a> {
    world: &'a World,
    policy: &'a AccessPolicy,
    local: &'a mut SystemLocalStorage,
    system_name: &'static str,
}

impl<'a> SystemContext<'a> {
    pub(crate) fn new(
        world: &'a World,
        policy: &'a AccessPolicy,
        local: &'a mut SystemLocalStorage,
        system_name: &'static str,
    ) -> Self {
        Self {
            world,
            policy,
            local,
            system_name,
        }
    }

    /// Runs a query over the world.
    ///
    /// The query's components must be covered by the declared policy; writes
    /// require a declared write.
    pub fn query<Q: QueryData>(&self) -> Query<'a, Q> {
        #[cfg(debug_assertions)]
        {
            let infos = Q::component_infos();
            let flags = Q::write_flags();
            for (info, writes) in infos.iter().zip(flags.iter()) {
                if *writes {
                    assert!(
                        self.policy.writes_component(info.id),
                        "system '{}' queries '{}' mutably without declaring the write",
                        self.system_name,
                        info.name
                    );
                } else {
                    assert!(
                        self.policy.reads_component(info.id) || self.policy.writes_component(info.id),
                        "system '{}' queries '{}' without declaring the read",
                        self.system_name,
                        info.name
                    );
                }
            }
        }

        // SAFETY: the scheduler's conflict analysis guarantees no other
        // concurrently-running system aliases components this query writes.
        Query::new(self.world)
    }

    #[cfg(debug_assertions)]
    fn check_resource_read<R: Resource>(&self) {
        if R::THREAD_SAFE {
            return;
        }
        assert!(
            self.policy.reads_resource(crate::resource::resource_type_id_of::<R>())
                || self.policy.writes_resource(crate::resource::resource_type_id_of::<R>()),
            "system '{}' reads resource '{}' without declaring it",
            self.system_name,
            R::name()
        );
    }

    #[cfg(debug_assertions)]
    fn check_resource_write<R: Resource>(&self) {
        if R::THREAD_SAFE {
            return;
        }
        assert!(
            self.policy.writes_resource(crate::resource::resource_type_id_of::<R>()),
            "system '{}' writes resource '{}' without declaring it",
            self.system_name,
            R::name()
        );
    }

    /// Shared borrow of a resource. Panics if absent; use
    /// [`SystemContext::try_read_resource`] for optional resources.
    pub fn read_resource<R: Resource>(&self) -> Res<'a, R> {
        self.try_read_resource::<R>()
            .unwrap_or_else(|| panic!("resource '{}' not found", R::name()))
    }

    pub fn try_read_resource<R: Resource>(&self) -> Option<Res<'a, R>> {
        #[cfg(debug_assertions)]
        self.check_resource_read::<R>();
        self.world.resources().get::<R>()
    }

    /// Exclusive borrow of a resource. Panics if absent.
    pub fn write_resource<R: Resource>(&self) -> ResMut<'a, R> {
        self.try_write_resource::<R>()
            .unwrap_or_else(|| panic!("resource '{}' not found", R::name()))
    }

    pub fn try_write_resource<R: Resource>(&self) -> Option<ResMut<'a, R>> {
        #[cfg(debug_assertions)]
        self.check_resource_write::<R>();
        self.world.resources().get_mut::<R>()
    }

    /// Reads all events of `E`: previous frame's, then this stage's earlier
    /// writes. Panics if `E` was never registered.
    pub fn read_events<E: Event>(&self) -> Vec<E> {
        let mut out = self.world.event_manager().read::<E>();
        // Events this system wrote earlier in its own update are visible too
        self.local.events.read_into(&mut out);
        out
    }

    /// Writes an event into the system-local queue; merged into the global
    /// store when the step completes.
    pub fn write_event<E: Event>(&mut self, event: E) {
        assert!(
            self.world.event_manager().is_registered::<E>(),
            "system '{}' wrote unregistered event '{}'",
            self.system_name,
            E::name()
        );
        self.local.events.write_or_register(event);
    }

    pub fn write_events_bulk<E: Event>(&mut self, events: &[E]) {
        assert!(
            self.world.event_manager().is_registered::<E>(),
            "system '{}' wrote unregistered event '{}'",
            self.system_name,
            E::name()
        );
        self.local.events.register::<E>();
        self.local.events.write_bulk(events);
    }

    /// Deferred world mutations, applied at the stage boundary in enqueue
    /// order.
    pub fn commands(&mut self) -> CommandBuffer<'_> {
        CommandBuffer::new(self.local.commands_mut())
    }

    /// Reserves an entity handle without touching storage. Lock-free, so any
    /// system may call this concurrently; pair with a command that populates
    /// the entity.
    pub fn reserve_entity(&self) -> Entity {
        self.world.entities().reserve()
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.world.entities().is_alive(entity)
    }

    /// Per-system frame arena for scratch allocations; reset after the stage.
    pub fn arena(&self) -> &Bump {
        self.local.arena()
    }

    /// Name of the running system
    pub fn system_name(&self) -> &'static str {
        self.system_name
    }
}
