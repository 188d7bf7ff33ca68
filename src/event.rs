//! Typed double-buffered event queues.
//!
//! Events written in frame N are readable in frames N and N+1, then cleared
//! if their policy is automatic. Manual events persist until explicitly
//! cleared. Storage is a raw byte buffer per type; the `Copy` bound on
//! [`Event`] is what makes that safe.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;

use ahash::AHashMap;
use tracing::debug;

use crate::entity::Entity;
use crate::utils::{short_type_name, type_hash_of};

/// Stable 64-bit event type identifier
pub type EventTypeId = u64;

/// Policy for event clearing behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearPolicy {
    /// Cleared automatically after one full double-buffer cycle
    Automatic,
    /// Persists until cleared via `manual_clear` or a clear-events command
    Manual,
}

/// Trait for event types.
///
/// The `Copy` bound is the Rust spelling of the trivially-copyable
/// requirement: events are stored and moved as raw bytes.
pub trait Event: Copy + Send + Sync + 'static {
    const CLEAR_POLICY: ClearPolicy = ClearPolicy::Automatic;

    fn name() -> &'static str
    where
        Self: Sized,
    {
        short_type_name::<Self>()
    }
}

/// Gets the type id for an event type
pub fn event_type_id_of<E: Event>() -> EventTypeId {
    type_hash_of::<E>()
}

/// Metadata recorded at registration
#[derive(Debug, Clone, Copy)]
pub struct EventMetadata {
    pub type_id: EventTypeId,
    pub name: &'static str,
    pub clear_policy: ClearPolicy,
    pub frame_registered: u64,
}

/// Emitted by the world when an entity is spawned, iff registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySpawnedEvent {
    pub entity: Entity,
}

impl Event for EntitySpawnedEvent {}

/// Emitted by the world when an entity is destroyed, iff registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDestroyedEvent {
    pub entity: Entity,
}

impl Event for EntityDestroyedEvent {}

/// Requests a clean shutdown of the app; checked by runners after each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownEvent {
    /// Zero maps to `AppExitCode::Success`, anything else to `Failure`
    pub exit_code: i32,
}

impl ShutdownEvent {
    pub fn success() -> Self {
        Self { exit_code: 0 }
    }

    pub fn failure() -> Self {
        Self { exit_code: 1 }
    }
}

impl Event for ShutdownEvent {}

/// Type-erased storage for one event type: a contiguous aligned byte buffer.
struct EventBuffer {
    item_size: usize,
    item_align: usize,
    data: NonNull<u8>,
    capacity: usize,
    len: usize,
}

unsafe impl Send for EventBuffer {}
unsafe impl Sync for EventBuffer {}

impl EventBuffer {
    fn new(item_size: usize, item_align: usize) -> Self {
        let item_align = item_align.max(1);
        // Dangling but aligned for the item type
        let dangling = item_align as *mut u8;
        Self {
            item_size,
            item_align,
            data: unsafe { NonNull::new_unchecked(dangling) },
            capacity: 0,
            len: 0,
        }
    }

    fn reserve(&mut self, additional: usize) {
        if self.item_size == 0 {
            return;
        }
        let needed = self.len + additional;
        if needed <= self.capacity {
            return;
        }
        let new_capacity = (self.capacity * 2).max(needed).max(8);
        let layout = Layout::from_size_align(new_capacity * self.item_size, self.item_align)
            .expect("event buffer layout overflow");
        let new_data = unsafe { alloc(layout) };
        let Some(new_data) = NonNull::new(new_data) else {
            handle_alloc_error(layout);
        };

        if self.capacity > 0 {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.data.as_ptr(),
                    new_data.as_ptr(),
                    self.len * self.item_size,
                );
                self.dealloc_buffer();
            }
        }
        self.data = new_data;
        self.capacity = new_capacity;
    }

    unsafe fn dealloc_buffer(&mut self) {
        if self.capacity > 0 && self.item_size > 0 {
            let layout =
                Layout::from_size_align_unchecked(self.capacity * self.item_size, self.item_align);
            dealloc(self.data.as_ptr(), layout);
        }
    }

    /// Appends one item by raw copy
    ///
    /// # Safety
    /// `src` must point to a valid value of this buffer's event type.
    unsafe fn write_raw(&mut self, src: *const u8) {
        self.reserve(1);
        if self.item_size > 0 {
            std::ptr::copy_nonoverlapping(
                src,
                self.data.as_ptr().add(self.len * self.item_size),
                self.item_size,
            );
        }
        self.len += 1;
    }

    /// Moves all items from `other` to the end of this buffer
    fn append_from(&mut self, other: &mut EventBuffer) {
        debug_assert_eq!(self.item_size, other.item_size);
        if other.len == 0 {
            return;
        }
        self.reserve(other.len);
        if self.item_size > 0 {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    other.data.as_ptr(),
                    self.data.as_ptr().add(self.len * self.item_size),
                    other.len * self.item_size,
                );
            }
        }
        self.len += other.len;
        other.len = 0;
    }

    fn clear(&mut self) {
        // Events are Copy; dropping is a no-op
        self.len = 0;
    }

    fn len(&self) -> usize {
        self.len
    }

    /// # Safety
    /// `E` must be the buffer's event type.
    unsafe fn as_slice<E: Event>(&self) -> &[E] {
        if self.len == 0 {
            return &[];
        }
        std::slice::from_raw_parts(self.data.as_ptr() as *const E, self.len)
    }
}

impl Drop for EventBuffer {
    fn drop(&mut self) {
        unsafe {
            self.dealloc_buffer();
        }
    }
}

/// A set of per-type event buffers. One store of the double buffer, and the
/// backing type for system-local event storage.
#[derive(Default)]
pub struct EventQueue {
    buffers: AHashMap<EventTypeId, EventBuffer>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures a buffer exists for `E`
    pub fn register<E: Event>(&mut self) {
        self.buffers
            .entry(event_type_id_of::<E>())
            .or_insert_with(|| {
                EventBuffer::new(std::mem::size_of::<E>(), std::mem::align_of::<E>())
            });
    }

    pub fn is_registered<E: Event>(&self) -> bool {
        self.buffers.contains_key(&event_type_id_of::<E>())
    }

    /// Appends one event. Panics if the type has no buffer.
    pub fn write<E: Event>(&mut self, event: E) {
        let buffer = self
            .buffers
            .get_mut(&event_type_id_of::<E>())
            .unwrap_or_else(|| panic!("event '{}' has no buffer in this queue", E::name()));
        unsafe {
            buffer.write_raw(&event as *const E as *const u8);
        }
    }

    /// Appends a slice of events, reserving the full length up front
    pub fn write_bulk<E: Event>(&mut self, events: &[E]) {
        let buffer = self
            .buffers
            .get_mut(&event_type_id_of::<E>())
            .unwrap_or_else(|| panic!("event '{}' has no buffer in this queue", E::name()));
        buffer.reserve(events.len());
        for event in events {
            unsafe {
                buffer.write_raw(event as *const E as *const u8);
            }
        }
    }

    /// Registers on demand, then writes. Used by system-local queues where
    /// the global registration check happens at merge time.
    pub fn write_or_register<E: Event>(&mut self, event: E) {
        self.register::<E>();
        self.write(event);
    }

    /// Events of type `E` in write order
    pub fn read<E: Event>(&self) -> &[E] {
        match self.buffers.get(&event_type_id_of::<E>()) {
            // SAFETY: the buffer keyed by E's id stores E values
            Some(buffer) => unsafe { buffer.as_slice::<E>() },
            None => &[],
        }
    }

    pub fn read_into<E: Event>(&self, out: &mut Vec<E>) {
        out.extend_from_slice(self.read::<E>());
    }

    pub fn has_events<E: Event>(&self) -> bool {
        self.len_of(event_type_id_of::<E>()) > 0
    }

    pub fn len_of(&self, type_id: EventTypeId) -> usize {
        self.buffers.get(&type_id).map_or(0, EventBuffer::len)
    }

    pub fn clear_type(&mut self, type_id: EventTypeId) {
        if let Some(buffer) = self.buffers.get_mut(&type_id) {
            buffer.clear();
        }
    }

    pub fn clear<E: Event>(&mut self) {
        self.clear_type(event_type_id_of::<E>());
    }

    /// Clears every buffer, keeping registrations
    pub fn clear_all(&mut self) {
        for buffer in self.buffers.values_mut() {
            buffer.clear();
        }
    }

    /// Moves every event from `other` into this queue, registering types on
    /// demand. `other` is left registered but empty.
    pub fn merge(&mut self, other: &mut EventQueue) {
        for (&type_id, source) in &mut other.buffers {
            if source.len() == 0 {
                continue;
            }
            let target = self
                .buffers
                .entry(type_id)
                .or_insert_with(|| EventBuffer::new(source.item_size, source.item_align));
            target.append_from(source);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.values().all(|buffer| buffer.len() == 0)
    }
}

/// Double-buffered event manager with per-type clear policies.
///
/// Ticked exactly once per frame by `World::update`.
pub struct EventManager {
    registered: AHashMap<EventTypeId, EventMetadata>,
    current: EventQueue,
    previous: EventQueue,
    frame: u64,
}

impl EventManager {
    pub fn new() -> Self {
        Self {
            registered: AHashMap::new(),
            current: EventQueue::new(),
            previous: EventQueue::new(),
            frame: 0,
        }
    }

    /// Registers an event type for use. Panics if already registered.
    pub fn register_event<E: Event>(&mut self) {
        let type_id = event_type_id_of::<E>();
        assert!(
            !self.registered.contains_key(&type_id),
            "Failed to register event '{}': already registered",
            E::name()
        );

        self.registered.insert(
            type_id,
            EventMetadata {
                type_id,
                name: E::name(),
                clear_policy: E::CLEAR_POLICY,
                frame_registered: self.frame,
            },
        );
        self.current.register::<E>();
        self.previous.register::<E>();

        debug!(
            event = E::name(),
            policy = ?E::CLEAR_POLICY,
            "registered event"
        );
    }

    pub fn is_registered<E: Event>(&self) -> bool {
        self.registered.contains_key(&event_type_id_of::<E>())
    }

    pub fn is_registered_id(&self, type_id: EventTypeId) -> bool {
        self.registered.contains_key(&type_id)
    }

    pub fn metadata<E: Event>(&self) -> Option<&EventMetadata> {
        self.registered.get(&event_type_id_of::<E>())
    }

    pub fn registered_event_count(&self) -> usize {
        self.registered.len()
    }

    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    /// Writes an event to the current store. Panics if unregistered.
    pub fn write<E: Event>(&mut self, event: E) {
        assert!(
            self.is_registered::<E>(),
            "Failed to write event '{}': not registered",
            E::name()
        );
        self.current.write(event);
    }

    /// Writes a slice of events to the current store. Panics if unregistered.
    pub fn write_bulk<E: Event>(&mut self, events: &[E]) {
        assert!(
            self.is_registered::<E>(),
            "Failed to write events '{}': not registered",
            E::name()
        );
        self.current.write_bulk(events);
    }

    /// Reads the previous store, then the current one. Panics if
    /// unregistered.
    pub fn read<E: Event>(&self) -> Vec<E> {
        assert!(
            self.is_registered::<E>(),
            "Failed to read events '{}': not registered",
            E::name()
        );
        let mut out =
            Vec::with_capacity(self.previous.read::<E>().len() + self.current.read::<E>().len());
        self.read_into(&mut out);
        out
    }

    /// Reads without the intermediate allocation
    pub fn read_into<E: Event>(&self, out: &mut Vec<E>) {
        self.previous.read_into(out);
        self.current.read_into(out);
    }

    pub fn has_events<E: Event>(&self) -> bool {
        self.current.has_events::<E>() || self.previous.has_events::<E>()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.previous.is_empty()
    }

    /// Clears both stores of `E` regardless of policy. Panics if
    /// unregistered.
    pub fn manual_clear<E: Event>(&mut self) {
        assert!(
            self.is_registered::<E>(),
            "Failed to clear events '{}': not registered",
            E::name()
        );
        self.current.clear::<E>();
        self.previous.clear::<E>();
    }

    /// Clears both stores of the type id, used by clear-events commands
    pub fn clear_type_id(&mut self, type_id: EventTypeId) {
        self.current.clear_type(type_id);
        self.previous.clear_type(type_id);
    }

    /// Clears every queue without dropping registrations
    pub fn clear_all_queues(&mut self) {
        self.current.clear_all();
        self.previous.clear_all();
    }

    /// Clears everything including registrations
    pub fn clear(&mut self) {
        self.registered.clear();
        self.current = EventQueue::new();
        self.previous = EventQueue::new();
        self.frame = 0;
    }

    /// Merges a system-local queue into the current store.
    ///
    /// Writing a type that was never registered globally is a precondition
    /// violation and panics with the type's id.
    pub fn merge_local(&mut self, local: &mut EventQueue) {
        if cfg!(debug_assertions) {
            for (&type_id, buffer) in &local.buffers {
                if buffer.len() > 0 {
                    assert!(
                        self.registered.contains_key(&type_id),
                        "system wrote event type {type_id:#x} that was never registered"
                    );
                }
            }
        }
        self.current.merge(local);
    }

    /// Advances the double buffer. Runs once at the end of every frame.
    ///
    /// 1. Clear the previous store of every automatic type (those events are
    ///    now two frames old).
    /// 2. Merge the current store into previous (manual types accumulate).
    /// 3. Begin an empty current store for each registered type.
    /// 4. Bump the frame counter.
    pub fn update(&mut self) {
        for metadata in self.registered.values() {
            if metadata.clear_policy == ClearPolicy::Automatic {
                self.previous.clear_type(metadata.type_id);
            }
        }

        self.previous.merge(&mut self.current);

        for metadata in self.registered.values() {
            self.current.clear_type(metadata.type_id);
        }

        self.frame += 1;
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}
