//! Resource store: typed singletons keyed by a stable type id.
//!
//! Resources are the world's global state. Mutation of the map itself is rare
//! (setup and command application), so a simple guarded map suffices; the hot
//! path is reads during a system step, where the scheduler already guarantees
//! writer exclusivity.

use std::any::Any;
use std::ops::{Deref, DerefMut};

use ahash::AHashMap;
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{EcsError, Result};
use crate::utils::{short_type_name, type_hash_of};

/// Stable 64-bit resource type identifier
pub type ResourceTypeId = u64;

/// Trait for world resources.
///
/// Implemented explicitly (not blanket) so a type can opt into
/// [`Resource::THREAD_SAFE`]: a thread-safe resource self-synchronizes and is
/// excluded from scheduler conflict analysis entirely.
pub trait Resource: Send + Sync + 'static {
    /// Thread-safe resources are invisible to the conflict graph
    const THREAD_SAFE: bool = false;

    fn name() -> &'static str
    where
        Self: Sized,
    {
        short_type_name::<Self>()
    }
}

/// Gets the type id for a resource type
pub fn resource_type_id_of<R: Resource>() -> ResourceTypeId {
    type_hash_of::<R>()
}

/// Identity record for a resource type, kept sorted by id in access policies
#[derive(Debug, Clone, Copy)]
pub struct ResourceTypeInfo {
    pub id: ResourceTypeId,
    pub name: &'static str,
    pub thread_safe: bool,
}

impl ResourceTypeInfo {
    pub fn of<R: Resource>() -> Self {
        Self {
            id: resource_type_id_of::<R>(),
            name: R::name(),
            thread_safe: R::THREAD_SAFE,
        }
    }
}

impl PartialEq for ResourceTypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResourceTypeInfo {}

impl PartialOrd for ResourceTypeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceTypeInfo {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

/// Shared borrow of a resource
pub struct Res<'a, R: Resource> {
    guard: MappedRwLockReadGuard<'a, R>,
}

impl<R: Resource> Deref for Res<'_, R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.guard
    }
}

/// Exclusive borrow of a resource
pub struct ResMut<'a, R: Resource> {
    guard: MappedRwLockWriteGuard<'a, R>,
}

impl<R: Resource> Deref for ResMut<'_, R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.guard
    }
}

impl<R: Resource> DerefMut for ResMut<'_, R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.guard
    }
}

/// Resource container for the world
pub struct Resources {
    entries: AHashMap<ResourceTypeId, RwLock<Box<dyn Any + Send + Sync>>>,
}

impl Resources {
    pub fn new() -> Self {
        Self {
            entries: AHashMap::new(),
        }
    }

    /// Inserts a resource, replacing any existing one of the same type.
    pub fn insert<R: Resource>(&mut self, resource: R) {
        self.entries
            .insert(resource_type_id_of::<R>(), RwLock::new(Box::new(resource)));
    }

    /// Inserts only if absent; fails without overwriting.
    pub fn try_insert<R: Resource>(&mut self, resource: R) -> Result<()> {
        match self.entries.entry(resource_type_id_of::<R>()) {
            std::collections::hash_map::Entry::Occupied(_) => {
                Err(EcsError::ResourceAlreadyExists(R::name()))
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(RwLock::new(Box::new(resource)));
                Ok(())
            }
        }
    }

    /// Default-constructs the resource in place, replacing any existing one.
    pub fn emplace<R: Resource + Default>(&mut self) {
        self.insert(R::default());
    }

    /// Default-constructs only if absent.
    pub fn try_emplace<R: Resource + Default>(&mut self) -> Result<()> {
        self.try_insert(R::default())
    }

    /// Shared borrow, or `None` if absent
    pub fn get<R: Resource>(&self) -> Option<Res<'_, R>> {
        let lock = self.entries.get(&resource_type_id_of::<R>())?;
        let guard = RwLockReadGuard::map(lock.read(), |boxed| {
            boxed.downcast_ref::<R>().expect("resource type matches key")
        });
        Some(Res { guard })
    }

    /// Exclusive borrow, or `None` if absent
    pub fn get_mut<R: Resource>(&self) -> Option<ResMut<'_, R>> {
        let lock = self.entries.get(&resource_type_id_of::<R>())?;
        let guard = RwLockWriteGuard::map(lock.write(), |boxed| {
            boxed.downcast_mut::<R>().expect("resource type matches key")
        });
        Some(ResMut { guard })
    }

    pub fn contains<R: Resource>(&self) -> bool {
        self.entries.contains_key(&resource_type_id_of::<R>())
    }

    /// Removes and returns the resource
    pub fn remove<R: Resource>(&mut self) -> Option<R> {
        let lock = self.entries.remove(&resource_type_id_of::<R>())?;
        lock.into_inner()
            .downcast::<R>()
            .map(|boxed| *boxed)
            .ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for Resources {
    fn default() -> Self {
        Self::new()
    }
}
