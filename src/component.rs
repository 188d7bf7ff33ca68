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

//! Component types and Bundle traits
//!
//! Components are data attached to entities.
//! Bundles group multiple components for spawning.

use smallvec::{smallvec, SmallVec};

use crate::utils::{short_type_name, type_hash_of};

/// Maximum number of components supported by Bundle implementations
pub const MAX_BUNDLE_COMPONENTS: usize = 8;

/// Stable 64-bit component type identifier.
///
/// Derived from the qualified type name, so ids are consistent across
/// compilation units and runs.
pub type ComponentTypeId = u64;

/// Marker trait for components
///
/// Components must be 'static (no borrowed data)
pub trait Component: 'static + Send + Sync {}

/// Automatically implement Component for all valid types
impl<T: 'static + Send + Sync> Component for T {}

/// Gets the type id for a component type.
pub fn component_type_id_of<T: Component>() -> ComponentTypeId {
    type_hash_of::<T>()
}

/// Static layout and identity information for a component type.
///
/// Ordered by id so sorted info lists can be diffed in O(n + m).
#[derive(Debug, Clone, Copy)]
pub struct ComponentTypeInfo {
    pub id: ComponentTypeId,
    pub name: &'static str,
    pub size: usize,
    pub align: usize,
    /// Present only for types that need dropping; columns skip the loop otherwise
    pub drop_fn: Option<unsafe fn(*mut u8)>,
}

impl ComponentTypeInfo {
    /// Build info for a component type
    pub fn of<T: Component>() -> Self {
        Self {
            id: component_type_id_of::<T>(),
            name: short_type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            drop_fn: if std::mem::needs_drop::<T>() {
                Some(|ptr| unsafe {
                    std::ptr::drop_in_place(ptr as *mut T);
                })
            } else {
                None
            },
        }
    }

    /// Tag components occupy no storage but still participate in archetype identity
    pub fn is_tag(&self) -> bool {
        self.size == 0
    }
}

impl PartialEq for ComponentTypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentTypeInfo {}

impl PartialOrd for ComponentTypeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComponentTypeInfo {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

/// Bundle of components
///
/// Allows spawning entities with multiple components at once.
pub trait Bundle: Send + Sync + 'static {
    /// Get type infos of all components in bundle, in declaration order
    fn type_infos() -> SmallVec<[ComponentTypeInfo; MAX_BUNDLE_COMPONENTS]>
    where
        Self: Sized;

    /// Write components to raw pointers, one per component in declaration order
    ///
    /// # Safety
    /// Caller must ensure pointers are valid, properly aligned, and point to
    /// uninitialized slots (values are moved in, not dropped first).
    unsafe fn write_components(self, ptrs: &[*mut u8]);
}

// Macro for tuple Bundle implementations
macro_rules! impl_bundle {
    ($($T:ident),*) => {
        impl<$($T: Component),*> Bundle for ($($T,)*) {
            fn type_infos() -> SmallVec<[ComponentTypeInfo; MAX_BUNDLE_COMPONENTS]> {
                smallvec![$(ComponentTypeInfo::of::<$T>()),*]
            }

            #[allow(non_snake_case)]
            unsafe fn write_components(self, ptrs: &[*mut u8]) {
                let ($($T,)*) = self;
                let mut i = 0;
                $(
                    std::ptr::write(ptrs[i] as *mut $T, $T);
                    i += 1;
                )*
                let _ = i; // Suppress unused warning
            }
        }
    };
}

// Implement for tuples of 1-8 components
impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    #![allow(dead_code)]
    use super::*;

    #[test]
    fn test_type_id_stable() {
        struct Position {
            x: f32,
            y: f32,
        }

        assert_eq!(
            component_type_id_of::<Position>(),
            component_type_id_of::<Position>()
        );

        struct Velocity;
        assert_ne!(
            component_type_id_of::<Position>(),
            component_type_id_of::<Velocity>()
        );
    }

    #[test]
    fn test_single_component() {
        #[derive(Debug, Clone, Copy)]
        struct Position {
            x: f32,
            y: f32,
        }

        let infos = <(Position,)>::type_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, component_type_id_of::<Position>());
        assert_eq!(infos[0].size, std::mem::size_of::<Position>());
    }

    #[test]
    fn test_tag_component() {
        struct Frozen;

        let info = ComponentTypeInfo::of::<Frozen>();
        assert!(info.is_tag());
        assert!(info.drop_fn.is_none());
    }

    #[test]
    fn test_drop_fn_only_when_needed() {
        let plain = ComponentTypeInfo::of::<u64>();
        assert!(plain.drop_fn.is_none());

        let owning = ComponentTypeInfo::of::<String>();
        assert!(owning.drop_fn.is_some());
    }
}
