//! Modules: the unit of app composition.
//!
//! A module contributes systems, events, resources, and sub-apps to an app
//! during `build`, and tears them down during `destroy`. The same contract
//! serves in-process modules and dynamically loaded ones; the loader itself
//! lives outside the core, but the C ABI it consumes is defined here.

use std::os::raw::c_char;

use crate::app::App;
use crate::utils::{short_type_name, type_hash_of};

/// Stable 64-bit module type identifier
pub type ModuleTypeId = u64;

/// Gets the type id for a module type
pub fn module_type_id_of<M: 'static>() -> ModuleTypeId {
    type_hash_of::<M>()
}

/// Trait for app modules
pub trait Module: Send + Sync + 'static {
    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }

    /// Registers this module's systems, events, and resources
    fn build(&mut self, app: &mut App);

    /// Cleans up; called in reverse registration order during shutdown
    fn destroy(&mut self, app: &mut App);
}

/// Opaque handle crossing the dynamic-module boundary.
///
/// `helios_create_module` returns `Box::into_raw` of one of these; the
/// loader reclaims it with `Box::from_raw` and takes the boxed module.
#[repr(C)]
pub struct ModuleHandle {
    pub module: Box<dyn Module>,
}

/// Symbol names every dynamic module library must export
pub const CREATE_MODULE_SYMBOL: &str = "helios_create_module";
pub const MODULE_ID_SYMBOL: &str = "helios_module_id";
pub const MODULE_NAME_SYMBOL: &str = "helios_module_name";

/// `helios_create_module() -> *mut ModuleHandle`
pub type CreateModuleFn = unsafe extern "C" fn() -> *mut ModuleHandle;

/// `helios_module_id() -> u64`
pub type ModuleIdFn = unsafe extern "C" fn() -> u64;

/// `helios_module_name() -> *const c_char` (static NUL-terminated string)
pub type ModuleNameFn = unsafe extern "C" fn() -> *const c_char;

/// Emits the three C-ABI entry points for a dynamic module library.
///
/// ```ignore
/// #[derive(Default)]
/// struct PhysicsModule;
///
/// impl Module for PhysicsModule { /* ... */ }
///
/// helios_ecs::export_module!(PhysicsModule);
/// ```
#[macro_export]
macro_rules! export_module {
    ($module:ty) => {
        #[no_mangle]
        pub extern "C" fn helios_create_module() -> *mut $crate::module::ModuleHandle {
            Box::into_raw(Box::new($crate::module::ModuleHandle {
                module: Box::new(<$module as Default>::default()),
            }))
        }

        #[no_mangle]
        pub extern "C" fn helios_module_id() -> u64 {
            $crate::module::module_type_id_of::<$module>()
        }

        #[no_mangle]
        pub extern "C" fn helios_module_name() -> *const ::std::os::raw::c_char {
            concat!(stringify!($module), "\0").as_ptr() as *const ::std::os::raw::c_char
        }
    };
}
