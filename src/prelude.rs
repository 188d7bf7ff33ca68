//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use helios_ecs::prelude::*;
//! ```

pub use crate::access::AccessPolicy;
pub use crate::app::{
    default_runner, frame_limited_runner, once_runner, App, AppExitCode, FrameLimitedRunnerConfig,
    SubApp,
};
pub use crate::command::CommandBuffer;
pub use crate::component::{Bundle, Component};
pub use crate::entity::Entity;
pub use crate::error::{EcsError, Result};
pub use crate::event::{
    ClearPolicy, EntityDestroyedEvent, EntitySpawnedEvent, Event, ShutdownEvent,
};
pub use crate::module::Module;
pub use crate::query::Query;
pub use crate::resource::{Res, ResMut, Resource};
pub use crate::schedule::{CleanUp, Main, ScheduleLabel, StartUp, SystemSet, Update};
pub use crate::system::{System, SystemContext};
pub use crate::time::{FixedTime, Time};
pub use crate::world::World;
