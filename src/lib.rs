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

//! Helios ECS core
//!
//! Archetype-based entity storage with a conflict-aware parallel system
//! scheduler, double-buffered events, deferred command buffers, and an
//! app/sub-app frame driver.

pub mod access;
pub mod app;
pub mod archetype;
pub mod command;
pub mod component;
pub mod diagnostics;
pub mod entity;
pub mod error;
pub mod event;
pub mod executor;
pub mod module;
pub mod query;
pub mod resource;
pub mod schedule;
pub mod scheduler;
pub mod system;
pub mod time;
pub mod utils;
pub mod world;

pub mod prelude;

// Re-exports for convenience
pub use access::AccessPolicy;
pub use app::{App, AppExitCode, SubApp};
pub use archetype::{Archetype, Archetypes, ArchetypesConfig};
pub use command::{Command, CommandBuffer};
pub use component::{Bundle, Component, ComponentTypeId, ComponentTypeInfo};
pub use entity::Entity;
pub use error::{EcsError, Result};
pub use event::{ClearPolicy, Event, EventManager, ShutdownEvent};
pub use executor::Executor;
pub use module::Module;
pub use query::{Query, QueryDescriptor};
pub use resource::{Res, ResMut, Resource};
pub use schedule::{CleanUp, Main, ScheduleLabel, StartUp, SystemSet, Update};
pub use scheduler::Scheduler;
pub use system::{BoxedSystem, System, SystemContext};
pub use world::World;
