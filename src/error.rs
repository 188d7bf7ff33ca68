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

//! Error types

use std::fmt;

/// ECS error type
#[derive(Debug, Clone)]
pub enum EcsError {
    /// Entity not found or no longer alive
    EntityNotFound,

    /// Component not found on entity
    ComponentNotFound,

    /// Event type was used before registration
    EventNotRegistered(&'static str),

    /// Resource already exists (try_insert / try_emplace failed)
    ResourceAlreadyExists(&'static str),

    /// Resource not found
    ResourceNotFound(&'static str),

    /// Two systems write the same data with no explicit ordering between them
    ScheduleConflict(String),

    /// Ordering constraints form a cycle
    ScheduleCycle(String),

    /// Schedule-level Before/After constraints form a cycle
    ScheduleOrderCycle(String),

    /// A system panicked during execution
    SystemPanicked(String),

    /// General schedule error
    ScheduleError(String),

    /// Command failed to apply
    CommandError(String),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::EntityNotFound => write!(f, "Entity not found"),
            EcsError::ComponentNotFound => write!(f, "Component not found"),
            EcsError::EventNotRegistered(name) => {
                write!(f, "Event '{name}' is not registered")
            }
            EcsError::ResourceAlreadyExists(name) => {
                write!(f, "Resource '{name}' already exists")
            }
            EcsError::ResourceNotFound(name) => write!(f, "Resource '{name}' not found"),
            EcsError::ScheduleConflict(report) => {
                write!(f, "Schedule conflict:\n{report}")
            }
            EcsError::ScheduleCycle(report) => {
                write!(f, "Schedule ordering cycle:\n{report}")
            }
            EcsError::ScheduleOrderCycle(report) => {
                write!(f, "Schedule-level ordering cycle: {report}")
            }
            EcsError::SystemPanicked(name) => {
                write!(f, "System '{name}' panicked during execution")
            }
            EcsError::ScheduleError(msg) => write!(f, "Schedule error: {msg}"),
            EcsError::CommandError(msg) => write!(f, "Command error: {msg}"),
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
