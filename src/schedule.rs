//! Schedule and system-set labels.
//!
//! A schedule is a zero-sized tag type with a stable id, anchored to one of
//! the four lifecycle stages. Systems are registered into schedules; system
//! sets group systems so ordering constraints propagate to every member.

use crate::utils::{short_type_name, type_hash_of};

/// Stable 64-bit schedule identifier
pub type ScheduleId = u64;

/// Stable 64-bit system-set identifier
pub type SystemSetId = u64;

/// Stable 64-bit system type identifier
pub type SystemTypeId = u64;

/// Gets the id for a schedule label type
pub fn schedule_id_of<S: ScheduleLabel>() -> ScheduleId {
    type_hash_of::<S>()
}

/// Gets the id for a system-set label type
pub fn system_set_id_of<S: SystemSet>() -> SystemSetId {
    type_hash_of::<S>()
}

/// Gets the id for a system type
pub fn system_type_id_of<S: 'static>() -> SystemTypeId {
    type_hash_of::<S>()
}

/// Marker trait for schedule tag types.
///
/// User schedules declare the stage they run in and, optionally, ordering
/// against sibling schedules in the same stage:
///
/// ```ignore
/// struct Physics;
/// impl ScheduleLabel for Physics {
///     fn stage() -> ScheduleId { schedule_id_of::<Update>() }
///     fn run_before() -> Vec<ScheduleId> { vec![schedule_id_of::<Render>()] }
/// }
/// ```
pub trait ScheduleLabel: 'static {
    fn name() -> &'static str
    where
        Self: Sized,
    {
        short_type_name::<Self>()
    }

    /// The stage this schedule executes in. Stages return their own id.
    fn stage() -> ScheduleId
    where
        Self: Sized;

    /// Sibling schedules this one must precede
    fn run_before() -> Vec<ScheduleId>
    where
        Self: Sized,
    {
        Vec::new()
    }

    /// Sibling schedules this one must follow
    fn run_after() -> Vec<ScheduleId>
    where
        Self: Sized,
    {
        Vec::new()
    }
}

/// Marker trait for system-set tag types
pub trait SystemSet: 'static {
    fn name() -> &'static str
    where
        Self: Sized,
    {
        short_type_name::<Self>()
    }
}

macro_rules! define_stage {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $name;

        impl ScheduleLabel for $name {
            fn stage() -> ScheduleId {
                schedule_id_of::<$name>()
            }
        }
    };
}

define_stage!(
    /// Runs once, before the first frame
    StartUp
);
define_stage!(
    /// First per-frame stage
    Main
);
define_stage!(
    /// Second per-frame stage
    Update
);
define_stage!(
    /// Runs once, during shutdown
    CleanUp
);

/// Direction of an explicit ordering constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingKind {
    /// This system runs before the target
    Before,
    /// This system runs after the target
    After,
}

/// Explicit ordering edge from one system to another, by system type id
#[derive(Debug, Clone, Copy)]
pub struct OrderingEdge {
    pub kind: OrderingKind,
    pub target: SystemTypeId,
}

/// Registration metadata for a schedule
#[derive(Debug, Clone)]
pub struct ScheduleMeta {
    pub id: ScheduleId,
    pub name: &'static str,
    pub stage: ScheduleId,
    pub run_before: Vec<ScheduleId>,
    pub run_after: Vec<ScheduleId>,
    /// Registration order; ties in stage ordering resolve by this
    pub declaration_order: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Physics;
    impl ScheduleLabel for Physics {
        fn stage() -> ScheduleId {
            schedule_id_of::<Update>()
        }

        fn run_before() -> Vec<ScheduleId> {
            vec![schedule_id_of::<Render>()]
        }
    }

    struct Render;
    impl ScheduleLabel for Render {
        fn stage() -> ScheduleId {
            schedule_id_of::<Update>()
        }
    }

    #[test]
    fn test_stage_ids_distinct() {
        let ids = [
            schedule_id_of::<StartUp>(),
            schedule_id_of::<Main>(),
            schedule_id_of::<Update>(),
            schedule_id_of::<CleanUp>(),
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_stages_anchor_themselves() {
        assert_eq!(Update::stage(), schedule_id_of::<Update>());
    }

    #[test]
    fn test_user_schedule_declares_stage_and_ordering() {
        assert_eq!(Physics::stage(), schedule_id_of::<Update>());
        assert_eq!(Physics::run_before(), vec![schedule_id_of::<Render>()]);
        assert_eq!(Physics::name(), "Physics");
    }
}
