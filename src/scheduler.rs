//! System scheduler: compiles each schedule's systems into a conflict-free
//! ordered DAG and drives the four lifecycle stages.
//!
//! Plan compilation unions three edge sources: explicit `before`/`after`
//! constraints on systems, set-level constraints propagated to members, and
//! conflict edges derived from pairwise access-policy analysis. Compilation
//! is cached; it reruns only when systems or sets change.

use std::panic::{catch_unwind, AssertUnwindSafe};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, debug_span, warn};

use crate::access::AccessPolicy;
use crate::diagnostics::{
    analyze_component_conflicts, analyze_resource_conflicts, format_component_conflicts,
    format_resource_conflicts, summarize_access_policy,
};
use crate::error::{EcsError, Result};
use crate::executor::Executor;
use crate::schedule::{
    schedule_id_of, CleanUp, Main, OrderingEdge, OrderingKind, ScheduleId, ScheduleLabel,
    ScheduleMeta, StartUp, SystemSetId, SystemTypeId, Update,
};
use crate::system::{BoxedSystem, SystemContext, SystemLocalStorage};
use crate::world::World;

/// Everything the scheduler knows about one registered system
pub struct SystemRecord {
    pub type_id: SystemTypeId,
    pub name: &'static str,
    pub schedule: ScheduleId,
    pub sets: Vec<SystemSetId>,
    pub policy: AccessPolicy,
    pub ordering: Vec<OrderingEdge>,
    system: BoxedSystem,
    local: SystemLocalStorage,
}

/// Compiled DAG for one schedule.
///
/// Node indices are local to the plan; `nodes` maps them back to system
/// records in declaration order.
#[derive(Clone)]
struct Plan {
    nodes: Vec<usize>,
    successors: Vec<Vec<usize>>,
    in_degree: Vec<usize>,
}

/// The per-sub-app scheduler
pub struct Scheduler {
    systems: Vec<SystemRecord>,
    schedules: Vec<ScheduleMeta>,
    set_orderings: Vec<(SystemSetId, SystemSetId)>,
    plans: FxHashMap<ScheduleId, Plan>,
    dirty: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        let mut scheduler = Self {
            systems: Vec::new(),
            schedules: Vec::new(),
            set_orderings: Vec::new(),
            plans: FxHashMap::default(),
            dirty: true,
        };
        scheduler.register_schedule::<StartUp>();
        scheduler.register_schedule::<Main>();
        scheduler.register_schedule::<Update>();
        scheduler.register_schedule::<CleanUp>();
        scheduler
    }

    /// Registers a schedule label; idempotent.
    pub fn register_schedule<L: ScheduleLabel>(&mut self) {
        let id = schedule_id_of::<L>();
        if self.schedules.iter().any(|meta| meta.id == id) {
            return;
        }
        self.schedules.push(ScheduleMeta {
            id,
            name: L::name(),
            stage: L::stage(),
            run_before: L::run_before(),
            run_after: L::run_after(),
            declaration_order: self.schedules.len(),
        });
        self.dirty = true;
    }

    /// Adds a system instance to a schedule. Returns the record index for
    /// follow-up configuration (ordering edges, set membership).
    pub fn add_system<L: ScheduleLabel>(
        &mut self,
        type_id: SystemTypeId,
        system: BoxedSystem,
    ) -> usize {
        self.register_schedule::<L>();
        let schedule = schedule_id_of::<L>();

        assert!(
            !self
                .systems
                .iter()
                .any(|record| record.type_id == type_id && record.schedule == schedule),
            "system '{}' is already registered in schedule '{}'",
            system.name(),
            L::name()
        );

        let record = SystemRecord {
            type_id,
            name: system.name(),
            schedule,
            sets: Vec::new(),
            policy: system.access_policy(),
            ordering: Vec::new(),
            system,
            local: SystemLocalStorage::new(),
        };
        self.systems.push(record);
        self.dirty = true;
        self.systems.len() - 1
    }

    /// Adds an explicit ordering edge to a registered system
    pub fn add_ordering(&mut self, system_index: usize, edge: OrderingEdge) {
        self.systems[system_index].ordering.push(edge);
        self.dirty = true;
    }

    /// Adds a registered system to a set
    pub fn add_to_set(&mut self, system_index: usize, set: SystemSetId) {
        let sets = &mut self.systems[system_index].sets;
        if !sets.contains(&set) {
            sets.push(set);
        }
        self.dirty = true;
    }

    /// Declares that every system in `before` precedes every system in
    /// `after`
    pub fn add_set_ordering(&mut self, before: SystemSetId, after: SystemSetId) {
        self.set_orderings.push((before, after));
        self.dirty = true;
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    pub fn systems(&self) -> &[SystemRecord] {
        &self.systems
    }

    /// Compiles every schedule's plan. The steady state is an already-clean
    /// scheduler, where this is a no-op.
    pub fn compile(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let mut plans = FxHashMap::default();
        for meta in &self.schedules {
            let plan = self.compile_schedule(meta.id)?;
            plans.insert(meta.id, plan);
        }
        self.plans = plans;
        self.dirty = false;
        debug!(
            systems = self.systems.len(),
            schedules = self.schedules.len(),
            "compiled schedule plans"
        );
        Ok(())
    }

    fn schedule_members(&self, schedule: ScheduleId) -> Vec<usize> {
        self.systems
            .iter()
            .enumerate()
            .filter(|(_, record)| record.schedule == schedule)
            .map(|(index, _)| index)
            .collect()
    }

    fn compile_schedule(&self, schedule: ScheduleId) -> Result<Plan> {
        let nodes = self.schedule_members(schedule);
        let node_count = nodes.len();

        let by_type: FxHashMap<SystemTypeId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(local, &index)| (self.systems[index].type_id, local))
            .collect();

        // 1. Explicit ordering edges declared on individual systems
        let mut explicit: FxHashSet<(usize, usize)> = FxHashSet::default();
        for (local, &index) in nodes.iter().enumerate() {
            for edge in &self.systems[index].ordering {
                let Some(&target) = by_type.get(&edge.target) else {
                    warn!(
                        system = self.systems[index].name,
                        target = edge.target,
                        "ordering constraint targets a system outside this schedule"
                    );
                    continue;
                };
                match edge.kind {
                    OrderingKind::Before => explicit.insert((local, target)),
                    OrderingKind::After => explicit.insert((target, local)),
                };
            }
        }

        // 2. Set-level constraints propagated to every member pair
        for &(before_set, after_set) in &self.set_orderings {
            for (a, &index_a) in nodes.iter().enumerate() {
                if !self.systems[index_a].sets.contains(&before_set) {
                    continue;
                }
                for (b, &index_b) in nodes.iter().enumerate() {
                    if a != b && self.systems[index_b].sets.contains(&after_set) {
                        explicit.insert((a, b));
                    }
                }
            }
        }

        // Reachability over the explicit edges; a conflicting pair that is
        // already transitively ordered needs no extra edge.
        let reachable = transitive_closure(node_count, &explicit);

        // 3. Conflict edges from pairwise access-policy analysis
        let mut edges = explicit.clone();
        for a in 0..node_count {
            for b in (a + 1)..node_count {
                let record_a = &self.systems[nodes[a]];
                let record_b = &self.systems[nodes[b]];
                if !record_a.policy.conflicts_with(&record_b.policy) {
                    continue;
                }
                if reachable[a].contains(&b) || reachable[b].contains(&a) {
                    continue;
                }

                let component_conflicts =
                    analyze_component_conflicts(&record_a.policy, &record_b.policy);
                let resource_conflicts =
                    analyze_resource_conflicts(&record_a.policy, &record_b.policy);

                // A double write with no declared intent is rejected: neither
                // order is obviously right, and picking one silently would
                // hide a real data dependency.
                let double_write = component_conflicts.iter().any(|c| !c.is_read_write())
                    || resource_conflicts.iter().any(|c| !c.is_read_write());
                if double_write {
                    let mut report = format_component_conflicts(
                        record_a.name,
                        record_b.name,
                        &component_conflicts,
                    );
                    report.push_str(&format_resource_conflicts(
                        record_a.name,
                        record_b.name,
                        &resource_conflicts,
                    ));
                    report.push_str(&format!(
                        "Order them explicitly with before/after constraints.\n'{}' {}'{}' {}",
                        record_a.name,
                        summarize_access_policy(&record_a.policy),
                        record_b.name,
                        summarize_access_policy(&record_b.policy),
                    ));
                    return Err(EcsError::ScheduleConflict(report));
                }

                // Read/write conflicts serialize in registration order:
                // the earlier system precedes.
                edges.insert((a, b));
            }
        }

        // 4. Acyclicity check (Kahn); cycles report the full path
        let mut successors = vec![Vec::new(); node_count];
        let mut in_degree = vec![0usize; node_count];
        for &(from, to) in &edges {
            successors[from].push(to);
            in_degree[to] += 1;
        }
        for list in &mut successors {
            list.sort_unstable();
        }

        let mut queue: Vec<usize> = (0..node_count).filter(|&n| in_degree[n] == 0).collect();
        let mut remaining = in_degree.clone();
        let mut visited = 0;
        while let Some(node) = queue.pop() {
            visited += 1;
            for &successor in &successors[node] {
                remaining[successor] -= 1;
                if remaining[successor] == 0 {
                    queue.push(successor);
                }
            }
        }

        if visited != node_count {
            let cycle = find_cycle(node_count, &successors);
            let mut report = String::from("Ordering constraints form a cycle:\n");
            for &local in &cycle {
                let record = &self.systems[nodes[local]];
                report.push_str(&format!(
                    "  -> '{}'\n{}",
                    record.name,
                    summarize_access_policy(&record.policy)
                ));
            }
            return Err(EcsError::ScheduleCycle(report));
        }

        Ok(Plan {
            nodes,
            successors,
            in_degree,
        })
    }

    /// Schedules anchored to `stage`, ordered by their declared
    /// before/after constraints; ties resolve by declaration order.
    fn stage_schedules(&self, stage: ScheduleId) -> Result<Vec<ScheduleId>> {
        let members: Vec<&ScheduleMeta> = self
            .schedules
            .iter()
            .filter(|meta| meta.stage == stage)
            .collect();

        let index_of: FxHashMap<ScheduleId, usize> = members
            .iter()
            .enumerate()
            .map(|(index, meta)| (meta.id, index))
            .collect();

        let mut successors = vec![Vec::new(); members.len()];
        let mut in_degree = vec![0usize; members.len()];
        for (index, meta) in members.iter().enumerate() {
            for target in &meta.run_before {
                if let Some(&to) = index_of.get(target) {
                    successors[index].push(to);
                    in_degree[to] += 1;
                }
            }
            for target in &meta.run_after {
                if let Some(&from) = index_of.get(target) {
                    successors[from].push(index);
                    in_degree[index] += 1;
                }
            }
        }

        // Kahn with a declaration-order tie break for deterministic output
        let mut ready: Vec<usize> = (0..members.len())
            .filter(|&index| in_degree[index] == 0)
            .collect();
        let mut ordered = Vec::with_capacity(members.len());
        while !ready.is_empty() {
            ready.sort_by_key(|&index| members[index].declaration_order);
            let next = ready.remove(0);
            ordered.push(members[next].id);
            for &successor in &successors[next] {
                in_degree[successor] -= 1;
                if in_degree[successor] == 0 {
                    ready.push(successor);
                }
            }
        }

        if ordered.len() != members.len() {
            let names: Vec<&str> = members.iter().map(|meta| meta.name).collect();
            return Err(EcsError::ScheduleOrderCycle(names.join(", ")));
        }

        Ok(ordered)
    }

    /// Runs every schedule of a stage: each schedule's DAG dispatches on the
    /// executor, then its command and event buffers flush before the next
    /// schedule begins.
    ///
    /// The event double buffer is NOT advanced here; it ticks once per
    /// frame, in `World::update`, so events written in frame N stay readable
    /// through frame N+1 regardless of how many stages a frame runs.
    pub fn execute_stage<L: ScheduleLabel>(
        &mut self,
        world: &mut World,
        executor: &Executor,
    ) -> Result<()> {
        self.compile()?;

        let stage = schedule_id_of::<L>();
        let span = debug_span!("stage", name = L::name());
        let _guard = span.enter();

        let mut first_error = None;
        for schedule in self.stage_schedules(stage)? {
            if let Err(err) = self.execute_schedule(schedule, world, executor) {
                // A stage always finishes once started; remember the first
                // failure and surface it afterwards.
                first_error.get_or_insert(err);
            }
        }

        // Structural finalizer: reserved entities become live
        world.flush_reserved_entities();

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn execute_schedule(
        &mut self,
        schedule: ScheduleId,
        world: &mut World,
        executor: &Executor,
    ) -> Result<()> {
        let plan = self
            .plans
            .get(&schedule)
            .cloned()
            .ok_or_else(|| EcsError::ScheduleError(format!("no plan for schedule {schedule:#x}")))?;
        if plan.nodes.is_empty() {
            return Ok(());
        }

        let systems_ptr = self.systems.as_mut_ptr() as usize;
        let world_ptr = world as *const World as usize;
        let node_to_system = plan.nodes.clone();

        let (completion_order, mut errors) =
            executor.run_dag(&plan.successors, &plan.in_degree, |node| {
                let system_index = node_to_system[node];

                // SAFETY: each DAG node maps to a unique record, so no two
                // concurrently running nodes touch the same record. The world
                // pointer is shared read-style across workers; disjointness of
                // component and resource writes between concurrently running
                // systems is exactly what plan compilation guarantees.
                let record =
                    unsafe { &mut *(systems_ptr as *mut SystemRecord).add(system_index) };
                let world = unsafe { &*(world_ptr as *const World) };

                let name = record.name;
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    let mut ctx =
                        SystemContext::new(world, &record.policy, &mut record.local, name);
                    record.system.update(&mut ctx)
                }));
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(EcsError::SystemPanicked(name.to_string())),
                }
            });

        // Reserved entities become live before commands that populate them
        world.flush_reserved_entities();

        // Drain local buffers in completion order: command lists of
        // conflict-free systems commute, ordered pairs flush in DAG order.
        for &node in &completion_order {
            let record = &mut self.systems[node_to_system[node]];
            let commands = record.local.take_commands();
            if !commands.is_empty() {
                world.apply_commands(commands);
            }
            world
                .event_manager_mut()
                .merge_local(record.local.events_mut());
            record.local.reset_arena();
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.remove(0))
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn transitive_closure(node_count: usize, edges: &FxHashSet<(usize, usize)>) -> Vec<FxHashSet<usize>> {
    let mut adjacency = vec![Vec::new(); node_count];
    for &(from, to) in edges {
        adjacency[from].push(to);
    }

    let mut closure = vec![FxHashSet::default(); node_count];
    for start in 0..node_count {
        let mut stack: Vec<usize> = adjacency[start].clone();
        while let Some(node) = stack.pop() {
            if closure[start].insert(node) {
                stack.extend(adjacency[node].iter().copied());
            }
        }
    }
    closure
}

/// Finds one cycle in a graph known to contain at least one
fn find_cycle(node_count: usize, successors: &[Vec<usize>]) -> Vec<usize> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Gray,
        Black,
    }

    fn visit(
        node: usize,
        successors: &[Vec<usize>],
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[node] = Mark::Gray;
        stack.push(node);

        for &next in &successors[node] {
            match marks[next] {
                Mark::Gray => {
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    return Some(stack[start..].to_vec());
                }
                Mark::White => {
                    if let Some(cycle) = visit(next, successors, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Black => {}
            }
        }

        stack.pop();
        marks[node] = Mark::Black;
        None
    }

    let mut marks = vec![Mark::White; node_count];
    for start in 0..node_count {
        if marks[start] == Mark::White {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(start, successors, &mut marks, &mut stack) {
                return cycle;
            }
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessPolicy;
    use crate::schedule::{system_type_id_of, SystemSet};
    use crate::system::System;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
    }

    struct RecordingSystem {
        name: &'static str,
        policy: AccessPolicy,
        log: Arc<parking_lot::Mutex<Vec<&'static str>>>,
    }

    impl System for RecordingSystem {
        fn name(&self) -> &'static str {
            self.name
        }

        fn access_policy(&self) -> AccessPolicy {
            self.policy.clone()
        }

        fn update(&mut self, _ctx: &mut SystemContext<'_>) -> Result<()> {
            self.log.lock().push(self.name);
            Ok(())
        }
    }

    struct WriterA;
    struct WriterB;
    struct Reader;
    struct SetMemberA;
    struct SetMemberB;

    struct FirstSet;
    impl SystemSet for FirstSet {}
    struct SecondSet;
    impl SystemSet for SecondSet {}

    fn recording(
        name: &'static str,
        policy: AccessPolicy,
        log: &Arc<parking_lot::Mutex<Vec<&'static str>>>,
    ) -> BoxedSystem {
        Box::new(RecordingSystem {
            name,
            policy,
            log: Arc::clone(log),
        })
    }

    #[test]
    fn test_double_write_rejected_at_compile() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new();
        scheduler.add_system::<Update>(
            system_type_id_of::<WriterA>(),
            recording("WriterA", AccessPolicy::new().query::<(&mut Position,)>(), &log),
        );
        scheduler.add_system::<Update>(
            system_type_id_of::<WriterB>(),
            recording("WriterB", AccessPolicy::new().query::<(&mut Position,)>(), &log),
        );

        let err = scheduler.compile().unwrap_err();
        let report = err.to_string();
        assert!(report.contains("WriterA"));
        assert!(report.contains("WriterB"));
        assert!(report.contains("Position"));
        assert!(report.contains("write write"));
    }

    #[test]
    fn test_double_write_allowed_with_explicit_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new();
        let first = scheduler.add_system::<Update>(
            system_type_id_of::<WriterA>(),
            recording("WriterA", AccessPolicy::new().query::<(&mut Position,)>(), &log),
        );
        scheduler.add_system::<Update>(
            system_type_id_of::<WriterB>(),
            recording("WriterB", AccessPolicy::new().query::<(&mut Position,)>(), &log),
        );
        scheduler.add_ordering(
            first,
            OrderingEdge {
                kind: OrderingKind::Before,
                target: system_type_id_of::<WriterB>(),
            },
        );

        assert!(scheduler.compile().is_ok());

        let mut world = World::new();
        let executor = Executor::new(Some(4));
        scheduler
            .execute_stage::<Update>(&mut world, &executor)
            .unwrap();
        assert_eq!(*log.lock(), vec!["WriterA", "WriterB"]);
    }

    #[test]
    fn test_read_write_serialized_by_registration_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new();
        scheduler.add_system::<Update>(
            system_type_id_of::<Reader>(),
            recording("Reader", AccessPolicy::new().query::<(&Position,)>(), &log),
        );
        scheduler.add_system::<Update>(
            system_type_id_of::<WriterA>(),
            recording("Writer", AccessPolicy::new().query::<(&mut Position,)>(), &log),
        );

        assert!(scheduler.compile().is_ok());

        let mut world = World::new();
        let executor = Executor::new(Some(4));
        for _ in 0..4 {
            log.lock().clear();
            scheduler
                .execute_stage::<Update>(&mut world, &executor)
                .unwrap();
            assert_eq!(*log.lock(), vec!["Reader", "Writer"]);
        }
    }

    #[test]
    fn test_explicit_cycle_is_fatal_with_path() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new();
        let first = scheduler.add_system::<Update>(
            system_type_id_of::<WriterA>(),
            recording("WriterA", AccessPolicy::new(), &log),
        );
        let second = scheduler.add_system::<Update>(
            system_type_id_of::<WriterB>(),
            recording("WriterB", AccessPolicy::new(), &log),
        );
        scheduler.add_ordering(
            first,
            OrderingEdge {
                kind: OrderingKind::Before,
                target: system_type_id_of::<WriterB>(),
            },
        );
        scheduler.add_ordering(
            second,
            OrderingEdge {
                kind: OrderingKind::Before,
                target: system_type_id_of::<WriterA>(),
            },
        );

        let err = scheduler.compile().unwrap_err();
        let report = err.to_string();
        assert!(report.contains("cycle"));
        assert!(report.contains("WriterA"));
        assert!(report.contains("WriterB"));
    }

    #[test]
    fn test_set_ordering_propagates_to_members() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new();
        // Register the late system first so only set propagation can order them
        let second = scheduler.add_system::<Update>(
            system_type_id_of::<SetMemberB>(),
            recording("SetMemberB", AccessPolicy::new(), &log),
        );
        let first = scheduler.add_system::<Update>(
            system_type_id_of::<SetMemberA>(),
            recording("SetMemberA", AccessPolicy::new(), &log),
        );
        scheduler.add_to_set(first, crate::schedule::system_set_id_of::<FirstSet>());
        scheduler.add_to_set(second, crate::schedule::system_set_id_of::<SecondSet>());
        scheduler.add_set_ordering(
            crate::schedule::system_set_id_of::<FirstSet>(),
            crate::schedule::system_set_id_of::<SecondSet>(),
        );

        let mut world = World::new();
        let executor = Executor::new(Some(4));
        scheduler
            .execute_stage::<Update>(&mut world, &executor)
            .unwrap();
        assert_eq!(*log.lock(), vec!["SetMemberA", "SetMemberB"]);
    }

    #[test]
    fn test_commands_apply_at_stage_boundary() {
        struct Spawner {
            spawned: Arc<parking_lot::Mutex<Option<crate::entity::Entity>>>,
        }

        impl System for Spawner {
            fn name(&self) -> &'static str {
                "Spawner"
            }

            fn access_policy(&self) -> AccessPolicy {
                AccessPolicy::new()
            }

            fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<()> {
                let entity = ctx.reserve_entity();
                ctx.commands()
                    .push(move |world| {
                        world.add_component(entity, Position { x: 1.0 }).unwrap();
                    });
                *self.spawned.lock() = Some(entity);
                Ok(())
            }
        }

        let spawned = Arc::new(parking_lot::Mutex::new(None));
        let mut scheduler = Scheduler::new();
        scheduler.add_system::<Update>(
            system_type_id_of::<Spawner>(),
            Box::new(Spawner {
                spawned: Arc::clone(&spawned),
            }),
        );

        let mut world = World::new();
        let executor = Executor::new(Some(2));
        scheduler
            .execute_stage::<Update>(&mut world, &executor)
            .unwrap();

        let entity = spawned.lock().unwrap();
        assert!(world.is_alive(entity));
        assert_eq!(
            world.get_component::<Position>(entity),
            Some(&Position { x: 1.0 })
        );
    }

    #[test]
    fn test_panicking_system_reports_and_stage_finishes() {
        struct Panicker;
        impl System for Panicker {
            fn name(&self) -> &'static str {
                "Panicker"
            }
            fn access_policy(&self) -> AccessPolicy {
                AccessPolicy::new()
            }
            fn update(&mut self, _ctx: &mut SystemContext<'_>) -> Result<()> {
                panic!("system exploded");
            }
        }

        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new();
        scheduler.add_system::<Update>(system_type_id_of::<Panicker>(), Box::new(Panicker));
        scheduler.add_system::<Update>(
            system_type_id_of::<Reader>(),
            recording("Reader", AccessPolicy::new(), &log),
        );

        let mut world = World::new();
        let executor = Executor::new(Some(2));
        let err = scheduler
            .execute_stage::<Update>(&mut world, &executor)
            .unwrap_err();
        assert!(matches!(err, EcsError::SystemPanicked(_)));
        // The other system still ran
        assert_eq!(*log.lock(), vec!["Reader"]);
    }

    #[test]
    fn test_parallel_when_no_conflict() {
        static CONCURRENT: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);

        struct Sleeper(&'static str);
        impl System for Sleeper {
            fn name(&self) -> &'static str {
                self.0
            }
            fn access_policy(&self) -> AccessPolicy {
                AccessPolicy::new()
            }
            fn update(&mut self, _ctx: &mut SystemContext<'_>) -> Result<()> {
                let now = CONCURRENT.fetch_add(1, Ordering::SeqCst) + 1;
                PEAK.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                CONCURRENT.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        }

        struct SleeperA;
        struct SleeperB;

        let mut scheduler = Scheduler::new();
        scheduler.add_system::<Update>(system_type_id_of::<SleeperA>(), Box::new(Sleeper("A")));
        scheduler.add_system::<Update>(system_type_id_of::<SleeperB>(), Box::new(Sleeper("B")));

        let mut world = World::new();
        let executor = Executor::new(Some(4));
        scheduler
            .execute_stage::<Update>(&mut world, &executor)
            .unwrap();

        assert_eq!(PEAK.load(Ordering::SeqCst), 2, "independent systems overlap");
    }
}
