//! App and sub-app driver.
//!
//! An [`App`] owns a main [`SubApp`] plus auxiliary sub-apps, a shared
//! work-stealing executor, and the registered modules. Each frame the runner
//! ticks time, the main sub-app runs its `Main` and `Update` stages
//! synchronously, non-overlapping sub-apps extract from the main world and
//! run within the frame, and overlapping sub-apps run on detached tasks that
//! may straddle frames.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::event::ShutdownEvent;
use crate::executor::{Executor, TaskHandle};
use crate::module::Module;
use crate::resource::Resource;
use crate::schedule::{
    system_set_id_of, system_type_id_of, CleanUp, Main, OrderingEdge, OrderingKind, ScheduleLabel,
    StartUp, SystemSet, SystemSetId, Update,
};
use crate::scheduler::Scheduler;
use crate::system::System;
use crate::time::Time;
use crate::utils::type_hash_of;
use crate::world::World;

/// Process exit discipline: zero is success, everything else failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum AppExitCode {
    Success = 0,
    Failure = 1,
}

impl AppExitCode {
    /// Maps a `ShutdownEvent::exit_code` onto the same zero/non-zero rule
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            AppExitCode::Success
        } else {
            AppExitCode::Failure
        }
    }
}

/// Hook copying state from the main world into a sub-app world
pub type ExtractFn = Box<dyn Fn(&mut World, &World) + Send + Sync>;

/// One world plus its scheduler.
///
/// The main sub-app drives the frame; auxiliary sub-apps see a consistent
/// snapshot of the main world through their extract hook before their own
/// stages run.
pub struct SubApp {
    world: World,
    scheduler: Scheduler,
    allow_overlapping_updates: bool,
    extract: Option<ExtractFn>,
}

impl SubApp {
    pub fn new() -> Self {
        Self {
            world: World::new(),
            scheduler: Scheduler::new(),
            allow_overlapping_updates: false,
            extract: None,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Overlapping sub-apps update on a background task that may span
    /// multiple main-app frames.
    pub fn set_allow_overlapping_updates(&mut self, allow: bool) -> &mut Self {
        self.allow_overlapping_updates = allow;
        self
    }

    pub fn allows_overlapping_updates(&self) -> bool {
        self.allow_overlapping_updates
    }

    /// Installs the extract hook, run on the dispatching thread before this
    /// sub-app's stages so it always starts from a consistent snapshot.
    pub fn set_extract(&mut self, extract: impl Fn(&mut World, &World) + Send + Sync + 'static) {
        self.extract = Some(Box::new(extract));
    }

    pub(crate) fn extract(&mut self, main_world: &World) {
        if let Some(extract) = &self.extract {
            extract(&mut self.world, main_world);
        }
    }

    /// Compiles every schedule plan; surfaces conflict and cycle errors.
    pub fn build_scheduler(&mut self) -> Result<()> {
        self.scheduler.compile()
    }

    /// Runs one stage of this sub-app on the executor
    pub fn execute_stage<L: ScheduleLabel>(&mut self, executor: &Executor) -> Result<()> {
        self.scheduler.execute_stage::<L>(&mut self.world, executor)
    }

    /// One frame of this sub-app: `Main` then `Update` stages, then the
    /// world's frame maintenance (queued commands, event double buffer).
    pub fn update(&mut self, executor: &Executor) -> Result<()> {
        self.execute_stage::<Main>(executor)?;
        let result = self.execute_stage::<Update>(executor);
        self.world.update();
        result
    }

    // ---- Builder API ----

    /// Adds a system to a schedule
    pub fn add_system<L: ScheduleLabel, S: System>(&mut self, system: S) -> SystemConfig<'_> {
        let index = self
            .scheduler
            .add_system::<L>(system_type_id_of::<S>(), Box::new(system));
        SystemConfig {
            scheduler: &mut self.scheduler,
            indices: vec![index],
        }
    }

    /// Adds several systems to a schedule at once
    pub fn add_systems<L: ScheduleLabel, T: SystemTuple>(&mut self, systems: T) -> SystemConfig<'_> {
        let indices = systems.add_all::<L>(&mut self.scheduler);
        SystemConfig {
            scheduler: &mut self.scheduler,
            indices,
        }
    }

    /// Opens set-level ordering configuration for `Set` in schedule `L`
    pub fn configure_set<L: ScheduleLabel, Set: SystemSet>(&mut self) -> SetConfig<'_> {
        self.scheduler.register_schedule::<L>();
        SetConfig {
            scheduler: &mut self.scheduler,
            set: system_set_id_of::<Set>(),
        }
    }

    pub fn add_event<E: crate::event::Event>(&mut self) -> &mut Self {
        self.world.add_event::<E>();
        self
    }

    pub fn insert_resource<R: Resource>(&mut self, resource: R) -> &mut Self {
        self.world.insert_resource(resource);
        self
    }

    /// Clears the world and scheduler state
    pub fn clear(&mut self) {
        self.world.clear();
        self.scheduler = Scheduler::new();
    }
}

impl Default for SubApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Follow-up configuration for freshly added systems
pub struct SystemConfig<'a> {
    scheduler: &'a mut Scheduler,
    indices: Vec<usize>,
}

impl SystemConfig<'_> {
    /// These systems run before `S`
    pub fn before<S: 'static>(self) -> Self {
        for &index in &self.indices {
            self.scheduler.add_ordering(
                index,
                OrderingEdge {
                    kind: OrderingKind::Before,
                    target: system_type_id_of::<S>(),
                },
            );
        }
        self
    }

    /// These systems run after `S`
    pub fn after<S: 'static>(self) -> Self {
        for &index in &self.indices {
            self.scheduler.add_ordering(
                index,
                OrderingEdge {
                    kind: OrderingKind::After,
                    target: system_type_id_of::<S>(),
                },
            );
        }
        self
    }

    /// Adds these systems to a set
    pub fn in_set<S: SystemSet>(self) -> Self {
        let set = system_set_id_of::<S>();
        for &index in &self.indices {
            self.scheduler.add_to_set(index, set);
        }
        self
    }

    /// Chains the systems in declaration order: each runs after the previous
    pub fn sequence(self) -> Self {
        for pair in self.indices.windows(2) {
            let target = self.scheduler.systems()[pair[0]].type_id;
            self.scheduler.add_ordering(
                pair[1],
                OrderingEdge {
                    kind: OrderingKind::After,
                    target,
                },
            );
        }
        self
    }
}

/// Set-level ordering configuration
pub struct SetConfig<'a> {
    scheduler: &'a mut Scheduler,
    set: SystemSetId,
}

impl SetConfig<'_> {
    /// Every member of this set runs after every member of `S`
    pub fn after<S: SystemSet>(self) -> Self {
        self.scheduler
            .add_set_ordering(system_set_id_of::<S>(), self.set);
        self
    }

    /// Every member of this set runs before every member of `S`
    pub fn before<S: SystemSet>(self) -> Self {
        self.scheduler
            .add_set_ordering(self.set, system_set_id_of::<S>());
        self
    }
}

/// A tuple of systems registered together via `add_systems`
pub trait SystemTuple {
    fn add_all<L: ScheduleLabel>(self, scheduler: &mut Scheduler) -> Vec<usize>;
}

macro_rules! impl_system_tuple {
    ($($S:ident => $idx:tt),+) => {
        impl<$($S: System),+> SystemTuple for ($($S,)+) {
            fn add_all<L: ScheduleLabel>(self, scheduler: &mut Scheduler) -> Vec<usize> {
                vec![$(scheduler.add_system::<L>(system_type_id_of::<$S>(), Box::new(self.$idx))),+]
            }
        }
    };
}

impl_system_tuple!(A => 0);
impl_system_tuple!(A => 0, B => 1);
impl_system_tuple!(A => 0, B => 1, C => 2);
impl_system_tuple!(A => 0, B => 1, C => 2, D => 3);
impl_system_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4);
impl_system_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);
impl_system_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6);
impl_system_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6, H => 7);

/// Runner signature; installed via [`App::set_runner`]
pub type RunnerFn = Box<dyn FnOnce(&mut App) -> AppExitCode>;

/// Top-level application driver
pub struct App {
    main: SubApp,
    sub_apps: Vec<Arc<Mutex<SubApp>>>,
    sub_app_labels: AHashMap<u64, usize>,
    /// Overlapping flag snapshot, parallel to `sub_apps`; read without
    /// locking so an in-flight background update never stalls the frame
    overlapping_flags: Vec<bool>,
    /// Pending background updates, parallel to `sub_apps`
    overlapping: Vec<Vec<TaskHandle>>,
    modules: Vec<Box<dyn Module>>,
    executor: Arc<Executor>,
    runner: Option<RunnerFn>,
    initialized: bool,
    running: bool,
}

impl App {
    pub fn new() -> Self {
        Self::with_worker_threads(None)
    }

    /// Creates an app whose executor uses the given worker count
    pub fn with_worker_threads(worker_threads: Option<usize>) -> Self {
        let mut main = SubApp::new();
        main.world_mut().insert_resource(Time::new());
        main.world_mut().add_event::<ShutdownEvent>();

        Self {
            main,
            sub_apps: Vec::new(),
            sub_app_labels: AHashMap::new(),
            overlapping_flags: Vec::new(),
            overlapping: Vec::new(),
            modules: Vec::new(),
            executor: Arc::new(Executor::new(worker_threads)),
            runner: None,
            initialized: false,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// The main sub-app
    pub fn main(&self) -> &SubApp {
        &self.main
    }

    pub fn main_mut(&mut self) -> &mut SubApp {
        &mut self.main
    }

    /// The main sub-app's world
    pub fn main_world(&self) -> &World {
        self.main.world()
    }

    pub fn main_world_mut(&mut self) -> &mut World {
        self.main.world_mut()
    }

    // ---- Builder API (delegates to the main sub-app) ----

    pub fn add_system<L: ScheduleLabel, S: System>(&mut self, system: S) -> SystemConfig<'_> {
        self.main.add_system::<L, S>(system)
    }

    pub fn add_systems<L: ScheduleLabel, T: SystemTuple>(&mut self, systems: T) -> SystemConfig<'_> {
        self.main.add_systems::<L, T>(systems)
    }

    pub fn configure_set<L: ScheduleLabel, Set: SystemSet>(&mut self) -> SetConfig<'_> {
        self.main.configure_set::<L, Set>()
    }

    pub fn add_event<E: crate::event::Event>(&mut self) -> &mut Self {
        self.main.add_event::<E>();
        self
    }

    pub fn insert_resource<R: Resource>(&mut self, resource: R) -> &mut Self {
        self.main.insert_resource(resource);
        self
    }

    /// Registers a module; built when `run` starts
    pub fn add_module<M: Module + Default>(&mut self) -> &mut Self {
        self.modules.push(Box::new(M::default()));
        self
    }

    /// Adds an auxiliary sub-app under the label type `L`.
    ///
    /// The overlapping-updates mode is captured here; set it on the sub-app
    /// before adding it.
    pub fn add_sub_app<L: 'static>(&mut self, sub_app: SubApp) -> &mut Self {
        let label = type_hash_of::<L>();
        assert!(
            !self.sub_app_labels.contains_key(&label),
            "sub-app label already in use"
        );
        self.sub_app_labels.insert(label, self.sub_apps.len());
        self.overlapping_flags
            .push(sub_app.allows_overlapping_updates());
        self.sub_apps.push(Arc::new(Mutex::new(sub_app)));
        self.overlapping.push(Vec::new());
        self
    }

    /// Locks and returns the sub-app registered under `L`
    pub fn sub_app<L: 'static>(&self) -> Option<parking_lot::MutexGuard<'_, SubApp>> {
        let index = *self.sub_app_labels.get(&type_hash_of::<L>())?;
        Some(self.sub_apps[index].lock())
    }

    pub fn sub_app_count(&self) -> usize {
        self.sub_apps.len()
    }

    /// Installs a custom runner; the default loops until a `ShutdownEvent`
    pub fn set_runner(&mut self, runner: impl FnOnce(&mut App) -> AppExitCode + 'static) -> &mut Self {
        self.runner = Some(Box::new(runner));
        self
    }

    // ---- Lifecycle ----

    fn build_modules(&mut self) {
        let mut modules = std::mem::take(&mut self.modules);
        for module in &mut modules {
            info!(module = module.name(), "building module");
            module.build(self);
        }
        self.modules = modules;
    }

    fn destroy_modules(&mut self) {
        let mut modules = std::mem::take(&mut self.modules);
        for module in modules.iter_mut().rev() {
            info!(module = module.name(), "destroying module");
            module.destroy(self);
        }
    }

    /// Compiles every scheduler and runs the `StartUp` stage across the main
    /// and all auxiliary sub-apps in parallel.
    pub fn initialize(&mut self) -> Result<()> {
        assert!(!self.initialized, "app is already initialized");

        let executor = Arc::clone(&self.executor);
        let mut tasks: Vec<Box<dyn FnOnce() -> Result<()> + Send + '_>> = Vec::new();

        let main = &mut self.main;
        {
            let executor = Arc::clone(&executor);
            tasks.push(Box::new(move || {
                main.build_scheduler()?;
                main.execute_stage::<StartUp>(&executor)?;
                main.world_mut().update();
                Ok(())
            }));
        }

        for sub_app in &self.sub_apps {
            let sub_app = Arc::clone(sub_app);
            let executor = Arc::clone(&executor);
            tasks.push(Box::new(move || {
                let mut guard = sub_app.lock();
                guard.build_scheduler()?;
                guard.execute_stage::<StartUp>(&executor)?;
                guard.world_mut().update();
                Ok(())
            }));
        }

        for result in self.executor.run_parallel(tasks) {
            result?;
        }

        self.initialized = true;
        Ok(())
    }

    /// One frame.
    pub fn update(&mut self) -> Result<()> {
        // Reap finished overlapping updates from previous frames
        for handles in &mut self.overlapping {
            handles.retain_mut(|handle| {
                if handle.try_complete() {
                    if let Err(err) = handle.wait() {
                        error!(%err, "overlapping sub-app update failed");
                    }
                    false
                } else {
                    true
                }
            });
        }

        // Main sub-app runs synchronously
        self.main.update(&self.executor)?;

        // Non-overlapping sub-apps share this frame: extract on this thread,
        // stages in parallel on the executor
        let mut tasks: Vec<Box<dyn FnOnce() -> Result<()> + Send>> = Vec::new();
        for (index, sub_app) in self.sub_apps.iter().enumerate() {
            if self.overlapping_flags[index] {
                continue;
            }
            sub_app.lock().extract(self.main.world());
            let sub_app = Arc::clone(sub_app);
            let executor = Arc::clone(&self.executor);
            tasks.push(Box::new(move || sub_app.lock().update(&executor)));
        }
        let mut first_error = None;
        for result in self.executor.run_parallel(tasks) {
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }

        // Overlapping sub-apps: start a new background update unless the
        // previous one is still in flight. Extract always happens here on
        // the dispatching thread.
        for (index, sub_app) in self.sub_apps.iter().enumerate() {
            if !self.overlapping_flags[index] {
                continue;
            }
            if !self.overlapping[index].is_empty() {
                continue;
            }
            {
                // The previous update completed, so the lock is free
                let Some(mut guard) = sub_app.try_lock() else {
                    continue;
                };
                guard.extract(self.main.world());
            }
            let sub_app = Arc::clone(sub_app);
            let executor = Arc::clone(&self.executor);
            let handle = self
                .executor
                .spawn_detached(move || sub_app.lock().update(&executor));
            self.overlapping[index].push(handle);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn wait_for_overlapping_updates(&mut self) {
        for handles in &mut self.overlapping {
            for handle in handles.iter_mut() {
                if let Err(err) = handle.wait() {
                    error!(%err, "overlapping sub-app update failed");
                }
            }
            handles.clear();
        }
    }

    /// Runs the `CleanUp` stage everywhere and destroys modules.
    pub fn clean_up(&mut self) {
        self.wait_for_overlapping_updates();

        let executor = Arc::clone(&self.executor);
        let mut tasks: Vec<Box<dyn FnOnce() -> Result<()> + Send + '_>> = Vec::new();
        let main = &mut self.main;
        {
            let executor = Arc::clone(&executor);
            tasks.push(Box::new(move || main.execute_stage::<CleanUp>(&executor)));
        }
        for sub_app in &self.sub_apps {
            let sub_app = Arc::clone(sub_app);
            let executor = Arc::clone(&executor);
            tasks.push(Box::new(move || {
                sub_app.lock().execute_stage::<CleanUp>(&executor)
            }));
        }
        for result in self.executor.run_parallel(tasks) {
            if let Err(err) = result {
                error!(%err, "cleanup stage failed");
            }
        }

        self.destroy_modules();
        self.initialized = false;
    }

    /// Ticks the main world's `Time` resource, if present
    pub fn tick_time(&mut self) {
        if let Some(mut time) = self.main.world().get_resource_mut::<Time>() {
            time.tick();
        }
    }

    /// Returns the exit code from a `ShutdownEvent`, if one was written
    pub fn check_shutdown_event(&self) -> Option<AppExitCode> {
        let world = self.main.world();
        if !world.has_event_registered::<ShutdownEvent>() {
            return None;
        }
        world
            .read_events::<ShutdownEvent>()
            .first()
            .map(|event| AppExitCode::from_exit_code(event.exit_code))
    }

    /// Builds modules, initializes, drives the runner, and cleans up.
    pub fn run(&mut self) -> AppExitCode {
        info!("starting application");

        self.build_modules();
        if let Err(err) = self.initialize() {
            error!(%err, "initialization failed");
            self.destroy_modules();
            return AppExitCode::Failure;
        }

        self.running = true;
        let runner = self
            .runner
            .take()
            .unwrap_or_else(|| Box::new(default_runner));
        let exit_code = runner(self);
        self.running = false;

        info!("cleaning up application");
        self.clean_up();

        info!(code = exit_code as i32, "application exiting");
        exit_code
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

// ---- Runners ----

fn run_guarded(body: impl FnOnce() -> AppExitCode) -> AppExitCode {
    // Last-chance handler: a panic that escapes the frame loop becomes a
    // failure exit instead of an abort
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(code) => code,
        Err(_) => {
            error!("application panicked; exiting with failure");
            AppExitCode::Failure
        }
    }
}

fn frame(app: &mut App, update_time: bool) -> std::ops::ControlFlow<AppExitCode> {
    if update_time {
        app.tick_time();
    }
    if let Err(err) = app.update() {
        error!(%err, "frame failed");
        return std::ops::ControlFlow::Break(AppExitCode::Failure);
    }
    if let Some(code) = app.check_shutdown_event() {
        return std::ops::ControlFlow::Break(code);
    }
    std::ops::ControlFlow::Continue(())
}

/// Configuration for [`default_runner`]
#[derive(Debug, Clone)]
pub struct DefaultRunnerConfig {
    pub update_time_resource: bool,
}

impl Default for DefaultRunnerConfig {
    fn default() -> Self {
        Self {
            update_time_resource: true,
        }
    }
}

/// Loops until a `ShutdownEvent` arrives
pub fn default_runner(app: &mut App) -> AppExitCode {
    default_runner_with(app, DefaultRunnerConfig::default())
}

pub fn default_runner_with(app: &mut App, config: DefaultRunnerConfig) -> AppExitCode {
    run_guarded(|| loop {
        if let std::ops::ControlFlow::Break(code) = frame(app, config.update_time_resource) {
            return code;
        }
    })
}

/// Configuration for [`frame_limited_runner`]
#[derive(Debug, Clone)]
pub struct FrameLimitedRunnerConfig {
    pub max_frames: u64,
    pub update_time_resource: bool,
}

impl Default for FrameLimitedRunnerConfig {
    fn default() -> Self {
        Self {
            max_frames: 1,
            update_time_resource: true,
        }
    }
}

/// Runs at most `max_frames` frames, stopping early on shutdown
pub fn frame_limited_runner(app: &mut App, config: FrameLimitedRunnerConfig) -> AppExitCode {
    run_guarded(|| {
        for _ in 0..config.max_frames {
            if let std::ops::ControlFlow::Break(code) = frame(app, config.update_time_resource) {
                return code;
            }
        }
        AppExitCode::Success
    })
}

/// Configuration for [`timed_runner`]
#[derive(Debug, Clone)]
pub struct TimedRunnerConfig {
    pub duration: Duration,
    pub update_time_resource: bool,
}

/// Runs until the wall-clock duration elapses
pub fn timed_runner(app: &mut App, config: TimedRunnerConfig) -> AppExitCode {
    run_guarded(|| {
        let start = std::time::Instant::now();
        while start.elapsed() < config.duration {
            if let std::ops::ControlFlow::Break(code) = frame(app, config.update_time_resource) {
                return code;
            }
        }
        AppExitCode::Success
    })
}

/// Configuration for [`fixed_timestep_runner`]
#[derive(Debug, Clone)]
pub struct FixedTimestepRunnerConfig {
    pub fixed_delta: Duration,
    /// Cap on catch-up substeps per frame to avoid the spiral of death
    pub max_substeps: u32,
    pub update_time_resource: bool,
}

impl Default for FixedTimestepRunnerConfig {
    fn default() -> Self {
        Self {
            fixed_delta: Duration::from_secs_f32(1.0 / 60.0),
            max_substeps: 10,
            update_time_resource: true,
        }
    }
}

/// Accumulates real time and updates in fixed-size substeps
pub fn fixed_timestep_runner(app: &mut App, config: FixedTimestepRunnerConfig) -> AppExitCode {
    run_guarded(|| {
        let mut accumulator = Duration::ZERO;
        let mut frame_timer = std::time::Instant::now();

        loop {
            accumulator += frame_timer.elapsed();
            frame_timer = std::time::Instant::now();

            let mut substeps = 0;
            while accumulator >= config.fixed_delta && substeps < config.max_substeps {
                if let std::ops::ControlFlow::Break(code) =
                    frame(app, config.update_time_resource)
                {
                    return code;
                }
                accumulator -= config.fixed_delta;
                substeps += 1;
            }

            if substeps >= config.max_substeps && accumulator >= config.fixed_delta {
                warn!(
                    max_substeps = config.max_substeps,
                    "fixed timestep runner clamping accumulator"
                );
                accumulator = Duration::ZERO;
            }
        }
    })
}

/// Runs exactly one frame
pub fn once_runner(app: &mut App) -> AppExitCode {
    frame_limited_runner(
        app,
        FrameLimitedRunnerConfig {
            max_frames: 1,
            update_time_resource: true,
        },
    )
}
