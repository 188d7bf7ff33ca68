//! Work-stealing executor.
//!
//! A thin contract over a rayon thread pool: submit a task graph with
//! explicit dependency edges, observe per-task completion order, and spawn
//! detached tasks whose handles are polled across frames.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crossbeam::channel::{bounded, unbounded, Receiver, TryRecvError};
use tracing::error;

use crate::error::{EcsError, Result};

/// Shared work-stealing executor backing every schedule DAG and sub-app task.
pub struct Executor {
    pool: rayon::ThreadPool,
}

impl Executor {
    /// Creates an executor with the given worker count, or one worker per
    /// core when `None`.
    pub fn new(worker_threads: Option<usize>) -> Self {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|index| format!("helios-worker-{index}"));
        if let Some(count) = worker_threads {
            builder = builder.num_threads(count);
        }
        Self {
            pool: builder.build().expect("failed to build worker pool"),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Dispatches a DAG of tasks.
    ///
    /// `successors[n]` lists the nodes unblocked by `n`; `in_degree[n]` is
    /// `n`'s incoming edge count. Nodes with no path between them may run
    /// simultaneously. Returns the order nodes completed in, plus any task
    /// errors; the graph always runs to completion even when tasks fail.
    ///
    /// The task callback must not panic; callers wrap system execution in
    /// their own unwind guard so errors carry the system name.
    pub fn run_dag<F>(
        &self,
        successors: &[Vec<usize>],
        in_degree: &[usize],
        task: F,
    ) -> (Vec<usize>, Vec<EcsError>)
    where
        F: Fn(usize) -> Result<()> + Sync,
    {
        let node_count = in_degree.len();
        debug_assert_eq!(successors.len(), node_count);
        if node_count == 0 {
            return (Vec::new(), Vec::new());
        }

        let (sender, receiver) = unbounded::<(usize, Result<()>)>();
        let mut remaining = in_degree.to_vec();
        let mut completion_order = Vec::with_capacity(node_count);
        let mut errors = Vec::new();

        self.pool.scope(|scope| {
            let task = &task;
            let spawn_node = |node: usize| {
                let sender = sender.clone();
                scope.spawn(move |_| {
                    let result = task(node);
                    let _ = sender.send((node, result));
                });
            };

            for node in 0..node_count {
                if remaining[node] == 0 {
                    spawn_node(node);
                }
            }

            // The dispatching thread collects completions and releases
            // successors; completion order is exactly arrival order here.
            // While idle it steals queued tasks instead of blocking, so
            // nested graphs on a small pool cannot starve each other.
            let mut pending = node_count;
            while pending > 0 {
                match receiver.try_recv() {
                    Ok((node, result)) => {
                        pending -= 1;
                        completion_order.push(node);
                        if let Err(err) = result {
                            errors.push(err);
                        }
                        for &successor in &successors[node] {
                            remaining[successor] -= 1;
                            if remaining[successor] == 0 {
                                spawn_node(successor);
                            }
                        }
                    }
                    Err(TryRecvError::Empty) => {
                        if rayon::yield_now().is_none() {
                            std::thread::yield_now();
                        }
                    }
                    Err(TryRecvError::Disconnected) => {
                        unreachable!("a sender is held here until every node completes")
                    }
                }
            }
        });

        (completion_order, errors)
    }

    /// Runs independent tasks concurrently, returning their results in input
    /// order. Blocks until all complete.
    pub fn run_parallel<F>(&self, tasks: Vec<F>) -> Vec<Result<()>>
    where
        F: FnOnce() -> Result<()> + Send,
    {
        use rayon::prelude::*;
        self.pool.install(|| {
            tasks
                .into_par_iter()
                .map(|task| {
                    catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|_| {
                        error!("parallel task panicked");
                        Err(EcsError::SystemPanicked("parallel task".into()))
                    })
                })
                .collect()
        })
    }

    /// Spawns a task that outlives the current frame. The returned handle is
    /// polled non-blockingly each frame and awaited at shutdown.
    pub fn spawn_detached<F>(&self, task: F) -> TaskHandle
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let (sender, receiver) = bounded::<Result<()>>(1);
        self.pool.spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|_| {
                error!("detached task panicked");
                Err(EcsError::SystemPanicked("detached task".into()))
            });
            let _ = sender.send(result);
        });
        TaskHandle {
            receiver,
            result: None,
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Handle to a detached task; the future half of [`Executor::spawn_detached`].
pub struct TaskHandle {
    receiver: Receiver<Result<()>>,
    result: Option<Result<()>>,
}

impl TaskHandle {
    /// Non-blocking poll. Returns true once the task has finished; the
    /// outcome is then available via [`TaskHandle::wait`].
    pub fn try_complete(&mut self) -> bool {
        if self.result.is_some() {
            return true;
        }
        match self.receiver.try_recv() {
            Ok(result) => {
                self.result = Some(result);
                true
            }
            Err(TryRecvError::Disconnected) => {
                self.result = Some(Err(EcsError::SystemPanicked("detached task".into())));
                true
            }
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Blocks until the task finishes and returns its result.
    pub fn wait(&mut self) -> Result<()> {
        if self.result.is_none() {
            let result = self
                .receiver
                .recv()
                .unwrap_or(Err(EcsError::SystemPanicked("detached task".into())));
            self.result = Some(result);
        }
        self.result.clone().expect("result recorded above")
    }
}
