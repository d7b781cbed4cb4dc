use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use dagkernel::app::{AppBuilder, AppDescriptor, Args};
use dagkernel::dag::{DispatchedTask, ExecutorSelector, Scheduler, SchedulerStep, TaskNode, TaskState};
use dagkernel::errors::TaskError;
use dagkernel::future::{AppFuture, AppValue};
use dagkernel::retry::RetryPolicy;

/// A random DAG: task `i` may only depend on tasks `0..i`.
#[derive(Debug, Clone)]
struct Workload {
    deps: Vec<BTreeSet<usize>>,
    /// How many attempts of each task fail before one succeeds.
    failures: Vec<u32>,
    retries: u32,
    /// Indices used to pick which in-flight attempt completes next.
    picks: Vec<usize>,
    /// Complete attempts between submissions instead of after all of them.
    interleave: bool,
}

fn workload(max_tasks: usize) -> impl Strategy<Value = Workload> {
    (1..=max_tasks).prop_flat_map(|n| {
        (
            prop::collection::vec(prop::collection::vec(any::<usize>(), 0..4), n),
            prop::collection::vec(0u32..4, n),
            0u32..3,
            prop::collection::vec(any::<usize>(), 1..64),
            any::<bool>(),
        )
            .prop_map(|(raw, failures, retries, picks, interleave)| Workload {
                deps: raw
                    .into_iter()
                    .enumerate()
                    .map(|(i, candidates)| {
                        if i == 0 {
                            BTreeSet::new()
                        } else {
                            candidates.into_iter().map(|c| c % i).collect()
                        }
                    })
                    .collect(),
                failures,
                retries,
                picks,
                interleave,
            })
    })
}

/// Plays the role of the runtime shell: settles futures, feeds dependency
/// continuations back and completes dispatched attempts.
struct Harness {
    scheduler: Scheduler,
    app: Arc<AppDescriptor>,
    futures: Vec<AppFuture>,
    deps: Vec<BTreeSet<usize>>,
    failures: Vec<u32>,
    settled: HashMap<usize, Result<(), TaskError>>,
    in_flight: Vec<DispatchedTask>,
    dispatches: HashMap<usize, u32>,
    picks: Vec<usize>,
    next_pick: usize,
}

impl Harness {
    fn new(w: &Workload) -> Self {
        let selector = ExecutorSelector::new(vec!["fake".to_string()], None);
        Self {
            scheduler: Scheduler::new(selector, RetryPolicy::with_retries(w.retries)),
            app: AppBuilder::native("node", |_| Ok(json!(0))).build(),
            futures: Vec::new(),
            deps: w.deps.clone(),
            failures: w.failures.clone(),
            settled: HashMap::new(),
            in_flight: Vec::new(),
            dispatches: HashMap::new(),
            picks: w.picks.clone(),
            next_pick: 0,
        }
    }

    fn submit(&mut self, i: usize) -> Result<(), TestCaseError> {
        let future = AppFuture::new(i as u64, vec![]);
        let mut args = Args::new();
        for &d in &self.deps[i] {
            args = args.kwarg(&format!("d{d}"), &self.futures[d]);
        }
        self.futures.push(future.clone());

        let step = self
            .scheduler
            .register(TaskNode::new(i as u64, self.app.clone(), args, future));
        self.apply(step)?;

        // Continuations on already-settled futures fire right away.
        let ready: Vec<(usize, Result<(), TaskError>)> = self.deps[i]
            .iter()
            .filter_map(|d| self.settled.get(d).map(|r| (*d, r.clone())))
            .collect();
        for (d, result) in ready {
            let step = self.scheduler.dependency_settled(i as u64, d as u64, result);
            self.apply(step)?;
        }
        Ok(())
    }

    fn apply(&mut self, step: SchedulerStep) -> Result<(), TestCaseError> {
        prop_assert!(step.delayed_retries.is_empty(), "zero backoff never delays");

        for task in step.newly_dispatched {
            let i = task.task_id as usize;
            for d in &self.deps[i] {
                prop_assert!(
                    matches!(self.settled.get(d), Some(Ok(()))),
                    "task {} dispatched before dependency {} resolved",
                    i,
                    d
                );
            }
            *self.dispatches.entry(i).or_default() += 1;
            prop_assert_eq!(self.dispatches[&i], task.attempt);
            self.in_flight.push(task);
        }

        for settlement in step.settlements {
            let i = settlement.task_id() as usize;
            let result = settlement.outcome.as_ref().map(|_| ()).map_err(Clone::clone);
            prop_assert!(settlement.future.settle(settlement.outcome).is_ok());
            prop_assert!(self.settled.insert(i, result.clone()).is_none(), "settled twice");

            let dependants: Vec<usize> = (0..self.futures.len())
                .filter(|j| self.deps[*j].contains(&i))
                .collect();
            for j in dependants {
                let step = self
                    .scheduler
                    .dependency_settled(j as u64, i as u64, result.clone());
                self.apply(step)?;
            }
        }
        Ok(())
    }

    fn complete_one(&mut self) -> Result<(), TestCaseError> {
        let pick = self.picks[self.next_pick % self.picks.len()];
        self.next_pick += 1;
        let task = self.in_flight.remove(pick % self.in_flight.len());

        let i = task.task_id as usize;
        let outcome = if task.attempt <= self.failures[i] {
            Err(TaskError::execution(task.task_id, "boom"))
        } else {
            Ok(AppValue::new(json!(i)))
        };
        let step = self.scheduler.task_completed(task.handle(), outcome);
        self.apply(step)
    }

    fn drain(&mut self) -> Result<(), TestCaseError> {
        while !self.in_flight.is_empty() {
            self.complete_one()?;
        }
        Ok(())
    }
}

/// Final state every task must reach, computed independently.
fn expected_states(w: &Workload) -> Vec<TaskState> {
    let mut states: Vec<TaskState> = Vec::with_capacity(w.deps.len());
    for i in 0..w.deps.len() {
        let dep_ok = w.deps[i].iter().all(|d| states[*d] == TaskState::Completed);
        states.push(if !dep_ok {
            TaskState::DepFailed
        } else if w.failures[i] <= w.retries {
            TaskState::Completed
        } else {
            TaskState::Failed
        });
    }
    states
}

proptest! {
    #[test]
    fn every_task_reaches_the_state_its_inputs_dictate(w in workload(12)) {
        let mut h = Harness::new(&w);
        for i in 0..w.deps.len() {
            h.submit(i)?;
            if w.interleave {
                h.drain()?;
            }
        }
        h.drain()?;

        prop_assert!(h.scheduler.is_quiescent());
        let expected = expected_states(&w);
        for (i, want) in expected.iter().enumerate() {
            let id = i as u64;
            prop_assert_eq!(h.scheduler.state_of(id), Some(*want), "task {}", i);
            prop_assert!(h.futures[i].is_done());

            let dispatched = h.dispatches.get(&i).copied().unwrap_or(0);
            match want {
                TaskState::DepFailed => prop_assert_eq!(dispatched, 0),
                TaskState::Completed => prop_assert_eq!(dispatched, w.failures[i] + 1),
                _ => prop_assert_eq!(dispatched, w.retries + 1),
            }
        }

        let status = h.scheduler.status();
        prop_assert_eq!(status.total(), w.deps.len());
        prop_assert_eq!(status.in_flight(), 0);
    }

    #[test]
    fn shutdown_leaves_nothing_unsettled(w in workload(10), complete_before in 0usize..8) {
        let mut h = Harness::new(&w);
        for i in 0..w.deps.len() {
            h.submit(i)?;
        }
        for _ in 0..complete_before {
            if h.in_flight.is_empty() {
                break;
            }
            h.complete_one()?;
        }

        let step = h.scheduler.fail_undispatched();
        prop_assert!(step.newly_dispatched.is_empty());
        h.apply(step)?;
        let step = h.scheduler.abandon_in_flight();
        prop_assert_eq!(step.remote_cancels.len(), h.in_flight.len());
        h.apply(step)?;

        // Late reports of abandoned attempts change nothing.
        let stale: Vec<DispatchedTask> = std::mem::take(&mut h.in_flight);
        for task in stale {
            let step = h
                .scheduler
                .task_completed(task.handle(), Ok(AppValue::new(json!(null))));
            prop_assert!(step.is_empty());
        }

        prop_assert!(h.scheduler.is_quiescent());
        prop_assert!(h.futures.iter().all(AppFuture::is_done));
    }
}
