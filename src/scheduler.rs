//! Background layout runs.
//!
//! One worker thread per scheduler receives owned snapshots over a channel and
//! sends finished positions back. The scheduler keeps at most one run in
//! flight, folds triggers that arrive meanwhile into a single pending re-run,
//! and drops results computed for another model or for a revision that is no
//! longer current.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::graph::{GraphModel, GraphSnapshot, ValidationError};
use crate::layout::{LayoutSettings, Positions, run_snapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerReason {
    InitialLoad,
    TopologyChanged,
    Relayout,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InitialLoad => "initial_load",
            Self::TopologyChanged => "topology_changed",
            Self::Relayout => "relayout",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Calculating { generation: u64 },
}

/// A finished layout, published once per accepted run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayoutResult {
    pub generation: u64,
    pub revision: u64,
    pub iterations: usize,
    pub positions: Positions,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to spawn layout worker")]
    Spawn(#[source] std::io::Error),

    #[error("layout worker disconnected")]
    WorkerDisconnected,

    #[error("layout rejected its input")]
    Validation(#[from] ValidationError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

struct LayoutJob {
    generation: u64,
    instance: u64,
    snapshot: GraphSnapshot,
    settings: LayoutSettings,
}

struct JobOutcome {
    generation: u64,
    instance: u64,
    revision: u64,
    iterations: usize,
    result: Result<Positions, ValidationError>,
}

pub struct SimulationScheduler {
    settings: LayoutSettings,
    job_tx: Option<Sender<LayoutJob>>,
    outcome_rx: Receiver<JobOutcome>,
    worker: Option<JoinHandle<()>>,
    state: SchedulerState,
    pending: Option<TriggerReason>,
    last_generation: u64,
    latest: Option<Arc<LayoutResult>>,
    subscribers: Vec<Sender<Arc<LayoutResult>>>,
}

impl SimulationScheduler {
    pub fn new(settings: LayoutSettings) -> SchedulerResult<Self> {
        let (job_tx, job_rx) = mpsc::channel::<LayoutJob>();
        let (outcome_tx, outcome_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("layout-worker".to_owned())
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    let started = Instant::now();
                    let result = run_snapshot(&job.snapshot, &job.settings);
                    debug!(
                        generation = job.generation,
                        nodes = job.snapshot.nodes.len(),
                        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                        "layout run finished"
                    );

                    let outcome = JobOutcome {
                        generation: job.generation,
                        instance: job.instance,
                        revision: job.snapshot.revision,
                        iterations: job.settings.iterations,
                        result,
                    };
                    if outcome_tx.send(outcome).is_err() {
                        break;
                    }
                }
            })
            .map_err(SchedulerError::Spawn)?;

        Ok(Self {
            settings,
            job_tx: Some(job_tx),
            outcome_rx,
            worker: Some(worker),
            state: SchedulerState::Idle,
            pending: None,
            last_generation: 0,
            latest: None,
            subscribers: Vec::new(),
        })
    }

    pub fn settings(&self) -> &LayoutSettings {
        &self.settings
    }

    /// Takes effect from the next run; a run in flight keeps its settings.
    pub fn set_settings(&mut self, settings: LayoutSettings) {
        self.settings = settings;
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.state, SchedulerState::Calculating { .. })
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Generation of the most recently started run, 0 before the first.
    pub fn generation(&self) -> u64 {
        self.last_generation
    }

    pub fn latest(&self) -> Option<Arc<LayoutResult>> {
        self.latest.clone()
    }

    /// Receives every result published from now on.
    pub fn subscribe(&mut self) -> Receiver<Arc<LayoutResult>> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Starts a run on the current snapshot of `model`, or records a single
    /// pending re-run if one is already in flight.
    pub fn trigger<R: Rng>(
        &mut self,
        reason: TriggerReason,
        model: &GraphModel<R>,
    ) -> SchedulerResult<()> {
        if let SchedulerState::Calculating { generation } = self.state {
            if let Some(previous) = self.pending.replace(reason) {
                debug!(%previous, %reason, in_flight = generation, "trigger coalesced");
            } else {
                debug!(%reason, in_flight = generation, "trigger deferred");
            }
            return Ok(());
        }

        self.start_run(reason, model)
    }

    /// Handles a finished run if one is ready, without blocking.
    ///
    /// Returns the newly published result, if any.
    pub fn poll<R: Rng>(
        &mut self,
        model: &mut GraphModel<R>,
    ) -> SchedulerResult<Option<Arc<LayoutResult>>> {
        if !self.is_busy() {
            return Ok(None);
        }

        match self.outcome_rx.try_recv() {
            Ok(outcome) => self.finish_run(outcome, model),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                self.state = SchedulerState::Idle;
                Err(SchedulerError::WorkerDisconnected)
            }
        }
    }

    /// Blocks until no run is in flight or pending.
    ///
    /// Returns the last result published while waiting, if any.
    pub fn wait<R: Rng>(
        &mut self,
        model: &mut GraphModel<R>,
    ) -> SchedulerResult<Option<Arc<LayoutResult>>> {
        let mut published = None;
        while self.is_busy() {
            let outcome = self.outcome_rx.recv().map_err(|_| {
                self.state = SchedulerState::Idle;
                SchedulerError::WorkerDisconnected
            })?;
            if let Some(result) = self.finish_run(outcome, model)? {
                published = Some(result);
            }
        }
        Ok(published)
    }

    fn start_run<R: Rng>(
        &mut self,
        reason: TriggerReason,
        model: &GraphModel<R>,
    ) -> SchedulerResult<()> {
        let job_tx = self.job_tx.as_ref().ok_or(SchedulerError::WorkerDisconnected)?;
        let generation = self.last_generation + 1;
        let job = LayoutJob {
            generation,
            instance: model.instance(),
            snapshot: model.snapshot(),
            settings: self.settings,
        };

        debug!(
            generation,
            %reason,
            revision = model.revision(),
            nodes = model.node_count(),
            links = model.link_count(),
            "layout run started"
        );
        job_tx
            .send(job)
            .map_err(|_| SchedulerError::WorkerDisconnected)?;

        self.last_generation = generation;
        self.state = SchedulerState::Calculating { generation };
        Ok(())
    }

    fn finish_run<R: Rng>(
        &mut self,
        outcome: JobOutcome,
        model: &mut GraphModel<R>,
    ) -> SchedulerResult<Option<Arc<LayoutResult>>> {
        if self.state != (SchedulerState::Calculating { generation: outcome.generation }) {
            debug!(generation = outcome.generation, "ignoring result of unknown run");
            return Ok(None);
        }
        self.state = SchedulerState::Idle;

        let published = if outcome.instance != model.instance() {
            warn!(
                generation = outcome.generation,
                run_instance = outcome.instance,
                current_instance = model.instance(),
                "layout for another model discarded"
            );
            None
        } else if outcome.revision != model.revision() {
            debug!(
                generation = outcome.generation,
                run_revision = outcome.revision,
                current_revision = model.revision(),
                "stale layout discarded"
            );
            None
        } else {
            match outcome.result {
                Ok(positions) => {
                    model.apply_layout(&positions);
                    let result = Arc::new(LayoutResult {
                        generation: outcome.generation,
                        revision: outcome.revision,
                        iterations: outcome.iterations,
                        positions,
                    });
                    self.publish(&result);
                    Some(result)
                }
                Err(error) => {
                    warn!(
                        generation = outcome.generation,
                        %error,
                        "layout run rejected its snapshot"
                    );
                    self.start_pending(model)?;
                    return Err(error.into());
                }
            }
        };

        self.start_pending(model)?;
        Ok(published)
    }

    fn start_pending<R: Rng>(&mut self, model: &GraphModel<R>) -> SchedulerResult<()> {
        match self.pending.take() {
            Some(reason) => self.start_run(reason, model),
            None => Ok(()),
        }
    }

    /// Closes the job channel and joins the worker. The worker finishes the job
    /// it holds first, so a run already in flight still reports back.
    fn shut_down_worker(&mut self) {
        self.job_tx = None;
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("layout worker panicked");
        }
    }

    fn publish(&mut self, result: &Arc<LayoutResult>) {
        info!(
            generation = result.generation,
            revision = result.revision,
            nodes = result.positions.len(),
            "layout published"
        );
        self.subscribers
            .retain(|subscriber| subscriber.send(Arc::clone(result)).is_ok());
        self.latest = Some(Arc::clone(result));
    }
}

impl Drop for SimulationScheduler {
    fn drop(&mut self) {
        self.shut_down_worker();
    }
}

#[cfg(test)]
mod tests {
    use emath::pos2;

    use super::*;
    use crate::graph::NodeSpec;

    fn star_model() -> GraphModel {
        let mut model = GraphModel::seeded(pos2(400.0, 300.0), 11);
        let me = model.add_node(NodeSpec::new("me", 20.0)).unwrap();
        model.set_anchor(&me).unwrap();
        for label in ["a", "b", "c"] {
            let leaf = model.add_node(NodeSpec::new(label, 10.0)).unwrap();
            model.add_link(&me, &leaf, 0.8).unwrap();
        }
        model
    }

    fn settings() -> LayoutSettings {
        LayoutSettings {
            iterations: 50,
            ..LayoutSettings::default()
        }
    }

    #[test]
    fn run_publishes_and_returns_to_idle() {
        let mut model = star_model();
        let mut scheduler = SimulationScheduler::new(settings()).unwrap();
        let updates = scheduler.subscribe();

        scheduler.trigger(TriggerReason::InitialLoad, &model).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Calculating { generation: 1 });

        let result = scheduler.wait(&mut model).unwrap().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(result.generation, 1);
        assert_eq!(result.revision, model.revision());
        assert_eq!(result.positions.len(), 4);

        let received = updates.try_recv().unwrap();
        assert_eq!(received, result);
        assert_eq!(scheduler.latest(), Some(result.clone()));

        for node in model.nodes() {
            assert_eq!(node.position, result.positions[&node.id]);
        }
    }

    #[test]
    fn triggers_while_busy_collapse_into_one_rerun() {
        let mut model = star_model();
        let mut scheduler = SimulationScheduler::new(settings()).unwrap();

        scheduler.trigger(TriggerReason::InitialLoad, &model).unwrap();
        scheduler.trigger(TriggerReason::Relayout, &model).unwrap();
        scheduler.trigger(TriggerReason::Relayout, &model).unwrap();
        scheduler.trigger(TriggerReason::Relayout, &model).unwrap();
        assert!(scheduler.has_pending());

        scheduler.wait(&mut model).unwrap();
        assert_eq!(scheduler.generation(), 2);
        assert!(!scheduler.has_pending());
        assert_eq!(scheduler.latest().unwrap().generation, 2);
    }

    #[test]
    fn mutation_mid_run_discards_the_stale_result() {
        let mut model = star_model();
        let mut scheduler = SimulationScheduler::new(settings()).unwrap();
        let updates = scheduler.subscribe();

        scheduler.trigger(TriggerReason::InitialLoad, &model).unwrap();
        let extra = model.add_node(NodeSpec::new("late", 10.0)).unwrap();
        scheduler.trigger(TriggerReason::TopologyChanged, &model).unwrap();

        let result = scheduler.wait(&mut model).unwrap().unwrap();
        assert_eq!(result.generation, 2);
        assert!(result.positions.contains_key(&extra));

        let published = updates.try_iter().collect::<Vec<_>>();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].generation, 2);
    }

    #[test]
    fn stale_result_without_rerun_publishes_nothing() {
        let mut model = star_model();
        let mut scheduler = SimulationScheduler::new(settings()).unwrap();

        scheduler.trigger(TriggerReason::InitialLoad, &model).unwrap();
        model.add_node(NodeSpec::new("late", 10.0)).unwrap();

        assert!(scheduler.wait(&mut model).unwrap().is_none());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.latest().is_none());
    }

    #[test]
    fn result_for_another_model_is_not_applied() {
        let mut model = star_model();
        let mut other = star_model();
        assert_eq!(model.revision(), other.revision());
        let before = other.snapshot();

        let mut scheduler = SimulationScheduler::new(settings()).unwrap();
        let updates = scheduler.subscribe();
        scheduler.trigger(TriggerReason::InitialLoad, &model).unwrap();

        assert!(scheduler.wait(&mut other).unwrap().is_none());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.latest().is_none());
        assert!(updates.try_recv().is_err());
        assert_eq!(other.snapshot(), before);

        scheduler.trigger(TriggerReason::Relayout, &model).unwrap();
        assert!(scheduler.wait(&mut model).unwrap().is_some());
    }

    #[test]
    fn moving_the_anchor_mid_run_discards_the_result() {
        let mut model = star_model();
        let anchor = model.anchor().cloned().unwrap();
        let mut scheduler = SimulationScheduler::new(settings()).unwrap();

        scheduler.trigger(TriggerReason::InitialLoad, &model).unwrap();
        model.set_anchor_position(pos2(100.0, 120.0)).unwrap();
        assert!(scheduler.wait(&mut model).unwrap().is_none());
        assert!(scheduler.latest().is_none());

        scheduler.trigger(TriggerReason::Relayout, &model).unwrap();
        let result = scheduler.wait(&mut model).unwrap().unwrap();
        assert_eq!(result.positions[&anchor], pos2(100.0, 120.0));
    }

    #[test]
    fn new_settings_apply_from_the_next_run() {
        let mut model = star_model();
        let mut scheduler = SimulationScheduler::new(settings()).unwrap();
        let updates = scheduler.subscribe();

        scheduler.trigger(TriggerReason::InitialLoad, &model).unwrap();
        scheduler.set_settings(LayoutSettings {
            iterations: 7,
            ..LayoutSettings::default()
        });
        scheduler.trigger(TriggerReason::Relayout, &model).unwrap();
        scheduler.wait(&mut model).unwrap();

        assert_eq!(scheduler.settings().iterations, 7);
        let iterations = updates
            .try_iter()
            .map(|result| result.iterations)
            .collect::<Vec<_>>();
        assert_eq!(iterations, [50, 7]);
    }

    #[test]
    fn lost_worker_surfaces_as_disconnected() {
        let mut model = star_model();
        let mut scheduler = SimulationScheduler::new(settings()).unwrap();

        scheduler.trigger(TriggerReason::InitialLoad, &model).unwrap();
        scheduler.trigger(TriggerReason::Relayout, &model).unwrap();
        scheduler.shut_down_worker();

        let error = scheduler.wait(&mut model).unwrap_err();
        assert!(matches!(error, SchedulerError::WorkerDisconnected));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.latest().unwrap().generation, 1);

        assert!(matches!(
            scheduler.trigger(TriggerReason::Relayout, &model),
            Err(SchedulerError::WorkerDisconnected)
        ));
        assert!(scheduler.poll(&mut model).unwrap().is_none());
    }

    #[test]
    fn poll_is_quiet_when_idle() {
        let mut model = star_model();
        let mut scheduler = SimulationScheduler::new(settings()).unwrap();
        assert!(scheduler.poll(&mut model).unwrap().is_none());
    }
}
