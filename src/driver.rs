//! Resumable experiment loop, written once against the candidate-selector
//! capability. Each turn performs exactly one external evaluation and one
//! log append; the only cancellation point is between turns, so a kill
//! mid-evaluation leaves the log unmodified and the next start resumes at
//! the same index.

use crate::error::ExperimentError;
use crate::eval::Evaluator;
use crate::stats::WindowStats;
use crate::store::{IterationRecord, RecordStore, TrailingField};
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::time::Instant;

/// Deterministic per-iteration RNG stream. Deriving the stream from
/// `(seed, iter)` makes resumed runs replay the exact draws a continuous
/// run would have used at the same iteration.
pub fn turn_rng(seed: u64, iter: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ (iter as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Candidate-selection capability the driver is generic over.
///
/// `propose` yields one or more candidates for upcoming iterations;
/// batch proposals are consumed one at a time. `update` folds a completed
/// observation back into selector state and optionally supplies the
/// record's trailing scalar (the driver records elapsed seconds when it
/// returns `None`).
pub trait CandidateSelector {
    fn trailing(&self) -> TrailingField;

    /// Reserved marker row written after the header, if the variant has one.
    fn target_marker(&self) -> Option<[f64; 2]> {
        None
    }

    /// Rebuild selector state from replayed records. Selectors hold no state
    /// that survives a restart outside the log.
    fn resume(&mut self, records: &[IterationRecord]);

    /// True while the selector still wants space-filling warm-start samples.
    fn warming_up(&self) -> bool {
        false
    }

    fn propose(&mut self, iter: usize) -> Result<Vec<[f64; 2]>, ExperimentError>;

    fn update(&mut self, iter: usize, params: [f64; 2], obs: &WindowStats) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Loading,
    FillingInitialSample,
    Selecting,
    Evaluating,
    Logging,
    Done,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub start_iter: usize,
    pub end_iter: usize,
    pub evaluations: usize,
    pub wall_time_s: f64,
    /// Elapsed seconds since experiment start, continuous across restarts.
    pub elapsed_s: f64,
    pub resumed: bool,
}

pub struct Driver<S, E> {
    selector: S,
    evaluator: E,
    store: RecordStore,
}

impl<S: CandidateSelector, E: Evaluator> Driver<S, E> {
    pub fn new(selector: S, evaluator: E, store: RecordStore) -> Self {
        Self {
            selector,
            evaluator,
            store,
        }
    }

    /// Run `turns` evaluate-then-append cycles, then stop.
    pub fn run(&mut self, turns: usize) -> Result<RunReport> {
        let started = Instant::now();
        let mut phase = Phase::Loading;
        let mut pending: VecDeque<[f64; 2]> = VecDeque::new();
        let mut staged: Option<[f64; 2]> = None;
        let mut in_flight: Option<([f64; 2], WindowStats)> = None;
        let mut turn_started = started;
        let mut iter = 0usize;
        let mut start_iter = 0usize;
        let mut prior_elapsed = 0.0f64;
        let mut completed = 0usize;

        while phase != Phase::Done {
            match phase {
                Phase::Loading => {
                    let state = self.store.load_all();
                    if state.reset || state.start_iter == 0 {
                        self.store.initialize(self.selector.target_marker())?;
                    }
                    self.selector.resume(&state.records);
                    iter = state.start_iter;
                    start_iter = iter;
                    prior_elapsed = state.prior_elapsed;
                    if iter > 0 {
                        eprintln!(
                            "[slipstream] resumed {} with {} records, continuing at iteration {}",
                            self.store.path().display(),
                            state.records.len(),
                            iter
                        );
                    }
                    phase = if turns == 0 {
                        Phase::Done
                    } else if self.selector.warming_up() {
                        Phase::FillingInitialSample
                    } else {
                        Phase::Selecting
                    };
                }
                Phase::FillingInitialSample | Phase::Selecting => {
                    if pending.is_empty() {
                        if phase == Phase::FillingInitialSample {
                            eprintln!("[slipstream] filling initial sample");
                        }
                        let batch = self
                            .selector
                            .propose(iter)
                            .with_context(|| format!("selection failed at iteration {}", iter))?;
                        anyhow::ensure!(!batch.is_empty(), "selector proposed no candidates");
                        pending = batch.into();
                    }
                    staged = pending.pop_front();
                    phase = Phase::Evaluating;
                }
                Phase::Evaluating => {
                    let params = staged.take().expect("a candidate was staged");
                    turn_started = Instant::now();
                    eprintln!("[slipstream] ----------------------------------");
                    eprintln!("[slipstream] beginning iteration {}", iter);
                    eprintln!(
                        "[slipstream] params: {:.6},{:.6}",
                        params[0], params[1]
                    );
                    let obs = self
                        .evaluator
                        .evaluate(params)
                        .with_context(|| format!("evaluation failed at iteration {}", iter))?;
                    in_flight = Some((params, obs));
                    phase = Phase::Logging;
                }
                Phase::Logging => {
                    let (params, obs) = in_flight.take().expect("an evaluation is in flight");
                    let elapsed = prior_elapsed + started.elapsed().as_secs_f64();
                    let trailing = self
                        .selector
                        .update(iter, params, &obs)
                        .unwrap_or(elapsed);
                    let record = IterationRecord {
                        iter,
                        params,
                        mean: obs.mean,
                        stdev: obs.stdev,
                        trailing,
                    };
                    self.store
                        .append(&record)
                        .with_context(|| format!("append failed at iteration {}", iter))?;
                    self.evaluator.archive(params)?;
                    eprintln!(
                        "[slipstream] drag={:.6} sideforce={:.6} lift={:.6}",
                        obs.mean[0], obs.mean[1], obs.mean[2]
                    );
                    eprintln!(
                        "[slipstream] iteration {} done in {:.1}s (total elapsed {:.1}s)",
                        iter,
                        turn_started.elapsed().as_secs_f64(),
                        elapsed
                    );
                    iter += 1;
                    completed += 1;
                    phase = if completed == turns {
                        Phase::Done
                    } else if self.selector.warming_up() {
                        Phase::FillingInitialSample
                    } else {
                        Phase::Selecting
                    };
                }
                Phase::Done => unreachable!(),
            }
        }

        Ok(RunReport {
            start_iter,
            end_iter: iter,
            evaluations: completed,
            wall_time_s: started.elapsed().as_secs_f64(),
            elapsed_s: prior_elapsed + started.elapsed().as_secs_f64(),
            resumed: start_iter > 0,
        })
    }
}
