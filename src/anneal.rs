//! Simulated-annealing candidate selection.
//!
//! Stochastic local search over the bounded design domain: Gaussian
//! perturbation proposals, squared-distance-to-target scalarization, and
//! Metropolis acceptance under a temp/(iter+1) cooling schedule.

use crate::config;
use crate::driver::{turn_rng, CandidateSelector};
use crate::error::ExperimentError;
use crate::stats::WindowStats;
use crate::store::{IterationRecord, TrailingField};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Perturb `current` with independent zero-mean Gaussian noise of std-dev
/// `step_size`, then clamp componentwise into bounds. Out-of-bound draws are
/// clamped, never resampled, which concentrates proposals at the boundary.
pub fn propose(
    current: [f64; 2],
    min_bound: [f64; 2],
    max_bound: [f64; 2],
    step_size: f64,
    rng: &mut StdRng,
) -> [f64; 2] {
    let noise = Normal::new(0.0, step_size.abs()).expect("step_size must be finite");
    let mut candidate = current;
    for d in 0..2 {
        candidate[d] = (candidate[d] + noise.sample(rng)).clamp(min_bound[d], max_bound[d]);
    }
    candidate
}

/// Squared Euclidean distance between the target and the observed scoring
/// coordinates (drag, lift). The recorded sideforce and stdev fields do not
/// participate in the scalarization.
pub fn objective(target: [f64; 2], value: [f64; 2]) -> f64 {
    let dx = target[0] - value[0];
    let dy = target[1] - value[1];
    dx * dx + dy * dy
}

/// Metropolis acceptance: always true for an improving candidate, otherwise
/// true with probability exp(-diff / (temperature/(iter+1))). The iteration
/// index is the resumed index, so a restarted run continues the same cooling
/// schedule.
pub fn accept(
    current_error: f64,
    candidate_error: f64,
    iter: usize,
    temperature: f64,
    rng: &mut StdRng,
) -> bool {
    let diff = candidate_error - current_error;
    if diff < 0.0 {
        return true;
    }
    let t = temperature / (iter + 1) as f64;
    let metropolis = (-diff / t).exp();
    rng.gen::<f64>() < metropolis
}

pub struct AnnealingSelector {
    min_bound: [f64; 2],
    max_bound: [f64; 2],
    step_size: f64,
    temperature: f64,
    target: [f64; 2],
    seed: u64,
    pub(crate) current: [f64; 2],
    pub(crate) current_error: f64,
    rng: StdRng,
}

impl AnnealingSelector {
    pub fn new(domain: &config::Domain, cfg: &config::Annealing, seed: u64) -> Self {
        // Start at the domain midpoint until the log says otherwise.
        let current = [
            0.5 * (domain.min_bound[0] + domain.max_bound[0]),
            0.5 * (domain.min_bound[1] + domain.max_bound[1]),
        ];
        Self {
            min_bound: domain.min_bound,
            max_bound: domain.max_bound,
            step_size: cfg.step_size,
            temperature: cfg.temperature,
            target: [cfg.target_drag, cfg.target_lift],
            seed,
            current,
            current_error: f64::INFINITY,
            rng: turn_rng(seed, 0),
        }
    }
}

impl CandidateSelector for AnnealingSelector {
    fn trailing(&self) -> TrailingField {
        TrailingField::Error
    }

    fn target_marker(&self) -> Option<[f64; 2]> {
        Some(self.target)
    }

    fn resume(&mut self, records: &[IterationRecord]) {
        if let Some(last) = records.last() {
            self.current = last.params;
            self.current_error = last.trailing;
        }
    }

    fn propose(&mut self, iter: usize) -> Result<Vec<[f64; 2]>, ExperimentError> {
        self.rng = turn_rng(self.seed, iter);
        Ok(vec![propose(
            self.current,
            self.min_bound,
            self.max_bound,
            self.step_size,
            &mut self.rng,
        )])
    }

    fn update(&mut self, iter: usize, params: [f64; 2], obs: &WindowStats) -> Option<f64> {
        let error = objective(self.target, obs.objectives());
        if accept(self.current_error, error, iter, self.temperature, &mut self.rng) {
            self.current = params;
            self.current_error = error;
        }
        Some(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn proposals_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let min = [-1.0, -1.0];
        let max = [1.0, 1.0];
        for i in 0..500 {
            let current = [0.9, -0.9];
            let step = (0.5 + (i % 7) as f64) * if i % 2 == 0 { 1.0 } else { -1.0 };
            let c = propose(current, min, max, step, &mut rng);
            assert!(c[0] >= min[0] && c[0] <= max[0]);
            assert!(c[1] >= min[1] && c[1] <= max[1]);
        }
    }

    #[test]
    fn objective_is_squared_distance() {
        let e = objective([420.0, -350.0], [417.0, -346.0]);
        assert!((e - 25.0).abs() < 1e-12);
        assert_eq!(objective([1.0, 2.0], [1.0, 2.0]), 0.0);
    }

    #[test]
    fn improving_candidates_always_accepted() {
        let mut rng = StdRng::seed_from_u64(1);
        for iter in 0..50 {
            assert!(accept(10.0, 9.999, iter, 1e-9, &mut rng));
        }
    }

    #[test]
    fn worsening_acceptance_shrinks_with_cooling() {
        // Count acceptances of the same worsening move early vs late in the
        // schedule; the cooled temperature must admit fewer.
        let trials = 2000;
        let mut early = 0;
        let mut late = 0;
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..trials {
            if accept(1.0, 2.0, 0, 2.0, &mut rng) {
                early += 1;
            }
            if accept(1.0, 2.0, 99, 2.0, &mut rng) {
                late += 1;
            }
        }
        assert!(early > late);
        assert!(late < trials / 10);
    }

    #[test]
    fn resume_restores_current_from_last_record() {
        let domain = config::Domain::default();
        let cfg = config::Annealing::default();
        let mut sel = AnnealingSelector::new(&domain, &cfg, 42);
        let records = vec![
            IterationRecord {
                iter: 0,
                params: [0.1, 0.1],
                mean: [400.0, 0.0, -300.0],
                stdev: [0.0; 3],
                trailing: 90.0,
            },
            IterationRecord {
                iter: 1,
                params: [0.3, -0.2],
                mean: [418.0, 0.0, -348.0],
                stdev: [0.0; 3],
                trailing: 8.0,
            },
        ];
        sel.resume(&records);
        assert_eq!(sel.current, [0.3, -0.2]);
        assert!((sel.current_error - 8.0).abs() < 1e-12);
    }
}
