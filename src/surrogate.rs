//! Gaussian-process surrogate selection for multi-objective design search.
//!
//! Fits one RBF-kernel GP per objective on inputs normalized to the unit
//! cube, then selects candidate batches by Monte-Carlo noisy expected
//! hypervolume improvement past a fixed reference point, greedily
//! conditioning later picks in a batch on earlier ones. Objectives are
//! negated on the way in (the acquisition maximizes) and candidates are
//! mapped back to true bounds on the way out.
//!
//! References:
//! - Daulton, S., et al. "Parallel Bayesian Optimization of Multiple Noisy
//!   Objectives with Expected Hypervolume Improvement" (2021)
//! - Rasmussen, C. E., Williams, C. K. I. "Gaussian Processes for Machine
//!   Learning" (2006)

use crate::config;
use crate::driver::{turn_rng, CandidateSelector};
use crate::error::ExperimentError;
use crate::stats::WindowStats;
use crate::store::{IterationRecord, TrailingField};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use std::cmp::Ordering;

// ============================================================================
// Gaussian process regression
// ============================================================================

fn rbf(a: &[f64; 2], b: &[f64; 2], length_scale: f64, signal_variance: f64) -> f64 {
    let d0 = a[0] - b[0];
    let d1 = a[1] - b[1];
    let sq = d0 * d0 + d1 * d1;
    signal_variance * (-sq / (2.0 * length_scale * length_scale)).exp()
}

fn cholesky(a: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ExperimentError> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[i][k] * l[j][k];
            }
            if i == j {
                let val = a[i][i] - sum;
                if val <= 0.0 {
                    return Err(ExperimentError::SurrogateFit(
                        "covariance matrix is not positive definite".to_string(),
                    ));
                }
                l[i][j] = val.sqrt();
            } else {
                l[i][j] = (a[i][j] - sum) / l[j][j];
            }
        }
    }
    Ok(l)
}

fn solve_lower(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i][j] * x[j];
        }
        x[i] = sum / l[i][i];
    }
    x
}

fn solve_upper(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= l[j][i] * x[j];
        }
        x[i] = sum / l[i][i];
    }
    x
}

/// RBF-kernel GP over unit-cube inputs with standardized outputs.
#[derive(Debug)]
struct GaussianProcess {
    x: Vec<[f64; 2]>,
    alpha: Vec<f64>,
    chol: Vec<Vec<f64>>,
    length_scale: f64,
    signal_variance: f64,
}

impl GaussianProcess {
    fn fit(
        x: Vec<[f64; 2]>,
        y: &[f64],
        length_scale: f64,
        signal_variance: f64,
        noise_variance: f64,
    ) -> Result<Self, ExperimentError> {
        let n = x.len();
        let mut k = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                k[i][j] = rbf(&x[i], &x[j], length_scale, signal_variance);
                if i == j {
                    k[i][j] += noise_variance;
                }
            }
        }
        let chol = cholesky(&k)?;
        let tmp = solve_lower(&chol, y);
        let alpha = solve_upper(&chol, &tmp);
        Ok(Self {
            x,
            alpha,
            chol,
            length_scale,
            signal_variance,
        })
    }

    /// Posterior mean and variance at a unit-cube point.
    fn predict(&self, q: &[f64; 2]) -> (f64, f64) {
        let k_star: Vec<f64> = self
            .x
            .iter()
            .map(|xi| rbf(xi, q, self.length_scale, self.signal_variance))
            .collect();
        let mu: f64 = k_star.iter().zip(self.alpha.iter()).map(|(k, a)| k * a).sum();
        let v = solve_lower(&self.chol, &k_star);
        let var = self.signal_variance - v.iter().map(|vi| vi * vi).sum::<f64>();
        (mu, var.max(1e-12))
    }
}

/// Zero-mean unit-variance transform fit per objective.
#[derive(Debug)]
struct Standardizer {
    mean: f64,
    std: f64,
}

impl Standardizer {
    fn fit(y: &[f64]) -> Result<Self, ExperimentError> {
        let n = y.len() as f64;
        let mean = y.iter().sum::<f64>() / n;
        let var = y.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        if std < 1e-12 {
            return Err(ExperimentError::SurrogateFit(
                "degenerate training data: outcomes have zero variance".to_string(),
            ));
        }
        Ok(Self { mean, std })
    }

    fn apply(&self, y: f64) -> f64 {
        (y - self.mean) / self.std
    }
}

// ============================================================================
// Hypervolume machinery (maximize convention)
// ============================================================================

fn dominates_max(a: [f64; 2], b: [f64; 2]) -> bool {
    a[0] >= b[0] && a[1] >= b[1] && (a[0] > b[0] || a[1] > b[1])
}

fn non_dominated_max(points: &[[f64; 2]]) -> Vec<usize> {
    (0..points.len())
        .filter(|&i| {
            !points
                .iter()
                .enumerate()
                .any(|(j, p)| j != i && dominates_max(*p, points[i]))
        })
        .collect()
}

/// Area dominated by `points` beyond the reference `r`, both maximized.
fn hypervolume_max(points: &[[f64; 2]], r: [f64; 2]) -> f64 {
    let mut sorted: Vec<[f64; 2]> = points.to_vec();
    sorted.sort_by(|a, b| b[0].partial_cmp(&a[0]).unwrap_or(Ordering::Equal));

    let mut hv = 0.0;
    let mut prev = r[1];
    for p in sorted {
        if p[0] > r[0] && p[1] > r[1] {
            let width = p[0] - r[0];
            let height = p[1] - prev;
            if height > 0.0 {
                hv += width * height;
            }
            prev = prev.max(p[1]);
        }
    }
    hv
}

/// Hypervolume the sampled point `y` adds beyond the sampled front.
fn hv_improvement(front: &[[f64; 2]], base_hv: f64, y: [f64; 2], r: [f64; 2]) -> f64 {
    if y[0] <= r[0] || y[1] <= r[1] {
        return 0.0;
    }
    if front.iter().any(|f| dominates_max(*f, y) || *f == y) {
        return 0.0;
    }
    let mut merged: Vec<[f64; 2]> = front
        .iter()
        .copied()
        .filter(|f| !dominates_max(y, *f))
        .collect();
    merged.push(y);
    (hypervolume_max(&merged, r) - base_hv).max(0.0)
}

// ============================================================================
// Low-discrepancy warm start
// ============================================================================

/// Van der Corput radical inverse of `i` in the given base.
fn halton(mut i: u64, base: u64) -> f64 {
    let mut f = 1.0;
    let mut r = 0.0;
    while i > 0 {
        f /= base as f64;
        r += f * (i % base) as f64;
        i /= base;
    }
    r
}

// ============================================================================
// Selector
// ============================================================================

pub struct SurrogateSelector {
    cfg: config::Surrogate,
    min_bound: [f64; 2],
    max_bound: [f64; 2],
    seed: u64,
    /// (true-domain parameters, measured (drag, lift)).
    observations: Vec<([f64; 2], [f64; 2])>,
}

impl SurrogateSelector {
    pub fn new(domain: &config::Domain, cfg: &config::Surrogate, seed: u64) -> Self {
        Self {
            cfg: cfg.clone(),
            min_bound: domain.min_bound,
            max_bound: domain.max_bound,
            seed,
            observations: Vec::new(),
        }
    }

    fn unit_to_domain(&self, u: [f64; 2]) -> [f64; 2] {
        [
            self.min_bound[0] + u[0] * (self.max_bound[0] - self.min_bound[0]),
            self.min_bound[1] + u[1] * (self.max_bound[1] - self.min_bound[1]),
        ]
    }

    fn domain_to_unit(&self, p: [f64; 2]) -> [f64; 2] {
        [
            (p[0] - self.min_bound[0]) / (self.max_bound[0] - self.min_bound[0]),
            (p[1] - self.min_bound[1]) / (self.max_bound[1] - self.min_bound[1]),
        ]
    }

    /// Space-filling Halton points `from..to` of the warm-start sequence,
    /// mapped into the true bounds. Indexing by observation count keeps the
    /// sequence gapless across restarts.
    pub fn initial_batch(&self, from: usize, to: usize) -> Vec<[f64; 2]> {
        (from..to)
            .map(|k| {
                let u = [halton(k as u64 + 1, 2), halton(k as u64 + 1, 3)];
                self.unit_to_domain(u)
            })
            .collect()
    }

    /// Fit per-objective surrogates on everything observed so far and pick
    /// `batch` candidates by sequential greedy acquisition maximization.
    pub fn fit_and_select(
        &self,
        batch: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<[f64; 2]>, ExperimentError> {
        let n = self.observations.len();
        debug_assert!(n >= self.cfg.min_observations);

        let xs: Vec<[f64; 2]> = self
            .observations
            .iter()
            .map(|(p, _)| self.domain_to_unit(*p))
            .collect();

        // Negate to the maximize convention, then standardize per objective.
        let mut gps = Vec::with_capacity(2);
        let mut ref_std = [0.0; 2];
        for k in 0..2 {
            let raw: Vec<f64> = self.observations.iter().map(|(_, o)| -o[k]).collect();
            let standardizer = Standardizer::fit(&raw)?;
            let ys: Vec<f64> = raw.iter().map(|v| standardizer.apply(*v)).collect();
            gps.push(GaussianProcess::fit(
                xs.clone(),
                &ys,
                self.cfg.length_scale,
                self.cfg.signal_variance,
                self.cfg.noise_variance,
            )?);
            ref_std[k] = standardizer.apply(-self.cfg.ref_point[k]);
        }

        // Posterior draws at the observed baseline, shared by pruning and
        // the acquisition fronts. The draws are fixed for the whole call so
        // the acquisition surface stays deterministic while it is optimized.
        let mc = self.cfg.mc_samples;
        let noise = self.cfg.noise_variance;
        let base_stats: Vec<[(f64, f64); 2]> = xs
            .iter()
            .map(|x| {
                let mut s = [(0.0, 0.0); 2];
                for k in 0..2 {
                    let (mu, var) = gps[k].predict(x);
                    s[k] = (mu, (var + noise).sqrt());
                }
                s
            })
            .collect();

        let mut sampled: Vec<Vec<[f64; 2]>> = Vec::with_capacity(mc);
        let mut pareto_counts = vec![0usize; n];
        for _ in 0..mc {
            let draw: Vec<[f64; 2]> = base_stats
                .iter()
                .map(|s| {
                    let z0: f64 = StandardNormal.sample(rng);
                    let z1: f64 = StandardNormal.sample(rng);
                    [s[0].0 + s[0].1 * z0, s[1].0 + s[1].1 * z1]
                })
                .collect();
            for &i in &non_dominated_max(&draw) {
                pareto_counts[i] += 1;
            }
            sampled.push(draw);
        }

        // Prune baseline points with near-zero posterior probability of
        // Pareto-optimality to keep the fronts small.
        let mut keep: Vec<usize> = (0..n)
            .filter(|&i| pareto_counts[i] as f64 / mc as f64 >= self.cfg.prune_min)
            .collect();
        if keep.is_empty() {
            keep = (0..n).collect();
        }

        let mut fronts: Vec<Vec<[f64; 2]>> = Vec::with_capacity(mc);
        let mut base_hv: Vec<f64> = Vec::with_capacity(mc);
        for draw in &sampled {
            let kept: Vec<[f64; 2]> = keep.iter().map(|&i| draw[i]).collect();
            let front: Vec<[f64; 2]> = non_dominated_max(&kept)
                .into_iter()
                .map(|i| kept[i])
                .collect();
            base_hv.push(hypervolume_max(&front, ref_std));
            fronts.push(front);
        }

        let mut selected = Vec::with_capacity(batch);
        for _ in 0..batch {
            let z_cand: Vec<[f64; 2]> = (0..mc)
                .map(|_| {
                    [
                        StandardNormal.sample(rng),
                        StandardNormal.sample(rng),
                    ]
                })
                .collect();

            let acq = |x: &[f64; 2]| -> f64 {
                let (mu0, var0) = gps[0].predict(x);
                let (mu1, var1) = gps[1].predict(x);
                let sd0 = (var0 + noise).sqrt();
                let sd1 = (var1 + noise).sqrt();
                let mut total = 0.0;
                for s in 0..mc {
                    let y = [mu0 + sd0 * z_cand[s][0], mu1 + sd1 * z_cand[s][1]];
                    total += hv_improvement(&fronts[s], base_hv[s], y, ref_std);
                }
                total / mc as f64
            };

            // Multi-start local optimization, seeded from the best of a
            // uniform pool.
            let mut pool: Vec<([f64; 2], f64)> = (0..self.cfg.raw_samples)
                .map(|_| {
                    let x = [rng.gen::<f64>(), rng.gen::<f64>()];
                    let v = acq(&x);
                    (x, v)
                })
                .collect();
            pool.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

            let mut best_x = pool[0].0;
            let mut best_v = pool[0].1;
            for (start, _) in pool.iter().take(self.cfg.restarts) {
                let (x, v) = local_maximize(&acq, *start);
                if v > best_v {
                    best_v = v;
                    best_x = x;
                }
            }
            selected.push(best_x);

            // Condition later picks on this one: fold a posterior draw of
            // the chosen point into every sampled front.
            let (mu0, var0) = gps[0].predict(&best_x);
            let (mu1, var1) = gps[1].predict(&best_x);
            let sd0 = (var0 + noise).sqrt();
            let sd1 = (var1 + noise).sqrt();
            for s in 0..mc {
                let z0: f64 = StandardNormal.sample(rng);
                let z1: f64 = StandardNormal.sample(rng);
                let y = [mu0 + sd0 * z0, mu1 + sd1 * z1];
                let mut merged = fronts[s].clone();
                merged.push(y);
                let front: Vec<[f64; 2]> = non_dominated_max(&merged)
                    .into_iter()
                    .map(|i| merged[i])
                    .collect();
                base_hv[s] = hypervolume_max(&front, ref_std);
                fronts[s] = front;
            }
        }

        Ok(selected.into_iter().map(|x| self.unit_to_domain(x)).collect())
    }
}

/// Coordinate pattern search with step halving, clamped to the unit cube.
fn local_maximize<F: Fn(&[f64; 2]) -> f64>(f: &F, start: [f64; 2]) -> ([f64; 2], f64) {
    let mut x = start;
    let mut best = f(&x);
    let mut step = 0.1;
    while step > 1e-3 {
        let mut improved = false;
        for d in 0..2 {
            for sgn in [-1.0f64, 1.0] {
                let mut y = x;
                y[d] = (y[d] + sgn * step).clamp(0.0, 1.0);
                let v = f(&y);
                if v > best {
                    best = v;
                    x = y;
                    improved = true;
                }
            }
        }
        if !improved {
            step *= 0.5;
        }
    }
    (x, best)
}

impl CandidateSelector for SurrogateSelector {
    fn trailing(&self) -> TrailingField {
        TrailingField::Time
    }

    fn resume(&mut self, records: &[IterationRecord]) {
        self.observations = records
            .iter()
            .map(|r| (r.params, r.objectives()))
            .collect();
    }

    fn warming_up(&self) -> bool {
        self.observations.len() < self.cfg.min_observations
    }

    fn propose(&mut self, iter: usize) -> Result<Vec<[f64; 2]>, ExperimentError> {
        let n = self.observations.len();
        if n < self.cfg.min_observations {
            let warm_target = self.cfg.initial_samples.max(self.cfg.min_observations);
            return Ok(self.initial_batch(n, warm_target));
        }
        let mut rng = turn_rng(self.seed, iter);
        self.fit_and_select(self.cfg.batch_size, &mut rng)
    }

    fn update(&mut self, _iter: usize, params: [f64; 2], obs: &WindowStats) -> Option<f64> {
        self.observations.push((params, obs.objectives()));
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn selector_with(cfg: config::Surrogate) -> SurrogateSelector {
        SurrogateSelector::new(&config::Domain::default(), &cfg, 42)
    }

    fn fast_cfg() -> config::Surrogate {
        config::Surrogate {
            mc_samples: 16,
            raw_samples: 64,
            restarts: 4,
            min_observations: 6,
            initial_samples: 6,
            ..config::Surrogate::default()
        }
    }

    #[test]
    fn halton_fills_unit_interval() {
        let values: Vec<f64> = (1..=32).map(|i| halton(i, 2)).collect();
        assert!(values.iter().all(|v| (0.0..1.0).contains(v)));
        // first few radical inverses in base 2
        assert!((values[0] - 0.5).abs() < 1e-12);
        assert!((values[1] - 0.25).abs() < 1e-12);
        assert!((values[2] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn initial_batch_within_bounds_and_gapless() {
        let sel = selector_with(fast_cfg());
        let head = sel.initial_batch(0, 4);
        let tail = sel.initial_batch(2, 4);
        assert_eq!(&head[2..], &tail[..]);
        for p in head {
            assert!(p[0] >= -1.0 && p[0] <= 1.0);
            assert!(p[1] >= -1.0 && p[1] <= 1.0);
        }
    }

    #[test]
    fn gp_interpolates_training_points() {
        let x = vec![[0.0, 0.0], [0.5, 0.5], [1.0, 1.0]];
        let y = vec![-1.0, 0.0, 1.0];
        let gp = GaussianProcess::fit(x, &y, 0.5, 1.0, 1e-6).unwrap();
        let (mu, _) = gp.predict(&[0.5, 0.5]);
        assert!((mu - 0.0).abs() < 0.05);
        let (mu0, _) = gp.predict(&[0.0, 0.0]);
        assert!((mu0 + 1.0).abs() < 0.1);
    }

    #[test]
    fn gp_variance_lower_near_data() {
        let x = vec![[0.5, 0.5]];
        let y = vec![0.0];
        let gp = GaussianProcess::fit(x, &y, 0.2, 1.0, 1e-6).unwrap();
        let (_, near) = gp.predict(&[0.5, 0.5]);
        let (_, far) = gp.predict(&[0.0, 1.0]);
        assert!(near < far);
    }

    #[test]
    fn duplicate_inputs_without_noise_fail_to_fit() {
        let x = vec![[0.5, 0.5], [0.5, 0.5]];
        let y = vec![0.0, 1.0];
        let err = GaussianProcess::fit(x, &y, 0.2, 1.0, 0.0).unwrap_err();
        assert!(matches!(err, ExperimentError::SurrogateFit(_)));
    }

    #[test]
    fn constant_outcomes_fail_to_standardize() {
        let err = Standardizer::fit(&[3.0, 3.0, 3.0]).unwrap_err();
        assert!(matches!(err, ExperimentError::SurrogateFit(_)));
    }

    #[test]
    fn hypervolume_of_known_front() {
        let hv = hypervolume_max(&[[5.0, 1.0], [1.0, 5.0]], [0.0, 0.0]);
        assert!((hv - 9.0).abs() < 1e-12);
        // dominated point adds nothing
        let hv2 = hypervolume_max(&[[5.0, 1.0], [1.0, 5.0], [1.0, 1.0]], [0.0, 0.0]);
        assert!((hv2 - 9.0).abs() < 1e-12);
    }

    #[test]
    fn improvement_zero_for_dominated_candidate() {
        let front = vec![[5.0, 5.0]];
        let base = hypervolume_max(&front, [0.0, 0.0]);
        assert_eq!(hv_improvement(&front, base, [4.0, 4.0], [0.0, 0.0]), 0.0);
        assert!(hv_improvement(&front, base, [6.0, 1.0], [0.0, 0.0]) > 0.0);
    }

    #[test]
    fn non_dominated_filter() {
        let points = vec![[1.0, 5.0], [5.0, 1.0], [2.0, 2.0], [5.0, 5.0]];
        let idx = non_dominated_max(&points);
        assert_eq!(idx, vec![3]);
    }

    #[test]
    fn fit_and_select_returns_batch_within_bounds() {
        let cfg = fast_cfg();
        let mut sel = selector_with(cfg.clone());
        // toy observations on a quadratic landscape
        for p in sel.initial_batch(0, 8) {
            let drag = 400.0 + 50.0 * (p[0] - 0.3).powi(2) + 10.0 * p[1].powi(2);
            let lift = -300.0 + 40.0 * (p[1] + 0.4).powi(2) + 5.0 * p[0].powi(2);
            sel.observations.push((p, [drag, lift]));
        }
        let mut rng = StdRng::seed_from_u64(7);
        let batch = sel.fit_and_select(3, &mut rng).unwrap();
        assert_eq!(batch.len(), 3);
        for p in batch {
            assert!(p[0] >= -1.0 && p[0] <= 1.0);
            assert!(p[1] >= -1.0 && p[1] <= 1.0);
        }
    }

    #[test]
    fn propose_defers_to_initial_batch_below_threshold() {
        let mut sel = selector_with(fast_cfg());
        assert!(sel.warming_up());
        let batch = sel.propose(0).unwrap();
        assert_eq!(batch.len(), 6);
        assert_eq!(batch, sel.initial_batch(0, 6));
    }

    #[test]
    fn proposals_are_deterministic_for_a_seed_and_iteration() {
        let make = || {
            let mut sel = selector_with(fast_cfg());
            for p in sel.initial_batch(0, 8) {
                let drag = 420.0 + 30.0 * (p[0] - 0.2).powi(2);
                let lift = -350.0 + 20.0 * (p[1] - 0.1).powi(2);
                sel.observations.push((p, [drag, lift]));
            }
            sel.propose(8).unwrap()
        };
        assert_eq!(make(), make());
    }
}
