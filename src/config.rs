use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Root {
    #[serde(default)]
    pub project: Project,
    #[serde(default)]
    pub domain: Domain,
    #[serde(default)]
    pub window: Window,
    #[serde(default)]
    pub annealing: Annealing,
    #[serde(default)]
    pub surrogate: Surrogate,
    #[serde(default)]
    pub evaluation: Evaluation,
    #[serde(default)]
    pub fake: Fake,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Project {
    pub program: String,
    pub module: String,
    pub version: String,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            program: "slipstream".to_string(),
            module: "experiment-driver".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Design-parameter domain. Candidates are clamped into
/// `[min_bound, max_bound]` componentwise, never rejected.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Domain {
    pub min_bound: [f64; 2],
    pub max_bound: [f64; 2],
}

impl Default for Domain {
    fn default() -> Self {
        Self {
            min_bound: [-1.0, -1.0],
            max_bound: [1.0, 1.0],
        }
    }
}

/// Inclusive time-step window used when averaging the solver force history.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Window {
    pub start: u64,
    pub end: u64,
}

impl Default for Window {
    fn default() -> Self {
        Self { start: 450, end: 500 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Annealing {
    /// Std-dev of the per-component Gaussian proposal perturbation.
    pub step_size: f64,
    /// Initial Metropolis temperature; cooled as temp/(iter+1).
    pub temperature: f64,
    pub target_drag: f64,
    pub target_lift: f64,
}

impl Default for Annealing {
    fn default() -> Self {
        Self {
            step_size: 0.1,
            temperature: 10.0,
            target_drag: 420.0,
            target_lift: -350.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Surrogate {
    /// Size of the space-filling warm-start sample.
    pub initial_samples: usize,
    /// Observation count below which no model is fit.
    pub min_observations: usize,
    /// Candidates selected per model refit.
    pub batch_size: usize,
    /// Monte-Carlo draws for the acquisition integral.
    pub mc_samples: usize,
    /// Multi-start count for acquisition optimization.
    pub restarts: usize,
    /// Uniform pool scored to seed the multi-start heuristic.
    pub raw_samples: usize,
    /// Observed points whose posterior probability of Pareto-optimality
    /// falls below this are pruned from the acquisition baseline.
    pub prune_min: f64,
    /// Hypervolume reference as a worst-case (drag, lift) bound.
    pub ref_point: [f64; 2],
    pub length_scale: f64,
    pub signal_variance: f64,
    pub noise_variance: f64,
}

impl Default for Surrogate {
    fn default() -> Self {
        Self {
            initial_samples: 10,
            min_observations: 10,
            batch_size: 4,
            mc_samples: 128,
            restarts: 10,
            raw_samples: 512,
            prune_min: 0.01,
            ref_point: [1000.0, 1000.0],
            length_scale: 0.25,
            signal_variance: 1.0,
            noise_variance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Evaluation {
    /// Pristine case directory copied for every evaluation.
    pub template_dir: String,
    /// Working directory the solver script runs in; recreated per evaluation.
    pub runtime_dir: String,
    /// Solver entry script, relative to the runtime directory.
    pub run_script: String,
    /// Force history written by the solver, relative to the runtime directory.
    pub forces_path: String,
    /// File capturing solver stdout.
    pub solver_log: String,
    /// Directory archiving raw force histories per evaluated candidate.
    pub raw_dir: String,
    /// Geometry-export command invoked with the candidate parameters before
    /// the solver runs; the two parameters and the model path are appended
    /// to this argv. Absent means the template already contains geometry.
    pub geometry_cmd: Option<Vec<String>>,
    /// Model file the geometry export writes, relative to the runtime
    /// directory.
    pub model_path: String,
}

impl Default for Evaluation {
    fn default() -> Self {
        Self {
            template_dir: "./template".to_string(),
            runtime_dir: "./runtime".to_string(),
            run_script: "run.sh".to_string(),
            forces_path: "postProcessing/forces/0/forces.dat".to_string(),
            solver_log: "./solver_log.txt".to_string(),
            raw_dir: "./data/forces".to_string(),
            geometry_cmd: None,
            model_path: "model.obj".to_string(),
        }
    }
}

/// Deterministic stand-in for the solver pipeline: a paraboloid in the
/// design parameters with its minimum at `optimum`, returning exactly
/// `minimum` there. Used to validate scalarization and sign conventions.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Fake {
    pub optimum: [f64; 2],
    /// (drag, sideforce, lift) at the optimum.
    pub minimum: [f64; 3],
    /// Quadratic growth rate per objective away from the optimum.
    pub curvature: [f64; 3],
}

impl Default for Fake {
    fn default() -> Self {
        Self {
            optimum: [0.5, -0.25],
            minimum: [420.0, 0.0, -350.0],
            curvature: [80.0, 5.0, 60.0],
        }
    }
}

impl Root {
    pub fn validate(&self) -> Result<()> {
        if self.project.program != "slipstream" {
            bail!("project.program must be slipstream");
        }
        for d in 0..2 {
            if !(self.domain.min_bound[d] < self.domain.max_bound[d]) {
                bail!("domain.min_bound must be strictly below domain.max_bound");
            }
            if !self.domain.min_bound[d].is_finite() || !self.domain.max_bound[d].is_finite() {
                bail!("domain bounds must be finite");
            }
        }
        if self.window.start > self.window.end {
            bail!("window.start must be <= window.end");
        }
        if self.annealing.step_size <= 0.0 {
            bail!("annealing.step_size must be positive");
        }
        if self.annealing.temperature <= 0.0 {
            bail!("annealing.temperature must be positive");
        }
        if self.surrogate.initial_samples == 0 {
            bail!("surrogate.initial_samples must be >= 1");
        }
        if self.surrogate.min_observations < 2 {
            bail!("surrogate.min_observations must be >= 2");
        }
        if self.surrogate.batch_size == 0 {
            bail!("surrogate.batch_size must be >= 1");
        }
        if self.surrogate.mc_samples == 0 {
            bail!("surrogate.mc_samples must be >= 1");
        }
        if self.surrogate.restarts == 0 || self.surrogate.raw_samples == 0 {
            bail!("surrogate.restarts and surrogate.raw_samples must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.surrogate.prune_min) {
            bail!("surrogate.prune_min must be in [0, 1]");
        }
        if self.surrogate.length_scale <= 0.0 || self.surrogate.signal_variance <= 0.0 {
            bail!("surrogate.length_scale and surrogate.signal_variance must be positive");
        }
        if self.surrogate.noise_variance < 0.0 {
            bail!("surrogate.noise_variance must be non-negative");
        }
        if let Some(cmd) = &self.evaluation.geometry_cmd {
            if cmd.is_empty() {
                bail!("evaluation.geometry_cmd must name a command when present");
            }
        }
        for c in self.fake.curvature.iter() {
            if *c < 0.0 {
                bail!("fake.curvature components must be non-negative");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = Root::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn inverted_bounds_rejected() {
        let mut cfg = Root::default();
        cfg.domain.min_bound = [1.0, 0.0];
        cfg.domain.max_bound = [-1.0, 1.0];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_window_rejected() {
        let mut cfg = Root::default();
        cfg.window.start = 500;
        cfg.window.end = 450;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_step_size_rejected() {
        let mut cfg = Root::default();
        cfg.annealing.step_size = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: Root = toml::from_str(
            "[annealing]\nstep_size = 0.2\ntemperature = 5.0\ntarget_drag = 400.0\ntarget_lift = -300.0\n",
        )
        .unwrap();
        assert_eq!(cfg.annealing.step_size, 0.2);
        assert_eq!(cfg.domain.max_bound, [1.0, 1.0]);
        assert_eq!(cfg.surrogate.batch_size, 4);
    }
}
