//! Evaluation gateway: maps a candidate parameter vector to measured
//! objectives by driving the external solver pipeline, plus a deterministic
//! fake used to validate conventions without a solver installation.

use crate::config;
use crate::error::ExperimentError;
use crate::stats::{self, WindowStats};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub trait Evaluator {
    /// Blocking evaluation of one candidate. The driver serializes calls;
    /// there is never more than one outstanding evaluation.
    fn evaluate(&mut self, params: [f64; 2]) -> Result<WindowStats, ExperimentError>;

    /// Archive raw per-candidate artifacts after a successful append.
    fn archive(&self, _params: [f64; 2]) -> Result<(), ExperimentError> {
        Ok(())
    }
}

impl Evaluator for Box<dyn Evaluator> {
    fn evaluate(&mut self, params: [f64; 2]) -> Result<WindowStats, ExperimentError> {
        (**self).evaluate(params)
    }

    fn archive(&self, params: [f64; 2]) -> Result<(), ExperimentError> {
        (**self).archive(params)
    }
}

/// Drives the real pipeline: recreate the runtime case directory from the
/// template, export geometry for the candidate, run the solver script with
/// an explicit working directory, then average the force history over the
/// configured window.
pub struct SolverGateway {
    cfg: config::Evaluation,
    window: config::Window,
}

impl SolverGateway {
    pub fn new(cfg: config::Evaluation, window: config::Window) -> Self {
        Self { cfg, window }
    }

    fn runtime_dir(&self) -> &Path {
        Path::new(&self.cfg.runtime_dir)
    }

    fn forces_file(&self) -> PathBuf {
        self.runtime_dir().join(&self.cfg.forces_path)
    }

    fn export_geometry(&self, params: [f64; 2]) -> Result<(), ExperimentError> {
        let Some(argv) = &self.cfg.geometry_cmd else {
            return Ok(());
        };
        let model = self.runtime_dir().join(&self.cfg.model_path);
        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .arg(format!("{:.6}", params[0]))
            .arg(format!("{:.6}", params[1]))
            .arg(&model)
            .status()
            .map_err(|e| {
                ExperimentError::TransientEvaluation(format!(
                    "geometry export {:?} failed to start: {}",
                    argv[0], e
                ))
            })?;
        if !status.success() {
            return Err(ExperimentError::TransientEvaluation(format!(
                "geometry export exited with {}",
                status
            )));
        }
        Ok(())
    }

    fn run_solver(&self) -> Result<(), ExperimentError> {
        let log = File::create(&self.cfg.solver_log)?;
        let status = Command::new("sh")
            .arg(&self.cfg.run_script)
            .current_dir(self.runtime_dir())
            .stdout(Stdio::from(log))
            .status()
            .map_err(|e| {
                ExperimentError::TransientEvaluation(format!("solver failed to start: {}", e))
            })?;
        if !status.success() {
            return Err(ExperimentError::TransientEvaluation(format!(
                "solver script exited with {}",
                status
            )));
        }
        Ok(())
    }
}

impl Evaluator for SolverGateway {
    fn evaluate(&mut self, params: [f64; 2]) -> Result<WindowStats, ExperimentError> {
        let runtime = self.runtime_dir();
        if runtime.exists() {
            fs::remove_dir_all(runtime)?;
        }
        copy_dir(Path::new(&self.cfg.template_dir), runtime)?;

        self.export_geometry(params)?;
        self.run_solver()?;

        stats::window_average(&self.forces_file(), self.window.start, self.window.end)
    }

    fn archive(&self, params: [f64; 2]) -> Result<(), ExperimentError> {
        fs::create_dir_all(&self.cfg.raw_dir)?;
        let dst = Path::new(&self.cfg.raw_dir)
            .join(format!("{:.6},{:.6}.dat", params[0], params[1]));
        fs::copy(self.forces_file(), dst)?;
        Ok(())
    }
}

fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &to)?;
        } else {
            fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}

/// Paraboloid stand-in for the solver pipeline. Returns exactly the
/// configured minimum at the configured optimum, growing quadratically with
/// squared distance away from it; deterministic, no filesystem or process
/// involvement.
pub struct FakeEvaluator {
    cfg: config::Fake,
}

impl FakeEvaluator {
    pub fn new(cfg: config::Fake) -> Self {
        Self { cfg }
    }
}

impl Evaluator for FakeEvaluator {
    fn evaluate(&mut self, params: [f64; 2]) -> Result<WindowStats, ExperimentError> {
        let dx = params[0] - self.cfg.optimum[0];
        let dy = params[1] - self.cfg.optimum[1];
        let d2 = dx * dx + dy * dy;
        let mut mean = [0.0; 3];
        for i in 0..3 {
            mean[i] = self.cfg.minimum[i] + self.cfg.curvature[i] * d2;
        }
        Ok(WindowStats {
            mean,
            stdev: [0.0; 3],
            samples: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_returns_exact_minimum_at_optimum() {
        let cfg = config::Fake::default();
        let mut fake = FakeEvaluator::new(cfg.clone());
        let obs = fake.evaluate(cfg.optimum).unwrap();
        assert_eq!(obs.mean, cfg.minimum);
        assert_eq!(obs.stdev, [0.0; 3]);
    }

    #[test]
    fn fake_grows_away_from_optimum() {
        let cfg = config::Fake::default();
        let mut fake = FakeEvaluator::new(cfg.clone());
        let near = fake.evaluate([0.5, -0.2]).unwrap();
        let far = fake.evaluate([0.9, 0.6]).unwrap();
        assert!(near.mean[0] < far.mean[0]);
        assert!(near.mean[2] < far.mean[2]);
        assert!(near.mean[0] > cfg.minimum[0]);
    }

    #[test]
    fn gateway_runs_script_and_averages_window() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template");
        fs::create_dir_all(&template).unwrap();
        fs::write(
            template.join("run.sh"),
            "mkdir -p postProcessing/forces/0\n\
             cat > postProcessing/forces/0/forces.dat <<EOF\n\
             # Time (drag sideforce lift)\n\
             449 (99.0 9.0 9.0)\n\
             450 (10.0 1.0 -20.0)\n\
             451 (12.0 1.0 -22.0)\n\
             EOF\n\
             echo solver done\n",
        )
        .unwrap();

        let cfg = config::Evaluation {
            template_dir: template.display().to_string(),
            runtime_dir: dir.path().join("runtime").display().to_string(),
            run_script: "run.sh".to_string(),
            forces_path: "postProcessing/forces/0/forces.dat".to_string(),
            solver_log: dir.path().join("solver_log.txt").display().to_string(),
            raw_dir: dir.path().join("raw").display().to_string(),
            geometry_cmd: None,
            model_path: "model.obj".to_string(),
        };
        let mut gw = SolverGateway::new(cfg, config::Window { start: 450, end: 500 });

        let obs = gw.evaluate([0.25, -0.5]).unwrap();
        assert_eq!(obs.samples, 2);
        assert!((obs.mean[0] - 11.0).abs() < 1e-12);
        assert!((obs.mean[2] + 21.0).abs() < 1e-12);

        gw.archive([0.25, -0.5]).unwrap();
        assert!(dir.path().join("raw/0.250000,-0.500000.dat").exists());

        let log = fs::read_to_string(dir.path().join("solver_log.txt")).unwrap();
        assert!(log.contains("solver done"));
    }

    #[test]
    fn gateway_without_forces_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template");
        fs::create_dir_all(&template).unwrap();
        fs::write(template.join("run.sh"), "true\n").unwrap();

        let cfg = config::Evaluation {
            template_dir: template.display().to_string(),
            runtime_dir: dir.path().join("runtime").display().to_string(),
            solver_log: dir.path().join("solver_log.txt").display().to_string(),
            raw_dir: dir.path().join("raw").display().to_string(),
            ..config::Evaluation::default()
        };
        let mut gw = SolverGateway::new(cfg, config::Window::default());
        let err = gw.evaluate([0.0, 0.0]).unwrap_err();
        assert!(matches!(err, ExperimentError::TransientEvaluation(_)));
    }
}
