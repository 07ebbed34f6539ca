use crate::error::ExperimentError;
use std::fs;
use std::path::Path;

/// Mean and population standard deviation of the (drag, sideforce, lift)
/// force components over an inclusive time-step window.
#[derive(Debug, Clone, Copy)]
pub struct WindowStats {
    pub mean: [f64; 3],
    pub stdev: [f64; 3],
    pub samples: usize,
}

impl WindowStats {
    /// The two scoring coordinates (drag, lift).
    pub fn objectives(&self) -> [f64; 2] {
        [self.mean[0], self.mean[2]]
    }
}

/// Average the force history at `path` over time steps in `[start, end]`.
///
/// The file is line-oriented: `#` lines are comments; data lines carry a
/// time-step index followed by the three force components, with optional
/// parentheses grouping. An absent file or an empty window is fatal for the
/// evaluation — there is no usable solver output to score.
pub fn window_average(path: &Path, start: u64, end: u64) -> Result<WindowStats, ExperimentError> {
    let text = fs::read_to_string(path).map_err(|e| {
        ExperimentError::TransientEvaluation(format!("cannot read {}: {}", path.display(), e))
    })?;

    let mut data: [Vec<f64>; 3] = [Vec::new(), Vec::new(), Vec::new()];

    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
            .filter(|s| !s.is_empty())
            .collect();
        if fields.len() < 4 {
            return Err(ExperimentError::TransientEvaluation(format!(
                "{}:{}: expected a time step and three force components",
                path.display(),
                lineno + 1
            )));
        }
        let step: u64 = fields[0].parse().map_err(|_| {
            ExperimentError::TransientEvaluation(format!(
                "{}:{}: unparseable time step {:?}",
                path.display(),
                lineno + 1,
                fields[0]
            ))
        })?;
        if step < start || step > end {
            continue;
        }
        for (i, slot) in data.iter_mut().enumerate() {
            let v: f64 = fields[i + 1].parse().map_err(|_| {
                ExperimentError::TransientEvaluation(format!(
                    "{}:{}: unparseable force component {:?}",
                    path.display(),
                    lineno + 1,
                    fields[i + 1]
                ))
            })?;
            slot.push(v);
        }
    }

    let n = data[0].len();
    if n == 0 {
        return Err(ExperimentError::TransientEvaluation(format!(
            "{}: no samples in window [{}, {}]",
            path.display(),
            start,
            end
        )));
    }

    let mut mean = [0.0; 3];
    let mut stdev = [0.0; 3];
    for i in 0..3 {
        mean[i] = data[i].iter().sum::<f64>() / n as f64;
        let var = data[i].iter().map(|v| (v - mean[i]).powi(2)).sum::<f64>() / n as f64;
        stdev[i] = var.sqrt();
    }

    Ok(WindowStats {
        mean,
        stdev,
        samples: n,
    })
}
