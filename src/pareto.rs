//! 2-D Pareto front extraction under all-objectives-minimized convention.
//!
//! Lexicographic sort followed by a single sweep. Correct only for two
//! objectives under minimization; deliberately not generalized to N
//! dimensions.

use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::store::RecordStore;

/// Indices (into `points`) of the non-dominated subset.
///
/// Points are ordered by first coordinate ascending, ties broken by second
/// coordinate ascending; the sweep retains a point iff it strictly improves
/// the running best's first or second coordinate, updating the running best
/// on retention. The first sorted point is always retained. Ties on the
/// first coordinate are resolved purely by sort order, not deduplicated.
pub fn pareto_indices(points: &[[f64; 2]]) -> Vec<usize> {
    if points.is_empty() {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by(|&a, &b| {
        points[a][0]
            .partial_cmp(&points[b][0])
            .unwrap_or(Ordering::Equal)
            .then(
                points[a][1]
                    .partial_cmp(&points[b][1])
                    .unwrap_or(Ordering::Equal),
            )
    });

    let mut front = vec![order[0]];
    let mut best = points[order[0]];
    for &i in &order[1..] {
        let p = points[i];
        if p[0] < best[0] || p[1] < best[1] {
            front.push(i);
            best = p;
        }
    }
    front
}

/// The non-dominated points themselves, in sweep order.
pub fn pareto_front(points: &[[f64; 2]]) -> Vec<[f64; 2]> {
    pareto_indices(points).into_iter().map(|i| points[i]).collect()
}

/// Extract the (drag, lift) Pareto front of a recorded experiment log and
/// write it as `Param1,Param2,Drag,Lift` CSV. Label and target rows in the
/// input are skipped by the record loader.
pub fn export_front(input: &Path, output: &Path) -> Result<usize> {
    let records = RecordStore::read_records(input)
        .with_context(|| format!("failed to replay {}", input.display()))?;
    anyhow::ensure!(!records.is_empty(), "{} holds no records", input.display());

    let objectives: Vec<[f64; 2]> = records.iter().map(|r| r.objectives()).collect();
    let front = pareto_indices(&objectives);

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut f = File::create(output)
        .with_context(|| format!("cannot create {}", output.display()))?;
    writeln!(f, "Param1,Param2,Drag,Lift")?;
    for &i in &front {
        let r = &records[i];
        writeln!(
            f,
            "{:.6},{:.6},{:.6},{:.6}",
            r.params[0], r.params[1], r.mean[0], r.mean[2]
        )?;
    }
    f.flush()?;
    Ok(front.len())
}
