use crate::error::ExperimentError;
use anyhow::Result;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Semantics of the trailing record field, fixed per experiment variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingField {
    /// Scalarized target error (annealing variant).
    Error,
    /// Elapsed seconds since experiment start (surrogate variant).
    Time,
}

impl TrailingField {
    fn label(self) -> &'static str {
        match self {
            TrailingField::Error => "Error",
            TrailingField::Time => "Time",
        }
    }
}

/// One completed evaluation. Indices are dense and gapless from the resume
/// point; a record is immutable once appended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationRecord {
    pub iter: usize,
    pub params: [f64; 2],
    /// Measured (drag, sideforce, lift).
    pub mean: [f64; 3],
    /// Per-component standard deviations; recorded, never selected on.
    pub stdev: [f64; 3],
    /// Error or Time, per [`TrailingField`].
    pub trailing: f64,
}

impl IterationRecord {
    /// The two scoring coordinates (drag, lift).
    pub fn objectives(&self) -> [f64; 2] {
        [self.mean[0], self.mean[2]]
    }
}

/// State reconstructed by replaying the log.
#[derive(Debug, Clone, Default)]
pub struct ResumeState {
    pub records: Vec<IterationRecord>,
    pub start_iter: usize,
    /// Last recorded elapsed seconds (zero unless the trailing field carries
    /// time); added to the new process clock so elapsed values stay
    /// continuous across restarts.
    pub prior_elapsed: f64,
    /// True when a damaged row forced a restart from iteration 0.
    pub reset: bool,
}

/// Append-only typed record store over a line-oriented log file.
///
/// `append` writes and flushes one complete line per record, so a crash
/// leaves either a whole record or nothing. All other state is derived by
/// replaying the file.
pub struct RecordStore {
    path: PathBuf,
    trailing: TrailingField,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>, trailing: TrailingField) -> Self {
        Self {
            path: path.into(),
            trailing,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate the log and write a fresh header, plus the reserved target
    /// row when `target` is given (annealing variant).
    pub fn initialize(&self, target: Option<[f64; 2]>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut f = File::create(&self.path)?;
        writeln!(
            f,
            "Iteration,Param1,Param2,Drag,Sideforce,Lift,StdevDrag,StdevSideforce,StdevLift,{}",
            self.trailing.label()
        )?;
        if let Some(t) = target {
            writeln!(f, "Target,{:.6},{:.6},,,,,,,", t[0], t[1])?;
        }
        f.flush()?;
        Ok(())
    }

    /// Replay the log. A missing file is an empty state at iteration 0.
    /// Header and label rows (any row whose `Iteration` field is not an
    /// integer, including the reserved target row) are skipped. A data row
    /// that fails to parse is corruption: the state restarts from iteration
    /// 0 with a warning and none of the partially parsed values survive.
    pub fn load_all(&self) -> ResumeState {
        match Self::read(&self.path) {
            Ok(mut state) => {
                state.prior_elapsed = match self.trailing {
                    TrailingField::Time => state.records.last().map_or(0.0, |r| r.trailing),
                    TrailingField::Error => 0.0,
                };
                state
            }
            Err(e) => {
                eprintln!("[slipstream] WARNING: {e}");
                eprintln!("[slipstream] WARNING: restarting from iteration 0");
                ResumeState {
                    reset: true,
                    ..ResumeState::default()
                }
            }
        }
    }

    fn read(path: &Path) -> Result<ResumeState, ExperimentError> {
        if !path.exists() {
            return Ok(ResumeState::default());
        }
        let text = std::fs::read_to_string(path)?;
        let mut records = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            // Non-integer first field: header, label, or target marker row.
            if fields[0].trim().parse::<usize>().is_err() {
                continue;
            }
            let record = Self::parse_record(&fields).map_err(|detail| {
                ExperimentError::ResumeCorruption {
                    path: path.display().to_string(),
                    line: lineno + 1,
                    detail,
                }
            })?;
            records.push(record);
        }
        let start_iter = records.len();
        Ok(ResumeState {
            records,
            start_iter,
            prior_elapsed: 0.0,
            reset: false,
        })
    }

    fn parse_record(fields: &[&str]) -> Result<IterationRecord, String> {
        if fields.len() < 9 {
            return Err(format!("expected at least 9 fields, found {}", fields.len()));
        }
        let iter: usize = fields[0].trim().parse().map_err(|_| "bad index".to_string())?;
        let mut values = [0.0f64; 9];
        for (i, slot) in values.iter_mut().enumerate().take(8) {
            *slot = fields[i + 1]
                .trim()
                .parse()
                .map_err(|_| format!("unparseable field {:?}", fields[i + 1]))?;
        }
        values[8] = match fields.get(9) {
            Some(s) => s
                .trim()
                .parse()
                .map_err(|_| format!("unparseable trailing field {:?}", s))?,
            None => 0.0,
        };
        Ok(IterationRecord {
            iter,
            params: [values[0], values[1]],
            mean: [values[2], values[3], values[4]],
            stdev: [values[5], values[6], values[7]],
            trailing: values[8],
        })
    }

    /// Sole mutator. The record is formatted in full, then written and
    /// flushed as one line.
    pub fn append(&self, record: &IterationRecord) -> Result<()> {
        let line = format!(
            "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}\n",
            record.iter,
            record.params[0],
            record.params[1],
            record.mean[0],
            record.mean[1],
            record.mean[2],
            record.stdev[0],
            record.stdev[1],
            record.stdev[2],
            record.trailing,
        );
        let mut f = OpenOptions::new().append(true).create(true).open(&self.path)?;
        f.write_all(line.as_bytes())?;
        f.flush()?;
        Ok(())
    }

    /// Replay records from an arbitrary log file regardless of its trailing
    /// field semantics (used by the front extractor).
    pub fn read_records(path: &Path) -> Result<Vec<IterationRecord>, ExperimentError> {
        Ok(Self::read(path)?.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_at(dir: &tempfile::TempDir, trailing: TrailingField) -> RecordStore {
        RecordStore::new(dir.path().join("log.csv"), trailing)
    }

    fn record(iter: usize, trailing: f64) -> IterationRecord {
        IterationRecord {
            iter,
            params: [0.1 * iter as f64, -0.2],
            mean: [400.0 + iter as f64, 1.0, -340.0],
            stdev: [0.5, 0.5, 0.5],
            trailing,
        }
    }

    #[test]
    fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = store_at(&dir, TrailingField::Error).load_all();
        assert_eq!(state.start_iter, 0);
        assert!(state.records.is_empty());
        assert!(!state.reset);
    }

    #[test]
    fn roundtrip_resume() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir, TrailingField::Error);
        store.initialize(Some([420.0, -350.0])).unwrap();
        store.append(&record(0, 12.5)).unwrap();
        store.append(&record(1, 3.25)).unwrap();

        let state = store.load_all();
        assert_eq!(state.start_iter, 2);
        assert_eq!(state.records.len(), 2);
        assert_eq!(state.records[1].iter, 1);
        assert!((state.records[1].trailing - 3.25).abs() < 1e-9);
    }

    #[test]
    fn target_row_skipped_without_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        std::fs::write(
            &path,
            "Iteration,Param1,Param2,Drag,Sideforce,Lift,StdevDrag,StdevSideforce,StdevLift,Error\n\
             Target,420.000000,-350.000000,,,,,,,\n\
             0,0.100000,-0.200000,410.000000,1.000000,-340.000000,0.5,0.5,0.5,200.0\n\
             1,0.300000,-0.250000,415.000000,1.000000,-345.000000,0.5,0.5,0.5,50.0\n",
        )
        .unwrap();
        let state = RecordStore::new(&path, TrailingField::Error).load_all();
        assert_eq!(state.start_iter, 2);
        assert_eq!(state.records[1].params, [0.3, -0.25]);
        assert!(!state.reset);
    }

    #[test]
    fn corrupt_trailing_row_resets_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir, TrailingField::Error);
        store.initialize(None).unwrap();
        store.append(&record(0, 1.0)).unwrap();
        // simulate a crash mid-write
        let mut f = OpenOptions::new()
            .append(true)
            .open(store.path())
            .unwrap();
        write!(f, "1,0.5,0.5,4").unwrap();
        drop(f);

        let state = store.load_all();
        assert!(state.reset);
        assert_eq!(state.start_iter, 0);
        assert!(state.records.is_empty());
    }

    #[test]
    fn prior_elapsed_from_time_trailing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir, TrailingField::Time);
        store.initialize(None).unwrap();
        store.append(&record(0, 10.0)).unwrap();
        store.append(&record(1, 25.0)).unwrap();
        let state = store.load_all();
        assert!((state.prior_elapsed - 25.0).abs() < 1e-9);
    }

    #[test]
    fn error_trailing_has_no_prior_elapsed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir, TrailingField::Error);
        store.initialize(None).unwrap();
        store.append(&record(0, 99.0)).unwrap();
        let state = store.load_all();
        assert_eq!(state.prior_elapsed, 0.0);
    }
}
