//! Reference (ground-truth) trajectory store.
//!
//! The reference trajectory is a CSV file with at least the columns `timestamp`, `x`, `y`
//! and `z`. Timestamps are seconds relative to the start of the recorded log, which is the
//! same clock the log rewriter uses when it aligns LiDAR scans to the trajectory. Extra
//! columns (orientation, covariance, ...) are ignored.
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, SpoofError};

/// Columns that must be present in a reference trajectory file.
pub const REQUIRED_COLUMNS: [&str; 4] = ["timestamp", "x", "y", "z"];

/// A single ground-truth position sample.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySample {
    /// Seconds since the start of the log
    pub timestamp: f64,
    /// World x position in meters
    pub x: f64,
    /// World y position in meters
    pub y: f64,
    /// World z position in meters
    pub z: f64,
}

/// Timestamp-ordered collection of [`TrajectorySample`]s.
///
/// The store is immutable after loading and always holds at least one sample.
#[derive(Clone, Debug)]
pub struct ReferenceTrajectory {
    samples: Vec<TrajectorySample>,
}

impl ReferenceTrajectory {
    /// Build a store from samples, sorting them by timestamp.
    ///
    /// The sort is stable so samples sharing a timestamp keep their file order, which is
    /// what makes [`ReferenceTrajectory::nearest`] prefer the first occurrence.
    pub fn from_samples(mut samples: Vec<TrajectorySample>) -> Result<Self> {
        if samples.is_empty() {
            return Err(SpoofError::Data {
                path: "<memory>".into(),
                reason: "reference trajectory has no samples".into(),
            });
        }
        samples.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Ok(ReferenceTrajectory { samples })
    }

    /// Reads a reference trajectory from a CSV file.
    ///
    /// # Errors
    /// * `SpoofError::Io` if the file cannot be opened.
    /// * `SpoofError::Data` if one of [`REQUIRED_COLUMNS`] is missing, a row cannot be
    ///   parsed, or the file holds no rows.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data_error = |reason: String| SpoofError::Data {
            path: path.to_path_buf(),
            reason,
        };
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| match e.into_kind() {
                csv::ErrorKind::Io(io) => SpoofError::io(path, io),
                other => data_error(format!("{other:?}")),
            })?;

        let headers = rdr
            .headers()
            .map_err(|e| data_error(format!("cannot read header row: {e}")))?
            .clone();
        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|col| !headers.iter().any(|h| h == *col))
            .collect();
        if !missing.is_empty() {
            return Err(data_error(format!(
                "missing required column(s): {}",
                missing.join(", ")
            )));
        }

        let mut samples = Vec::new();
        for (row, result) in rdr.deserialize().enumerate() {
            let sample: TrajectorySample =
                result.map_err(|e| data_error(format!("row {}: {e}", row + 1)))?;
            samples.push(sample);
        }
        if samples.is_empty() {
            return Err(data_error("reference trajectory has no samples".into()));
        }
        log::debug!(
            "Loaded {} reference samples from {}",
            samples.len(),
            path.display()
        );
        samples.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Ok(ReferenceTrajectory { samples })
    }

    /// Number of samples in the store.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always `false`; construction rejects empty trajectories.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// All samples in timestamp order.
    pub fn samples(&self) -> &[TrajectorySample] {
        &self.samples
    }

    /// Sample whose timestamp is closest to `t`.
    ///
    /// Ties are broken in favour of the earlier sample.
    pub fn nearest_sample(&self, t: f64) -> &TrajectorySample {
        // first index with timestamp >= t
        let idx = self.samples.partition_point(|s| s.timestamp < t);
        if idx == 0 {
            return &self.samples[0];
        }
        if idx == self.samples.len() {
            return &self.samples[idx - 1];
        }
        let before = &self.samples[idx - 1];
        let after = &self.samples[idx];
        if (after.timestamp - t).abs() < (t - before.timestamp).abs() {
            after
        } else {
            // walk back to the first sample sharing this timestamp
            let first = self.samples[..idx]
                .partition_point(|s| s.timestamp < before.timestamp);
            &self.samples[first]
        }
    }

    /// Horizontal position `(x, y)` of the sample closest to `t`.
    pub fn nearest(&self, t: f64) -> (f64, f64) {
        let s = self.nearest_sample(t);
        (s.x, s.y)
    }

    /// Uniformly drawn sample position `(x, y, z)`.
    pub fn random_sample<R: Rng>(&self, rng: &mut R) -> (f64, f64, f64) {
        let s = &self.samples[rng.random_range(0..self.samples.len())];
        (s.x, s.y, s.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut file = std::fs::File::create(&path).expect("Failed to create temp csv");
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn two_point_store() -> ReferenceTrajectory {
        ReferenceTrajectory::from_samples(vec![
            TrajectorySample { timestamp: 0.0, x: 0.0, y: 0.0, z: 0.0 },
            TrajectorySample { timestamp: 10.0, x: 10.0, y: 0.0, z: 0.0 },
        ])
        .unwrap()
    }

    #[test]
    fn nearest_picks_closest_timestamp() {
        let store = two_point_store();
        assert_eq!(store.nearest(4.9), (0.0, 0.0));
        assert_eq!(store.nearest(5.1), (10.0, 0.0));
        assert_eq!(store.nearest(-3.0), (0.0, 0.0));
        assert_eq!(store.nearest(42.0), (10.0, 0.0));
    }

    #[test]
    fn nearest_tie_goes_to_first() {
        let store = two_point_store();
        assert_eq!(store.nearest(5.0), (0.0, 0.0));

        let dup = ReferenceTrajectory::from_samples(vec![
            TrajectorySample { timestamp: 1.0, x: 1.0, y: 1.0, z: 0.0 },
            TrajectorySample { timestamp: 1.0, x: 2.0, y: 2.0, z: 0.0 },
            TrajectorySample { timestamp: 3.0, x: 3.0, y: 3.0, z: 0.0 },
        ])
        .unwrap();
        assert_eq!(dup.nearest(1.2), (1.0, 1.0));
        assert_eq!(dup.nearest(2.0), (1.0, 1.0));
    }

    #[test]
    fn samples_are_sorted_on_load() {
        let store = ReferenceTrajectory::from_samples(vec![
            TrajectorySample { timestamp: 2.0, x: 2.0, y: 0.0, z: 0.0 },
            TrajectorySample { timestamp: 0.0, x: 0.0, y: 0.0, z: 0.0 },
        ])
        .unwrap();
        assert_eq!(store.samples()[0].timestamp, 0.0);
        assert_eq!(store.nearest(0.4), (0.0, 0.0));
    }

    #[test]
    fn random_sample_comes_from_store() {
        let store = two_point_store();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let (x, y, z) = store.random_sample(&mut rng);
            assert!(x == 0.0 || x == 10.0);
            assert_eq!(y, 0.0);
            assert_eq!(z, 0.0);
        }
    }

    #[test]
    fn from_csv_reads_columns() {
        let path = write_temp(
            "slamspoof_ref_ok.csv",
            "timestamp,x,y,z,qw\n0.0,1.0,2.0,3.0,1.0\n0.5,1.5,2.5,3.5,1.0\n",
        );
        let store = ReferenceTrajectory::from_csv(&path).expect("Failed to read reference");
        assert_eq!(store.len(), 2);
        assert_eq!(store.nearest(0.4), (1.5, 2.5));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn from_csv_missing_column_is_data_error() {
        let path = write_temp("slamspoof_ref_missing.csv", "timestamp,x,y\n0.0,1.0,2.0\n");
        let err = ReferenceTrajectory::from_csv(&path).unwrap_err();
        assert!(matches!(err, SpoofError::Data { .. }));
        assert!(err.to_string().contains('z'));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn from_csv_empty_is_data_error() {
        let path = write_temp("slamspoof_ref_empty.csv", "timestamp,x,y,z\n");
        let err = ReferenceTrajectory::from_csv(&path).unwrap_err();
        assert!(matches!(err, SpoofError::Data { .. }));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn from_csv_missing_file_is_io_error() {
        let err = ReferenceTrajectory::from_csv("nonexistent_reference.csv").unwrap_err();
        assert!(matches!(err, SpoofError::Io { .. }));
    }
}
