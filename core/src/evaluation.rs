//! Trajectory error metrics.
//!
//! SLAM pipelines write their trajectory estimates in the TUM format: one pose per line,
//! `timestamp tx ty tz qx qy qz qw`, `#` starting a comment. [`TumEvaluator`] compares an
//! estimate against a reference trajectory (the benign baseline run) and reports
//!
//! - APE: RMSE of the translational difference between associated poses, after an optional
//!   rigid (Umeyama, no scale) alignment of the estimate onto the reference.
//! - RPE: RMSE of the translational part of the error between consecutive relative motions.
//!   It is independent of any rigid alignment.
use nalgebra::{Isometry3, Matrix3, Quaternion, Rotation3, Translation3, UnitQuaternion, Vector3};
use std::fmt::Write as _;
use std::path::Path;

use crate::error::{Result, SpoofError};

/// One pose of a TUM trajectory file.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TumPose {
    pub timestamp: f64,
    pub pose: Isometry3<f64>,
}

impl TumPose {
    pub fn new(timestamp: f64, translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        TumPose {
            timestamp,
            pose: Isometry3::from_parts(Translation3::from(translation), rotation),
        }
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.pose.translation.vector
    }
}

/// Read a TUM trajectory file.
pub fn read_tum<P: AsRef<Path>>(path: P) -> Result<Vec<TumPose>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| SpoofError::io(path, e))?;
    let mut poses = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let values: Vec<f64> = line
            .split_whitespace()
            .map(|v| v.parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| {
                SpoofError::Evaluation(format!("{}:{}: {e}", path.display(), lineno + 1))
            })?;
        if values.len() != 8 {
            return Err(SpoofError::Evaluation(format!(
                "{}:{}: expected 8 values, found {}",
                path.display(),
                lineno + 1,
                values.len()
            )));
        }
        // TUM stores the quaternion as qx qy qz qw
        let q = Quaternion::new(values[7], values[4], values[5], values[6]);
        poses.push(TumPose::new(
            values[0],
            Vector3::new(values[1], values[2], values[3]),
            UnitQuaternion::from_quaternion(q),
        ));
    }
    Ok(poses)
}

/// Write poses in TUM format.
pub fn write_tum<P: AsRef<Path>>(path: P, poses: &[TumPose]) -> Result<()> {
    let path = path.as_ref();
    let mut out = String::from("# timestamp tx ty tz qx qy qz qw\n");
    for p in poses {
        let t = p.translation();
        let q = p.pose.rotation;
        // writing to a String cannot fail
        let _ = writeln!(
            out,
            "{:.9} {} {} {} {} {} {} {}",
            p.timestamp, t.x, t.y, t.z, q.i, q.j, q.k, q.w
        );
    }
    std::fs::write(path, out).map_err(|e| SpoofError::io(path, e))
}

/// Error metrics between a reference and an estimated trajectory file.
pub trait TrajectoryEvaluator {
    /// Absolute pose error (meters, RMSE).
    fn absolute_pose_error(&self, reference: &Path, estimate: &Path) -> Result<f64>;
    /// Relative pose error between consecutive poses (meters, RMSE).
    fn relative_pose_error(&self, reference: &Path, estimate: &Path) -> Result<f64>;
}

/// Evaluator for TUM trajectory files.
#[derive(Clone, Debug)]
pub struct TumEvaluator {
    /// Largest timestamp difference (seconds) for two poses to be associated.
    pub max_time_diff: f64,
    /// Align the estimate onto the reference before computing APE.
    pub align: bool,
}

impl Default for TumEvaluator {
    fn default() -> Self {
        TumEvaluator {
            max_time_diff: 0.01,
            align: true,
        }
    }
}

impl TumEvaluator {
    pub fn new(align: bool) -> Self {
        TumEvaluator {
            align,
            ..Default::default()
        }
    }

    /// Pair every estimate pose with the closest reference pose in time.
    ///
    /// Pairs farther apart than `max_time_diff` are dropped, and a reference pose is used at
    /// most once.
    pub fn associate(
        &self,
        reference: &[TumPose],
        estimate: &[TumPose],
    ) -> Vec<(TumPose, TumPose)> {
        let mut reference = reference.to_vec();
        reference.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        let mut pairs = Vec::new();
        let mut last_used: Option<usize> = None;
        for est in estimate {
            let idx = reference.partition_point(|r| r.timestamp < est.timestamp);
            let candidates = [idx.checked_sub(1), Some(idx)];
            let best = candidates
                .iter()
                .flatten()
                .filter(|&&i| i < reference.len())
                .min_by(|&&a, &&b| {
                    let da = (reference[a].timestamp - est.timestamp).abs();
                    let db = (reference[b].timestamp - est.timestamp).abs();
                    da.total_cmp(&db)
                })
                .copied();
            if let Some(i) = best {
                if (reference[i].timestamp - est.timestamp).abs() <= self.max_time_diff
                    && last_used != Some(i)
                {
                    pairs.push((reference[i], *est));
                    last_used = Some(i);
                }
            }
        }
        pairs
    }

    fn load_pairs(&self, reference: &Path, estimate: &Path) -> Result<Vec<(TumPose, TumPose)>> {
        let pairs = self.associate(&read_tum(reference)?, &read_tum(estimate)?);
        if pairs.is_empty() {
            return Err(SpoofError::Evaluation(format!(
                "no poses of '{}' could be associated with '{}'",
                estimate.display(),
                reference.display()
            )));
        }
        Ok(pairs)
    }

    /// APE over already associated pairs.
    pub fn ape(&self, pairs: &[(TumPose, TumPose)]) -> Result<f64> {
        if pairs.is_empty() {
            return Err(SpoofError::Evaluation("no associated poses".into()));
        }
        let transform = if self.align {
            umeyama(pairs)?
        } else {
            Isometry3::identity()
        };
        let errors: Vec<f64> = pairs
            .iter()
            .map(|(r, e)| (r.translation() - (transform * e.pose).translation.vector).norm())
            .collect();
        Ok(rmse(&errors))
    }

    /// RPE over already associated pairs, one frame apart.
    pub fn rpe(&self, pairs: &[(TumPose, TumPose)]) -> Result<f64> {
        if pairs.len() < 2 {
            return Err(SpoofError::Evaluation(format!(
                "relative pose error needs at least 2 associated poses, got {}",
                pairs.len()
            )));
        }
        let errors: Vec<f64> = pairs
            .windows(2)
            .map(|w| {
                let (r0, e0) = &w[0];
                let (r1, e1) = &w[1];
                let rel_ref = r0.pose.inverse() * r1.pose;
                let rel_est = e0.pose.inverse() * e1.pose;
                (rel_ref.inverse() * rel_est).translation.vector.norm()
            })
            .collect();
        Ok(rmse(&errors))
    }
}

impl TrajectoryEvaluator for TumEvaluator {
    fn absolute_pose_error(&self, reference: &Path, estimate: &Path) -> Result<f64> {
        self.ape(&self.load_pairs(reference, estimate)?)
    }

    fn relative_pose_error(&self, reference: &Path, estimate: &Path) -> Result<f64> {
        self.rpe(&self.load_pairs(reference, estimate)?)
    }
}

fn rmse(errors: &[f64]) -> f64 {
    (errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64).sqrt()
}

/// Rigid transform that best maps estimate positions onto reference positions.
fn umeyama(pairs: &[(TumPose, TumPose)]) -> Result<Isometry3<f64>> {
    let n = pairs.len() as f64;
    let mu_ref = pairs.iter().map(|(r, _)| r.translation()).sum::<Vector3<f64>>() / n;
    let mu_est = pairs.iter().map(|(_, e)| e.translation()).sum::<Vector3<f64>>() / n;
    let mut cov = Matrix3::zeros();
    for (r, e) in pairs {
        cov += (r.translation() - mu_ref) * (e.translation() - mu_est).transpose();
    }
    cov /= n;

    let svd = cov.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(SpoofError::Evaluation("alignment SVD did not converge".into())),
    };
    let mut s = Matrix3::identity();
    if (u * v_t).determinant() < 0.0 {
        s[(2, 2)] = -1.0;
    }
    let rotation = Rotation3::from_matrix_unchecked(u * s * v_t);
    let translation = mu_ref - rotation * mu_est;
    Ok(Isometry3::from_parts(
        Translation3::from(translation),
        UnitQuaternion::from_rotation_matrix(&rotation),
    ))
}
