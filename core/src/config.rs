//! Run configuration.
//!
//! A run is described by one [`SpoofConfig`], loaded once at startup and passed by reference
//! to every stage. It can be stored as JSON, YAML or TOML; the format is chosen from the file
//! extension.
//!
//! ```yaml
//! main:
//!   reference_file: data/reference.csv
//!   n_trials: 100
//!   seed: 42
//! spoofer:
//!   radius_m: 10.0
//!   distance_threshold_m: 20.0
//! rosbag:
//!   input_bag: data/drive.bag
//!   output_bag: out/spoofed.bag
//!   lidar_topic: /velodyne_points
//!   imu_topic: /imu/data
//! spoofing:
//!   range_deg: 30.0
//!   attack:
//!     kind: static_injection
//!     distance_m: 5.0
//!     style: corner
//!     corner_rotation_deg: 15.0
//! slam:
//!   algorithms: [kiss_icp, fast_lio]
//!   save_dir: out/slam
//! evaluation:
//!   ground_truth_dir: out/ground_truth
//!   success_threshold: 0.5
//! ```
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::attack::{AttackModel, SensorModel};
use crate::error::{Result, SpoofError};
use crate::pointcloud::POINT_STEP;
use crate::slam::SlamAlgorithm;

/// Default seed value for reproducible sweeps
fn default_seed() -> u64 {
    42
}
fn default_n_trials() -> usize {
    1
}
fn default_lidar_topic() -> String {
    "/velodyne_points".to_string()
}
fn default_imu_topic() -> String {
    "/imu/data".to_string()
}
fn default_range_deg() -> f64 {
    30.0
}
fn default_algorithms() -> Vec<SlamAlgorithm> {
    vec![SlamAlgorithm::KissIcp]
}
fn default_launch_package() -> String {
    "slamspoof".to_string()
}
fn default_trajectory_file() -> String {
    "trajectory.txt".to_string()
}
fn default_replay_rate() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}
fn default_ground_truth_dir() -> PathBuf {
    PathBuf::from("ground_truth")
}
fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Trial loop settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MainConfig {
    /// Reference (ground-truth) trajectory CSV.
    pub reference_file: PathBuf,
    /// Number of randomized attacker placements.
    #[serde(default = "default_n_trials")]
    pub n_trials: usize,
    /// Base seed; trial `i` uses `seed + i`.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Rewrite all trial logs up front on a thread pool.
    #[serde(default)]
    pub parallel: bool,
}

/// Attacker placement and reach.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpooferConfig {
    /// Distance of the attacker from the sampled trajectory point (meters).
    pub radius_m: f64,
    /// The attack is active while the robot is within this distance (meters, inclusive).
    pub distance_threshold_m: f64,
}

/// Input and output logs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RosbagConfig {
    pub input_bag: PathBuf,
    /// Rewritten log. Parallel runs derive one file per trial from this name.
    pub output_bag: PathBuf,
    #[serde(default = "default_lidar_topic")]
    pub lidar_topic: String,
    #[serde(default = "default_imu_topic")]
    pub imu_topic: String,
    /// Bytes per LiDAR record. Each message's own `point_step` is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_step: Option<usize>,
}

/// Attack parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpoofingConfig {
    /// Angular width of the attacked sector (degrees).
    #[serde(default = "default_range_deg")]
    pub range_deg: f64,
    /// Required: there is no implicit attack mode.
    pub attack: AttackModel,
    #[serde(default)]
    pub sensor: SensorModel,
}

/// SLAM replay settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlamConfig {
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<SlamAlgorithm>,
    /// ROS package holding the launch files.
    #[serde(default = "default_launch_package")]
    pub launch_package: String,
    /// Directory the SLAM pipelines write their trajectories into.
    pub save_dir: PathBuf,
    /// File name of the trajectory a pipeline leaves in its output directory.
    #[serde(default = "default_trajectory_file")]
    pub trajectory_file: String,
    #[serde(default = "default_replay_rate")]
    pub replay_rate: f64,
    #[serde(default)]
    pub visualize: bool,
}

/// Scoring settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Benign baseline trajectories, one per algorithm.
    #[serde(default = "default_ground_truth_dir")]
    pub ground_truth_dir: PathBuf,
    /// Per-algorithm results tables.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// A trial counts as a successful attack when its RPE reaches this value. Required.
    pub success_threshold: f64,
    /// Produce the baseline by replaying the unmodified log before the trials.
    #[serde(default = "default_true")]
    pub run_baseline: bool,
    /// Rigidly align estimates to the baseline before computing errors.
    #[serde(default = "default_true")]
    pub align: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Complete, immutable description of a spoofing run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpoofConfig {
    pub main: MainConfig,
    pub spoofer: SpooferConfig,
    pub rosbag: RosbagConfig,
    pub spoofing: SpoofingConfig,
    pub slam: SlamConfig,
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SpoofConfig {
    /// Template used by the `config` subcommand.
    fn default() -> Self {
        SpoofConfig {
            main: MainConfig {
                reference_file: PathBuf::from("reference.csv"),
                n_trials: 10,
                seed: default_seed(),
                parallel: false,
            },
            spoofer: SpooferConfig {
                radius_m: 10.0,
                distance_threshold_m: 20.0,
            },
            rosbag: RosbagConfig {
                input_bag: PathBuf::from("input.bag"),
                output_bag: PathBuf::from("spoofed.bag"),
                lidar_topic: default_lidar_topic(),
                imu_topic: default_imu_topic(),
                point_step: None,
            },
            spoofing: SpoofingConfig {
                range_deg: default_range_deg(),
                attack: AttackModel::Removal,
                sensor: SensorModel::default(),
            },
            slam: SlamConfig {
                algorithms: default_algorithms(),
                launch_package: default_launch_package(),
                save_dir: PathBuf::from("slam"),
                trajectory_file: default_trajectory_file(),
                replay_rate: default_replay_rate(),
                visualize: false,
            },
            evaluation: EvaluationConfig {
                ground_truth_dir: default_ground_truth_dir(),
                results_dir: default_results_dir(),
                success_threshold: 1.0,
                run_baseline: true,
                align: true,
            },
            logging: LoggingConfig::default(),
        }
    }
}

fn parse_error(path: &Path, e: impl std::fmt::Display) -> SpoofError {
    SpoofError::Config(format!("{}: {e}", path.display()))
}

impl SpoofConfig {
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| SpoofError::io(path, e))?;
        serde_json::to_writer_pretty(file, self).map_err(|e| parse_error(path, e))
    }

    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SpoofError::io(path, e))?;
        serde_json::from_reader(file).map_err(|e| parse_error(path, e))
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let s = serde_yaml::to_string(self).map_err(|e| parse_error(path, e))?;
        write_text(path, &s)
    }

    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SpoofError::io(path, e))?;
        serde_yaml::from_reader(file).map_err(|e| parse_error(path, e))
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let s = toml::to_string(self).map_err(|e| parse_error(path, e))?;
        write_text(path, &s)
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut s = String::new();
        let mut file = File::open(path).map_err(|e| SpoofError::io(path, e))?;
        file.read_to_string(&mut s)
            .map_err(|e| SpoofError::io(path, e))?;
        toml::from_str(&s).map_err(|e| parse_error(path, e))
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(unsupported(p)),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(unsupported(p)),
        }
    }

    /// Load and validate in one step.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(SpoofError::Config(msg));
        if self.main.n_trials == 0 {
            return fail("main.n_trials must be at least 1".into());
        }
        if !self.spoofer.radius_m.is_finite() || self.spoofer.radius_m < 0.0 {
            return fail(format!(
                "spoofer.radius_m must be a non-negative number, got {}",
                self.spoofer.radius_m
            ));
        }
        if !self.spoofer.distance_threshold_m.is_finite()
            || self.spoofer.distance_threshold_m < 0.0
        {
            return fail(format!(
                "spoofer.distance_threshold_m must be a non-negative number, got {}",
                self.spoofer.distance_threshold_m
            ));
        }
        if self.rosbag.lidar_topic.is_empty() {
            return fail("rosbag.lidar_topic must not be empty".into());
        }
        if self.rosbag.input_bag == self.rosbag.output_bag {
            return fail("rosbag.output_bag must differ from rosbag.input_bag".into());
        }
        if let Some(step) = self.rosbag.point_step {
            if step < POINT_STEP {
                return fail(format!(
                    "rosbag.point_step must be at least {POINT_STEP}, got {step}"
                ));
            }
        }
        if !(self.spoofing.range_deg > 0.0 && self.spoofing.range_deg <= 360.0) {
            return fail(format!(
                "spoofing.range_deg must be in (0, 360], got {}",
                self.spoofing.range_deg
            ));
        }
        self.spoofing
            .attack
            .validate()
            .map_err(|e| SpoofError::Config(format!("spoofing.attack: {e}")))?;
        self.spoofing
            .sensor
            .validate()
            .map_err(|e| SpoofError::Config(format!("spoofing.sensor: {e}")))?;
        if self.slam.algorithms.is_empty() {
            return fail("slam.algorithms must name at least one algorithm".into());
        }
        if !self.slam.replay_rate.is_finite() || self.slam.replay_rate <= 0.0 {
            return fail(format!(
                "slam.replay_rate must be positive, got {}",
                self.slam.replay_rate
            ));
        }
        if self.slam.trajectory_file.is_empty() {
            return fail("slam.trajectory_file must not be empty".into());
        }
        if !self.evaluation.success_threshold.is_finite() {
            return fail("evaluation.success_threshold must be finite".into());
        }
        Ok(())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn unsupported(path: &Path) -> SpoofError {
    SpoofError::Config(format!(
        "{}: unsupported file extension (expected .json, .yaml, .yml or .toml)",
        path.display()
    ))
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    let mut file = File::create(path).map_err(|e| SpoofError::io(path, e))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| SpoofError::io(path, e))
}
