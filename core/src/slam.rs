//! External SLAM invocation.
//!
//! SLAM runs as an opaque, blocking external process. The harness only needs "replay this log
//! through algorithm X and leave a trajectory in directory Y", which is what [`SlamRunner`]
//! expresses. [`RosLaunchRunner`] implements it by calling `roslaunch` with the launch file
//! that belongs to the requested algorithm.
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use crate::error::{Result, SpoofError};

/// SLAM pipelines the launch package knows how to start.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SlamAlgorithm {
    /// KISS-ICP, LiDAR only.
    #[default]
    KissIcp,
    /// FAST-LIO, LiDAR-inertial; needs the IMU topic in the replayed log.
    FastLio,
}

impl SlamAlgorithm {
    pub const ALL: [SlamAlgorithm; 2] = [SlamAlgorithm::KissIcp, SlamAlgorithm::FastLio];

    /// Launch file started for this algorithm.
    pub fn launch_file(&self) -> &'static str {
        match self {
            SlamAlgorithm::KissIcp => "slam_test_kiss.launch",
            SlamAlgorithm::FastLio => "slam_test_flio.launch",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SlamAlgorithm::KissIcp => "kiss_icp",
            SlamAlgorithm::FastLio => "fast_lio",
        }
    }
}

impl Display for SlamAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SlamAlgorithm {
    type Err = SpoofError;

    fn from_str(s: &str) -> Result<Self> {
        SlamAlgorithm::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| SpoofError::Config(format!("unknown SLAM algorithm '{s}'")))
    }
}

/// One SLAM replay.
#[derive(Clone, Debug, PartialEq)]
pub struct SlamRequest {
    pub algorithm: SlamAlgorithm,
    /// Log to replay.
    pub bag_path: PathBuf,
    /// LiDAR topic the pipeline subscribes to.
    pub topic: String,
    /// Directory the pipeline writes its trajectory into.
    pub output_dir: PathBuf,
    /// Playback speed multiplier passed to `rosbag play`.
    pub replay_rate: f64,
    pub visualize: bool,
}

/// Blocking SLAM execution.
pub trait SlamRunner {
    /// Replay `request.bag_path` and return once the pipeline has exited.
    fn run(&mut self, request: &SlamRequest) -> Result<()>;
}

/// Runs SLAM through `roslaunch <package> <launch file> key:=value ...`.
#[derive(Clone, Debug)]
pub struct RosLaunchRunner {
    program: String,
    package: String,
}

impl RosLaunchRunner {
    pub fn new(package: &str) -> Self {
        RosLaunchRunner {
            program: "roslaunch".to_string(),
            package: package.to_string(),
        }
    }

    /// Use a different executable in place of `roslaunch`.
    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    /// Command-line arguments for `request`.
    pub fn args(&self, request: &SlamRequest) -> Vec<String> {
        vec![
            self.package.clone(),
            request.algorithm.launch_file().to_string(),
            format!("bagfile:={}", request.bag_path.display()),
            format!("topic:={}", request.topic),
            format!("name_traj_dir:={}", request.output_dir.display()),
            format!("rosbag_rate:={}", request.replay_rate),
            format!("visualize:={}", request.visualize),
        ]
    }

    fn command_line(&self, request: &SlamRequest) -> String {
        let mut line = self.program.clone();
        for arg in self.args(request) {
            line.push(' ');
            line.push_str(&arg);
        }
        line
    }
}

impl SlamRunner for RosLaunchRunner {
    fn run(&mut self, request: &SlamRequest) -> Result<()> {
        ensure_dir(&request.output_dir)?;
        let command = self.command_line(request);
        log::info!("Starting SLAM ({}): {}", request.algorithm, command);

        let status = Command::new(&self.program)
            .args(self.args(request))
            .status()
            .map_err(|e| SpoofError::ExternalProcess {
                command: command.clone(),
                reason: e.to_string(),
            })?;
        if !status.success() {
            return Err(SpoofError::ExternalProcess {
                command,
                reason: format!("exited with {status}"),
            });
        }
        log::info!("SLAM ({}) finished", request.algorithm);
        Ok(())
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| SpoofError::io(dir, e))
}
