//! Monte-Carlo trial harness.
//!
//! A sweep runs `n_trials` independent trials. Trial `i`
//!
//! 1. seeds its own RNG with `seed + i` and places the attacker around a random reference
//!    sample,
//! 2. rewrites the input log for that placement,
//! 3. replays the rewritten log through every configured SLAM algorithm,
//! 4. scores each estimate against the algorithm's benign baseline,
//! 5. moves the raw SLAM output aside so the next trial cannot overwrite it.
//!
//! The baseline is produced first by replaying the log rewritten with [`AttackModel::None`].
//! Errors inside a trial are logged with the trial index, algorithm and path and the sweep
//! moves on; failed trials still count toward `n_trials` when the success rate is computed.
//!
//! With `parallel` enabled the rewrite step of all trials runs on the rayon thread pool first,
//! each trial writing its own log. SLAM and evaluation always run one at a time.
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

use crate::attack::AttackModel;
use crate::config::SpoofConfig;
use crate::error::{Result, SpoofError};
use crate::evaluation::{TrajectoryEvaluator, TumEvaluator};
use crate::rewriter::{LogRewriter, RewriteStats};
use crate::slam::{RosLaunchRunner, SlamAlgorithm, SlamRequest, SlamRunner};
use crate::spoofer::{SpooferPlacement, random_placement};
use crate::trajectory::ReferenceTrajectory;

/// Metrics of one completed trial.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrialResult {
    pub trial: usize,
    pub placement: SpooferPlacement,
    /// Absolute pose error against the baseline (meters).
    pub ape: f64,
    /// Relative pose error against the baseline (meters).
    pub rpe: f64,
}

/// Row of the results table.
#[derive(Debug, Serialize, Deserialize)]
struct ResultRow {
    trial: usize,
    spoofer_x: f64,
    spoofer_y: f64,
    spoofer_z: f64,
    ape: f64,
    rpe: f64,
}

impl From<&TrialResult> for ResultRow {
    fn from(r: &TrialResult) -> Self {
        ResultRow {
            trial: r.trial,
            spoofer_x: r.placement.x,
            spoofer_y: r.placement.y,
            spoofer_z: r.placement.z,
            ape: r.ape,
            rpe: r.rpe,
        }
    }
}

/// Fraction of `n_trials` whose RPE reached `threshold`.
///
/// A trial "succeeds" when the attack pushed the pose error up to the threshold, so a higher
/// rate means a more effective attack.
///
/// # Example
/// ```
/// use slamspoof::harness::{TrialResult, success_rate};
/// use slamspoof::spoofer::SpooferPlacement;
///
/// let placement = SpooferPlacement::new(0.0, 0.0, 0.0);
/// let results: Vec<TrialResult> = (0..4)
///     .map(|trial| TrialResult { trial, placement, ape: 0.0, rpe: trial as f64 })
///     .collect();
/// assert_eq!(success_rate(&results, 4, 2.0), 0.5);
/// ```
pub fn success_rate(results: &[TrialResult], n_trials: usize, threshold: f64) -> f64 {
    if n_trials == 0 {
        return 0.0;
    }
    let successes = results.iter().filter(|r| r.rpe >= threshold).count();
    successes as f64 / n_trials as f64
}

/// Append-only results of one SLAM algorithm.
#[derive(Clone, Debug)]
pub struct TrialLog {
    algorithm: SlamAlgorithm,
    results: Vec<TrialResult>,
    failed: Vec<usize>,
}

impl TrialLog {
    pub fn new(algorithm: SlamAlgorithm) -> Self {
        TrialLog {
            algorithm,
            results: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn algorithm(&self) -> SlamAlgorithm {
        self.algorithm
    }

    pub fn push(&mut self, result: TrialResult) {
        self.results.push(result);
    }

    pub fn push_failure(&mut self, trial: usize) {
        self.failed.push(trial);
    }

    pub fn results(&self) -> &[TrialResult] {
        &self.results
    }

    /// Indices of trials that produced no metrics.
    pub fn failed(&self) -> &[usize] {
        &self.failed
    }

    /// Write the completed trials as CSV.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let csv_error = |e: csv::Error| match e.into_kind() {
            csv::ErrorKind::Io(io) => SpoofError::io(path, io),
            other => SpoofError::Format(format!("{}: {other:?}", path.display())),
        };
        let mut wtr = csv::Writer::from_path(path).map_err(csv_error)?;
        for result in &self.results {
            wtr.serialize(ResultRow::from(result)).map_err(csv_error)?;
        }
        wtr.flush().map_err(|e| SpoofError::io(path, e))
    }

    pub fn summarize(&self, n_trials: usize, threshold: f64) -> AlgorithmSummary {
        let mean = |f: fn(&TrialResult) -> f64| {
            if self.results.is_empty() {
                None
            } else {
                Some(self.results.iter().map(f).sum::<f64>() / self.results.len() as f64)
            }
        };
        AlgorithmSummary {
            algorithm: self.algorithm,
            completed: self.results.len(),
            failed: self.failed.len(),
            successes: self.results.iter().filter(|r| r.rpe >= threshold).count(),
            success_rate: success_rate(&self.results, n_trials, threshold),
            mean_ape: mean(|r| r.ape),
            mean_rpe: mean(|r| r.rpe),
        }
    }
}

/// Aggregate numbers for one algorithm.
#[derive(Clone, Debug, PartialEq)]
pub struct AlgorithmSummary {
    pub algorithm: SlamAlgorithm,
    pub completed: usize,
    pub failed: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub mean_ape: Option<f64>,
    pub mean_rpe: Option<f64>,
}

/// Outcome of a sweep.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub n_trials: usize,
    pub success_threshold: f64,
    pub algorithms: Vec<AlgorithmSummary>,
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Spoofing sweep: {} trials, success when RPE >= {}",
            self.n_trials, self.success_threshold
        )?;
        let fmt_opt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
        for s in &self.algorithms {
            writeln!(
                f,
                "  {:<10} completed {:>4}  failed {:>4}  successes {:>4}  rate {:.3}  mean APE {}  mean RPE {}",
                s.algorithm.name(),
                s.completed,
                s.failed,
                s.successes,
                s.success_rate,
                fmt_opt(s.mean_ape),
                fmt_opt(s.mean_rpe)
            )?;
        }
        Ok(())
    }
}

/// `path` with `suffix` appended to its file stem.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    };
    path.with_file_name(name)
}

/// Rename, falling back to copy + remove across file systems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if !from.exists() {
        return Err(SpoofError::io(
            from,
            std::io::Error::new(std::io::ErrorKind::NotFound, "expected SLAM output is missing"),
        ));
    }
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SpoofError::io(parent, e))?;
    }
    if std::fs::rename(from, to).is_err() {
        std::fs::copy(from, to).map_err(|e| SpoofError::io(to, e))?;
        std::fs::remove_file(from).map_err(|e| SpoofError::io(from, e))?;
    }
    Ok(())
}

/// RNG for trial `trial`; independent of how trials are scheduled.
pub fn trial_rng(seed: u64, trial: usize) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add(trial as u64))
}

/// A trial whose log has been rewritten (or failed to be).
#[derive(Debug)]
struct PreparedTrial {
    trial: usize,
    placement: SpooferPlacement,
    bag: PathBuf,
    /// `bag` belongs to this trial alone and is removed once replayed.
    unique: bool,
    rewrite: Result<RewriteStats>,
}

/// Output log of `trial`. Parallel sweeps need one file per trial.
fn trial_bag(config: &SpoofConfig, trial: usize, unique: bool) -> PathBuf {
    if unique {
        with_suffix(&config.rosbag.output_bag, &format!("_trial_{trial:04}"))
    } else {
        config.rosbag.output_bag.clone()
    }
}

fn prepare_trial(
    config: &SpoofConfig,
    trajectory: &ReferenceTrajectory,
    trial: usize,
    unique: bool,
) -> PreparedTrial {
    let mut rng = trial_rng(config.main.seed, trial);
    let placement = random_placement(trajectory, config.spoofer.radius_m, &mut rng);
    let bag = trial_bag(config, trial, unique);
    let rewrite = LogRewriter::new(config, trajectory, placement).rewrite_to_path(
        &config.rosbag.input_bag,
        &bag,
        &mut rng,
    );
    PreparedTrial {
        trial,
        placement,
        bag,
        unique,
        rewrite,
    }
}

fn discard_trial_bag(trial: usize, bag: &Path) {
    if bag.exists() {
        if let Err(e) = std::fs::remove_file(bag) {
            log::warn!("Trial {trial}: could not remove {}: {e}", bag.display());
        }
    }
}

/// Drives a sweep against a SLAM runner and an evaluator.
pub struct TrialHarness<'a> {
    config: &'a SpoofConfig,
    trajectory: &'a ReferenceTrajectory,
    runner: &'a mut dyn SlamRunner,
    evaluator: &'a dyn TrajectoryEvaluator,
    logs: BTreeMap<SlamAlgorithm, TrialLog>,
}

impl<'a> TrialHarness<'a> {
    pub fn new(
        config: &'a SpoofConfig,
        trajectory: &'a ReferenceTrajectory,
        runner: &'a mut dyn SlamRunner,
        evaluator: &'a dyn TrajectoryEvaluator,
    ) -> Self {
        let logs = config
            .slam
            .algorithms
            .iter()
            .map(|a| (*a, TrialLog::new(*a)))
            .collect();
        TrialHarness {
            config,
            trajectory,
            runner,
            evaluator,
            logs,
        }
    }

    /// Attacker placement of `trial`.
    pub fn placement_for(&self, trial: usize) -> SpooferPlacement {
        let mut rng = trial_rng(self.config.main.seed, trial);
        random_placement(self.trajectory, self.config.spoofer.radius_m, &mut rng)
    }

    pub fn logs(&self) -> &BTreeMap<SlamAlgorithm, TrialLog> {
        &self.logs
    }

    /// Directory algorithm `algorithm` writes its trajectory into.
    pub fn slam_dir(&self, algorithm: SlamAlgorithm) -> PathBuf {
        self.config.slam.save_dir.join(algorithm.name())
    }

    /// Trajectory file the SLAM pipeline leaves behind after a replay.
    pub fn raw_trajectory(&self, algorithm: SlamAlgorithm) -> PathBuf {
        self.slam_dir(algorithm).join(&self.config.slam.trajectory_file)
    }

    /// Where the raw trajectory of `trial` is kept.
    pub fn trial_trajectory(&self, algorithm: SlamAlgorithm, trial: usize) -> PathBuf {
        with_suffix(&self.raw_trajectory(algorithm), &format!("_trial_{trial:04}"))
    }

    /// Benign baseline trajectory of `algorithm`.
    pub fn ground_truth(&self, algorithm: SlamAlgorithm) -> PathBuf {
        let file = self
            .config
            .evaluation
            .ground_truth_dir
            .join(&self.config.slam.trajectory_file);
        with_suffix(&file, &format!("_{}", algorithm.name()))
    }

    pub fn results_path(&self, algorithm: SlamAlgorithm) -> PathBuf {
        self.config
            .evaluation
            .results_dir
            .join(format!("results_{}.csv", algorithm.name()))
    }

    fn request(&self, algorithm: SlamAlgorithm, bag: &Path) -> SlamRequest {
        SlamRequest {
            algorithm,
            bag_path: bag.to_path_buf(),
            topic: self.config.rosbag.lidar_topic.clone(),
            output_dir: self.slam_dir(algorithm),
            replay_rate: self.config.slam.replay_rate,
            visualize: self.config.slam.visualize,
        }
    }

    /// Replay the unmodified log once per algorithm and keep the result as ground truth.
    pub fn run_baseline(&mut self) {
        let bag = with_suffix(&self.config.rosbag.output_bag, "_baseline");
        let first = self.trajectory.samples()[0];
        let rewriter = LogRewriter::new(
            self.config,
            self.trajectory,
            SpooferPlacement::new(first.x, first.y, first.z),
        )
        .with_model(AttackModel::None);
        let mut rng = StdRng::seed_from_u64(self.config.main.seed);
        if let Err(e) = rewriter.rewrite_to_path(&self.config.rosbag.input_bag, &bag, &mut rng) {
            log::error!("Baseline: rewriting {} failed: {e}", bag.display());
            return;
        }
        let algorithms: Vec<SlamAlgorithm> = self.logs.keys().copied().collect();
        for algorithm in algorithms {
            let request = self.request(algorithm, &bag);
            if let Err(e) = self.runner.run(&request) {
                log::error!("Baseline [{algorithm}]: SLAM failed on {}: {e}", bag.display());
                continue;
            }
            let raw = self.raw_trajectory(algorithm);
            let gt = self.ground_truth(algorithm);
            match move_file(&raw, &gt) {
                Ok(()) => log::info!("Baseline [{algorithm}] stored at {}", gt.display()),
                Err(e) => log::error!("Baseline [{algorithm}]: {e}"),
            }
        }
    }

    fn finish_trial(&mut self, prepared: PreparedTrial) {
        let (trial, unique) = (prepared.trial, prepared.unique);
        let bag = prepared.bag.clone();
        self.replay_trial(prepared);
        if unique {
            discard_trial_bag(trial, &bag);
        }
    }

    fn replay_trial(&mut self, prepared: PreparedTrial) {
        let PreparedTrial {
            trial,
            placement,
            bag,
            rewrite,
            ..
        } = prepared;
        let n = self.config.main.n_trials;
        log::info!("Trial {}/{}: attacker at {}", trial + 1, n, placement);

        if let Err(e) = rewrite {
            log::error!("Trial {trial}: rewriting {} failed: {e}", bag.display());
            for trial_log in self.logs.values_mut() {
                trial_log.push_failure(trial);
            }
            return;
        }

        let algorithms: Vec<SlamAlgorithm> = self.logs.keys().copied().collect();
        for algorithm in algorithms {
            match self.evaluate_trial(algorithm, trial, placement, &bag) {
                Ok(result) => {
                    log::info!(
                        "Trial {trial} [{algorithm}]: APE {:.4} RPE {:.4}",
                        result.ape,
                        result.rpe
                    );
                    if let Some(trial_log) = self.logs.get_mut(&algorithm) {
                        trial_log.push(result);
                    }
                }
                Err(e) => {
                    log::error!("Trial {trial} [{algorithm}] on {}: {e}", bag.display());
                    if let Some(trial_log) = self.logs.get_mut(&algorithm) {
                        trial_log.push_failure(trial);
                    }
                }
            }
            let raw = self.raw_trajectory(algorithm);
            if raw.exists() {
                let kept = self.trial_trajectory(algorithm, trial);
                if let Err(e) = move_file(&raw, &kept) {
                    log::warn!("Trial {trial} [{algorithm}]: could not keep SLAM output: {e}");
                }
            }
        }
    }

    fn evaluate_trial(
        &mut self,
        algorithm: SlamAlgorithm,
        trial: usize,
        placement: SpooferPlacement,
        bag: &Path,
    ) -> Result<TrialResult> {
        let request = self.request(algorithm, bag);
        self.runner.run(&request)?;
        let gt = self.ground_truth(algorithm);
        let estimate = self.raw_trajectory(algorithm);
        let ape = self.evaluator.absolute_pose_error(&gt, &estimate)?;
        let rpe = self.evaluator.relative_pose_error(&gt, &estimate)?;
        Ok(TrialResult {
            trial,
            placement,
            ape,
            rpe,
        })
    }

    /// Run every trial. Rewrites run in parallel when configured to.
    ///
    /// Parallel sweeps rewrite one batch of trial logs per thread-pool round, replay the
    /// batch and delete its logs before starting the next, so at most one batch of
    /// rewritten logs exists on disk at a time.
    pub fn run_trials(&mut self) {
        let n = self.config.main.n_trials;
        if self.config.main.parallel {
            let (config, trajectory) = (self.config, self.trajectory);
            let batch = rayon::current_num_threads().max(1);
            log::info!("Rewriting {n} trial logs in parallel, {batch} at a time");
            let mut start = 0;
            while start < n {
                let end = (start + batch).min(n);
                let prepared: Vec<PreparedTrial> = (start..end)
                    .into_par_iter()
                    .map(|trial| prepare_trial(config, trajectory, trial, true))
                    .collect();
                for p in prepared {
                    self.finish_trial(p);
                }
                start = end;
            }
        } else {
            for trial in 0..n {
                let p = prepare_trial(self.config, self.trajectory, trial, false);
                self.finish_trial(p);
            }
        }
    }

    /// Write one results table per algorithm. Failures are logged and skipped.
    pub fn write_results(&self) {
        let dir = &self.config.evaluation.results_dir;
        if let Err(e) = std::fs::create_dir_all(dir) {
            log::error!("Cannot create results directory {}: {e}", dir.display());
            return;
        }
        for (algorithm, trial_log) in &self.logs {
            let path = self.results_path(*algorithm);
            match trial_log.write_csv(&path) {
                Ok(()) => log::info!("Results [{algorithm}] written to {}", path.display()),
                Err(e) => log::error!("Results [{algorithm}]: {e}"),
            }
        }
    }

    pub fn summary(&self) -> RunSummary {
        let n = self.config.main.n_trials;
        let threshold = self.config.evaluation.success_threshold;
        RunSummary {
            n_trials: n,
            success_threshold: threshold,
            algorithms: self
                .logs
                .values()
                .map(|trial_log| trial_log.summarize(n, threshold))
                .collect(),
        }
    }

    /// Baseline (if enabled), all trials, results tables and summary.
    pub fn run(&mut self) -> RunSummary {
        if self.config.evaluation.run_baseline {
            self.run_baseline();
        }
        self.run_trials();
        self.write_results();
        let summary = self.summary();
        for line in summary.to_string().lines() {
            log::info!("{line}");
        }
        summary
    }
}

/// Load the reference trajectory and run a full sweep with `roslaunch` and TUM evaluation.
///
/// # Errors
/// Configuration and reference-data errors, which abort before any trial starts.
pub fn run_sweep(config: &SpoofConfig) -> Result<RunSummary> {
    config.validate()?;
    let trajectory = ReferenceTrajectory::from_csv(&config.main.reference_file)?;
    log::info!(
        "Loaded {} reference samples from {}",
        trajectory.len(),
        config.main.reference_file.display()
    );
    let mut runner = RosLaunchRunner::new(&config.slam.launch_package);
    let evaluator = TumEvaluator::new(config.evaluation.align);
    let mut harness = TrialHarness::new(config, &trajectory, &mut runner, &evaluator);
    Ok(harness.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::{BagWriter, MessageSink, MessageType};
    use crate::evaluation::{TumPose, write_tum};
    use crate::pointcloud::{Point, PointCloud, PointCloud2Message};
    use crate::trajectory::TrajectorySample;
    use nalgebra::{UnitQuaternion, Vector3};

    /// Writes a fixed trajectory wherever the request asks, optionally failing some calls.
    struct MockRunner {
        calls: Vec<SlamRequest>,
        fail_on_call: Option<usize>,
        trajectory_file: String,
    }

    impl SlamRunner for MockRunner {
        fn run(&mut self, request: &SlamRequest) -> Result<()> {
            self.calls.push(request.clone());
            if self.fail_on_call == Some(self.calls.len() - 1) {
                return Err(SpoofError::ExternalProcess {
                    command: "mock".into(),
                    reason: "exited with 1".into(),
                });
            }
            std::fs::create_dir_all(&request.output_dir).unwrap();
            let poses: Vec<TumPose> = (0..5)
                .map(|i| {
                    TumPose::new(
                        i as f64,
                        Vector3::new(i as f64, 0.0, 0.0),
                        UnitQuaternion::identity(),
                    )
                })
                .collect();
            write_tum(request.output_dir.join(&self.trajectory_file), &poses)
        }
    }

    struct FixedEvaluator {
        ape: f64,
        rpe: f64,
    }

    impl TrajectoryEvaluator for FixedEvaluator {
        fn absolute_pose_error(&self, reference: &Path, estimate: &Path) -> Result<f64> {
            if !reference.exists() || !estimate.exists() {
                return Err(SpoofError::Evaluation("missing trajectory".into()));
            }
            Ok(self.ape)
        }

        fn relative_pose_error(&self, _reference: &Path, _estimate: &Path) -> Result<f64> {
            Ok(self.rpe)
        }
    }

    fn line_trajectory() -> ReferenceTrajectory {
        ReferenceTrajectory::from_samples(
            (0..20)
                .map(|i| TrajectorySample {
                    timestamp: i as f64 * 0.1,
                    x: i as f64,
                    y: 0.0,
                    z: 0.0,
                })
                .collect(),
        )
        .unwrap()
    }

    /// Fresh working directory with a small input bag and a matching config.
    fn setup(name: &str, n_trials: usize, parallel: bool) -> SpoofConfig {
        let dir = std::env::temp_dir().join(format!("slamspoof_harness_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let input = dir.join("input.bag");
        let mut writer = BagWriter::create(&input).unwrap();
        let conn = writer
            .add_connection("/velodyne_points", &MessageType::point_cloud2())
            .unwrap();
        for i in 0..10u64 {
            let stamp = 1_000_000_000 + i * 100_000_000;
            let cloud = PointCloud {
                sequence_number: i as u32,
                timestamp_ns: stamp,
                frame_id: "velodyne".into(),
                points: (0..36)
                    .map(|k| Point::from_polar(5.0, k as f64 * 10.0, 0.0))
                    .collect(),
            };
            writer
                .write(conn, stamp, &PointCloud2Message::from_cloud(&cloud).to_ros1())
                .unwrap();
        }
        writer.finish().unwrap();

        let mut config = SpoofConfig::default();
        config.main.reference_file = dir.join("reference.csv");
        config.main.n_trials = n_trials;
        config.main.parallel = parallel;
        config.spoofer.radius_m = 2.0;
        config.spoofer.distance_threshold_m = 5.0;
        config.rosbag.input_bag = input;
        config.rosbag.output_bag = dir.join("spoofed.bag");
        config.spoofing.attack = AttackModel::Removal;
        config.slam.save_dir = dir.join("slam");
        config.evaluation.ground_truth_dir = dir.join("gt");
        config.evaluation.results_dir = dir.join("results");
        config.evaluation.success_threshold = 0.5;
        config
    }

    fn mock_runner(config: &SpoofConfig, fail_on_call: Option<usize>) -> MockRunner {
        MockRunner {
            calls: Vec::new(),
            fail_on_call,
            trajectory_file: config.slam.trajectory_file.clone(),
        }
    }

    #[test]
    fn success_rate_uses_greater_or_equal() {
        let placement = SpooferPlacement::new(0.0, 0.0, 0.0);
        let results = [
            TrialResult { trial: 0, placement, ape: 0.0, rpe: 0.5 },
            TrialResult { trial: 1, placement, ape: 0.0, rpe: 0.49 },
        ];
        assert_eq!(success_rate(&results, 2, 0.5), 0.5);
        // failed trials count in the denominator
        assert_eq!(success_rate(&results, 4, 0.5), 0.25);
        assert_eq!(success_rate(&[], 0, 0.5), 0.0);
    }

    #[test]
    fn suffixes() {
        assert_eq!(
            with_suffix(Path::new("/out/spoofed.bag"), "_trial_0003"),
            PathBuf::from("/out/spoofed_trial_0003.bag")
        );
        assert_eq!(with_suffix(Path::new("traj"), "_x"), PathBuf::from("traj_x"));
    }

    #[test]
    fn five_trials_all_succeed() {
        let config = setup("five", 5, false);
        let traj = line_trajectory();
        let mut runner = mock_runner(&config, None);
        let evaluator = FixedEvaluator { ape: 2.0, rpe: 1.0 };
        let summary = {
            let mut harness = TrialHarness::new(&config, &traj, &mut runner, &evaluator);
            let summary = harness.run();
            for trial in 0..5 {
                assert!(harness.trial_trajectory(SlamAlgorithm::KissIcp, trial).exists());
            }
            assert!(harness.ground_truth(SlamAlgorithm::KissIcp).exists());
            summary
        };
        assert_eq!(summary.algorithms.len(), 1);
        let s = &summary.algorithms[0];
        assert_eq!(s.completed, 5);
        assert_eq!(s.failed, 0);
        assert_eq!(s.successes, 5);
        assert_eq!(s.success_rate, 1.0);
        assert_eq!(s.mean_rpe, Some(1.0));
        // baseline + one replay per trial
        assert_eq!(runner.calls.len(), 6);
        assert!(runner.calls[0].bag_path.to_string_lossy().contains("_baseline"));
        assert_eq!(runner.calls[1].bag_path, config.rosbag.output_bag);

        let csv_path = config.evaluation.results_dir.join("results_kiss_icp.csv");
        let csv = std::fs::read_to_string(csv_path).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("trial,spoofer_x,spoofer_y,spoofer_z,ape,rpe"));
        assert_eq!(lines.count(), 5);
    }

    #[test]
    fn failed_slam_run_is_isolated() {
        let mut config = setup("failing", 5, false);
        config.slam.algorithms = vec![SlamAlgorithm::KissIcp, SlamAlgorithm::FastLio];
        let traj = line_trajectory();
        // calls: 2 baseline, then 2 per trial; call 4 is trial 1 with kiss_icp
        let mut runner = mock_runner(&config, Some(4));
        let evaluator = FixedEvaluator { ape: 2.0, rpe: 1.0 };
        let mut harness = TrialHarness::new(&config, &traj, &mut runner, &evaluator);
        let summary = harness.run();

        let kiss = &harness.logs()[&SlamAlgorithm::KissIcp];
        assert_eq!(kiss.failed(), &[1]);
        assert_eq!(kiss.results().len(), 4);
        let fast = &harness.logs()[&SlamAlgorithm::FastLio];
        assert_eq!(fast.results().len(), 5);

        let by_alg: BTreeMap<SlamAlgorithm, &AlgorithmSummary> =
            summary.algorithms.iter().map(|s| (s.algorithm, s)).collect();
        assert_eq!(by_alg[&SlamAlgorithm::KissIcp].success_rate, 0.8);
        assert_eq!(by_alg[&SlamAlgorithm::FastLio].success_rate, 1.0);
    }

    #[test]
    fn low_rpe_is_not_an_attack_success() {
        let config = setup("low_rpe", 3, false);
        let traj = line_trajectory();
        let mut runner = mock_runner(&config, None);
        let evaluator = FixedEvaluator { ape: 0.1, rpe: 0.1 };
        let mut harness = TrialHarness::new(&config, &traj, &mut runner, &evaluator);
        let summary = harness.run();
        assert_eq!(summary.algorithms[0].completed, 3);
        assert_eq!(summary.algorithms[0].success_rate, 0.0);
    }

    #[test]
    fn missing_baseline_fails_every_trial() {
        let mut config = setup("no_baseline", 2, false);
        config.evaluation.run_baseline = false;
        let traj = line_trajectory();
        let mut runner = mock_runner(&config, None);
        let evaluator = FixedEvaluator { ape: 1.0, rpe: 1.0 };
        let mut harness = TrialHarness::new(&config, &traj, &mut runner, &evaluator);
        let summary = harness.run();
        assert_eq!(summary.algorithms[0].completed, 0);
        assert_eq!(summary.algorithms[0].failed, 2);
        assert_eq!(summary.algorithms[0].success_rate, 0.0);
    }

    #[test]
    fn missing_input_log_fails_trials_without_slam() {
        let mut config = setup("no_input", 2, false);
        config.rosbag.input_bag = config.rosbag.input_bag.with_file_name("missing.bag");
        config.evaluation.run_baseline = false;
        let traj = line_trajectory();
        let mut runner = mock_runner(&config, None);
        let evaluator = FixedEvaluator { ape: 1.0, rpe: 1.0 };
        {
            let mut harness = TrialHarness::new(&config, &traj, &mut runner, &evaluator);
            let summary = harness.run();
            assert_eq!(summary.algorithms[0].failed, 2);
        }
        assert!(runner.calls.is_empty());
    }

    #[test]
    fn parallel_matches_sequential_placements() {
        let traj = line_trajectory();
        let evaluator = FixedEvaluator { ape: 1.0, rpe: 1.0 };

        let seq_config = setup("seq", 4, false);
        let mut seq_runner = mock_runner(&seq_config, None);
        let mut seq = TrialHarness::new(&seq_config, &traj, &mut seq_runner, &evaluator);
        seq.run();
        let seq_placements: Vec<SpooferPlacement> = seq.logs()[&SlamAlgorithm::KissIcp]
            .results()
            .iter()
            .map(|r| r.placement)
            .collect();

        let par_config = setup("par", 4, true);
        let mut par_runner = mock_runner(&par_config, None);
        let par_placements: Vec<SpooferPlacement> = {
            let mut par = TrialHarness::new(&par_config, &traj, &mut par_runner, &evaluator);
            par.run();
            par.logs()[&SlamAlgorithm::KissIcp]
                .results()
                .iter()
                .map(|r| r.placement)
                .collect()
        };
        assert_eq!(seq_placements.len(), 4);
        assert_eq!(seq_placements, par_placements);
        // every parallel trial replayed its own log
        let bags: std::collections::BTreeSet<PathBuf> = par_runner.calls[1..]
            .iter()
            .map(|c| c.bag_path.clone())
            .collect();
        assert_eq!(bags.len(), 4);
    }

    fn trial_bags_in(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains("_trial_"))
            .collect()
    }

    #[test]
    fn parallel_sweep_removes_trial_logs() {
        let config = setup("par_cleanup", 5, true);
        let traj = line_trajectory();
        let mut runner = mock_runner(&config, None);
        let evaluator = FixedEvaluator { ape: 1.0, rpe: 1.0 };
        let summary = TrialHarness::new(&config, &traj, &mut runner, &evaluator).run();
        assert_eq!(summary.algorithms[0].completed, 5);

        let out_dir = config.rosbag.output_bag.parent().unwrap();
        assert!(trial_bags_in(out_dir).is_empty(), "{:?}", trial_bags_in(out_dir));
        // the input log is never touched
        assert!(config.rosbag.input_bag.exists());
    }

    #[test]
    fn parallel_sweep_removes_trial_logs_of_failed_replays() {
        let config = setup("par_cleanup_fail", 3, true);
        let traj = line_trajectory();
        // call 0 is the baseline, call 2 is trial 1
        let mut runner = mock_runner(&config, Some(2));
        let evaluator = FixedEvaluator { ape: 1.0, rpe: 1.0 };
        let mut harness = TrialHarness::new(&config, &traj, &mut runner, &evaluator);
        harness.run();
        assert_eq!(harness.logs()[&SlamAlgorithm::KissIcp].failed(), &[1]);
        let out_dir = config.rosbag.output_bag.parent().unwrap();
        assert!(trial_bags_in(out_dir).is_empty());
    }

    #[test]
    fn sequential_sweep_keeps_the_configured_output_log() {
        let config = setup("seq_output", 2, false);
        let traj = line_trajectory();
        let mut runner = mock_runner(&config, None);
        let evaluator = FixedEvaluator { ape: 1.0, rpe: 1.0 };
        TrialHarness::new(&config, &traj, &mut runner, &evaluator).run();
        assert!(config.rosbag.output_bag.exists());
    }

    #[test]
    fn placement_is_reproducible() {
        let config = setup("placement", 1, false);
        let traj = line_trajectory();
        let mut runner = mock_runner(&config, None);
        let evaluator = FixedEvaluator { ape: 1.0, rpe: 1.0 };
        let harness = TrialHarness::new(&config, &traj, &mut runner, &evaluator);
        assert_eq!(harness.placement_for(3), harness.placement_for(3));
        let p = harness.placement_for(0);
        let nearest = traj
            .samples()
            .iter()
            .map(|s| ((s.x - p.x).powi(2) + (s.y - p.y).powi(2)).sqrt())
            .fold(f64::INFINITY, f64::min);
        assert!(nearest <= 2.0 + 1e-9);
    }
}
