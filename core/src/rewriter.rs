//! Streams a recorded log through the attack pipeline.
//!
//! For every LiDAR message the rewriter
//!
//! 1. decodes the `PointCloud2` payload,
//! 2. maps the message's elapsed log time onto the reference trajectory to get the robot
//!    position,
//! 3. checks whether the robot is within reach of the attacker and, if so, computes the
//!    attack window from the robot → attacker bearing,
//! 4. applies the attack model (or passes the scan through),
//! 5. re-encodes the scan and writes it at the original header stamp.
//!
//! Elapsed time is measured from the log time of the first LiDAR message. IMU messages are
//! copied byte for byte at their header stamp; every other topic is dropped.
use rand::Rng;
use std::fmt::{self, Display};
use std::path::Path;

use crate::attack::{AttackModel, AttackOutcome, AttackWindow, SensorModel, apply_attack, in_range};
use crate::bag::{BagReader, BagWriter, ConnectionId, MessageSink, MessageSource, MessageType};
use crate::config::SpoofConfig;
use crate::error::{Result, SpoofError};
use crate::pointcloud::{Point, PointCloud, PointCloud2Message, header_stamp_ns};
use crate::spoofer::SpooferPlacement;
use crate::trajectory::ReferenceTrajectory;

/// Counters collected while rewriting one log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// LiDAR messages read (and written).
    pub lidar_messages: usize,
    /// LiDAR messages the attack model was applied to.
    pub attacked_messages: usize,
    /// IMU messages copied through.
    pub imu_messages: usize,
    pub points_removed: usize,
    pub points_injected: usize,
}

impl Display for RewriteStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} scans ({} attacked), {} imu, {} points removed, {} injected",
            self.lidar_messages,
            self.attacked_messages,
            self.imu_messages,
            self.points_removed,
            self.points_injected
        )
    }
}

/// Rewrites logs for one attacker placement.
#[derive(Clone, Debug)]
pub struct LogRewriter<'a> {
    config: &'a SpoofConfig,
    trajectory: &'a ReferenceTrajectory,
    placement: SpooferPlacement,
    model: AttackModel,
}

impl<'a> LogRewriter<'a> {
    /// Rewriter using the configured attack model.
    pub fn new(
        config: &'a SpoofConfig,
        trajectory: &'a ReferenceTrajectory,
        placement: SpooferPlacement,
    ) -> Self {
        LogRewriter {
            config,
            trajectory,
            placement,
            model: config.spoofing.attack.clone(),
        }
    }

    /// Replace the attack model, e.g. with [`AttackModel::None`] for the benign baseline.
    pub fn with_model(mut self, model: AttackModel) -> Self {
        self.model = model;
        self
    }

    pub fn model(&self) -> &AttackModel {
        &self.model
    }

    pub fn placement(&self) -> SpooferPlacement {
        self.placement
    }

    fn sensor(&self) -> &SensorModel {
        &self.config.spoofing.sensor
    }

    /// Attack one decoded scan recorded `elapsed_s` seconds into the log.
    ///
    /// Returns `None` when the scan passes through untouched, either because the model is
    /// [`AttackModel::None`] or because the robot is out of the attacker's reach.
    pub fn process_scan<R: Rng>(
        &self,
        points: &[Point],
        elapsed_s: f64,
        rng: &mut R,
    ) -> Option<AttackOutcome> {
        if self.model == AttackModel::None {
            return None;
        }
        let robot = self.trajectory.nearest(elapsed_s);
        let attacker = self.placement.xy();
        if !in_range(robot, attacker, self.config.spoofer.distance_threshold_m) {
            return None;
        }
        let window = AttackWindow::between(robot, attacker, self.config.spoofing.range_deg);
        log::trace!(
            "t={elapsed_s:.3}s robot=({:.2}, {:.2}) bearing={:.1} deg",
            robot.0,
            robot.1,
            window.bearing_deg
        );
        Some(apply_attack(
            &self.model,
            points,
            &window,
            elapsed_s,
            self.sensor(),
            rng,
        ))
    }

    /// Rewrite `source` into `sink` and finish the sink.
    ///
    /// # Errors
    /// * `SpoofError::Format` if a LiDAR payload does not match the record stride or a
    ///   message cannot be deserialized.
    /// * Any error raised by the source or sink.
    pub fn rewrite<R: Rng>(
        &self,
        source: &dyn MessageSource,
        sink: &mut dyn MessageSink,
        rng: &mut R,
    ) -> Result<RewriteStats> {
        let lidar_topic = self.config.rosbag.lidar_topic.as_str();
        let imu_topic = self.config.rosbag.imu_topic.as_str();

        let lidar_type = source
            .connection_for(lidar_topic)
            .map(|c| c.msg_type)
            .unwrap_or_else(MessageType::point_cloud2);
        let lidar_out = sink.add_connection(lidar_topic, &lidar_type)?;
        let mut imu_out: Option<ConnectionId> = None;

        let mut stats = RewriteStats::default();
        let mut start_ns: Option<u64> = None;
        let mut sequence: u32 = 0;

        for message in source.messages(&[lidar_topic, imu_topic]) {
            let message = message?;
            if message.topic == lidar_topic {
                let start = *start_ns.get_or_insert(message.timestamp_ns);
                let elapsed_s = message.timestamp_ns.saturating_sub(start) as f64 * 1e-9;

                let incoming = PointCloud2Message::from_ros1(&message.data)?;
                let stride = self
                    .config
                    .rosbag
                    .point_step
                    .unwrap_or(incoming.point_step as usize);
                let cloud = incoming.to_cloud(stride)?;

                let points = match self.process_scan(&cloud.points, elapsed_s, rng) {
                    Some(outcome) => {
                        stats.attacked_messages += 1;
                        stats.points_removed += outcome.removed;
                        stats.points_injected += outcome.injected.len();
                        outcome.into_points()
                    }
                    None => cloud.points,
                };
                let rewritten = PointCloud {
                    sequence_number: sequence,
                    timestamp_ns: cloud.timestamp_ns,
                    frame_id: cloud.frame_id,
                    points,
                };
                sequence = sequence.wrapping_add(1);
                sink.write(
                    lidar_out,
                    rewritten.timestamp_ns,
                    &PointCloud2Message::from_cloud(&rewritten).to_ros1(),
                )?;
                stats.lidar_messages += 1;
            } else if message.topic == imu_topic {
                let conn = match imu_out {
                    Some(conn) => conn,
                    None => {
                        let imu_type = source
                            .connection_for(imu_topic)
                            .map(|c| c.msg_type)
                            .unwrap_or_else(MessageType::imu);
                        let conn = sink.add_connection(imu_topic, &imu_type)?;
                        imu_out = Some(conn);
                        conn
                    }
                };
                sink.write(conn, header_stamp_ns(&message.data)?, &message.data)?;
                stats.imu_messages += 1;
            }
        }
        sink.finish()?;

        if stats.lidar_messages == 0 {
            log::warn!("No messages found on LiDAR topic '{lidar_topic}'");
        }
        Ok(stats)
    }

    /// Rewrite the bag at `input` into a new bag at `output`.
    ///
    /// An existing file at `output` is removed first.
    pub fn rewrite_to_path<R: Rng>(
        &self,
        input: &Path,
        output: &Path,
        rng: &mut R,
    ) -> Result<RewriteStats> {
        if output.exists() {
            std::fs::remove_file(output).map_err(|e| SpoofError::io(output, e))?;
        }
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SpoofError::io(parent, e))?;
        }
        let reader = BagReader::open(input)?;
        let mut writer = BagWriter::create(output)?;
        let stats = self.rewrite(&reader, &mut writer, rng)?;
        log::info!(
            "Rewrote {} -> {} [{}] with attacker at {}: {}",
            input.display(),
            output.display(),
            self.model.mode(),
            self.placement,
            stats
        );
        Ok(stats)
    }
}
