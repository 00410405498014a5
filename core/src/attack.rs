//! Attack window evaluation and point-cloud attack models.
//!
//! An attacker at a fixed world position can manipulate the LiDAR returns inside an angular
//! sector centred on the bearing from the robot to the attacker, but only while the robot is
//! within `distance_threshold` meters of it. The sector is re-evaluated for every scan.
//!
//! ## Angle convention
//!
//! Every bearing compared against a sector is normalized to `[0°, 360°)`. A sector is stored
//! as a normalized start angle plus a width, and a bearing `θ` lies inside it when
//! `wrap_to_360(θ - start) <= width`. The same test is used by every attack model, so a
//! sector straddling 0°/360° needs no special handling.
//!
//! ## Attack models
//!
//! - [`AttackModel::None`]: the scan passes through untouched.
//! - [`AttackModel::Removal`]: returns inside the sector are deleted.
//! - [`AttackModel::StaticInjection`]: returns inside the sector are replaced by a synthetic
//!   surface at a fixed distance (a flat `wall` or a V-shaped `corner`).
//! - [`AttackModel::DynamicInjection`]: like static injection, but the surface distance
//!   follows a sawtooth in elapsed log time.
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

use crate::pointcloud::Point;
use crate::{wrap_to_180, wrap_to_360};

/// Discriminant of an [`AttackModel`], used for logging and result labelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackMode {
    None,
    Removal,
    StaticInjection,
    DynamicInjection,
}

impl Display for AttackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttackMode::None => "none",
            AttackMode::Removal => "removal",
            AttackMode::StaticInjection => "static_injection",
            AttackMode::DynamicInjection => "dynamic_injection",
        };
        write!(f, "{name}")
    }
}

/// Shape of the synthetic surface produced by the injection models.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionStyle {
    /// Every injected return sits at the injection distance.
    #[default]
    Wall,
    /// Injected returns form a right-angle corner whose apex points along the bisector
    /// (sector centre plus `corner_rotation_deg`).
    Corner,
}

/// How the attacker manipulates the scan while the robot is in range.
///
/// ## Examples
///
/// ```
/// use slamspoof::attack::{AttackModel, InjectionStyle};
///
/// // Delete everything inside the sector
/// let removal = AttackModel::Removal;
///
/// // Fake wall 5 m in front of the sensor
/// let wall = AttackModel::StaticInjection {
///     distance_m: 5.0,
///     style: InjectionStyle::Wall,
///     corner_rotation_deg: 0.0,
/// };
///
/// // Surface sweeping from 2 m to 12 m every 4 s
/// let dynamic = AttackModel::DynamicInjection {
///     min_distance_m: 2.0,
///     max_distance_m: 12.0,
///     time_cycle_s: 4.0,
///     style: InjectionStyle::Corner,
///     corner_rotation_deg: 15.0,
/// };
/// assert_eq!(dynamic.injection_distance(6.0), Some(7.0));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttackModel {
    /// No manipulation; used for the benign baseline.
    #[default]
    None,
    /// Delete returns inside the sector.
    Removal,
    /// Replace returns inside the sector with a surface at a fixed distance.
    StaticInjection {
        /// Distance of the synthetic surface from the sensor (meters).
        distance_m: f64,
        /// Surface shape.
        #[serde(default)]
        style: InjectionStyle,
        /// Rotation of the corner bisector relative to the sector centre (degrees).
        #[serde(default)]
        corner_rotation_deg: f64,
    },
    /// Replace returns inside the sector with a surface whose distance ramps linearly from
    /// `min_distance_m` to `max_distance_m` over `time_cycle_s`, then restarts.
    DynamicInjection {
        /// Distance at the start of each cycle (meters).
        min_distance_m: f64,
        /// Distance approached at the end of each cycle (meters).
        max_distance_m: f64,
        /// Period of the sawtooth (seconds).
        time_cycle_s: f64,
        /// Surface shape.
        #[serde(default)]
        style: InjectionStyle,
        /// Rotation of the corner bisector relative to the sector centre (degrees).
        #[serde(default)]
        corner_rotation_deg: f64,
    },
}

impl AttackModel {
    pub fn mode(&self) -> AttackMode {
        match self {
            AttackModel::None => AttackMode::None,
            AttackModel::Removal => AttackMode::Removal,
            AttackModel::StaticInjection { .. } => AttackMode::StaticInjection,
            AttackModel::DynamicInjection { .. } => AttackMode::DynamicInjection,
        }
    }

    /// Injection distance at `elapsed_s`, or `None` for models that do not inject.
    pub fn injection_distance(&self, elapsed_s: f64) -> Option<f64> {
        match self {
            AttackModel::None | AttackModel::Removal => None,
            AttackModel::StaticInjection { distance_m, .. } => Some(*distance_m),
            AttackModel::DynamicInjection {
                min_distance_m,
                max_distance_m,
                time_cycle_s,
                ..
            } => Some(sawtooth_distance(
                *min_distance_m,
                *max_distance_m,
                *time_cycle_s,
                elapsed_s,
            )),
        }
    }

    /// Check parameter ranges. Returns a human readable reason on failure.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            AttackModel::None | AttackModel::Removal => Ok(()),
            AttackModel::StaticInjection { distance_m, .. } => {
                if !distance_m.is_finite() || *distance_m <= 0.0 {
                    return Err(format!("distance_m must be positive, got {distance_m}"));
                }
                Ok(())
            }
            AttackModel::DynamicInjection {
                min_distance_m,
                max_distance_m,
                time_cycle_s,
                ..
            } => {
                if !min_distance_m.is_finite() || *min_distance_m <= 0.0 {
                    return Err(format!(
                        "min_distance_m must be positive, got {min_distance_m}"
                    ));
                }
                if !max_distance_m.is_finite() || max_distance_m < min_distance_m {
                    return Err(format!(
                        "max_distance_m ({max_distance_m}) must be >= min_distance_m ({min_distance_m})"
                    ));
                }
                if !time_cycle_s.is_finite() || *time_cycle_s <= 0.0 {
                    return Err(format!("time_cycle_s must be positive, got {time_cycle_s}"));
                }
                Ok(())
            }
        }
    }

    fn surface(&self) -> (InjectionStyle, f64) {
        match self {
            AttackModel::StaticInjection {
                style,
                corner_rotation_deg,
                ..
            }
            | AttackModel::DynamicInjection {
                style,
                corner_rotation_deg,
                ..
            } => (*style, *corner_rotation_deg),
            _ => (InjectionStyle::Wall, 0.0),
        }
    }
}

/// Scan pattern of the emulated sensor, used to size and shape injected surfaces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorModel {
    /// Horizontal angular resolution (degrees).
    #[serde(default = "default_angular_resolution")]
    pub angular_resolution_deg: f64,
    /// Number of vertical scan lines.
    #[serde(default = "default_vertical_lines")]
    pub vertical_lines: u32,
    /// Elevation angles injected returns are drawn from (degrees).
    #[serde(default = "default_vertical_angles")]
    pub vertical_angles_deg: Vec<f64>,
}

fn default_angular_resolution() -> f64 {
    0.2
}
fn default_vertical_lines() -> u32 {
    32
}
fn default_vertical_angles() -> Vec<f64> {
    vec![-1.333, -1.0, -0.667, -0.333, 0.0, 0.333, 0.667, 1.0, 1.333]
}

impl Default for SensorModel {
    fn default() -> Self {
        SensorModel {
            angular_resolution_deg: default_angular_resolution(),
            vertical_lines: default_vertical_lines(),
            vertical_angles_deg: default_vertical_angles(),
        }
    }
}

/// Upper bound on the returns synthesized for one scan.
pub const MAX_INJECTED_POINTS: usize = 1_000_000;

impl SensorModel {
    /// Number of returns a sensor of this kind produces across `range_deg`.
    ///
    /// Saturates at `usize::MAX`; [`SensorModel::validate`] rejects sensors whose full
    /// sweep exceeds [`MAX_INJECTED_POINTS`].
    pub fn injected_point_count(&self, range_deg: f64) -> usize {
        // tolerance keeps exact multiples (e.g. 30 / 0.2) from rounding up
        let columns = (range_deg / self.angular_resolution_deg - 1e-9).ceil().max(0.0);
        (columns as usize)
            .checked_mul(self.vertical_lines as usize)
            .unwrap_or(usize::MAX)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.angular_resolution_deg.is_finite() || self.angular_resolution_deg <= 0.0 {
            return Err(format!(
                "angular_resolution_deg must be positive, got {}",
                self.angular_resolution_deg
            ));
        }
        if self.vertical_lines == 0 {
            return Err("vertical_lines must be at least 1".into());
        }
        if self.vertical_angles_deg.is_empty() {
            return Err("vertical_angles_deg must not be empty".into());
        }
        let full_sweep = self.injected_point_count(360.0);
        if full_sweep > MAX_INJECTED_POINTS {
            return Err(format!(
                "a full sweep would inject {full_sweep} points, more than {MAX_INJECTED_POINTS}"
            ));
        }
        Ok(())
    }
}

/// Bearing from the robot to the attacker in degrees, in `(-180, 180]`.
pub fn bearing_deg(robot_xy: (f64, f64), attacker_xy: (f64, f64)) -> f64 {
    let dy = attacker_xy.1 - robot_xy.1;
    let dx = attacker_xy.0 - robot_xy.0;
    dy.atan2(dx).to_degrees()
}

/// `true` when the attacker is within `threshold` meters of the robot (inclusive).
pub fn in_range(robot_xy: (f64, f64), attacker_xy: (f64, f64), threshold: f64) -> bool {
    let dx = attacker_xy.0 - robot_xy.0;
    let dy = attacker_xy.1 - robot_xy.1;
    dx.hypot(dy) <= threshold
}

/// Distance of the dynamic injection surface at time `t`.
///
/// `min + (max - min) / cycle * (t mod cycle)`, a sawtooth with period `cycle`.
pub fn sawtooth_distance(min: f64, max: f64, cycle: f64, t: f64) -> f64 {
    min + (max - min) / cycle * t.rem_euclid(cycle)
}

/// Angular sector in the sensor frame, normalized to `[0, 360)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttackSector {
    start_deg: f64,
    width_deg: f64,
}

impl AttackSector {
    /// Sector of `width_deg` centred on `center_deg`.
    pub fn centered(center_deg: f64, width_deg: f64) -> Self {
        AttackSector {
            start_deg: wrap_to_360(center_deg - width_deg / 2.0),
            width_deg: width_deg.max(0.0),
        }
    }

    /// Lower bound in `[0, 360)`.
    pub fn start_deg(&self) -> f64 {
        self.start_deg
    }

    /// Upper bound; may exceed 360 when the sector wraps.
    pub fn end_deg(&self) -> f64 {
        self.start_deg + self.width_deg
    }

    pub fn width_deg(&self) -> f64 {
        self.width_deg
    }

    pub fn center_deg(&self) -> f64 {
        wrap_to_360(self.start_deg + self.width_deg / 2.0)
    }

    /// Whether `bearing_deg` (any range) lies inside the sector, bounds included.
    pub fn contains(&self, bearing_deg: f64) -> bool {
        if self.width_deg >= 360.0 {
            return true;
        }
        wrap_to_360(bearing_deg - self.start_deg) <= self.width_deg
    }
}

/// Per-scan attack geometry: where the attacker is as seen from the robot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttackWindow {
    /// Bearing robot → attacker (degrees, `(-180, 180]`).
    pub bearing_deg: f64,
    /// Angular width the attacker controls (degrees).
    pub range_deg: f64,
    pub sector: AttackSector,
}

impl AttackWindow {
    pub fn new(bearing_deg: f64, range_deg: f64) -> Self {
        AttackWindow {
            bearing_deg,
            range_deg,
            sector: AttackSector::centered(bearing_deg, range_deg),
        }
    }

    /// Window for a robot at `robot_xy` facing an attacker at `attacker_xy`.
    pub fn between(robot_xy: (f64, f64), attacker_xy: (f64, f64), range_deg: f64) -> Self {
        AttackWindow::new(bearing_deg(robot_xy, attacker_xy), range_deg)
    }
}

/// Points that survived the attack and points the attacker synthesized.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttackOutcome {
    pub remaining: Vec<Point>,
    pub injected: Vec<Point>,
    /// Number of input points deleted by the attack.
    pub removed: usize,
}

impl AttackOutcome {
    /// Untouched scan.
    pub fn passthrough(points: &[Point]) -> Self {
        AttackOutcome {
            remaining: points.to_vec(),
            injected: Vec::new(),
            removed: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.remaining.len() + self.injected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewritten scan: remaining points in input order followed by injected points.
    pub fn into_points(self) -> Vec<Point> {
        let mut points = self.remaining;
        points.extend(self.injected);
        points
    }
}

/// Delete every point whose bearing lies inside `sector`.
///
/// Points outside the sector are returned unchanged and in their original order.
pub fn remove_in_sector(points: &[Point], sector: &AttackSector) -> AttackOutcome {
    let remaining: Vec<Point> = points
        .iter()
        .filter(|p| !sector.contains(p.bearing_deg()))
        .copied()
        .collect();
    AttackOutcome {
        removed: points.len() - remaining.len(),
        remaining,
        injected: Vec::new(),
    }
}

/// Synthesize the returns of a fake surface inside `window`.
///
/// Bearings are drawn uniformly across the sector and elevations from the sensor's
/// candidate set. For [`InjectionStyle::Corner`] the horizontal range of each return is
/// `distance / (|cos Δ| + |sin Δ|)`, with `Δ` the angle to the corner bisector.
pub fn synthesize_surface<R: Rng>(
    window: &AttackWindow,
    distance: f64,
    style: InjectionStyle,
    corner_rotation_deg: f64,
    sensor: &SensorModel,
    rng: &mut R,
) -> Vec<Point> {
    let count = sensor.injected_point_count(window.range_deg);
    if count == 0 || sensor.vertical_angles_deg.is_empty() {
        return Vec::new();
    }
    let half = window.range_deg.max(0.0) / 2.0;
    let lo = window.bearing_deg - half;
    let hi = window.bearing_deg + half;
    let bisector = window.bearing_deg + corner_rotation_deg;

    let bearings = Uniform::new_inclusive(lo, hi).ok();
    let mut points = Vec::with_capacity(count.min(MAX_INJECTED_POINTS));
    for _ in 0..count {
        let theta = match &bearings {
            Some(dist) => dist.sample(rng),
            None => window.bearing_deg,
        };
        let range = match style {
            InjectionStyle::Wall => distance,
            InjectionStyle::Corner => {
                let delta = wrap_to_180(theta - bisector).to_radians();
                distance / (delta.cos().abs() + delta.sin().abs())
            }
        };
        let elevation = sensor.vertical_angles_deg
            [rng.random_range(0..sensor.vertical_angles_deg.len())]
        .to_radians();
        points.push(Point::from_polar(range, theta, range * elevation.sin()));
    }
    points
}

/// Apply `model` to one scan.
///
/// `elapsed_s` is the log-relative time of the scan and only matters for
/// [`AttackModel::DynamicInjection`].
pub fn apply_attack<R: Rng>(
    model: &AttackModel,
    points: &[Point],
    window: &AttackWindow,
    elapsed_s: f64,
    sensor: &SensorModel,
    rng: &mut R,
) -> AttackOutcome {
    match model {
        AttackModel::None => AttackOutcome::passthrough(points),
        AttackModel::Removal => remove_in_sector(points, &window.sector),
        AttackModel::StaticInjection { .. } | AttackModel::DynamicInjection { .. } => {
            let mut outcome = remove_in_sector(points, &window.sector);
            let (style, rotation) = model.surface();
            // injection models always yield a distance
            let distance = model.injection_distance(elapsed_s).unwrap_or_default();
            outcome.injected = synthesize_surface(window, distance, style, rotation, sensor, rng);
            outcome
        }
    }
}
