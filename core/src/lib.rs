//! LiDAR spoofing toolbox for stress-testing SLAM pipelines
//!
//! This crate provides the pieces needed to answer one question: how badly does a LiDAR SLAM
//! pipeline degrade when an attacker near the robot's path removes or injects points in the
//! point cloud? It does so by rewriting a recorded sensor log (a ROS1 bag) so that every scan
//! recorded while the robot was near a virtual attacker reflects the attack, replaying the
//! rewritten log through an external SLAM system, and scoring the resulting trajectory against
//! a benign baseline.
//!
//! The SLAM system itself and the sensor hardware are not part of this crate. SLAM runs as a
//! blocking external process behind the [`slam::SlamRunner`] trait, and the log container is
//! accessed through the [`bag::MessageSource`] and [`bag::MessageSink`] traits, so the
//! transform pipeline can be exercised entirely in memory.
//!
//! ## Crate overview
//!
//! This crate is organized into several modules:
//! - [trajectory]: Reference (ground-truth) trajectory loading and timestamp queries.
//! - [spoofer]: Random attacker placement around the reference trajectory.
//! - [pointcloud]: `sensor_msgs/PointCloud2` payload decoding and encoding.
//! - [attack]: Attack window geometry, proximity gating and the attack models.
//! - [bag]: ROS1 bag v2.0 reader/writer and an in-memory log for tests.
//! - [rewriter]: Streams a log through the attack pipeline into a new log.
//! - [slam]: External SLAM invocation.
//! - [evaluation]: Absolute and relative pose error between trajectory files.
//! - [harness]: Monte-Carlo trial loop and result aggregation.
//! - [config]: The single, immutable run configuration.
//! - [error]: The crate error type.
//!
//! ## Coordinate and angle conventions
//!
//! World coordinates (reference trajectory, attacker placement) are meters in the map frame
//! of the reference trajectory. Point clouds are in the sensor frame. The bearing from the
//! robot to the attacker is computed in the world frame and applied directly in the sensor
//! frame, i.e. the sensor heading is assumed aligned with the world x axis, as in the tool
//! this crate models.
//!
//! Angles are in degrees throughout the public API. Bearings compared against an attack
//! sector are normalized to `[0, 360)` with [`wrap_to_360`]; bearings reported to the user
//! (e.g. robot → attacker) are in `(-180, 180]`.
//!
//! ## Randomness
//!
//! Nothing in this crate draws from a global random source. Every function that needs
//! randomness takes an explicit `&mut impl Rng`, and the trial harness seeds one
//! [`rand::rngs::StdRng`] per trial from the configured seed, so sweeps are reproducible.
pub mod attack;
pub mod bag;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod harness;
pub mod pointcloud;
pub mod rewriter;
pub mod slam;
pub mod spoofer;
pub mod trajectory;
pub mod wire;

pub use error::{Result, SpoofError};

// --- Miscellaneous functions for wrapping angles ---
/// Wrap an angle to the range -180 to 180 degrees
///
/// This function is generic and can be used with any type that implements the necessary traits.
///
/// # Arguments
/// * `angle` - The angle to be wrapped, which can be of any type that implements the necessary traits.
/// # Returns
/// * The wrapped angle, which will be in the range -180 to 180 degrees.
/// # Example
/// ```rust
/// use slamspoof::wrap_to_180;
/// let angle = 190.0;
/// let wrapped_angle = wrap_to_180(angle);
/// assert_eq!(wrapped_angle, -170.0); // 190 degrees wrapped to -170 degrees
/// ```
pub fn wrap_to_180<T>(angle: T) -> T
where
    T: PartialOrd + Copy + std::ops::SubAssign + std::ops::AddAssign + From<f64>,
{
    let mut wrapped: T = angle;
    while wrapped > T::from(180.0) {
        wrapped -= T::from(360.0);
    }
    while wrapped < T::from(-180.0) {
        wrapped += T::from(360.0);
    }
    wrapped
}

/// Wrap an angle to the half-open range [0, 360) degrees
///
/// Unlike [`wrap_to_180`] the upper bound is excluded, so 360 maps to 0. Sector tests depend
/// on every bearing having exactly one representation.
///
/// # Arguments
/// * `angle` - The angle to be wrapped, which can be of any type that implements the necessary traits.
/// # Returns
/// * The wrapped angle, which will be in the range [0, 360) degrees.
/// # Example
/// ```rust
/// use slamspoof::wrap_to_360;
/// assert_eq!(wrap_to_360(370.0), 10.0);
/// assert_eq!(wrap_to_360(-90.0), 270.0);
/// assert_eq!(wrap_to_360(360.0), 0.0);
/// ```
pub fn wrap_to_360<T>(angle: T) -> T
where
    T: PartialOrd + Copy + std::ops::SubAssign + std::ops::AddAssign + From<f64>,
{
    let mut wrapped: T = angle;
    while wrapped >= T::from(360.0) {
        wrapped -= T::from(360.0);
    }
    while wrapped < T::from(0.0) {
        wrapped += T::from(360.0);
    }
    // tiny negative inputs round up to exactly 360 after the addition
    if wrapped >= T::from(360.0) {
        wrapped = T::from(0.0);
    }
    wrapped
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_wrap_to_180() {
        assert_eq!(super::wrap_to_180(190.0), -170.0);
        assert_eq!(super::wrap_to_180(-190.0), 170.0);
        assert_eq!(super::wrap_to_180(0.0), 0.0);
        assert_eq!(super::wrap_to_180(180.0), 180.0);
        assert_eq!(super::wrap_to_180(-180.0), -180.0);
    }
    #[test]
    fn test_wrap_to_360() {
        assert_eq!(super::wrap_to_360(370.0), 10.0);
        assert_eq!(super::wrap_to_360(-10.0), 350.0);
        assert_eq!(super::wrap_to_360(0.0), 0.0);
        assert_eq!(super::wrap_to_360(360.0), 0.0);
        assert_eq!(super::wrap_to_360(720.0), 0.0);
        assert_eq!(super::wrap_to_360(-1e-17), 0.0);
    }
}
