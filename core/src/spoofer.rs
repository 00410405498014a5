//! Attacker placement around the reference trajectory.
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

use crate::trajectory::ReferenceTrajectory;

/// World position of the simulated attacker for one trial.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpooferPlacement {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SpooferPlacement {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        SpooferPlacement { x, y, z }
    }

    /// Horizontal position used by the proximity and bearing checks.
    pub fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

impl Display for SpooferPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Offset a trajectory point by `radius` meters at a uniformly random bearing.
///
/// The bearing is drawn from `[-180°, 180°)`. The attacker keeps the trajectory height,
/// so the offset is purely horizontal.
///
/// # Example
/// ```
/// use rand::SeedableRng;
/// use slamspoof::spoofer::place;
///
/// let mut rng = rand::rngs::StdRng::seed_from_u64(42);
/// let p = place((1.0, 2.0, 0.5), 10.0, &mut rng);
/// let d = ((p.x - 1.0).powi(2) + (p.y - 2.0).powi(2)).sqrt();
/// assert!((d - 10.0).abs() < 1e-9);
/// assert_eq!(p.z, 0.5);
/// ```
pub fn place<R: Rng>(sample: (f64, f64, f64), radius: f64, rng: &mut R) -> SpooferPlacement {
    let bearing = rng.random_range(-180.0_f64..180.0).to_radians();
    let (x, y, z) = sample;
    SpooferPlacement {
        x: x + radius * bearing.cos(),
        y: y + radius * bearing.sin(),
        z,
    }
}

/// Pick a random reference sample and place the attacker `radius` meters away from it.
pub fn random_placement<R: Rng>(
    trajectory: &ReferenceTrajectory,
    radius: f64,
    rng: &mut R,
) -> SpooferPlacement {
    let sample = trajectory.random_sample(rng);
    place(sample, radius, rng)
}
