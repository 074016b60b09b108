//! Cartesian tool pose primitives.
//!
//! Translation is in meters, rotation in degrees, matching what the arm controller
//! reports in its cyclic feedback.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A 6-DOF tool pose.
///
/// Internally uses [`nalgebra::Vector3<f64>`] for both halves so deltas compose with
/// plain vector addition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub translation: Vector3<f64>,
    pub rotation: Vector3<f64>,
}

/// One of the six pose components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
    ThetaX,
    ThetaY,
    ThetaZ,
}

impl Pose {
    /// Convenience constructor.
    pub fn new(x: f64, y: f64, z: f64, theta_x: f64, theta_y: f64, theta_z: f64) -> Self {
        Self {
            translation: Vector3::new(x, y, z),
            rotation: Vector3::new(theta_x, theta_y, theta_z),
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
    }

    /// A delta that moves a single component by `amount`.
    pub fn along(axis: Axis, amount: f64) -> Self {
        let mut delta = Self::zero();
        match axis {
            Axis::X => delta.translation.x = amount,
            Axis::Y => delta.translation.y = amount,
            Axis::Z => delta.translation.z = amount,
            Axis::ThetaX => delta.rotation.x = amount,
            Axis::ThetaY => delta.rotation.y = amount,
            Axis::ThetaZ => delta.rotation.z = amount,
        }
        delta
    }

    /// Component-wise sum of `self` and `delta`.
    pub fn offset(&self, delta: &Pose) -> Pose {
        Pose {
            translation: self.translation + delta.translation,
            rotation: self.rotation + delta.rotation,
        }
    }

    pub fn x(&self) -> f64 {
        self.translation.x
    }

    pub fn y(&self) -> f64 {
        self.translation.y
    }

    pub fn z(&self) -> f64 {
        self.translation.z
    }

    pub fn theta_x(&self) -> f64 {
        self.rotation.x
    }

    pub fn theta_y(&self) -> f64 {
        self.rotation.y
    }

    pub fn theta_z(&self) -> f64 {
        self.rotation.z
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::zero()
    }
}
