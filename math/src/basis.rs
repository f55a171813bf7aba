use std::f64::consts::FRAC_PI_2;

use nalgebra_glm::{cross, DVec3};

use crate::latlon_to_ray;

/// A right-handed orthogonal camera frame with `right = up × forward`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewBasis {
    pub forward: DVec3,
    pub right: DVec3,
    pub up: DVec3,
}

impl Default for ViewBasis {
    fn default() -> Self {
        Self {
            forward: DVec3::new(0.0, 0.0, 1.0),
            right: DVec3::new(1.0, 0.0, 0.0),
            up: DVec3::new(0.0, 1.0, 0.0),
        }
    }
}

impl ViewBasis {
    /// Creates a frame from forward and up vectors. The up vector is
    /// re-orthogonalized against forward; the inputs are expected to be unit
    /// length and are not normalized.
    ///
    /// # Arguments
    /// * `forward` - The view direction of the frame.
    /// * `up` - The approximate up direction of the frame.
    pub fn from_forward_up(forward: DVec3, up: DVec3) -> Self {
        let right = cross(&up, &forward);
        let up = cross(&forward, &right);

        Self { forward, right, up }
    }

    /// Creates the world frame of a camera from its view angles in radians.
    /// Pitch raises the view towards +y, yaw turns it towards +x and roll
    /// spins it counterclockwise around the forward axis.
    ///
    /// # Arguments
    /// * `pitch` - The pitch angle in radians.
    /// * `yaw` - The yaw angle in radians.
    /// * `roll` - The roll angle in radians.
    pub fn from_angles(pitch: f64, yaw: f64, roll: f64) -> Self {
        let forward = latlon_to_ray(pitch, yaw);
        let level_up = latlon_to_ray(pitch + FRAC_PI_2, yaw);
        let level = Self::from_forward_up(forward, level_up);

        let (sin_r, cos_r) = roll.sin_cos();

        Self {
            forward,
            right: level.right * cos_r - level.up * sin_r,
            up: level.up * cos_r + level.right * sin_r,
        }
    }

    /// Transforms a vector given in this frame's local coordinates into world
    /// coordinates.
    ///
    /// # Arguments
    /// * `v` - The local vector to transform.
    #[inline]
    pub fn transform(&self, v: &DVec3) -> DVec3 {
        self.right * v.x + self.up * v.y + self.forward * v.z
    }

    /// Composes a local frame with this one, e.g. a plate frame with the
    /// player camera, and returns the resulting world-space frame.
    ///
    /// # Arguments
    /// * `local` - The frame given in this frame's local coordinates.
    pub fn compose(&self, local: &ViewBasis) -> ViewBasis {
        ViewBasis {
            forward: self.transform(&local.forward),
            right: self.transform(&local.right),
            up: self.transform(&local.up),
        }
    }
}
