use nalgebra_glm::{dot, normalize, DVec3};

use crate::ViewBasis;

/// Returns the world ray passing through the plate texel at the given
/// normalized texture coordinates. The v axis grows downward in texture
/// space while up is +y in the plate frame, hence the inversion.
///
/// # Arguments
/// * `basis` - The orientation frame of the plate.
/// * `dist` - The distance between the camera and the unit-square plate.
/// * `u` - The horizontal texture coordinate in [0, 1].
/// * `v` - The vertical texture coordinate in [0, 1], growing downward.
#[inline]
pub fn plate_uv_to_ray(basis: &ViewBasis, dist: f64, u: f64, v: f64) -> DVec3 {
    let ray = basis.forward * dist + basis.right * (u - 0.5) + basis.up * (0.5 - v);

    normalize(&ray)
}

/// Projects a world ray onto the plate and returns its texture coordinates
/// together with whether they fall inside the unit square.
///
/// # Arguments
/// * `basis` - The orientation frame of the plate.
/// * `dist` - The distance between the camera and the unit-square plate.
/// * `ray` - The world ray to project.
#[inline]
pub fn plate_ray_to_uv(basis: &ViewBasis, dist: f64, ray: &DVec3) -> (f64, f64, bool) {
    let x = dot(&basis.right, ray);
    let y = dot(&basis.up, ray);
    let z = dot(&basis.forward, ray);

    let u = x * dist / z + 0.5;
    let v = -y * dist / z + 0.5;

    let inside = (0.0..=1.0).contains(&u) && (0.0..=1.0).contains(&v);

    (u, v, inside)
}
