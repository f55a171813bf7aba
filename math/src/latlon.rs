use nalgebra_glm::DVec3;

/// Converts a latitude/longitude pair in radians into a unit direction ray.
/// Latitude grows towards +y, longitude towards +x, and the zero direction
/// is +z.
///
/// # Arguments
/// * `lat` - The latitude in radians.
/// * `lon` - The longitude in radians.
#[inline]
pub fn latlon_to_ray(lat: f64, lon: f64) -> DVec3 {
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();

    DVec3::new(sin_lon * cos_lat, sin_lat, cos_lon * cos_lat)
}

/// Converts a direction ray into a latitude/longitude pair in radians.
/// The ray does not need to be normalized.
///
/// # Arguments
/// * `ray` - The direction to convert.
#[inline]
pub fn ray_to_latlon(ray: &DVec3) -> (f64, f64) {
    let lon = ray.x.atan2(ray.z);
    let lat = ray.y.atan2((ray.x * ray.x + ray.z * ray.z).sqrt());

    (lat, lon)
}
