use std::f64::consts::{FRAC_PI_2, PI};

use nalgebra_glm::DVec3;

use fisheye::{Palette, PlateRenderer, PlateView, Result};
use math::{plate_uv_to_ray, ray_to_latlon, ViewBasis};

/// A stand-in for the game renderer: raycasts a procedural lat/lon checker
/// panorama so the lens distortion is visible without a game running.
pub struct PanoramaRenderer {
    ground: [u8; 2],
    sky: [u8; 2],
    horizon: u8,
}

impl PanoramaRenderer {
    /// Resolves the panorama colors against the active palette.
    pub fn new(palette: &Palette) -> Self {
        Self {
            ground: [
                palette.nearest([121, 85, 58]),
                palette.nearest([86, 58, 39]),
            ],
            sky: [
                palette.nearest([108, 156, 214]),
                palette.nearest([70, 110, 180]),
            ],
            horizon: palette.nearest([206, 206, 170]),
        }
    }

    fn shade(&self, ray: &DVec3) -> u8 {
        let (lat, lon) = ray_to_latlon(ray);

        if lat.abs() < 1.5f64.to_radians() {
            return self.horizon;
        }

        let cell = 15f64.to_radians();
        let parity = ((((lon + PI) / cell).floor() as i64)
            + (((lat + FRAC_PI_2) / cell).floor() as i64))
            & 1;

        if lat < 0.0 {
            self.ground[parity as usize]
        } else {
            self.sky[parity as usize]
        }
    }
}

impl PlateRenderer for PanoramaRenderer {
    fn render_plate(&mut self, view: &PlateView, size: usize, target: &mut [u8]) -> Result<()> {
        let basis = ViewBasis {
            forward: view.forward,
            right: view.right,
            up: view.up,
        };
        let dist = 0.5 / (view.fov / 2.0).tan();

        for y in 0..size {
            for x in 0..size {
                let ray = plate_uv_to_ray(
                    &basis,
                    dist,
                    (x as f64 + 0.5) / size as f64,
                    (y as f64 + 0.5) / size as f64,
                );

                target[y * size + x] = self.shade(&ray);
            }
        }

        Ok(())
    }
}
