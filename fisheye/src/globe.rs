use std::path::Path;

use arrayvec::ArrayVec;
use log::info;
use nalgebra_glm::{dot, DVec3};

use math::{plate_ray_to_uv, plate_uv_to_ray, ViewBasis};

use crate::{
    script::{PlateFrame, ScriptFn, ScriptHost},
    Error, Result,
};

/// The maximum number of plates a globe may arrange around the viewer.
pub const MAX_PLATES: usize = 6;

/// One flat perspective render covering a part of the sphere.
pub struct Plate {
    /// The orientation frame of the plate in globe-local coordinates.
    pub basis: ViewBasis,

    /// The full horizontal and vertical field of the unit-square plate in
    /// radians.
    pub fov: f64,

    /// The camera-to-plate distance, `0.5 / tan(fov / 2)`.
    pub dist: f64,

    /// The tint table index used by the rubix overlay.
    pub tint: u8,

    /// Whether any output pixel of the current lens map samples this plate.
    pub display: bool,
}

/// The full arrangement of plates around the viewer plus their pixel
/// storage.
pub struct Globe {
    pub name: String,
    pub valid: bool,
    pub plates: ArrayVec<Plate, MAX_PLATES>,

    /// The scripted plate selector, overriding Voronoi ownership.
    plate_select: Option<ScriptFn>,

    /// The plate renders, `numplates × platesize × platesize` bytes,
    /// palette-indexed and row-major per plate.
    pub pixels: Vec<u8>,

    /// The per-edge pixel count of each square plate render.
    pub platesize: usize,
}

impl Default for Globe {
    fn default() -> Self {
        Self {
            name: String::new(),
            valid: false,
            plates: ArrayVec::new(),
            plate_select: None,
            pixels: Vec::new(),
            platesize: 0,
        }
    }
}

impl Globe {
    /// Loads a globe script and parses its `plates` table.
    ///
    /// The script environment is cleared up front, so a failed load leaves
    /// the host with no plates published. The previously loaded lens is not
    /// touched.
    ///
    /// # Arguments
    /// * `host` - The script host to load into.
    /// * `dir` - The globe script directory.
    /// * `name` - The globe name without the `.lua` extension.
    pub fn load(host: &ScriptHost, dir: &Path, name: &str) -> Result<Globe> {
        host.clear_global("plates")?;
        host.clear_global("globe_plate")?;
        host.set_number("numplates", 0.0)?;
        host.set_plate_frames(Vec::new());

        let path = dir.join(format!("{}.lua", name));
        host.load_file(&path)?;

        Self::from_host(host, name)
    }

    /// Builds the globe from the plate globals already present in the host.
    pub fn from_host(host: &ScriptHost, name: &str) -> Result<Globe> {
        let plate_select = host.get_function("globe_plate")?;
        let specs = host.read_plates()?;

        if specs.is_empty() || specs.len() > MAX_PLATES {
            return Err(Error::Contract(format!(
                "globe {} must define between 1 and {} plates, got {}",
                name,
                MAX_PLATES,
                specs.len()
            )));
        }

        let mut plates = ArrayVec::new();
        for (i, spec) in specs.iter().enumerate() {
            if spec.fov_deg <= 0.0 || spec.fov_deg >= 180.0 {
                return Err(Error::Contract(format!(
                    "globe {} plate {} fov must lie in (0, 180) degrees, got {}",
                    name, i, spec.fov_deg
                )));
            }

            let fov = spec.fov_deg.to_radians();

            plates.push(Plate {
                basis: ViewBasis::from_forward_up(spec.forward, spec.up),
                fov,
                dist: 0.5 / (fov / 2.0).tan(),
                tint: i as u8,
                display: false,
            });
        }

        let globe = Globe {
            name: name.to_owned(),
            valid: true,
            plates,
            plate_select,
            pixels: Vec::new(),
            platesize: 0,
        };

        host.set_number("numplates", globe.plates.len() as f64)?;
        host.set_plate_frames(globe.frames());

        info!("globe {}: {} plates", name, globe.plates.len());

        Ok(globe)
    }

    /// Returns the plate frames for the script helper registry.
    pub fn frames(&self) -> Vec<PlateFrame> {
        self.plates
            .iter()
            .map(|p| PlateFrame {
                basis: p.basis,
                dist: p.dist,
            })
            .collect()
    }

    /// Reallocates the pixel storage for the given plate size. The previous
    /// contents are discarded.
    pub fn resize(&mut self, platesize: usize) {
        self.platesize = platesize;
        self.pixels = vec![0u8; self.plates.len() * platesize * platesize];
    }

    /// Returns the flat index of a plate texel within the pixel storage.
    #[inline]
    pub fn pixel_index(&self, plate: usize, x: usize, y: usize) -> u32 {
        ((plate * self.platesize + y) * self.platesize + x) as u32
    }

    /// Returns the mutable pixel slot of a single plate render.
    pub fn plate_slot_mut(&mut self, plate: usize) -> &mut [u8] {
        let n = self.platesize * self.platesize;
        &mut self.pixels[plate * n..(plate + 1) * n]
    }

    /// Resolves the plate owning the given ray: the scripted `globe_plate`
    /// when the globe defines one, otherwise the plate whose forward vector
    /// lies closest by dot product. Ties break to the lowest index.
    ///
    /// # Arguments
    /// * `host` - The script host, used for the scripted selector.
    /// * `ray` - The direction to resolve.
    pub fn ray_to_plate_index(&self, host: &ScriptHost, ray: &DVec3) -> Result<Option<usize>> {
        if let Some(select) = &self.plate_select {
            let index = host.call_plate_select(select, ray)?;

            return Ok(usize::try_from(index)
                .ok()
                .filter(|i| *i < self.plates.len()));
        }

        let mut best = None;
        let mut best_dot = f64::NEG_INFINITY;

        for (i, plate) in self.plates.iter().enumerate() {
            let d = dot(ray, &plate.basis.forward);
            if d > best_dot {
                best_dot = d;
                best = Some(i);
            }
        }

        Ok(best)
    }

    /// Projects a ray onto the given plate, returning texture coordinates
    /// and whether they fall inside the plate.
    #[inline]
    pub fn ray_to_plate_uv(&self, plate: usize, ray: &DVec3) -> (f64, f64, bool) {
        let p = &self.plates[plate];
        plate_ray_to_uv(&p.basis, p.dist, ray)
    }

    /// Returns the world ray through the given plate texture coordinates.
    #[inline]
    pub fn plate_uv_to_ray(&self, plate: usize, u: f64, v: f64) -> DVec3 {
        let p = &self.plates[plate];
        plate_uv_to_ray(&p.basis, p.dist, u, v)
    }
}
