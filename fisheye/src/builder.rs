use std::time::{Duration, Instant};

use nalgebra_glm::{normalize, DVec2};

use crate::{
    globe::Globe,
    lens::{Lens, MapKind},
    lensmap::{LensMap, RubixGrid, NO_TINT},
    quad::fill_quad,
    script::{Sample, ScriptHost},
    Error, Result,
};

/// Everything a build slice needs to make progress. The engine assembles
/// this from its own fields each frame.
pub struct BuildCtx<'a> {
    pub host: &'a ScriptHost,
    pub globe: &'a mut Globe,
    pub lens: &'a Lens,
    pub map: &'a mut LensMap,
    pub rubix: RubixGrid,
}

/// The resumable cursor of the forward sweep.
struct ForwardCursor {
    /// The plate currently being swept.
    plate: usize,

    /// The plate row currently being swept, counting down.
    py: isize,

    /// Screen samples of the cell boundaries at `v = (py + 0.5) / platesize`.
    hi: Vec<Option<DVec2>>,

    /// Screen samples of the cell boundaries at `v = (py - 0.5) / platesize`.
    lo: Vec<Option<DVec2>>,

    /// Whether `hi` holds samples for the current row.
    have_hi: bool,
}

impl ForwardCursor {
    fn new(platesize: usize) -> Self {
        Self {
            plate: 0,
            py: platesize as isize - 1,
            hi: vec![None; platesize + 1],
            lo: vec![None; platesize + 1],
            have_hi: false,
        }
    }
}

enum Cursor {
    Idle,
    Inverse { ly: isize },
    Forward(ForwardCursor),
}

/// The lens-map build state machine.
///
/// A build is started whenever an input parameter changes and then resumed
/// once per frame under a wall-clock budget until it runs out of rows. The
/// cursor lives here rather than in the build functions, so a resume picks
/// up exactly where the previous slice yielded.
pub struct LensMapBuilder {
    cursor: Cursor,
}

impl Default for LensMapBuilder {
    fn default() -> Self {
        Self { cursor: Cursor::Idle }
    }
}

impl LensMapBuilder {
    /// Positions the cursor for a fresh build of the given lens. A lens
    /// without a usable scale leaves the builder idle.
    ///
    /// # Arguments
    /// * `lens` - The lens about to be built.
    /// * `height_px` - The viewport height in pixels.
    /// * `platesize` - The plate edge length in pixels.
    pub fn start(&mut self, lens: &Lens, height_px: usize, platesize: usize) {
        self.cursor = if !lens.valid || lens.scale <= 0.0 || platesize == 0 {
            Cursor::Idle
        } else {
            match lens.map_kind {
                MapKind::Inverse => Cursor::Inverse {
                    ly: height_px as isize - 1,
                },
                MapKind::Forward => Cursor::Forward(ForwardCursor::new(platesize)),
                MapKind::None => Cursor::Idle,
            }
        };
    }

    /// Returns true while a build is in flight.
    pub fn working(&self) -> bool {
        !matches!(self.cursor, Cursor::Idle)
    }

    /// Runs build slices until the budget is exhausted or the map is done.
    /// Returns true when work remains for the next frame.
    ///
    /// At least one outer row is completed per resume, so a zero budget
    /// still makes progress. A script protocol violation aborts the build
    /// and surfaces as an error; the map keeps whatever was written so far.
    ///
    /// # Arguments
    /// * `ctx` - The build inputs assembled by the engine.
    /// * `budget` - The wall-clock slice for this frame.
    pub fn resume(&mut self, ctx: &mut BuildCtx, budget: Duration) -> Result<bool> {
        let start = Instant::now();

        loop {
            let step = match &mut self.cursor {
                Cursor::Idle => return Ok(false),
                Cursor::Inverse { ly } => {
                    if *ly < 0 {
                        Ok(true)
                    } else {
                        match inverse_row(ctx, *ly as usize) {
                            Ok(()) => {
                                *ly -= 1;
                                Ok(*ly < 0)
                            }
                            Err(e) => Err(e),
                        }
                    }
                }
                Cursor::Forward(cursor) => {
                    if cursor.plate >= ctx.globe.plates.len() {
                        Ok(true)
                    } else {
                        match forward_row(ctx, cursor) {
                            Ok(()) => {
                                cursor.py -= 1;
                                if cursor.py < 0 {
                                    cursor.plate += 1;
                                    cursor.py = ctx.globe.platesize as isize - 1;
                                    cursor.have_hi = false;
                                } else {
                                    // the lower boundary of this row is the
                                    // upper boundary of the next
                                    std::mem::swap(&mut cursor.hi, &mut cursor.lo);
                                    cursor.have_hi = true;
                                }

                                Ok(cursor.plate >= ctx.globe.plates.len())
                            }
                            Err(e) => Err(e),
                        }
                    }
                }
            };

            match step {
                Ok(true) => {
                    self.cursor = Cursor::Idle;
                    return Ok(false);
                }
                Ok(false) => {
                    if start.elapsed() > budget {
                        return Ok(true);
                    }
                }
                Err(e) => {
                    self.cursor = Cursor::Idle;
                    return Err(e);
                }
            }
        }
    }
}

/// Sweeps one output row of the inverse build: one script call per pixel.
fn inverse_row(ctx: &mut BuildCtx, ly: usize) -> Result<()> {
    let width_px = ctx.map.width_px();
    let height_px = ctx.map.height_px();
    let scale = ctx.lens.scale;
    let platesize = ctx.globe.platesize;

    let inverse = ctx
        .lens
        .inverse
        .as_ref()
        .ok_or_else(|| Error::Internal("inverse build without lens_inverse".to_owned()))?;

    for lx in 0..width_px {
        let x = (lx as f64 - width_px as f64 / 2.0) * scale;
        let y = -(ly as f64 - height_px as f64 / 2.0) * scale;

        let ray = match ctx.host.call_inverse(inverse, x, y)? {
            Sample::Hit(ray) => normalize(&ray),
            Sample::Skip => continue,
        };

        let plate = match ctx.globe.ray_to_plate_index(ctx.host, &ray)? {
            Some(plate) => plate,
            None => continue,
        };

        let (u, v, _) = ctx.globe.ray_to_plate_uv(plate, &ray);
        let px = texel(u, platesize);
        let py = texel(v, platesize);

        let index = ctx.map.index(lx, ly);
        ctx.map.pixels[index] = Some(ctx.globe.pixel_index(plate, px, py));
        ctx.map.tints[index] = if ctx.rubix.on_grid_line(platesize, px, py) {
            NO_TINT
        } else {
            ctx.globe.plates[plate].tint
        };

        ctx.globe.plates[plate].display = true;
    }

    Ok(())
}

/// Sweeps one plate row of the forward build: samples the cell boundaries
/// of the row and rasterizes one quad per owned texel.
fn forward_row(ctx: &mut BuildCtx, cursor: &mut ForwardCursor) -> Result<()> {
    let platesize = ctx.globe.platesize;
    let plate = cursor.plate;
    let py = cursor.py as usize;

    if !cursor.have_hi {
        sample_boundary_row(ctx, plate, (py as f64 + 0.5) / platesize as f64, &mut cursor.hi)?;
        cursor.have_hi = true;
    }

    sample_boundary_row(ctx, plate, (py as f64 - 0.5) / platesize as f64, &mut cursor.lo)?;

    for px in 0..platesize {
        // cull the overlap between plates to a single canonical owner
        let center = ctx
            .globe
            .plate_uv_to_ray(plate, px as f64 / platesize as f64, py as f64 / platesize as f64);
        if ctx.globe.ray_to_plate_index(ctx.host, &center)? != Some(plate) {
            continue;
        }

        let corners = match (
            cursor.hi[px],
            cursor.hi[px + 1],
            cursor.lo[px + 1],
            cursor.lo[px],
        ) {
            (Some(a), Some(b), Some(c), Some(d)) => [a, b, c, d],
            _ => continue,
        };

        let tint = if ctx.rubix.on_grid_line(platesize, px, py) {
            NO_TINT
        } else {
            ctx.globe.plates[plate].tint
        };

        if fill_quad(
            ctx.map,
            &corners,
            ctx.globe.pixel_index(plate, px, py),
            tint,
        ) {
            ctx.globe.plates[plate].display = true;
        }
    }

    Ok(())
}

/// Projects the `platesize + 1` cell boundaries of one plate row through
/// the forward map into screen space.
fn sample_boundary_row(
    ctx: &mut BuildCtx,
    plate: usize,
    v: f64,
    out: &mut [Option<DVec2>],
) -> Result<()> {
    let platesize = ctx.globe.platesize;
    let width_px = ctx.map.width_px() as f64;
    let height_px = ctx.map.height_px() as f64;
    let scale = ctx.lens.scale;

    let forward = ctx
        .lens
        .forward
        .as_ref()
        .ok_or_else(|| Error::Internal("forward build without lens_forward".to_owned()))?;

    for (j, sample) in out.iter_mut().enumerate() {
        let u = (j as f64 - 0.5) / platesize as f64;
        let ray = ctx.globe.plate_uv_to_ray(plate, u, v);

        *sample = match ctx.host.call_forward(forward, &ray)? {
            Sample::Hit(p) => Some(DVec2::new(
                p.x / scale + width_px / 2.0,
                -p.y / scale + height_px / 2.0,
            )),
            Sample::Skip => None,
        };
    }

    Ok(())
}

#[inline]
fn texel(coord: f64, platesize: usize) -> usize {
    let t = (coord * platesize as f64).floor();

    (t.max(0.0) as usize).min(platesize.saturating_sub(1))
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{lens::FovMode, script::ScriptHost};

    const CUBE: &str = r#"
        plates = {
            { {  0, 0,  1 }, { 0, 1,  0 }, 90 },
            { {  1, 0,  0 }, { 0, 1,  0 }, 90 },
            { { -1, 0,  0 }, { 0, 1,  0 }, 90 },
            { {  0, 0, -1 }, { 0, 1,  0 }, 90 },
            { {  0, 1,  0 }, { 0, 0, -1 }, 90 },
            { {  0, -1, 0 }, { 0, 0,  1 }, 90 },
        }
    "#;

    const RECTILINEAR: &str = r#"
        max_hfov = 179
        max_vfov = 179

        lens_inverse = function(x, y)
            return x, y, 1
        end

        lens_forward = function(x, y, z)
            if z <= 0 then
                return nil
            end
            return x / z, y / z
        end

        map = "lens_inverse"
    "#;

    struct Rig {
        host: ScriptHost,
        globe: Globe,
        lens: Lens,
        map: LensMap,
        builder: LensMapBuilder,
    }

    impl Rig {
        fn new(globe_code: &str, lens_code: &str, fov: FovMode, w: usize, h: usize) -> Self {
            let host = ScriptHost::new().unwrap();

            host.load_str("globe", globe_code).unwrap();
            let mut globe = Globe::from_host(&host, "globe").unwrap();
            globe.resize(w.min(h));

            host.load_str("lens", lens_code).unwrap();
            let mut lens = Lens::from_host(&host, "lens").unwrap();
            lens.compute_scale(&host, fov, w, h).unwrap();

            Self {
                host,
                globe,
                lens,
                map: LensMap::new_empty(w, h),
                builder: LensMapBuilder::default(),
            }
        }

        fn build(&mut self, budget: Duration) -> Result<bool> {
            let mut ctx = BuildCtx {
                host: &self.host,
                globe: &mut self.globe,
                lens: &self.lens,
                map: &mut self.map,
                rubix: RubixGrid::default(),
            };

            self.builder.resume(&mut ctx, budget)
        }

        fn start(&mut self) {
            let platesize = self.globe.platesize;
            self.builder.start(&self.lens, self.map.height_px(), platesize);
        }
    }

    #[test]
    fn test_inverse_build_center_pixel() {
        let mut rig = Rig::new(CUBE, RECTILINEAR, FovMode::Hfov(90f64.to_radians()), 64, 64);

        rig.start();
        assert!(!rig.build(Duration::from_secs(3600)).unwrap());
        assert!(!rig.builder.working());

        // the center pixel looks along +z onto the front plate center
        let center = rig.map.index(32, 32);
        let texel = rig.map.pixels[center].unwrap() as usize;
        let platesize = rig.globe.platesize;

        let plate = texel / (platesize * platesize);
        assert_eq!(plate, 0);

        let within = texel % (platesize * platesize);
        let (tx, ty) = (within % platesize, within / platesize);
        assert_eq!(tx, platesize / 2);
        assert_eq!(ty, platesize / 2);

        assert!(rig.globe.plates[0].display);
    }

    #[test]
    fn test_inverse_slicing_is_deterministic() {
        let mut oneshot = Rig::new(CUBE, RECTILINEAR, FovMode::Hfov(120f64.to_radians()), 48, 32);
        oneshot.start();
        assert!(!oneshot.build(Duration::from_secs(3600)).unwrap());

        let mut sliced = Rig::new(CUBE, RECTILINEAR, FovMode::Hfov(120f64.to_radians()), 48, 32);
        sliced.start();

        // a zero budget yields after every row
        let mut frames = 0;
        while sliced.build(Duration::ZERO).unwrap() {
            frames += 1;
            assert!(frames <= 64, "build does not terminate");
        }

        assert!(frames >= 2, "expected the build to be sliced");
        assert_eq!(oneshot.map.pixels, sliced.map.pixels);
        assert_eq!(oneshot.map.tints, sliced.map.tints);
    }

    #[test]
    fn test_display_flags_cover_wide_fov() {
        let mut rig = Rig::new(CUBE, RECTILINEAR, FovMode::Hfov(170f64.to_radians()), 64, 64);

        rig.start();
        assert!(!rig.build(Duration::from_secs(3600)).unwrap());

        // 170 degrees across a square viewport reaches front, right, left,
        // top and bottom, but never the back plate
        assert!(rig.globe.plates[0].display);
        assert!(rig.globe.plates[1].display);
        assert!(rig.globe.plates[2].display);
        assert!(!rig.globe.plates[3].display);
        assert!(rig.globe.plates[4].display);
        assert!(rig.globe.plates[5].display);
    }

    #[test]
    fn test_inverse_skip_leaves_pixels_unmapped() {
        let lens = r#"
            max_hfov = 360
            max_vfov = 360

            lens_inverse = function(x, y)
                if x * x + y * y > 1 then
                    return nil
                end
                return x, y, sqrt(1 - x * x - y * y)
            end

            lens_forward = function(x, y, z)
                if z < 0 then
                    return nil
                end
                return x, y
            end
        "#;

        let mut rig = Rig::new(CUBE, lens, FovMode::Hfov(180f64.to_radians()), 32, 32);

        rig.start();
        assert!(!rig.build(Duration::from_secs(3600)).unwrap());

        // the corners lie outside the image circle
        assert_eq!(rig.map.pixels[rig.map.index(0, 0)], None);
        assert_eq!(rig.map.pixels[rig.map.index(31, 31)], None);
        assert!(rig.map.pixels[rig.map.index(16, 16)].is_some());
    }

    #[test]
    fn test_inverse_protocol_violation_aborts() {
        let lens = r#"
            max_hfov = 179
            max_vfov = 179

            lens_inverse = function(x, y)
                if x > 0.2 then
                    return "boom"
                end
                return x, y, 1
            end

            lens_forward = function(x, y, z)
                return x / z, y / z
            end
        "#;

        let mut rig = Rig::new(CUBE, lens, FovMode::Hfov(90f64.to_radians()), 32, 32);

        rig.start();
        assert!(rig.build(Duration::from_secs(3600)).is_err());
        assert!(!rig.builder.working());
    }

    const FORWARD_ONLY: &str = r#"
        max_hfov = 360
        max_vfov = 360

        lens_forward = function(x, y, z)
            local r = sqrt(x * x + y * y)
            local theta = atan2(r, z)
            if r < 1e-12 then
                if z < 0 then
                    return nil
                end
                return 0, 0
            end
            return x / r * theta, y / r * theta
        end

        lens_width = 2 * pi
        lens_height = 2 * pi
    "#;

    #[test]
    fn test_forward_build_covers_and_owns_uniquely() {
        let mut rig = Rig::new(CUBE, FORWARD_ONLY, FovMode::Fit, 64, 64);
        assert_eq!(rig.lens.map_kind, MapKind::Forward);

        rig.start();
        assert!(!rig.build(Duration::from_secs(3600)).unwrap());

        // every plate contributes somewhere on a full-sphere lens
        for plate in rig.globe.plates.iter() {
            assert!(plate.display);
        }

        // the center maps to the front plate
        let center = rig.map.pixels[rig.map.index(32, 32)].unwrap() as usize;
        let platesize = rig.globe.platesize;
        assert_eq!(center / (platesize * platesize), 0);

        // a healthy share of the viewport is covered
        assert!(rig.map.num_mapped() > 64 * 64 / 2);
    }

    #[test]
    fn test_forward_slicing_is_deterministic() {
        let mut oneshot = Rig::new(CUBE, FORWARD_ONLY, FovMode::Fit, 40, 40);
        oneshot.start();
        assert!(!oneshot.build(Duration::from_secs(3600)).unwrap());

        let mut sliced = Rig::new(CUBE, FORWARD_ONLY, FovMode::Fit, 40, 40);
        sliced.start();

        let mut frames = 0;
        while sliced.build(Duration::ZERO).unwrap() {
            frames += 1;
            assert!(frames <= 6 * 40 + 6, "build does not terminate");
        }

        assert!(frames >= 2);
        assert_eq!(oneshot.map.pixels, sliced.map.pixels);
        assert_eq!(oneshot.map.tints, sliced.map.tints);
    }

    #[test]
    fn test_idle_builder_reports_done() {
        let mut rig = Rig::new(CUBE, RECTILINEAR, FovMode::Hfov(90f64.to_radians()), 16, 16);

        // never started: nothing to do
        assert!(!rig.build(Duration::ZERO).unwrap());
        assert!(!rig.builder.working());
    }
}
