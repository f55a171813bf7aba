use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use log::{error, info, warn};
use nalgebra_glm::DVec3;

use math::ViewBasis;

use crate::{
    builder::{BuildCtx, LensMapBuilder},
    globe::{Globe, MAX_PLATES},
    lens::{FovMode, Lens},
    lensmap::{LensMap, RubixGrid, NO_TINT},
    palette::{build_tint_tables, Palette, TintTable},
    pcx::write_pcx,
    script::ScriptHost,
    Error, Result,
};

/// The palette index marking texels outside a plate's Voronoi region in
/// saved globe screenshots.
const MARGIN_COLOR: u8 = 0xFE;

/// The locations of the lens and globe script directories.
#[derive(Clone, Debug)]
pub struct ScriptDirs {
    pub lenses: PathBuf,
    pub globes: PathBuf,
}

impl ScriptDirs {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(lenses: P, globes: Q) -> Self {
        Self {
            lenses: lenses.into(),
            globes: globes.into(),
        }
    }

    /// The conventional layout: `lenses/` and `globes/` next to the game
    /// directory.
    pub fn from_game_dir(gamedir: &Path) -> Self {
        Self {
            lenses: gamedir.join("..").join("lenses"),
            globes: gamedir.join("..").join("globes"),
        }
    }
}

/// The per-frame inputs read from the host.
pub struct FrameInput {
    pub width_px: usize,
    pub height_px: usize,

    /// The camera view angles (pitch, yaw, roll) in radians.
    pub view_angles: DVec3,
}

/// One perspective render request issued to the host renderer.
pub struct PlateView {
    pub forward: DVec3,
    pub right: DVec3,
    pub up: DVec3,

    /// The square field of view in radians.
    pub fov: f64,
}

/// The host renderer contract: a single perspective view rendered into a
/// square palette-indexed buffer.
pub trait PlateRenderer {
    /// Renders the view into the `size × size` row-major target.
    ///
    /// # Arguments
    /// * `view` - The world-space camera frame and field of view.
    /// * `size` - The edge length of the target in pixels.
    /// * `target` - The palette-indexed pixels to fill.
    fn render_plate(&mut self, view: &PlateView, size: usize, target: &mut [u8]) -> Result<()>;
}

#[derive(Clone, Copy, Default)]
struct ChangeFlags {
    size: bool,
    fov: bool,
    lens: bool,
    globe: bool,
}

impl ChangeFlags {
    fn any(&self) -> bool {
        self.size || self.fov || self.lens || self.globe
    }

    fn clear(&mut self) {
        *self = Default::default();
    }
}

struct SaveGlobeRequest {
    prefix: String,
    with_margins: bool,
}

/// The fisheye subsystem: globe, lens, lens map and the per-frame
/// orchestration that ties them to the host renderer.
///
/// All console commands are bound to methods; [`FisheyeEngine::exec`]
/// dispatches the textual form used by key bindings and lens `onload`
/// strings.
pub struct FisheyeEngine {
    host: ScriptHost,
    dirs: ScriptDirs,

    palette: Palette,
    tints: [TintTable; MAX_PLATES],

    globe: Globe,
    lens: Lens,
    map: LensMap,
    builder: LensMapBuilder,
    working: bool,

    enabled: bool,
    rubix: bool,
    grid: RubixGrid,
    fov: FovMode,
    budget: Duration,
    background: u8,

    width_px: usize,
    height_px: usize,
    changed: ChangeFlags,
    save_request: Option<SaveGlobeRequest>,
}

impl FisheyeEngine {
    /// Creates an engine with no lens or globe loaded.
    ///
    /// # Arguments
    /// * `palette` - The active color palette; the tint tables are derived
    ///   from it once.
    /// * `dirs` - The script directories.
    pub fn new(palette: Palette, dirs: ScriptDirs) -> Result<Self> {
        let tints = build_tint_tables(&palette);

        Ok(Self {
            host: ScriptHost::new()?,
            dirs,
            palette,
            tints,
            globe: Globe::default(),
            lens: Lens::default(),
            map: LensMap::default(),
            builder: LensMapBuilder::default(),
            working: false,
            enabled: true,
            rubix: false,
            grid: RubixGrid::default(),
            fov: FovMode::Hfov(std::f64::consts::PI),
            budget: Duration::from_secs_f64(1.0 / 60.0),
            background: 0,
            width_px: 0,
            height_px: 0,
            changed: ChangeFlags::default(),
            save_request: None,
        })
    }

    pub fn lens(&self) -> &Lens {
        &self.lens
    }

    pub fn globe(&self) -> &Globe {
        &self.globe
    }

    pub fn lens_map(&self) -> &LensMap {
        &self.map
    }

    /// Returns true while a lens-map build is in flight.
    pub fn working(&self) -> bool {
        self.working
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Overrides the per-frame build budget (default 1/60 s).
    pub fn set_build_budget(&mut self, budget: Duration) {
        self.budget = budget;
    }

    /// Overrides the palette index the viewport is cleared to.
    pub fn set_background(&mut self, background: u8) {
        self.background = background;
    }

    /// Toggles the whole subsystem. While disabled, frames are left to the
    /// host's own rendering.
    pub fn cmd_fisheye(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Loads a lens script and runs its `onload` command.
    pub fn cmd_lens(&mut self, name: &str) -> Result<()> {
        match Lens::load(&self.host, &self.dirs.lenses, name, self.globe.plates.len()) {
            Ok((lens, onload)) => {
                self.lens = lens;
                self.changed.lens = true;

                if let Some(command) = onload {
                    self.exec(&command)?;
                }

                Ok(())
            }
            Err(e) => {
                self.lens = Lens::default();
                self.changed.lens = true;
                warn!("lens {}: {}", name, e);

                Err(e)
            }
        }
    }

    /// Loads a globe script. The loaded lens is kept; it is re-evaluated on
    /// the next frame against the new plate count.
    pub fn cmd_globe(&mut self, name: &str) -> Result<()> {
        match Globe::load(&self.host, &self.dirs.globes, name) {
            Ok(mut globe) => {
                globe.resize(self.width_px.min(self.height_px));
                self.globe = globe;
                self.changed.globe = true;

                Ok(())
            }
            Err(e) => {
                self.globe = Globe::default();
                self.changed.globe = true;
                warn!("globe {}: {}", name, e);

                Err(e)
            }
        }
    }

    /// Requests an explicit horizontal field of view in degrees.
    pub fn cmd_hfov(&mut self, degrees: f64) {
        self.fov = FovMode::Hfov(degrees.to_radians());
        self.changed.fov = true;
    }

    /// Requests an explicit vertical field of view in degrees.
    pub fn cmd_vfov(&mut self, degrees: f64) {
        self.fov = FovMode::Vfov(degrees.to_radians());
        self.changed.fov = true;
    }

    pub fn cmd_hfit(&mut self) {
        self.fov = FovMode::HFit;
        self.changed.fov = true;
    }

    pub fn cmd_vfit(&mut self) {
        self.fov = FovMode::VFit;
        self.changed.fov = true;
    }

    pub fn cmd_fit(&mut self) {
        self.fov = FovMode::Fit;
        self.changed.fov = true;
    }

    /// Toggles the rubix overlay. The tints are part of the lens map, so
    /// toggling does not trigger a rebuild.
    pub fn cmd_rubix(&mut self) {
        self.rubix = !self.rubix;
        info!("rubix {}", if self.rubix { "on" } else { "off" });
    }

    /// Reconfigures the rubix grid geometry.
    pub fn cmd_rubixgrid(&mut self, numcells: u32, cell: f64, pad: f64) {
        self.grid = RubixGrid {
            numcells,
            cell,
            pad,
        };
        self.changed.lens = true;
    }

    /// Requests a screenshot of every plate on the next frame.
    pub fn cmd_saveglobe(&mut self, prefix: &str, with_margins: bool) {
        self.save_request = Some(SaveGlobeRequest {
            prefix: prefix.to_owned(),
            with_margins,
        });
    }

    /// Dumps the active palette as a raw 768-byte file named `palette`.
    pub fn cmd_dumppal(&self) -> Result<()> {
        self.palette.dump_file("palette")?;
        info!("wrote palette");

        Ok(())
    }

    /// Dispatches a console command line.
    pub fn exec(&mut self, line: &str) -> Result<()> {
        let mut parts = line.split_whitespace();
        let command = match parts.next() {
            Some(c) => c,
            None => return Ok(()),
        };
        let args: Vec<&str> = parts.collect();

        match command {
            "fisheye" => {
                let on: i32 = parse_arg(&args, 0, "fisheye <0|1>")?;
                self.cmd_fisheye(on != 0);
                Ok(())
            }
            "lens" => self.cmd_lens(name_arg(&args, "lens <name>")?),
            "globe" => self.cmd_globe(name_arg(&args, "globe <name>")?),
            "hfov" => {
                let degrees: f64 = parse_arg(&args, 0, "hfov <degrees>")?;
                self.cmd_hfov(degrees);
                Ok(())
            }
            "vfov" => {
                let degrees: f64 = parse_arg(&args, 0, "vfov <degrees>")?;
                self.cmd_vfov(degrees);
                Ok(())
            }
            "hfit" => {
                self.cmd_hfit();
                Ok(())
            }
            "vfit" => {
                self.cmd_vfit();
                Ok(())
            }
            "fit" => {
                self.cmd_fit();
                Ok(())
            }
            "rubix" => {
                self.cmd_rubix();
                Ok(())
            }
            "rubixgrid" => {
                let numcells: u32 = parse_arg(&args, 0, "rubixgrid <numcells> <cell> <pad>")?;
                let cell: f64 = parse_arg(&args, 1, "rubixgrid <numcells> <cell> <pad>")?;
                let pad: f64 = parse_arg(&args, 2, "rubixgrid <numcells> <cell> <pad>")?;
                self.cmd_rubixgrid(numcells, cell, pad);
                Ok(())
            }
            "saveglobe" => {
                let prefix = name_arg(&args, "saveglobe <name> [with_margins]")?;
                let with_margins = match args.get(1) {
                    Some(v) => v
                        .parse::<i32>()
                        .map_err(|_| Error::Contract("saveglobe: with_margins must be 0 or 1".to_owned()))?
                        != 0,
                    None => false,
                };
                self.cmd_saveglobe(prefix, with_margins);
                Ok(())
            }
            "dumppal" => self.cmd_dumppal(),
            _ => Err(Error::Contract(format!("unknown command: {}", command))),
        }
    }

    /// Writes the persistent settings in their canonical order.
    pub fn write_config<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self.fov {
            FovMode::Hfov(r) => writeln!(writer, "hfov {}", fmt_degrees(r))?,
            FovMode::Vfov(r) => writeln!(writer, "vfov {}", fmt_degrees(r))?,
            FovMode::HFit => writeln!(writer, "hfit")?,
            FovMode::VFit => writeln!(writer, "vfit")?,
            FovMode::Fit => writeln!(writer, "fit")?,
        }

        writeln!(writer, "fisheye {}", i32::from(self.enabled))?;
        writeln!(writer, "lens \"{}\"", self.lens.name)?;
        writeln!(writer, "globe \"{}\"", self.globe.name)?;
        writeln!(
            writer,
            "rubixgrid {} {} {}",
            self.grid.numcells, self.grid.cell, self.grid.pad
        )?;

        Ok(())
    }

    /// Runs one frame: change detection, build slice, plate renders and the
    /// final composite into the caller's viewport buffer.
    ///
    /// # Arguments
    /// * `input` - The viewport size and camera angles for this frame.
    /// * `renderer` - The host renderer drawing the plate views.
    /// * `out` - The palette-indexed viewport, `width_px × height_px`
    ///   row-major.
    pub fn run_frame(
        &mut self,
        input: &FrameInput,
        renderer: &mut dyn PlateRenderer,
        out: &mut [u8],
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let (w, h) = (input.width_px, input.height_px);
        if out.len() != w * h {
            return Err(Error::Contract(format!(
                "viewport buffer of {} bytes does not match {}x{}",
                out.len(),
                w,
                h
            )));
        }

        if w != self.width_px || h != self.height_px {
            self.width_px = w;
            self.height_px = h;
            self.globe.resize(w.min(h));
            self.map = LensMap::new_empty(w, h);
            self.changed.size = true;
        }

        if self.changed.any() {
            self.refresh_lens();
            self.map.clear();
            for plate in self.globe.plates.iter_mut() {
                plate.display = false;
            }

            self.builder.start(&self.lens, h, self.globe.platesize);
            self.working = self.resume_build();
        } else if self.working {
            self.working = self.resume_build();
        }

        self.render_plates(input, renderer)?;

        if let Some(request) = self.save_request.take() {
            if let Err(e) = self.save_globe(&request) {
                warn!("saveglobe {}: {}", request.prefix, e);
            }
        }

        self.composite(out);
        self.changed.clear();

        Ok(())
    }

    /// Renders every displayed plate with the plate frame composed onto the
    /// camera basis.
    fn render_plates(
        &mut self,
        input: &FrameInput,
        renderer: &mut dyn PlateRenderer,
    ) -> Result<()> {
        let cam = ViewBasis::from_angles(
            input.view_angles.x,
            input.view_angles.y,
            input.view_angles.z,
        );
        let size = self.globe.platesize;

        for i in 0..self.globe.plates.len() {
            let (display, fov, basis) = {
                let plate = &self.globe.plates[i];
                (plate.display, plate.fov, plate.basis)
            };

            if !display {
                continue;
            }

            let frame = cam.compose(&basis);
            let view = PlateView {
                forward: frame.forward,
                right: frame.right,
                up: frame.up,
                fov,
            };

            renderer.render_plate(&view, size, self.globe.plate_slot_mut(i))?;
        }

        Ok(())
    }

    /// Clears the viewport to the background and copies every mapped globe
    /// texel through the lens map, applying rubix tints when active.
    pub fn composite(&self, out: &mut [u8]) {
        out.fill(self.background);

        for (i, source) in self.map.pixels.iter().enumerate() {
            if let Some(index) = source {
                let color = self.globe.pixels[*index as usize];
                let tint = self.map.tints[i];

                out[i] = if self.rubix && tint != NO_TINT {
                    self.tints[tint as usize][color as usize]
                } else {
                    color
                };
            }
        }
    }

    fn resume_build(&mut self) -> bool {
        let mut ctx = BuildCtx {
            host: &self.host,
            globe: &mut self.globe,
            lens: &self.lens,
            map: &mut self.map,
            rubix: self.grid,
        };

        match self.builder.resume(&mut ctx, self.budget) {
            Ok(working) => working,
            Err(e) => {
                error!("lens {}: build aborted: {}", self.lens.name, e);
                self.lens.valid = false;

                false
            }
        }
    }

    /// Re-evaluates the lens script against the current globe and derives
    /// the scale. Runs on every rebuild because lens globals may depend on
    /// `numplates`; the `onload` command is only honored by `cmd_lens`.
    fn refresh_lens(&mut self) {
        if !self.lens.name.is_empty() {
            let name = self.lens.name.clone();

            match Lens::load(&self.host, &self.dirs.lenses, &name, self.globe.plates.len()) {
                Ok((lens, _onload)) => self.lens = lens,
                Err(e) => {
                    warn!("lens {}: {}", name, e);
                    self.lens = Lens::default();
                }
            }
        }

        if self.lens.valid {
            if let Err(e) =
                self.lens
                    .compute_scale(&self.host, self.fov, self.width_px, self.height_px)
            {
                warn!("lens {}: {}", self.lens.name, e);
            }
        }
    }

    /// Writes each plate render as `<prefix><index>.pcx`, masking texels
    /// owned by other plates unless margins were requested.
    fn save_globe(&self, request: &SaveGlobeRequest) -> Result<()> {
        let ps = self.globe.platesize;
        if ps == 0 || !self.globe.valid {
            return Err(Error::Internal("no globe render to save".to_owned()));
        }

        for i in 0..self.globe.plates.len() {
            let n = ps * ps;
            let mut pixels = self.globe.pixels[i * n..(i + 1) * n].to_vec();

            if !request.with_margins {
                for y in 0..ps {
                    for x in 0..ps {
                        let ray = self.globe.plate_uv_to_ray(
                            i,
                            (x as f64 + 0.5) / ps as f64,
                            (y as f64 + 0.5) / ps as f64,
                        );

                        if self.globe.ray_to_plate_index(&self.host, &ray)? != Some(i) {
                            pixels[y * ps + x] = MARGIN_COLOR;
                        }
                    }
                }
            }

            let path = format!("{}{}.pcx", request.prefix, i);
            let file = File::create(&path)?;
            write_pcx(&mut BufWriter::new(file), ps, ps, &pixels, &self.palette)?;

            info!("wrote {}", path);
        }

        Ok(())
    }
}

/// Formats an angle in degrees for persistence, absorbing the sub-ulp
/// drift of the radian round trip so a rewritten config stays stable.
fn fmt_degrees(radians: f64) -> f64 {
    (radians.to_degrees() * 1e9).round() / 1e9
}

fn parse_arg<T: FromStr>(args: &[&str], index: usize, usage: &str) -> Result<T> {
    args.get(index)
        .and_then(|raw| raw.parse::<T>().ok())
        .ok_or_else(|| Error::Contract(format!("usage: {}", usage)))
}

fn name_arg<'a>(args: &[&'a str], usage: &str) -> Result<&'a str> {
    args.first()
        .map(|raw| raw.trim_matches('"'))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::Contract(format!("usage: {}", usage)))
}
