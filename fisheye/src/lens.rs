use std::path::Path;

use log::info;

use math::latlon_to_ray;

use crate::{
    script::{Sample, ScriptFn, ScriptHost},
    Error, Result,
};

/// Which scripted map the lens-map builder drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapKind {
    None,
    Inverse,
    Forward,
}

/// The active field-of-view request. Exactly one mode is active at a time;
/// setting a new one replaces the previous.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FovMode {
    /// An explicit horizontal field of view in radians across the viewport
    /// width.
    Hfov(f64),

    /// An explicit vertical field of view in radians across the viewport
    /// height.
    Vfov(f64),

    /// Fit the lens width to the viewport width.
    HFit,

    /// Fit the lens height to the viewport height.
    VFit,

    /// Fit whichever lens extent the viewport constrains tighter.
    Fit,
}

/// The parsed lens script state plus the derived pixel scale.
pub struct Lens {
    pub name: String,
    pub valid: bool,
    pub map_kind: MapKind,

    pub inverse: Option<ScriptFn>,
    pub forward: Option<ScriptFn>,

    /// The lens domain extents in lens units, 0 when the script does not
    /// provide them.
    pub width: f64,
    pub height: f64,

    /// The feasible field bounds in radians, 0 when not provided.
    pub max_hfov: f64,
    pub max_vfov: f64,

    /// Lens units per output pixel; the lens map is only built while this
    /// is positive.
    pub scale: f64,
}

/// The globals a lens script may define; cleared before each load.
const LENS_GLOBALS: [&str; 8] = [
    "lens_inverse",
    "lens_forward",
    "map",
    "max_hfov",
    "max_vfov",
    "lens_width",
    "lens_height",
    "onload",
];

impl Default for Lens {
    fn default() -> Self {
        Self {
            name: String::new(),
            valid: false,
            map_kind: MapKind::None,
            inverse: None,
            forward: None,
            width: 0.0,
            height: 0.0,
            max_hfov: 0.0,
            max_vfov: 0.0,
            scale: -1.0,
        }
    }
}

impl Lens {
    /// Loads a lens script and resolves its globals. Returns the lens and
    /// the optional `onload` console command.
    ///
    /// # Arguments
    /// * `host` - The script host to load into.
    /// * `dir` - The lens script directory.
    /// * `name` - The lens name without the `.lua` extension.
    /// * `numplates` - The plate count of the current globe, published to
    ///   the script before it runs.
    pub fn load(
        host: &ScriptHost,
        dir: &Path,
        name: &str,
        numplates: usize,
    ) -> Result<(Lens, Option<String>)> {
        for global in LENS_GLOBALS {
            host.clear_global(global)?;
        }
        host.set_number("numplates", numplates as f64)?;

        let path = dir.join(format!("{}.lua", name));
        host.load_file(&path)?;

        let lens = Self::from_host(host, name)?;
        let onload = host.get_string("onload")?;

        info!("lens {}: {:?} map", name, lens.map_kind);

        Ok((lens, onload))
    }

    /// Builds the lens from the globals already present in the host.
    pub fn from_host(host: &ScriptHost, name: &str) -> Result<Lens> {
        let inverse = host.get_function("lens_inverse")?;
        let forward = host.get_function("lens_forward")?;

        let preference = host.get_string("map")?;
        let map_kind = match preference.as_deref() {
            Some("lens_inverse") if inverse.is_some() => MapKind::Inverse,
            Some("lens_forward") if forward.is_some() => MapKind::Forward,
            _ => {
                if inverse.is_some() {
                    MapKind::Inverse
                } else if forward.is_some() {
                    MapKind::Forward
                } else {
                    MapKind::None
                }
            }
        };

        if map_kind == MapKind::None {
            return Err(Error::Contract(format!(
                "lens {} defines neither lens_inverse nor lens_forward",
                name
            )));
        }

        Ok(Lens {
            name: name.to_owned(),
            valid: true,
            map_kind,
            inverse,
            forward,
            width: host.get_number("lens_width")?.unwrap_or(0.0),
            height: host.get_number("lens_height")?.unwrap_or(0.0),
            max_hfov: host.get_number("max_hfov")?.unwrap_or(0.0).to_radians(),
            max_vfov: host.get_number("max_vfov")?.unwrap_or(0.0).to_radians(),
            scale: -1.0,
        })
    }

    /// Determines the lens scale for the given fov request and viewport.
    /// On failure the scale is left non-positive and an error describes the
    /// infeasibility; the caller logs it and renders a blank viewport.
    ///
    /// # Arguments
    /// * `host` - The script host for forward-map probes.
    /// * `mode` - The active fov request.
    /// * `width_px` - The viewport width in pixels.
    /// * `height_px` - The viewport height in pixels.
    pub fn compute_scale(
        &mut self,
        host: &ScriptHost,
        mode: FovMode,
        width_px: usize,
        height_px: usize,
    ) -> Result<()> {
        self.scale = -1.0;

        if width_px == 0 || height_px == 0 {
            return Err(Error::Fov("viewport has no pixels".to_owned()));
        }

        match mode {
            FovMode::Hfov(fov) => self.explicit_scale(host, fov, self.max_hfov, width_px, true),
            FovMode::Vfov(fov) => self.explicit_scale(host, fov, self.max_vfov, height_px, false),
            FovMode::HFit => self.fit_width(width_px),
            FovMode::VFit => self.fit_height(height_px),
            FovMode::Fit => {
                let has_width = self.width > 0.0;
                let has_height = self.height > 0.0;

                match (has_width, has_height) {
                    (true, true) => {
                        // the axis with the larger extent-per-pixel ratio is
                        // the one the viewport constrains tighter
                        if self.width / self.height > width_px as f64 / height_px as f64 {
                            self.fit_width(width_px)
                        } else {
                            self.fit_height(height_px)
                        }
                    }
                    (true, false) => self.fit_width(width_px),
                    (false, true) => self.fit_height(height_px),
                    (false, false) => Err(Error::Fov(format!(
                        "lens {} provides neither lens_width nor lens_height",
                        self.name
                    ))),
                }
            }
        }
    }

    fn explicit_scale(
        &mut self,
        host: &ScriptHost,
        fov: f64,
        max_fov: f64,
        framesize: usize,
        horizontal: bool,
    ) -> Result<()> {
        if self.max_hfov <= 0.0 || self.max_vfov <= 0.0 {
            return Err(Error::Fov(format!(
                "lens {} declares no max_hfov/max_vfov; explicit fov is unavailable",
                self.name
            )));
        }

        if fov > max_fov {
            return Err(Error::Fov(format!(
                "fov {:.1} degrees exceeds the lens limit of {:.1} degrees",
                fov.to_degrees(),
                max_fov.to_degrees()
            )));
        }

        let forward = self.forward.as_ref().ok_or_else(|| {
            Error::Fov(format!(
                "lens {} has no lens_forward; explicit fov is unavailable",
                self.name
            ))
        })?;

        let probe = if horizontal {
            latlon_to_ray(0.0, fov / 2.0)
        } else {
            latlon_to_ray(fov / 2.0, 0.0)
        };

        match host.call_forward(forward, &probe)? {
            Sample::Hit(p) => {
                let edge = if horizontal { p.x.abs() } else { p.y.abs() };
                self.scale = edge / (framesize as f64 / 2.0);

                Ok(())
            }
            Sample::Skip => Err(Error::Fov(format!(
                "lens {} cannot project the requested fov edge",
                self.name
            ))),
        }
    }

    fn fit_width(&mut self, width_px: usize) -> Result<()> {
        if self.width <= 0.0 {
            return Err(Error::Fov(format!(
                "lens {} provides no lens_width to fit",
                self.name
            )));
        }

        self.scale = self.width / width_px as f64;

        Ok(())
    }

    fn fit_height(&mut self, height_px: usize) -> Result<()> {
        if self.height <= 0.0 {
            return Err(Error::Fov(format!(
                "lens {} provides no lens_height to fit",
                self.name
            )));
        }

        self.scale = self.height / height_px as f64;

        Ok(())
    }
}
