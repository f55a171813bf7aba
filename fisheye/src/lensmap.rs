/// The tint byte marking a pixel the rubix overlay leaves untouched.
pub const NO_TINT: u8 = 255;

/// The precomputed per-output-pixel assignment of a source globe texel.
///
/// Each entry is either None or a flat index into the globe pixel storage;
/// the indices are invalidated together with that storage on resize.
#[derive(Clone)]
pub struct LensMap {
    width_px: usize,
    height_px: usize,

    /// The source globe texel per output pixel.
    pub pixels: Vec<Option<u32>>,

    /// The rubix tint per output pixel: a plate index, or [`NO_TINT`].
    pub tints: Vec<u8>,
}

impl Default for LensMap {
    fn default() -> Self {
        Self::new_empty(0, 0)
    }
}

impl LensMap {
    /// Creates an unmapped lens map for the given viewport.
    ///
    /// # Arguments
    /// * `width_px` - The viewport width in pixels.
    /// * `height_px` - The viewport height in pixels.
    pub fn new_empty(width_px: usize, height_px: usize) -> Self {
        Self {
            width_px,
            height_px,
            pixels: vec![None; width_px * height_px],
            tints: vec![NO_TINT; width_px * height_px],
        }
    }

    /// Returns the viewport width in pixels.
    #[inline]
    pub fn width_px(&self) -> usize {
        self.width_px
    }

    /// Returns the viewport height in pixels.
    #[inline]
    pub fn height_px(&self) -> usize {
        self.height_px
    }

    /// Returns the flat index of an output pixel.
    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width_px + x
    }

    /// Resets every pixel to unmapped and untinted.
    pub fn clear(&mut self) {
        self.pixels.fill(None);
        self.tints.fill(NO_TINT);
    }

    /// Returns the number of mapped output pixels.
    pub fn num_mapped(&self) -> usize {
        self.pixels.iter().filter(|p| p.is_some()).count()
    }
}

/// The geometry of the rubix diagnostic overlay: per plate, a grid of
/// `numcells × numcells` tinted cells separated by untinted padding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RubixGrid {
    pub numcells: u32,
    pub cell: f64,
    pub pad: f64,
}

impl Default for RubixGrid {
    fn default() -> Self {
        Self {
            numcells: 10,
            cell: 4.0,
            pad: 1.0,
        }
    }
}

impl RubixGrid {
    /// Returns true when the plate texel lies on a padding line between
    /// grid cells.
    ///
    /// # Arguments
    /// * `platesize` - The plate edge length in pixels.
    /// * `px` - The texel x coordinate.
    /// * `py` - The texel y coordinate.
    #[inline]
    pub fn on_grid_line(&self, platesize: usize, px: usize, py: usize) -> bool {
        let unit = platesize as f64 / (self.numcells as f64 * (self.pad + self.cell) + self.pad);
        let period = self.pad + self.cell;

        let ux = px as f64 / unit;
        let uy = py as f64 / unit;

        ux % period < self.pad || uy % period < self.pad
    }
}
