use std::{fs::File, io::BufWriter, io::Write, path::Path};

use crate::Result;

use crate::globe::MAX_PLATES;

/// A 256-entry RGB palette.
#[derive(Clone, PartialEq, Eq)]
pub struct Palette {
    pub colors: [[u8; 3]; 256],
}

/// A 256 -> 256 color remap table.
pub type TintTable = [u8; 256];

/// The six fixed hues plates are tinted towards by the rubix overlay.
pub const TINT_HUES: [[u8; 3]; MAX_PLATES] = [
    [255, 0, 0],
    [0, 255, 0],
    [0, 0, 255],
    [255, 255, 0],
    [0, 255, 255],
    [255, 0, 255],
];

impl Default for Palette {
    fn default() -> Self {
        Self::built_in()
    }
}

impl Palette {
    /// Creates a palette from a raw color table.
    pub fn new(colors: [[u8; 3]; 256]) -> Self {
        Self { colors }
    }

    /// The built-in deterministic palette: a 6x6x6 color cube followed by a
    /// gray ramp.
    pub fn built_in() -> Self {
        let mut colors = [[0u8; 3]; 256];

        for (i, color) in colors.iter_mut().enumerate().take(216) {
            let r = i / 36;
            let g = (i / 6) % 6;
            let b = i % 6;

            *color = [(r * 51) as u8, (g * 51) as u8, (b * 51) as u8];
        }

        for (i, color) in colors.iter_mut().enumerate().skip(216) {
            let v = ((i - 216) * 255 / 39) as u8;
            *color = [v, v, v];
        }

        Self { colors }
    }

    /// Returns the palette index whose color lies closest to the given RGB
    /// value by squared distance.
    ///
    /// # Arguments
    /// * `rgb` - The color to match.
    pub fn nearest(&self, rgb: [u8; 3]) -> u8 {
        let mut best = 0usize;
        let mut best_dist = i32::MAX;

        for (i, color) in self.colors.iter().enumerate() {
            let dr = color[0] as i32 - rgb[0] as i32;
            let dg = color[1] as i32 - rgb[1] as i32;
            let db = color[2] as i32 - rgb[2] as i32;

            let dist = dr * dr + dg * dg + db * db;
            if dist < best_dist {
                best_dist = dist;
                best = i;
            }
        }

        best as u8
    }

    /// Writes the raw 768-byte color table to the given writer.
    pub fn dump<W: Write>(&self, writer: &mut W) -> Result<()> {
        for color in self.colors.iter() {
            writer.write_all(color)?;
        }

        Ok(())
    }

    /// Writes the raw color table to the given file.
    ///
    /// # Arguments
    /// * `path` - The file to write.
    pub fn dump_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.dump(&mut BufWriter::new(file))
    }
}

/// Builds the remap table for one tint hue: each color is replaced by the
/// palette index closest to its 50/50 blend with the hue.
///
/// # Arguments
/// * `palette` - The active palette.
/// * `hue` - The hue to tint towards.
pub fn build_tint_table(palette: &Palette, hue: [u8; 3]) -> TintTable {
    let mut table = [0u8; 256];

    for (i, entry) in table.iter_mut().enumerate() {
        let color = palette.colors[i];
        let blended = [
            ((color[0] as u16 + hue[0] as u16) / 2) as u8,
            ((color[1] as u16 + hue[1] as u16) / 2) as u8,
            ((color[2] as u16 + hue[2] as u16) / 2) as u8,
        ];

        *entry = palette.nearest(blended);
    }

    table
}

/// Builds the remap tables for all six plate tints.
pub fn build_tint_tables(palette: &Palette) -> [TintTable; MAX_PLATES] {
    let mut tables = [[0u8; 256]; MAX_PLATES];

    for (table, hue) in tables.iter_mut().zip(TINT_HUES.iter()) {
        *table = build_tint_table(palette, *hue);
    }

    tables
}

#[cfg(test)]
mod test {
    use super::*;

    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// A random but reproducible palette for remap tests.
    fn random_palette() -> Palette {
        let mut r = ChaCha8Rng::seed_from_u64(2);
        let mut colors = [[0u8; 3]; 256];

        for color in colors.iter_mut() {
            *color = [
                r.gen_range(0..0x100) as u8,
                r.gen_range(0..0x100) as u8,
                r.gen_range(0..0x100) as u8,
            ];
        }

        Palette::new(colors)
    }

    #[test]
    fn test_nearest_exact_match() {
        let palette = Palette::built_in();

        for i in [0usize, 7, 42, 215, 255] {
            let rgb = palette.colors[i];
            let found = palette.nearest(rgb) as usize;

            // an exact color maps to an entry with the same color
            assert_eq!(palette.colors[found], rgb);
        }
    }

    #[test]
    fn test_tint_moves_towards_hue() {
        let palette = random_palette();
        let table = build_tint_table(&palette, [255, 0, 0]);

        let mut moved = 0usize;
        for i in 0..256 {
            let before = palette.colors[i];
            let after = palette.colors[table[i] as usize];

            // the remapped color is never less red than a full blend away
            assert!(after[0] as i32 >= before[0] as i32 / 2 - 96);

            if after != before {
                moved += 1;
            }
        }

        // tinting is not the identity on a spread palette
        assert!(moved > 128);
    }

    #[test]
    fn test_tint_tables_cover_all_hues() {
        let palette = Palette::built_in();
        let tables = build_tint_tables(&palette);

        assert_eq!(tables.len(), MAX_PLATES);

        // white tints towards clearly distinct colors per plate
        let white = 215usize;
        let mut seen = std::collections::HashSet::new();
        for table in tables.iter() {
            seen.insert(table[white]);
        }
        assert!(seen.len() >= 4);
    }

    #[test]
    fn test_dump_is_768_bytes() {
        let palette = Palette::built_in();

        let mut buf = Vec::new();
        palette.dump(&mut buf).unwrap();

        assert_eq!(buf.len(), 768);
        assert_eq!(&buf[0..3], &[0, 0, 0]);
        assert_eq!(&buf[765..768], &[255, 255, 255]);
    }
}
