use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::{palette::Palette, Error, Result};

/// Writes an 8-bit palette-indexed image as a PCX file: a 128-byte header,
/// run-length encoded scanlines and the trailing 256-color palette.
///
/// # Arguments
/// * `writer` - The writer to encode into.
/// * `width` - The image width in pixels.
/// * `height` - The image height in pixels.
/// * `pixels` - The row-major palette-indexed pixels.
/// * `palette` - The palette appended after the image data.
pub fn write_pcx<W: Write>(
    writer: &mut W,
    width: usize,
    height: usize,
    pixels: &[u8],
    palette: &Palette,
) -> Result<()> {
    if width == 0 || height == 0 || pixels.len() != width * height {
        return Err(Error::Internal(format!(
            "pcx: pixel buffer of {} bytes does not match {}x{}",
            pixels.len(),
            width,
            height
        )));
    }

    // scanlines are padded to an even byte count
    let bytes_per_line = width + (width & 1);

    writer.write_u8(0x0A)?; // manufacturer
    writer.write_u8(5)?; // version: 3.0 with palette
    writer.write_u8(1)?; // run-length encoding
    writer.write_u8(8)?; // bits per pixel
    writer.write_u16::<LittleEndian>(0)?; // xmin
    writer.write_u16::<LittleEndian>(0)?; // ymin
    writer.write_u16::<LittleEndian>((width - 1) as u16)?;
    writer.write_u16::<LittleEndian>((height - 1) as u16)?;
    writer.write_u16::<LittleEndian>(72)?; // hdpi
    writer.write_u16::<LittleEndian>(72)?; // vdpi
    writer.write_all(&[0u8; 48])?; // 16-color palette, unused
    writer.write_u8(0)?; // reserved
    writer.write_u8(1)?; // color planes
    writer.write_u16::<LittleEndian>(bytes_per_line as u16)?;
    writer.write_u16::<LittleEndian>(1)?; // palette type: color
    writer.write_all(&[0u8; 58])?; // filler up to 128 bytes

    let mut row = vec![0u8; bytes_per_line];
    for y in 0..height {
        row[..width].copy_from_slice(&pixels[y * width..(y + 1) * width]);
        write_rle_row(writer, &row)?;
    }

    writer.write_u8(0x0C)?; // palette marker
    palette.dump(writer)?;

    Ok(())
}

/// Run-length encodes one scanline: runs of up to 63 equal bytes become a
/// `0xC0 | count` marker plus the byte; values below 0xC0 with no repeat
/// are written literally.
fn write_rle_row<W: Write>(writer: &mut W, row: &[u8]) -> Result<()> {
    let mut i = 0usize;

    while i < row.len() {
        let byte = row[i];

        let mut run = 1usize;
        while run < 63 && i + run < row.len() && row[i + run] == byte {
            run += 1;
        }

        if run > 1 || byte >= 0xC0 {
            writer.write_u8(0xC0 | run as u8)?;
        }
        writer.write_u8(byte)?;

        i += run;
    }

    Ok(())
}
