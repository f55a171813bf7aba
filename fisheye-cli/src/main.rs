mod options;
mod world;

use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use image::{Rgb, RgbImage};
use log::{error, info, LevelFilter};
use nalgebra_glm::DVec3;

use fisheye::{FisheyeEngine, FrameInput, Palette, ScriptDirs};
use options::Options;
use world::PanoramaRenderer;

/// Parses the program arguments and returns None, if no arguments were provided and Some otherwise.
fn parse_args() -> Result<Options> {
    let options = Options::parse();
    Ok(options)
}

/// Initializes the program logging
fn initialize_logging(filter: LevelFilter) {
    env_logger::Builder::new().filter_level(filter).init();
}

/// Drives the engine until the lens-map build settles and returns the
/// composited viewport together with the number of frames it took.
fn render_to_completion(
    engine: &mut FisheyeEngine,
    renderer: &mut PanoramaRenderer,
    input: &FrameInput,
) -> Result<(Vec<u8>, usize)> {
    let mut out = vec![0u8; input.width_px * input.height_px];
    let mut frames = 0usize;

    loop {
        engine.run_frame(input, renderer, &mut out)?;
        frames += 1;

        if !engine.working() {
            return Ok((out, frames));
        }

        if frames > 100_000 {
            anyhow::bail!("lens-map build did not settle");
        }
    }
}

/// Maps the palette-indexed viewport through the palette into an RGB image.
fn viewport_to_image(palette: &Palette, pixels: &[u8], width: usize, height: usize) -> RgbImage {
    let mut img = RgbImage::new(width as u32, height as u32);

    img.pixels_mut().zip(pixels.iter()).for_each(|(pixel, p)| {
        *pixel = Rgb(palette.colors[*p as usize]);
    });

    img
}

/// Runs the program.
fn run_program() -> Result<()> {
    let options = parse_args()?;
    initialize_logging(LevelFilter::from(options.log_level));

    info!("Options:");
    options.dump_to_log();
    info!("-------");

    let palette = Palette::built_in();
    let dirs = ScriptDirs::new(options.lens_dir.clone(), options.globe_dir.clone());

    let mut engine = FisheyeEngine::new(palette.clone(), dirs)?;
    engine.set_build_budget(Duration::from_secs_f64(options.budget_ms / 1000.0));

    engine.exec(&format!("globe {}", options.globe))?;
    engine.exec(&format!("lens {}", options.lens))?;
    engine.exec(&options.fov_command())?;

    if options.rubix {
        engine.exec("rubix")?;
    }

    for command in &options.commands {
        engine.exec(command)?;
    }

    if options.dump_palette {
        engine.exec("dumppal")?;
    }

    if let Some(prefix) = &options.save_globe {
        engine.cmd_saveglobe(prefix, false);
    }

    let input = FrameInput {
        width_px: options.width,
        height_px: options.height,
        view_angles: DVec3::new(
            options.pitch.to_radians(),
            options.yaw.to_radians(),
            options.roll.to_radians(),
        ),
    };

    let mut renderer = PanoramaRenderer::new(&palette);

    info!("render frame...");
    let start = Instant::now();
    let (viewport, frames) = render_to_completion(&mut engine, &mut renderer, &input)?;
    let duration = start.elapsed();
    info!(
        "render frame...DONE in {} s ({} build frames)",
        duration.as_secs_f32(),
        frames
    );

    let num_displayed = engine
        .globe()
        .plates
        .iter()
        .filter(|p| p.display)
        .count();
    info!(
        "plates displayed: {}/{}",
        num_displayed,
        engine.globe().plates.len()
    );
    info!(
        "mapped pixels: {}/{}",
        engine.lens_map().num_mapped(),
        options.width * options.height
    );

    info!("write {:?}...", options.output);
    let img = viewport_to_image(&palette, &viewport, options.width, options.height);
    img.save(&options.output)?;
    info!("write {:?}...DONE", options.output);

    Ok(())
}

fn main() {
    match run_program() {
        Ok(()) => {
            info!("SUCCESS");
        }
        Err(err) => {
            error!("Error: {}", err);
            error!("FAILED");

            std::process::exit(-1);
        }
    }
}
