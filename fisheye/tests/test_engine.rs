use std::{path::Path, time::Duration};

use nalgebra_glm::DVec3;

use fisheye::{
    FisheyeEngine, FrameInput, MapKind, Palette, PlateRenderer, PlateView, Result, ScriptDirs,
    NO_TINT,
};

/// The shipped lens and globe scripts at the workspace root.
fn assets() -> ScriptDirs {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).parent().unwrap();

    ScriptDirs::new(root.join("lenses"), root.join("globes"))
}

/// The failure fixtures, combined with the shipped globes.
fn fixtures() -> ScriptDirs {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).parent().unwrap();
    let data = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("data");

    ScriptDirs::new(data.join("lenses"), root.join("globes"))
}

fn fixture_globes() -> ScriptDirs {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).parent().unwrap();
    let data = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("data");

    ScriptDirs::new(root.join("lenses"), data.join("globes"))
}

/// Fills each plate render with a value identifying the plate's world
/// direction; with identity view angles the composed frame equals the
/// plate frame, so composited pixels tell which plate they came from.
struct AxisRenderer;

const FRONT: u8 = 10;
const RIGHT: u8 = 11;
const LEFT: u8 = 12;
const BACK: u8 = 13;
const TOP: u8 = 14;
const BOTTOM: u8 = 15;
const OTHER: u8 = 16;

impl PlateRenderer for AxisRenderer {
    fn render_plate(&mut self, view: &PlateView, _size: usize, target: &mut [u8]) -> Result<()> {
        let f = view.forward;

        let value = if f.z > 0.9 {
            FRONT
        } else if f.x > 0.9 {
            RIGHT
        } else if f.x < -0.9 {
            LEFT
        } else if f.z < -0.9 {
            BACK
        } else if f.y > 0.9 {
            TOP
        } else if f.y < -0.9 {
            BOTTOM
        } else {
            OTHER
        };

        target.fill(value);

        Ok(())
    }
}

fn frame(width: usize, height: usize) -> FrameInput {
    FrameInput {
        width_px: width,
        height_px: height,
        view_angles: DVec3::zeros(),
    }
}

fn run_until_settled(engine: &mut FisheyeEngine, input: &FrameInput, out: &mut [u8]) -> usize {
    let mut frames = 0usize;

    loop {
        engine
            .run_frame(input, &mut AxisRenderer, out)
            .expect("frame failed");
        frames += 1;

        if !engine.working() {
            return frames;
        }

        assert!(frames < 10_000, "build never settles");
    }
}

#[test]
fn test_cube_rectilinear_composites_front_plate() {
    let mut engine = FisheyeEngine::new(Palette::built_in(), assets()).unwrap();

    engine.exec("globe cube").unwrap();
    engine.exec("lens rectilinear").unwrap();
    engine.exec("hfov 90").unwrap();

    let input = frame(64, 64);
    let mut out = vec![0u8; 64 * 64];
    run_until_settled(&mut engine, &input, &mut out);

    // the scale matches the forward probe of the requested fov
    let expected_scale = 45f64.to_radians().tan() / 32.0;
    assert!((engine.lens().scale - expected_scale).abs() < 1e-12);

    // 90 degrees of a rectilinear view only ever touches the front plate
    assert_eq!(out[32 * 64 + 32], FRONT);
    assert!(engine.globe().plates[0].display);
    assert!(!engine.globe().plates[1].display);

    // every viewport pixel is mapped
    assert_eq!(engine.lens_map().num_mapped(), 64 * 64);
}

#[test]
fn test_panini_hfov_180_reaches_left_plate() {
    let mut engine = FisheyeEngine::new(Palette::built_in(), assets()).unwrap();

    engine.exec("globe cube").unwrap();
    engine.exec("lens panini").unwrap();
    engine.exec("hfov 180").unwrap();

    let input = frame(640, 480);
    let mut out = vec![0u8; 640 * 480];
    run_until_settled(&mut engine, &input, &mut out);

    // the left viewport edge at center height looks along -x
    assert_eq!(out[240 * 640], LEFT);
    assert_eq!(out[240 * 640 + 320], FRONT);
    assert_eq!(out[240 * 640 + 639], RIGHT);

    // the lens map agrees: the pixel samples the left plate's slot
    let platesize = engine.globe().platesize;
    let texel = engine.lens_map().pixels[240 * 640].unwrap() as usize;
    assert_eq!(texel / (platesize * platesize), 2);
}

#[test]
fn test_zero_budget_slicing_matches_one_shot() {
    let mut oneshot = FisheyeEngine::new(Palette::built_in(), assets()).unwrap();
    oneshot.exec("globe cube").unwrap();
    oneshot.exec("lens rectilinear").unwrap();
    oneshot.exec("hfov 120").unwrap();
    oneshot.set_build_budget(Duration::from_secs(3600));

    let input = frame(96, 64);
    let mut out = vec![0u8; 96 * 64];
    let frames = run_until_settled(&mut oneshot, &input, &mut out);
    assert_eq!(frames, 1);

    let mut sliced = FisheyeEngine::new(Palette::built_in(), assets()).unwrap();
    sliced.exec("globe cube").unwrap();
    sliced.exec("lens rectilinear").unwrap();
    sliced.exec("hfov 120").unwrap();
    sliced.set_build_budget(Duration::ZERO);

    let mut out2 = vec![0u8; 96 * 64];
    let frames = run_until_settled(&mut sliced, &input, &mut out2);
    assert!(frames >= 2, "zero budget must slice the build");

    assert_eq!(oneshot.lens_map().pixels, sliced.lens_map().pixels);
    assert_eq!(oneshot.lens_map().tints, sliced.lens_map().tints);
    assert_eq!(out, out2);
}

#[test]
fn test_rebuild_without_changes_is_a_noop() {
    let mut engine = FisheyeEngine::new(Palette::built_in(), assets()).unwrap();

    engine.exec("globe cube").unwrap();
    engine.exec("lens rectilinear").unwrap();
    engine.exec("hfov 100").unwrap();

    let input = frame(48, 48);
    let mut out = vec![0u8; 48 * 48];
    run_until_settled(&mut engine, &input, &mut out);

    let pixels = engine.lens_map().pixels.clone();

    // another frame with identical inputs must not restart the build
    engine.run_frame(&input, &mut AxisRenderer, &mut out).unwrap();
    assert!(!engine.working());
    assert_eq!(engine.lens_map().pixels, pixels);
}

#[test]
fn test_forward_lens_via_onload_fit() {
    let mut engine = FisheyeEngine::new(Palette::built_in(), assets()).unwrap();

    engine.exec("globe cube").unwrap();
    engine.exec("lens fisheye1").unwrap();

    // the lens onload command switched the fov mode to fit
    assert_eq!(engine.lens().map_kind, MapKind::Forward);

    let input = frame(64, 64);
    let mut out = vec![0u8; 64 * 64];
    run_until_settled(&mut engine, &input, &mut out);

    // a full-sphere fisheye displays every plate
    for plate in engine.globe().plates.iter() {
        assert!(plate.display);
    }

    assert_eq!(out[32 * 64 + 32], FRONT);

    // the image circle covers most of the viewport, the corners stay blank
    assert!(engine.lens_map().num_mapped() > 64 * 64 / 2);
    assert_eq!(out[0], 0);
}

#[test]
fn test_resize_restarts_and_remaps() {
    let mut engine = FisheyeEngine::new(Palette::built_in(), assets()).unwrap();

    engine.exec("globe cube").unwrap();
    engine.exec("lens rectilinear").unwrap();
    engine.exec("hfov 90").unwrap();

    let mut out = vec![0u8; 32 * 32];
    run_until_settled(&mut engine, &frame(32, 32), &mut out);
    assert_eq!(engine.globe().platesize, 32);

    let mut out = vec![0u8; 48 * 40];
    run_until_settled(&mut engine, &frame(48, 40), &mut out);

    assert_eq!(engine.globe().platesize, 40);
    assert_eq!(engine.lens_map().num_mapped(), 48 * 40);
    assert_eq!(out[20 * 48 + 24], FRONT);
}

#[test]
fn test_rubix_tint_fraction() {
    let mut engine = FisheyeEngine::new(Palette::built_in(), assets()).unwrap();

    engine.exec("globe cube").unwrap();
    engine.exec("lens rectilinear").unwrap();
    engine.exec("hfov 90").unwrap();
    engine.exec("rubix").unwrap();

    let input = frame(128, 128);
    let mut out = vec![0u8; 128 * 128];
    run_until_settled(&mut engine, &input, &mut out);

    let map = engine.lens_map();
    let tinted = map.tints.iter().filter(|t| **t != NO_TINT).count();
    let fraction = tinted as f64 / map.tints.len() as f64;

    // numcells=10, cell=4, pad=1: (40 / 51)^2 of the plate area is tinted
    let expected = (40.0 / 51.0) * (40.0 / 51.0);
    assert!(
        (fraction - expected).abs() < 0.08,
        "tinted fraction {} vs expected {}",
        fraction,
        expected
    );

    // tinted pixels get remapped colors, grid lines keep the plate color
    let tinted_pixel = map.tints.iter().position(|t| *t != NO_TINT).unwrap();
    let plain_pixel = map.tints.iter().position(|t| *t == NO_TINT).unwrap();
    assert_ne!(out[tinted_pixel], FRONT);
    assert_eq!(out[plain_pixel], FRONT);
}

#[test]
fn test_bad_lens_return_blanks_viewport() {
    let mut engine = FisheyeEngine::new(Palette::built_in(), fixtures()).unwrap();

    engine.exec("globe cube").unwrap();
    engine.exec("lens bad_return").unwrap();
    engine.exec("hfov 90").unwrap();

    let input = frame(32, 32);
    let mut out = vec![7u8; 32 * 32];
    engine.run_frame(&input, &mut AxisRenderer, &mut out).unwrap();

    // the first build slice hits the string return and aborts for good
    assert!(!engine.working());
    assert!(!engine.lens().valid);
    assert!(out.iter().all(|p| *p == 0));
}

#[test]
fn test_broken_lens_script_fails_load() {
    let mut engine = FisheyeEngine::new(Palette::built_in(), fixtures()).unwrap();

    engine.exec("globe cube").unwrap();
    assert!(engine.exec("lens broken_syntax").is_err());
    assert!(!engine.lens().valid);
    assert!(engine.lens().name.is_empty());

    // the globe survives a bad lens
    assert!(engine.globe().valid);
    assert_eq!(engine.globe().plates.len(), 6);

    assert!(engine.exec("lens no_maps").is_err());
    assert!(!engine.lens().valid);
}

#[test]
fn test_bad_globe_scripts_fail_load() {
    let mut engine = FisheyeEngine::new(Palette::built_in(), fixture_globes()).unwrap();

    engine.exec("lens rectilinear").unwrap();

    for globe in ["bad_shape", "bad_fov", "too_many", "missing"] {
        assert!(engine.exec(&format!("globe {}", globe)).is_err());
        assert!(!engine.globe().valid);
    }

    // the lens survives a bad globe
    assert!(engine.lens().valid);
}

#[test]
fn test_infeasible_fov_renders_blank() {
    let mut engine = FisheyeEngine::new(Palette::built_in(), assets()).unwrap();

    engine.exec("globe cube").unwrap();
    engine.exec("lens rectilinear").unwrap();
    engine.exec("hfov 200").unwrap();

    let input = frame(32, 32);
    let mut out = vec![7u8; 32 * 32];
    engine.run_frame(&input, &mut AxisRenderer, &mut out).unwrap();

    assert!(!engine.working());
    assert!(engine.lens().scale <= 0.0);
    assert!(out.iter().all(|p| *p == 0));

    // lowering the request recovers without reloading anything
    engine.exec("hfov 100").unwrap();
    run_until_settled(&mut engine, &input, &mut out);
    assert_eq!(out[16 * 32 + 16], FRONT);
}

#[test]
fn test_saveglobe_masks_foreign_voronoi_regions() {
    let dir = std::env::temp_dir().join(format!("fisheye_saveglobe_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let mut engine = FisheyeEngine::new(Palette::built_in(), fixture_globes()).unwrap();
    engine.exec("globe wide_pair").unwrap();
    engine.exec("lens rectilinear").unwrap();
    engine.exec("hfov 90").unwrap();

    let input = frame(40, 40);
    let mut out = vec![0u8; 40 * 40];
    run_until_settled(&mut engine, &input, &mut out);

    let masked = dir.join("masked");
    engine.cmd_saveglobe(masked.to_str().unwrap(), false);
    engine.run_frame(&input, &mut AxisRenderer, &mut out).unwrap();

    let with_margins = dir.join("margins");
    engine.cmd_saveglobe(with_margins.to_str().unwrap(), true);
    engine.run_frame(&input, &mut AxisRenderer, &mut out).unwrap();

    for plate in 0..2 {
        let masked_bytes =
            std::fs::read(dir.join(format!("masked{}.pcx", plate))).expect("masked pcx missing");
        let margin_bytes = std::fs::read(dir.join(format!("margins{}.pcx", plate)))
            .expect("margins pcx missing");

        // PCX header on both
        assert_eq!(masked_bytes[0], 0x0A);
        assert_eq!(margin_bytes[0], 0x0A);

        // the 120 degree plates overlap their neighbor's half-space, so the
        // masked file carries the margin marker and the unmasked one does not
        assert!(masked_bytes[128..].contains(&0xFE));
        assert!(!margin_bytes[128..].contains(&0xFE));
    }

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_config_round_trips_through_exec() {
    let mut engine = FisheyeEngine::new(Palette::built_in(), assets()).unwrap();

    engine.exec("globe cube").unwrap();
    engine.exec("lens panini").unwrap();
    engine.exec("hfov 180").unwrap();
    engine.exec("rubixgrid 8 3 2").unwrap();

    let mut buf = Vec::new();
    engine.write_config(&mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();

    let mut replayed = FisheyeEngine::new(Palette::built_in(), assets()).unwrap();
    for line in text.lines() {
        replayed.exec(line).unwrap();
    }

    assert_eq!(replayed.lens().name, "panini");
    assert_eq!(replayed.globe().name, "cube");

    let mut buf2 = Vec::new();
    replayed.write_config(&mut buf2).unwrap();
    assert_eq!(text, String::from_utf8(buf2).unwrap());
}

#[test]
fn test_fov_mode_is_exclusive() {
    let mut engine = FisheyeEngine::new(Palette::built_in(), assets()).unwrap();

    engine.exec("hfov 90").unwrap();
    engine.exec("vfov 60").unwrap();

    let mut buf = Vec::new();
    engine.write_config(&mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();

    // only the most recent mode is persisted
    assert!(text.starts_with("vfov 60\n"));
    assert!(!text.contains("hfov"));

    // accessor agreement
    match engine.exec("fit") {
        Ok(()) => {}
        Err(e) => panic!("fit failed: {}", e),
    }
    let mut buf = Vec::new();
    engine.write_config(&mut buf).unwrap();
    assert!(String::from_utf8(buf).unwrap().starts_with("fit\n"));
}

#[test]
fn test_scripted_globe_plate_owns_hemisphere() {
    let mut engine = FisheyeEngine::new(Palette::built_in(), assets()).unwrap();

    engine.exec("globe halves").unwrap();
    engine.exec("lens stereographic").unwrap();
    engine.exec("hfov 300").unwrap();

    let input = frame(64, 64);
    let mut out = vec![0u8; 64 * 64];
    run_until_settled(&mut engine, &input, &mut out);

    // with the scripted selector, both hemispheres appear and the center
    // belongs to the front plate
    assert_eq!(out[32 * 64 + 32], FRONT);
    assert!(engine.globe().plates[0].display);
    assert!(engine.globe().plates[1].display);
}
