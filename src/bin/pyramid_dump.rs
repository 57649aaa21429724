//! Render the channel feature pyramid of an image as one grayscale canvas
//! and dump per-level statistics as JSON.
use acf_detector::channels::color::planar_from_rgb8;
use acf_detector::diagnostics::{render_pyramid, PyramidStage};
use acf_detector::image::io::{load_color_image, save_grayscale_f32, write_json_file};
use acf_detector::pyramid::{build_pyramid, PyramidOptions};
use std::env;
use std::path::PathBuf;
use std::time::Instant;

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut args = env::args().skip(1);
    let input = args
        .next()
        .ok_or("Usage: pyramid_dump <image> [out_prefix]")?;
    let prefix = args.next().unwrap_or_else(|| "pyramid".to_string());

    let image = load_color_image(&PathBuf::from(&input))?;
    let planar = planar_from_rgb8(&image.as_view());

    let start = Instant::now();
    let pyramid = build_pyramid(&planar, &PyramidOptions::default(), false, true)
        .map_err(|e| format!("Pyramid construction failed: {e}"))?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    println!(
        "{input}: {} levels in {elapsed_ms:.1} ms",
        pyramid.n_scales()
    );
    for (i, bank) in pyramid.levels.iter().enumerate() {
        println!(
            "  L{i}: {}x{}x{} scale={:.4}",
            bank.width(),
            bank.height(),
            bank.n_planes(),
            pyramid.scales[i]
        );
    }

    let canvas = render_pyramid(&pyramid);
    save_grayscale_f32(&canvas, &PathBuf::from(format!("{prefix}.png")))?;
    let stage = PyramidStage::from_pyramid(&pyramid, elapsed_ms);
    write_json_file(&PathBuf::from(format!("{prefix}.json")), &stage)?;
    println!("wrote {prefix}.png and {prefix}.json");
    Ok(())
}
