use acf_detector::channels::color::planar_from_rgb8;
use acf_detector::diagnostics::{render_pyramid, run_with_report};
use acf_detector::gpu::{ChannelProvider, FrameInput, GpuChannels, ProviderPyramid};
use acf_detector::image::io::{
    load_color_image, save_grayscale_f32, save_rgb_u8, write_json_file, ColorImageU8,
};
use acf_detector::{Detection, Detector, ModifyOptions};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let program = env::args()
        .next()
        .unwrap_or_else(|| "acf-detect".to_string());
    let config = parse_args(&program)?;

    let mut detector = Detector::from_json_file(&config.model)
        .map_err(|e| format!("Failed to load model {}: {e}", config.model.display()))?;

    if !config.nms {
        detector.set_do_nms(false);
    }
    if config.calibration != 0.0 {
        detector
            .modify(&ModifyOptions {
                casc_cal: Some(config.calibration),
                ..Default::default()
            })
            .map_err(|e| format!("Failed to apply calibration: {e}"))?;
    }
    configure_threads(&mut detector, config.threads)?;

    let inputs = collect_inputs(&config.input)?;
    if inputs.is_empty() {
        return Err(format!("No images found for '{}'", config.input));
    }

    let mut gpu_stage: Option<GpuChannels> = None;
    for path in &inputs {
        process_image(path, &detector, &config, &mut gpu_stage)?;
    }

    Ok(())
}

fn process_image(
    path: &Path,
    detector: &Detector,
    config: &CliConfig,
    gpu_stage: &mut Option<GpuChannels>,
) -> Result<(), String> {
    let image = load_color_image(path)?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "frame".to_string());

    // Optionally downscale so the model window maps to `min` source pixels.
    let (working, scale) = downscale_for_min_width(&image, detector, config.min_width);
    let view = working.as_view();

    let mut detections: Vec<Detection>;
    if config.use_gpu {
        let needs_new = gpu_stage
            .as_ref()
            .map_or(true, |s| s.input_size() != (view.w, view.h));
        if needs_new {
            let fresh = GpuChannels::new(detector, (view.w, view.h))
                .map_err(|e| format!("Failed to set up the tiled stage: {e}"))?;
            *gpu_stage = Some(fresh);
        }
        let stage = gpu_stage.as_mut().expect("stage initialized");
        stage
            .enqueue(&FrameInput::Buffer(view.clone()))
            .map_err(|e| format!("Channel stage failed on {}: {e}", path.display()))?;
        let (_, pyramid) = stage
            .retrieve()
            .map_err(|e| format!("Channel readback failed: {e}"))?
            .ok_or_else(|| "Channel stage produced no output".to_string())?;
        if config.dump_pyramids {
            dump_provider_pyramid(&pyramid, &config.output, &stem)?;
        }
        detections = pyramid.detect(detector);
    } else {
        let planar = planar_from_rgb8(&view);
        let report = run_with_report(detector, &planar)
            .map_err(|e| format!("Detection failed on {}: {e}", path.display()))?;
        if config.dump_pyramids {
            let pyramid = detector
                .compute_pyramid(&planar)
                .map_err(|e| format!("Pyramid failed: {e}"))?;
            let canvas = render_pyramid(&pyramid);
            save_grayscale_f32(&canvas, &config.output.join(format!("{stem}_pyramid.png")))?;
        }
        if let Some(dir) = config.report_dir() {
            write_json_file(&dir.join(format!("{stem}_report.json")), &report)?;
        }
        detections = report.detections;
    }

    // Map detections back to the original resolution.
    if scale > 1.0 {
        for d in &mut detections {
            d.x *= scale;
            d.y *= scale;
            d.w *= scale;
            d.h *= scale;
        }
    }
    if config.single {
        acf_detector::detector::choose_best(&mut detections);
    }

    println!("{}: {} detections", path.display(), detections.len());
    for d in &detections {
        println!(
            "  {:.1},{:.1} {:.1}x{:.1} score={:.4}",
            d.x, d.y, d.w, d.h, d.score
        );
    }

    write_json_file(
        &config.output.join(format!("{stem}.json")),
        &detections,
    )?;
    if config.write_boxes {
        write_roi_file(&config.output.join(format!("{stem}.roi")), &detections)?;
    }
    if config.annotate {
        let mut annotated = image.clone();
        draw_detections(&mut annotated, &detections);
        save_rgb_u8(&annotated, &config.output.join(format!("{stem}_annotated.png")))?;
    }
    if config.window {
        log::warn!("preview windows are not supported in this build; skipping");
    }

    Ok(())
}

fn downscale_for_min_width(
    image: &ColorImageU8,
    detector: &Detector,
    min_width: usize,
) -> (ColorImageU8, f32) {
    if min_width == 0 {
        return (image.clone(), 1.0);
    }
    let (model_w, _) = detector.window_size();
    let target_w = (image.width() * model_w / min_width).max(model_w);
    if target_w >= image.width() {
        return (image.clone(), 1.0);
    }
    let scale = image.width() as f32 / target_w as f32;
    let target_h = ((image.height() as f32 / scale).round() as usize).max(1);

    use acf_detector::channels::resample::resample_planar;
    let planar = planar_from_rgb8(&image.as_view());
    let resized = resample_planar(&planar, target_w, target_h, 1.0);
    let mut data = vec![0u8; target_w * target_h * 3];
    for y in 0..target_h {
        for x in 0..target_w {
            for c in 0..3 {
                data[(y * target_w + x) * 3 + c] =
                    (resized.get(c, x, y) * 255.0).clamp(0.0, 255.0).round() as u8;
            }
        }
    }
    (ColorImageU8::new(target_w, target_h, data), scale)
}

fn dump_provider_pyramid(
    pyramid: &ProviderPyramid,
    output: &Path,
    stem: &str,
) -> Result<(), String> {
    use acf_detector::image::ImageF32;
    let ProviderPyramid::U8(p) = pyramid else {
        return Ok(());
    };
    // u8 banks: widen to float and reuse the standard canvas layout.
    let widened: Vec<acf_detector::channels::ChannelBank> = p
        .levels
        .iter()
        .map(|bank| {
            let mut data = acf_detector::image::PlanarImage::new(
                bank.width(),
                bank.height(),
                bank.n_planes(),
            );
            for (dst, &src) in data.data.iter_mut().zip(&bank.data.data) {
                *dst = src as f32 / 255.0;
            }
            acf_detector::channels::ChannelBank {
                data,
                info: bank.info.clone(),
            }
        })
        .collect();
    let width: usize = widened.iter().map(|b| b.width()).sum();
    let height = widened
        .iter()
        .map(|b| b.height() * b.n_planes())
        .max()
        .unwrap_or(0);
    let mut canvas = ImageF32::new(width, height);
    let mut x0 = 0;
    for bank in &widened {
        for p in 0..bank.n_planes() {
            for y in 0..bank.height() {
                for x in 0..bank.width() {
                    canvas.set(x0 + x, p * bank.height() + y, bank.data.get(p, x, y));
                }
            }
        }
        x0 += bank.width();
    }
    save_grayscale_f32(&canvas, &output.join(format!("{stem}_pyramid_gpu.png")))
}

fn write_roi_file(path: &Path, detections: &[Detection]) -> Result<(), String> {
    let mut text = String::new();
    for d in detections {
        text.push_str(&format!(
            "{:.1} {:.1} {:.1} {:.1} {:.4}\n",
            d.x, d.y, d.w, d.h, d.score
        ));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
    }
    fs::write(path, text).map_err(|e| format!("Failed to write {}: {e}", path.display()))
}

fn draw_detections(image: &mut ColorImageU8, detections: &[Detection]) {
    let (w, h) = (image.width(), image.height());
    let data = image.data_mut();
    let mut put = |x: usize, y: usize| {
        if x < w && y < h {
            let i = (y * w + x) * 3;
            data[i] = 0;
            data[i + 1] = 255;
            data[i + 2] = 0;
        }
    };
    for d in detections {
        let x0 = d.x.max(0.0) as usize;
        let y0 = d.y.max(0.0) as usize;
        let x1 = (d.x + d.w).max(0.0) as usize;
        let y1 = (d.y + d.h).max(0.0) as usize;
        for x in x0..=x1.min(w.saturating_sub(1)) {
            put(x, y0);
            put(x, y1);
        }
        for y in y0..=y1.min(h.saturating_sub(1)) {
            put(x0, y);
            put(x1, y);
        }
    }
}

fn configure_threads(detector: &mut Detector, threads: i32) -> Result<(), String> {
    match threads {
        0 | 1 => {
            detector.set_parallel(false);
            Ok(())
        }
        -1 => Ok(()), // all cores (the pool default)
        n if n > 1 => {
            #[cfg(feature = "parallel")]
            {
                // A pre-existing global pool is fine; keep its size.
                let _ = rayon::ThreadPoolBuilder::new()
                    .num_threads(n as usize)
                    .build_global();
            }
            Ok(())
        }
        n => Err(format!("Invalid thread count {n}")),
    }
}

fn collect_inputs(input: &str) -> Result<Vec<PathBuf>, String> {
    if input.parse::<u32>().is_ok() {
        return Err(
            "Camera capture is not supported in this build; pass an image path".to_string(),
        );
    }
    let path = PathBuf::from(input);
    if path.is_dir() {
        let mut files: Vec<PathBuf> = fs::read_dir(&path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("png" | "jpg" | "jpeg" | "bmp" | "tiff")
                )
            })
            .collect();
        files.sort();
        Ok(files)
    } else if path.is_file() {
        Ok(vec![path])
    } else {
        Err(format!("Input '{input}' does not exist"))
    }
}

struct CliConfig {
    input: String,
    output: PathBuf,
    model: PathBuf,
    nms: bool,
    min_width: usize,
    calibration: f32,
    threads: i32,
    single: bool,
    use_gpu: bool,
    dump_pyramids: bool,
    write_boxes: bool,
    annotate: bool,
    window: bool,
    reports: bool,
}

impl CliConfig {
    fn report_dir(&self) -> Option<&Path> {
        self.reports.then_some(self.output.as_path())
    }
}

fn parse_args(program: &str) -> Result<CliConfig, String> {
    let mut args = env::args().skip(1).peekable();
    let mut input: Option<String> = None;
    let mut output = PathBuf::from(".");
    let mut model: Option<PathBuf> = None;
    let mut nms = false;
    let mut min_width = 0usize;
    let mut calibration = 0.0f32;
    let mut threads = -1i32;
    let mut single = false;
    let mut use_gpu = false;
    let mut dump_pyramids = false;
    let mut write_boxes = false;
    let mut annotate = false;
    let mut window = false;
    let mut reports = false;

    let value = |args: &mut std::iter::Peekable<std::iter::Skip<env::Args>>,
                 name: &str|
     -> Result<String, String> {
        args.next()
            .ok_or_else(|| format!("--{name} expects a value\n{}", usage(program)))
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                println!("{}", usage(program));
                std::process::exit(0);
            }
            "--input" | "-i" => input = Some(value(&mut args, "input")?),
            "--output" | "-o" => output = PathBuf::from(value(&mut args, "output")?),
            "--model" | "-m" => model = Some(PathBuf::from(value(&mut args, "model")?)),
            "--nms" => nms = true,
            "--min" => {
                let v = value(&mut args, "min")?;
                min_width = v
                    .parse()
                    .map_err(|_| format!("Invalid minimum width '{v}'"))?;
            }
            "--calibration" | "-c" => {
                let v = value(&mut args, "calibration")?;
                calibration = v
                    .parse()
                    .map_err(|_| format!("Invalid calibration '{v}'"))?;
            }
            "--threads" | "-t" => {
                let v = value(&mut args, "threads")?;
                threads = v
                    .parse()
                    .map_err(|_| format!("Invalid thread count '{v}'"))?;
            }
            "--single" => single = true,
            "--gpu" => use_gpu = true,
            "--pyramids" => dump_pyramids = true,
            "--box" => write_boxes = true,
            "--annotate" => annotate = true,
            "--window" => window = true,
            "--report" => reports = true,
            _ if arg.starts_with('-') => {
                return Err(format!("Unknown option '{arg}'\n{}", usage(program)));
            }
            _ => {
                if input.is_some() {
                    return Err(format!(
                        "Unexpected positional argument '{arg}'\n{}",
                        usage(program)
                    ));
                }
                input = Some(arg);
            }
        }
    }

    let input = input.ok_or_else(|| usage(program))?;
    let model = model.ok_or_else(|| format!("--model is required\n{}", usage(program)))?;

    Ok(CliConfig {
        input,
        output,
        model,
        nms,
        min_width,
        calibration,
        threads,
        single,
        use_gpu,
        dump_pyramids,
        write_boxes,
        annotate,
        window,
        reports,
    })
}

fn usage(program: &str) -> String {
    format!(
        "Usage: {program} --input <image|dir> --model <model.json> [options]\n\n\
Options:\n  \
  -i, --input <path>        Image file or directory of images\n  \
  -o, --output <dir>        Output directory (default: .)\n  \
  -m, --model <path>        Trained model (JSON)\n  \
      --nms                 Enable non-maximum suppression\n  \
      --min <px>            Minimum object width in source pixels\n  \
  -c, --calibration <v>     Additive cascade calibration\n  \
  -t, --threads <n>         Worker count (-1 = all cores, 0/1 = serial)\n  \
      --single              Keep only the highest-scoring detection\n  \
      --gpu                 Use the tiled channel stage\n  \
      --pyramids            Dump pyramid visualizations\n  \
      --box                 Write .roi text boxes\n  \
      --annotate            Write annotated images\n  \
      --window              Show a preview window (unsupported)\n  \
      --report              Write per-image JSON diagnostics\n"
    )
}
