use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use dbtext::config::Config;
use dbtext::models::{open_detector, OnnxDbModel, OnnxDbPretrainedModel, TextDetector};
use dbtext::utils::{init_tracing, select_device};
use dbtext::visualize;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Pretrained {
    /// PP-OCRv4 multilingual detector
    PpocrV4,
    /// PP-OCRv3 English detector
    PpocrV3En,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect text in an image with a DB model", long_about = None)]
struct Args {
    #[arg(long = "image_path")]
    image_path: PathBuf,

    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// safetensors checkpoint or .onnx model; defaults to test.model_path, then model.best_cp_path
    #[arg(long = "model_path")]
    model_path: Option<PathBuf>,

    /// Download a published ONNX detector instead of using a local model
    #[arg(long, value_enum, conflicts_with = "model_path")]
    pretrained: Option<Pretrained>,

    #[arg(long = "result_dir")]
    result_dir: Option<PathBuf>,

    /// Output polygons
    #[arg(long, conflicts_with = "rect")]
    polygon: bool,

    /// Output rotated rectangles
    #[arg(long)]
    rect: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(None)?;

    let mut config = if args.config.exists() {
        Config::from_file(&args.config).with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        tracing::warn!("{} not found, using defaults", args.config.display());
        Config::default()
    };
    if args.polygon {
        config.test.is_output_polygon = true;
    } else if args.rect {
        config.test.is_output_polygon = false;
    }

    let detector: Box<dyn TextDetector> = match args.pretrained {
        Some(p) => {
            let p_model = match p {
                Pretrained::PpocrV4 => OnnxDbPretrainedModel::PPOCR_V4_DET,
                Pretrained::PpocrV3En => OnnxDbPretrainedModel::PPOCR_V3_EN_DET,
            };
            Box::new(OnnxDbModel::pretrained(p_model)?.with_output_polygon(config.test.is_output_polygon))
        }
        None => {
            let model_path = args
                .model_path
                .clone()
                .or_else(|| config.test.model_path.clone())
                .unwrap_or_else(|| config.model.best_cp_path.clone());
            let model_path = config.resolve(model_path);
            let device = select_device()?;
            open_detector(&model_path, &config, &device)
                .with_context(|| format!("failed to open model {}", model_path.display()))?
        }
    };

    let img = image::open(&args.image_path)
        .with_context(|| format!("failed to read {}", args.image_path.display()))?;
    let start = Instant::now();
    let detection = detector.predict(&img)?;
    tracing::info!(
        "{}: {} regions in {:.1?} ({})",
        args.image_path.display(),
        detection.regions.len(),
        start.elapsed(),
        detector.name()
    );

    let result_dir = args
        .result_dir
        .clone()
        .unwrap_or_else(|| config.resolve(&config.test.result_dir));
    std::fs::create_dir_all(&result_dir)?;
    let stem = args
        .image_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image")
        .to_string();

    let rgb = img.to_rgb8();
    visualize::save_png(
        &visualize::overlay_heatmap(&rgb, detection.prob_map.view(), 0.5),
        result_dir.join(format!("{stem}_heatmap.png")),
    )?;
    visualize::save_png(
        &visualize::draw_polygons(&rgb, &detection.regions),
        result_dir.join(format!("{stem}_poly.png")),
    )?;
    visualize::save_png(
        &visualize::draw_rects(&rgb, &detection.regions),
        result_dir.join(format!("{stem}_rect.png")),
    )?;

    let res_path = result_dir.join(format!("res_{stem}.txt"));
    let mut writer = BufWriter::new(File::create(&res_path)?);
    for region in &detection.regions {
        writeln!(writer, "{}", region.to_result_line())?;
    }
    writer.flush()?;
    tracing::info!("results written to {}", result_dir.display());
    Ok(())
}
