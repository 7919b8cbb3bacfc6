use dbtext::{
    candle_core::Device,
    models::{DbNetConfig, DbTextDetector, TextDetector},
    postprocess::DbPostProcess,
    Result,
};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let (Some(cp_path), Some(img_path)) = (args.next(), args.next()) else {
        eprintln!("usage: predict_checkpoint <checkpoint.safetensors> <image>");
        return Ok(());
    };
    let img = image::open(&img_path)?;

    let model = DbTextDetector::new_from_file(
        &cp_path,
        DbNetConfig::default(),
        Device::Cpu,
        DbTextDetector::DEFAULT_MAX_SIDE,
        DbPostProcess::default(),
        true,
    )?;

    let detection = model.predict(&img)?;

    for region in &detection.regions {
        println!("{}", region.to_result_line());
    }

    Ok(())
}
