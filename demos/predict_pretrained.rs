use dbtext::{
    models::{OnnxDbModel, OnnxDbPretrainedModel},
    Result,
};

fn main() -> Result<()> {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: predict_pretrained <image>");
        return Ok(());
    };
    let img = image::open(&path)?;

    let model = OnnxDbModel::pretrained(OnnxDbPretrainedModel::PPOCR_V3_EN_DET)?;

    let detection = model.predict(&img)?;

    for region in &detection.regions {
        println!("score: {:.3}, box: {:?}", region.score, region.bbox());
    }

    Ok(())
}
