//! Text detection models and the inference seam shared by both backends.

mod db_detector;
mod dbnet;
mod onnx;

use std::path::Path;

use candle_core::Device;
use ndarray::{ArrayView3, Axis};
use ort::Session;

pub use db_detector::DbTextDetector;
pub use dbnet::{DbHead, DbNetConfig, DbTextModel, Fpn, ResNet};
pub use onnx::{OnnxDbModel, OnnxDbPretrainedModel};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::postprocess::DbPostProcess;
use crate::text_region::Detection;

/// Anything that turns an image into text regions.
pub trait TextDetector {
    fn name(&self) -> &str;

    fn predict(&self, img: &image::DynamicImage) -> Result<Detection>;
}

/// Opens the `test` model: `.onnx` files run through onnxruntime, anything
/// else is treated as a safetensors checkpoint of [`DbTextModel`].
pub fn open_detector(path: impl AsRef<Path>, config: &Config, device: &Device) -> Result<Box<dyn TextDetector>> {
    let path = path.as_ref();
    let postprocess = DbPostProcess::from(&config.test);
    let output_polygon = config.test.is_output_polygon;
    let is_onnx = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("onnx"));

    if is_onnx {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("onnx-db")
            .to_string();
        let model = OnnxDbModel::new_from_file(
            path,
            &name,
            config.test.img_size,
            postprocess,
            output_polygon,
            Session::builder()?,
        )?;
        Ok(Box::new(model))
    } else {
        let model = DbTextDetector::new_from_file(
            path,
            DbNetConfig::from(&config.model),
            device.clone(),
            config.test.img_size,
            postprocess,
            output_polygon,
        )?;
        Ok(Box::new(model))
    }
}

/// Builds a [`Detection`] from the `C x H x W` maps of one image. Channel 0
/// is the probability map, channel 1 (when present) the threshold map.
pub(crate) fn detection_from_maps(
    maps: ArrayView3<f32>,
    image_width: u32,
    image_height: u32,
    postprocess: &DbPostProcess,
    output_polygon: bool,
) -> Result<Detection> {
    let channels = maps.len_of(Axis(0));
    if channels == 0 {
        return Err(Error::ModelOutput("model returned no channels".to_string()));
    }
    let prob_map = maps.index_axis(Axis(0), 0);
    let regions = postprocess.represent(prob_map, image_width, image_height, output_polygon);
    let threshold_map = (channels > 1).then(|| maps.index_axis(Axis(0), 1).to_owned());

    Ok(Detection {
        regions,
        prob_map: prob_map.to_owned(),
        threshold_map,
        image_width,
        image_height,
    })
}
