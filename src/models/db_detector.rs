use std::path::Path;

use candle_core::{DType, Device, ModuleT};
use candle_nn::{VarBuilder, VarMap};
use ndarray::{Array4, Axis, Ix4};

use super::dbnet::{DbNetConfig, DbTextModel};
use super::{detection_from_maps, TextDetector};
use crate::data::{to_array, to_tensor};
use crate::error::Result;
use crate::postprocess::DbPostProcess;
use crate::preprocess;
use crate::text_region::Detection;

/// A trained [`DbTextModel`] loaded from a safetensors checkpoint.
pub struct DbTextDetector {
    model_name: String,
    model: DbTextModel,
    // owns the weights the model reads from
    _varmap: VarMap,
    device: Device,
    max_side: u32,
    postprocess: DbPostProcess,
    output_polygon: bool,
}

impl DbTextDetector {
    pub const DEFAULT_MAX_SIDE: u32 = 736;

    pub fn new_from_file(
        file_path: impl AsRef<Path>,
        cfg: DbNetConfig,
        device: Device,
        max_side: u32,
        postprocess: DbPostProcess,
        output_polygon: bool,
    ) -> Result<Self> {
        let file_path = file_path.as_ref();
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = DbTextModel::new(&cfg, vb)?;
        varmap.load(file_path)?;
        tracing::info!("loaded checkpoint {}", file_path.display());

        let model_name = file_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dbnet")
            .to_string();

        Ok(Self {
            model_name,
            model,
            _varmap: varmap,
            device,
            max_side,
            postprocess,
            output_polygon,
        })
    }

    /// Wraps an in-memory model, e.g. straight out of training.
    pub fn from_model(model: DbTextModel, varmap: VarMap, device: Device, max_side: u32) -> Self {
        Self {
            model_name: "dbnet".to_string(),
            model,
            _varmap: varmap,
            device,
            max_side,
            postprocess: DbPostProcess::default(),
            output_polygon: false,
        }
    }

    pub fn with_postprocess(mut self, postprocess: DbPostProcess, output_polygon: bool) -> Self {
        self.postprocess = postprocess;
        self.output_polygon = output_polygon;
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Runs the network in evaluation mode on a `N x 3 x H x W` input.
    pub fn predict_maps(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let xs = to_tensor(input, &self.device)?;
        let ys = self.model.forward_t(&xs, false)?;
        to_array::<Ix4>(&ys)
    }
}

impl TextDetector for DbTextDetector {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn predict(&self, img: &image::DynamicImage) -> Result<Detection> {
        let prepared = preprocess::prepare(img, self.max_side);
        let maps = self.predict_maps(&prepared.input)?;
        detection_from_maps(
            maps.index_axis(Axis(0), 0),
            prepared.orig_width,
            prepared.orig_height,
            &self.postprocess,
            self.output_polygon,
        )
    }
}
