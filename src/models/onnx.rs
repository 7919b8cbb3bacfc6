use std::path::Path;

use ndarray::{Axis, Ix3};
use ort::{Session, SessionBuilder, SessionOutputs};

use super::{detection_from_maps, TextDetector};
use crate::error::{Error, Result};
use crate::postprocess::DbPostProcess;
use crate::preprocess;
use crate::text_region::Detection;

/// A DB text detector exported to ONNX. The first output must be
/// `N x C x H x W` with the probability map in channel 0.
pub struct OnnxDbModel {
    model_name: String,
    model: ort::Session,
    input_name: String,
    max_side: u32,
    postprocess: DbPostProcess,
    output_polygon: bool,
}

/// DB detectors published in ONNX form on the Hugging Face hub.
#[allow(non_camel_case_types)]
pub enum OnnxDbPretrainedModel {
    PPOCR_V4_DET,
    PPOCR_V3_EN_DET,
}

impl OnnxDbPretrainedModel {
    pub fn name(&self) -> &str {
        match self {
            Self::PPOCR_V4_DET => "ch_PP-OCRv4_det",
            Self::PPOCR_V3_EN_DET => "en_PP-OCRv3_det",
        }
    }

    pub fn hf_repo(&self) -> &str {
        "SWHL/RapidOCR"
    }

    pub fn hf_filename(&self) -> &str {
        match self {
            Self::PPOCR_V4_DET => "PP-OCRv4/ch_PP-OCRv4_det_infer.onnx",
            Self::PPOCR_V3_EN_DET => "PP-OCRv3/en_PP-OCRv3_det_infer.onnx",
        }
    }

    /// Long-side limit the detector was tuned for.
    pub fn max_side(&self) -> u32 {
        960
    }

    /// Post-processing settings these exports are usually run with.
    pub fn postprocess(&self) -> DbPostProcess {
        DbPostProcess {
            thresh: 0.3,
            box_thresh: 0.5,
            unclip_ratio: 1.6,
            ..DbPostProcess::default()
        }
    }
}

impl OnnxDbModel {
    pub fn pretrained(p_model: OnnxDbPretrainedModel) -> Result<Self> {
        let session_builder = Session::builder()?;
        let postprocess = p_model.postprocess();
        let max_side = p_model.max_side();
        Self::configure_pretrained(p_model, max_side, postprocess, session_builder)
    }

    pub fn configure_pretrained(
        p_model: OnnxDbPretrainedModel,
        max_side: u32,
        postprocess: DbPostProcess,
        session_builder: SessionBuilder,
    ) -> Result<Self> {
        let api = hf_hub::api::sync::Api::new()?;
        let filename = api
            .model(p_model.hf_repo().to_string())
            .get(p_model.hf_filename())?;

        Self::new_from_file(filename, p_model.name(), max_side, postprocess, false, session_builder)
    }

    pub fn new_from_file(
        file_path: impl AsRef<Path>,
        model_name: &str,
        max_side: u32,
        postprocess: DbPostProcess,
        output_polygon: bool,
        session_builder: SessionBuilder,
    ) -> Result<Self> {
        let model = session_builder.commit_from_file(file_path.as_ref())?;
        let input_name = model
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| Error::ModelOutput(format!("{model_name} declares no inputs")))?;

        Ok(Self {
            model_name: model_name.to_string(),
            model,
            input_name,
            max_side,
            postprocess,
            output_polygon,
        })
    }

    pub fn with_output_polygon(mut self, output_polygon: bool) -> Self {
        self.output_polygon = output_polygon;
        self
    }

    pub fn predict(&self, img: &image::DynamicImage) -> Result<Detection> {
        let prepared = preprocess::prepare(img, self.max_side);

        let outputs = self
            .model
            .run(ort::inputs![self.input_name.as_str() => prepared.input]?)?;
        self.postprocess(&outputs, prepared.orig_width, prepared.orig_height)
    }

    fn postprocess<'s>(
        &self,
        outputs: &SessionOutputs<'s>,
        img_width: u32,
        img_height: u32,
    ) -> Result<Detection> {
        let maps = outputs[0].try_extract_tensor::<f32>()?;
        if maps.ndim() != 4 || maps.shape()[0] == 0 {
            return Err(Error::ModelOutput(format!(
                "{}: expected a N x C x H x W output, got shape {:?}",
                self.model_name,
                maps.shape()
            )));
        }
        let first = maps.index_axis(Axis(0), 0).into_dimensionality::<Ix3>()?;

        detection_from_maps(first, img_width, img_height, &self.postprocess, self.output_polygon)
    }
}

impl TextDetector for OnnxDbModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn predict(&self, img: &image::DynamicImage) -> Result<Detection> {
        OnnxDbModel::predict(self, img)
    }
}
