use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("ort (onnxruntime) error: {0}")]
    Ort(#[from] ort::Error),
    #[error("hf-hub: {0}")]
    HuggingFace(#[from] hf_hub::api::sync::ApiError),
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("ndarray shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("no ground truth file for image {0}")]
    MissingAnnotation(PathBuf),
    #[error("malformed annotation in {path} (line {line}): {reason}")]
    MalformedAnnotation {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("unexpected model output: {0}")]
    ModelOutput(String),
    #[error("{images} images but {annotations} ground truth files")]
    MismatchedDataset { images: usize, annotations: usize },
    #[error("dataset is empty: {0}")]
    EmptyDataset(PathBuf),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
