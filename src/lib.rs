//! # Overview
//!
//! Scene text detection with [Differentiable Binarization](https://arxiv.org/abs/1911.08947).
//! A ResNet + FPN segmentation network predicts a probability map and a
//! threshold map; text regions are recovered from the probability map as
//! polygons or rotated rectangles.
//!
//! The network is trained natively with [candle](https://github.com/huggingface/candle)
//! on Total-Text style annotations. For inference, DB detectors exported to
//! ONNX also run through onnxruntime (bindings via [ort](https://github.com/pykeio/ort)),
//! including pretrained models fetched from the Hugging Face hub.

pub mod config;
pub mod data;
mod error;
pub mod geometry;
pub mod loss;
pub mod lr_scheduler;
pub mod metrics;
pub mod models;
pub mod postprocess;
pub mod preprocess;
pub mod scalars;
mod text_region;
pub mod training;
pub mod utils;
pub mod visualize;

pub use error::{Error, Result};
pub use text_region::{Detection, TextRegion};

// re-exports
pub use candle_core;
pub use geo_types;
pub use image;
pub use ort;
