use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use ndarray::{Array, Array2, Array3, Array4, ArrayBase, ArrayD, Axis, Data, Dimension, IxDyn, RemoveAxis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::annotation::{load_annotations, Annotation};
use super::augment::{self, AugmentConfig};
use super::labels::make_label_maps;
use crate::config::LabelConfig;
use crate::error::{Error, Result};
use crate::preprocess;

/// One training / evaluation example with its targets, all at `img_size`.
#[derive(Debug, Clone)]
pub struct Sample {
    pub img_path: PathBuf,
    /// `3 x H x W`, normalized.
    pub image: Array3<f32>,
    pub prob_map: Array2<f32>,
    pub supervision_mask: Array2<f32>,
    pub threshold_map: Array2<f32>,
    pub text_area_map: Array2<f32>,
}

/// Total-Text style dataset: image files paired with polygon ground truth.
#[derive(Debug, Clone)]
pub struct TotalTextDataset {
    img_paths: Vec<PathBuf>,
    gt_paths: Vec<PathBuf>,
    is_training: bool,
    img_size: u32,
    labels: LabelConfig,
    augment: AugmentConfig,
}

impl TotalTextDataset {
    pub fn new(
        img_paths: Vec<PathBuf>,
        gt_paths: Vec<PathBuf>,
        is_training: bool,
        img_size: u32,
        labels: LabelConfig,
    ) -> Result<Self> {
        if img_paths.len() != gt_paths.len() {
            return Err(Error::MismatchedDataset {
                images: img_paths.len(),
                annotations: gt_paths.len(),
            });
        }
        Ok(Self {
            img_paths,
            gt_paths,
            is_training,
            img_size,
            labels,
            augment: AugmentConfig::default(),
        })
    }

    pub fn with_augment(mut self, augment: AugmentConfig) -> Self {
        self.augment = augment;
        self
    }

    pub fn len(&self) -> usize {
        self.img_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.img_paths.is_empty()
    }

    pub fn load_raw(&self, index: usize) -> Result<(image::RgbImage, Vec<Annotation>)> {
        let img = image::open(&self.img_paths[index])?.to_rgb8();
        let annotations = load_annotations(&self.gt_paths[index])?;
        Ok((img, annotations))
    }

    pub fn get<R: Rng>(&self, index: usize, rng: &mut R) -> Result<Sample> {
        let (img, annotations) = self.load_raw(index)?;
        let size = self.img_size;

        let (img, annotations) = if self.is_training {
            augment::augment(&img, annotations, size, &self.augment, rng)
        } else {
            let mut annotations = annotations;
            let img = augment::resize(&img, &mut annotations, size, size);
            (img, annotations)
        };

        let maps = make_label_maps(&annotations, size as usize, size as usize, &self.labels);
        Ok(Sample {
            img_path: self.img_paths[index].clone(),
            image: preprocess::normalize(&img),
            prob_map: maps.prob_map,
            supervision_mask: maps.supervision_mask,
            threshold_map: maps.threshold_map,
            text_area_map: maps.text_area_map,
        })
    }
}

/// Samples stacked along a new leading batch axis.
#[derive(Debug, Clone)]
pub struct Batch {
    pub img_paths: Vec<PathBuf>,
    /// `N x 3 x H x W`.
    pub images: Array4<f32>,
    pub prob_maps: Array3<f32>,
    pub supervision_masks: Array3<f32>,
    pub threshold_maps: Array3<f32>,
    pub text_area_maps: Array3<f32>,
}

/// The target maps of a [`Batch`] on a candle device, each `N x H x W`.
#[derive(Debug, Clone)]
pub struct BatchTargets {
    pub prob_maps: Tensor,
    pub supervision_masks: Tensor,
    pub threshold_maps: Tensor,
    pub text_area_maps: Tensor,
}

pub fn to_tensor<S, D>(array: &ArrayBase<S, D>, device: &Device) -> Result<Tensor>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let data: Vec<f32> = array.iter().copied().collect();
    Ok(Tensor::from_vec(data, array.shape(), device)?)
}

/// Copies a tensor to the host as an f32 array of dimension `D`.
pub fn to_array<D: Dimension>(tensor: &Tensor) -> Result<Array<f32, D>> {
    let dims = tensor.dims().to_vec();
    let data = tensor
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Ok(ArrayD::from_shape_vec(IxDyn(&dims), data)?.into_dimensionality::<D>()?)
}

fn stack<D>(views: Vec<ndarray::ArrayView<'_, f32, D>>) -> Result<ndarray::Array<f32, D::Larger>>
where
    D: Dimension,
    D::Larger: RemoveAxis,
{
    Ok(ndarray::stack(Axis(0), &views)?)
}

impl Batch {
    pub fn from_samples(samples: Vec<Sample>) -> Result<Self> {
        let images = stack(samples.iter().map(|s| s.image.view()).collect())?;
        let prob_maps = stack(samples.iter().map(|s| s.prob_map.view()).collect())?;
        let supervision_masks = stack(samples.iter().map(|s| s.supervision_mask.view()).collect())?;
        let threshold_maps = stack(samples.iter().map(|s| s.threshold_map.view()).collect())?;
        let text_area_maps = stack(samples.iter().map(|s| s.text_area_map.view()).collect())?;

        Ok(Self {
            img_paths: samples.into_iter().map(|s| s.img_path).collect(),
            images,
            prob_maps,
            supervision_masks,
            threshold_maps,
            text_area_maps,
        })
    }

    pub fn len(&self) -> usize {
        self.img_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.img_paths.is_empty()
    }

    pub fn images_tensor(&self, device: &Device) -> Result<Tensor> {
        to_tensor(&self.images, device)
    }

    pub fn targets(&self, device: &Device) -> Result<BatchTargets> {
        Ok(BatchTargets {
            prob_maps: to_tensor(&self.prob_maps, device)?,
            supervision_masks: to_tensor(&self.supervision_masks, device)?,
            threshold_maps: to_tensor(&self.threshold_maps, device)?,
            text_area_maps: to_tensor(&self.text_area_maps, device)?,
        })
    }
}

/// Batches a dataset, optionally shuffled. Samples of one batch are prepared
/// in parallel, each with its own RNG seeded from the loader's RNG.
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: TotalTextDataset,
    batch_size: usize,
    shuffle: bool,
}

impl DataLoader {
    pub fn new(dataset: TotalTextDataset, batch_size: usize, shuffle: bool) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
        }
    }

    pub fn dataset(&self) -> &TotalTextDataset {
        &self.dataset
    }

    /// Number of batches per epoch (the last one may be partial).
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn iter<'a>(&'a self, rng: &mut StdRng) -> impl Iterator<Item = Result<Batch>> + 'a {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(rng);
        }
        let seeds: Vec<u64> = order.iter().map(|_| rng.gen()).collect();

        let chunks: Vec<Vec<(usize, u64)>> = order
            .into_iter()
            .zip(seeds)
            .collect::<Vec<_>>()
            .chunks(self.batch_size)
            .map(|c| c.to_vec())
            .collect();

        chunks.into_iter().map(move |chunk| {
            let samples = chunk
                .par_iter()
                .map(|&(index, seed)| {
                    let mut sample_rng = StdRng::seed_from_u64(seed);
                    self.dataset.get(index, &mut sample_rng)
                })
                .collect::<Result<Vec<_>>>()?;
            Batch::from_samples(samples)
        })
    }
}
