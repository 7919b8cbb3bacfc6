//! Dataset loading, augmentation and target generation.

mod annotation;
pub mod augment;
mod dataset;
pub mod labels;

pub use annotation::{load_annotations, load_metadata, parse_annotations, Annotation};
pub use augment::AugmentConfig;
pub use dataset::{to_array, to_tensor, Batch, BatchTargets, DataLoader, Sample, TotalTextDataset};
pub use labels::{make_label_maps, LabelMaps};
