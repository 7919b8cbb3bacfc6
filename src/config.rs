//! `config.yaml` schema.
//!
//! Every section and key is optional; missing values fall back to the defaults
//! below and unknown keys are ignored, so older config files keep loading.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub meta: MetaConfig,
    pub data: DataConfig,
    pub hps: HyperParams,
    pub optimizer: OptimizerConfig,
    pub lrs: LrsConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
    pub metric: MetricConfig,
    pub labels: LabelConfig,
    pub test: TestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    /// Base directory all relative paths are resolved against.
    pub root_dir: PathBuf,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub totaltext: TotalTextConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TotalTextConfig {
    pub train_dir: PathBuf,
    pub train_gt_dir: PathBuf,
    pub test_dir: PathBuf,
    pub test_gt_dir: PathBuf,
}

impl Default for TotalTextConfig {
    fn default() -> Self {
        Self {
            train_dir: PathBuf::from("data/totaltext/train_images"),
            train_gt_dir: PathBuf::from("data/totaltext/train_gts"),
            test_dir: PathBuf::from("data/totaltext/test_images"),
            test_gt_dir: PathBuf::from("data/totaltext/test_gts"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperParams {
    pub batch_size: usize,
    pub no_epochs: usize,
    /// Log a progress line every `log_iter` global steps.
    pub log_iter: usize,
    pub no_classes: usize,
    /// Side of the square training crop. Must be a multiple of 32.
    pub img_size: u32,
}

impl Default for HyperParams {
    fn default() -> Self {
        Self {
            batch_size: 8,
            no_epochs: 1000,
            log_iter: 50,
            no_classes: 2,
            img_size: 640,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    Mean,
    Sum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub lr: f64,
    pub weight_decay: f64,
    pub amsgrad: bool,
    /// Weight of the probability map loss.
    pub alpha: f64,
    /// Weight of the threshold map loss.
    pub beta: f64,
    pub negative_ratio: f64,
    pub reduction: Reduction,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            lr: 0.005,
            weight_decay: 0.0,
            amsgrad: false,
            alpha: 1.0,
            beta: 10.0,
            negative_ratio: 3.0,
            reduction: Reduction::Mean,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LrsMode {
    Poly,
    Reduce,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LrsConfig {
    pub mode: LrsMode,
    pub warmup_iters: usize,
    /// Multiplicative factor of the plateau scheduler.
    pub factor: f64,
    /// Non-improving epochs tolerated by the plateau scheduler.
    pub patience: usize,
}

impl Default for LrsConfig {
    fn default() -> Self {
        Self {
            mode: LrsMode::Reduce,
            warmup_iters: 10,
            factor: 0.1,
            patience: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backbone {
    Resnet18,
    Resnet34,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Checkpoint to fine-tune from; ignored when empty or missing on disk.
    pub finetune_cp_path: Option<PathBuf>,
    pub best_cp_path: PathBuf,
    pub last_cp_path: PathBuf,
    pub backbone: Backbone,
    pub inner_channels: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            finetune_cp_path: None,
            best_cp_path: PathBuf::from("models/best_cp.safetensors"),
            last_cp_path: PathBuf::from("models/last_cp.safetensors"),
            backbone: Backbone::Resnet18,
            inner_channels: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub logger_file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            logger_file: PathBuf::from("train.log"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Binarization threshold for the shrink-map accuracy / IoU.
    pub thred_text_score: f32,
    /// Binarization threshold used in training visualizations.
    pub prob_threshold: f32,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            thred_text_score: 0.3,
            prob_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub shrink_ratio: f32,
    /// Polygons whose short side is below this are ignored.
    pub min_text_size: f32,
    pub thresh_min: f32,
    pub thresh_max: f32,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            shrink_ratio: 0.4,
            min_text_size: 8.0,
            thresh_min: 0.3,
            thresh_max: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Model used by the `test` binary. `.onnx` selects the onnxruntime backend.
    pub model_path: Option<PathBuf>,
    pub img_size: u32,
    pub thresh: f32,
    pub box_thresh: f32,
    pub unclip_ratio: f32,
    pub max_candidates: usize,
    pub min_size: f32,
    pub is_output_polygon: bool,
    pub result_dir: PathBuf,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            img_size: 736,
            thresh: 0.3,
            box_thresh: 0.7,
            unclip_ratio: 1.5,
            max_candidates: 1000,
            min_size: 3.0,
            is_output_polygon: false,
            result_dir: PathBuf::from("results"),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;
        tracing::debug!("loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));

        if self.hps.batch_size == 0 {
            return invalid("hps.batch_size must be positive".into());
        }
        if self.hps.no_epochs == 0 {
            return invalid("hps.no_epochs must be positive".into());
        }
        if self.hps.no_classes < 2 {
            return invalid("hps.no_classes must be at least 2".into());
        }
        for (key, size) in [("hps.img_size", self.hps.img_size), ("test.img_size", self.test.img_size)] {
            if size == 0 || size % 32 != 0 {
                return invalid(format!("{key} must be a positive multiple of 32, got {size}"));
            }
        }
        for (key, value) in [
            ("metric.thred_text_score", self.metric.thred_text_score),
            ("metric.prob_threshold", self.metric.prob_threshold),
            ("test.thresh", self.test.thresh),
            ("test.box_thresh", self.test.box_thresh),
            ("labels.thresh_min", self.labels.thresh_min),
            ("labels.thresh_max", self.labels.thresh_max),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{key} must lie in [0, 1], got {value}"));
            }
        }
        if self.labels.thresh_min > self.labels.thresh_max {
            return invalid("labels.thresh_min exceeds labels.thresh_max".into());
        }
        if !(self.labels.shrink_ratio > 0.0 && self.labels.shrink_ratio < 1.0) {
            return invalid("labels.shrink_ratio must lie in (0, 1)".into());
        }
        if self.model.inner_channels == 0 || self.model.inner_channels % 4 != 0 {
            return invalid("model.inner_channels must be a positive multiple of 4".into());
        }
        if self.optimizer.lr <= 0.0 {
            return invalid("optimizer.lr must be positive".into());
        }
        Ok(())
    }

    /// Joins `path` onto `meta.root_dir` unless it is already absolute.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.meta.root_dir.join(path)
        }
    }

    pub fn finetune_checkpoint(&self) -> Option<PathBuf> {
        self.model
            .finetune_cp_path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| self.resolve(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = Config::from_yaml_str(
            r#"
meta:
  root_dir: /tmp/db
hps:
  batch_size: 4
lrs:
  mode: poly
  warmup_iters: 3
something_else: ignored
"#,
        )
        .unwrap();

        assert_eq!(config.hps.batch_size, 4);
        assert_eq!(config.hps.no_epochs, 1000);
        assert_eq!(config.lrs.mode, LrsMode::Poly);
        assert_eq!(config.optimizer.reduction, Reduction::Mean);
        assert_eq!(config.resolve("models/a.safetensors"), PathBuf::from("/tmp/db/models/a.safetensors"));
        assert_eq!(config.resolve("/abs/b"), PathBuf::from("/abs/b"));
    }

    #[test]
    fn test_rejects_bad_img_size() {
        let err = Config::from_yaml_str("hps:\n  img_size: 100\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_unknown_scheduler_mode() {
        assert!(Config::from_yaml_str("lrs:\n  mode: cosine\n").is_err());
    }

    #[test]
    fn test_empty_finetune_path_is_ignored() {
        let config = Config::from_yaml_str("model:\n  finetune_cp_path: ''\n").unwrap();
        assert!(config.finetune_checkpoint().is_none());
    }

    #[test]
    fn test_bundled_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.yaml");
        let config = Config::from_file(path).unwrap();
        assert_eq!(config.hps.img_size, 640);
        assert_eq!(config.model.backbone, Backbone::Resnet18);
        assert!(config.finetune_checkpoint().is_none());
    }
}
