//! The DB training objective: balanced BCE on the probability map, masked L1
//! on the threshold map and dice on the approximate binary map.

use candle_core::{DType, Tensor};

use crate::config::{OptimizerConfig, Reduction};
use crate::data::BatchTargets;
use crate::error::{Error, Result};

/// Per-term losses as scalar tensors. `binary_loss` is only present when the
/// prediction carries the approximate binary map (training mode).
#[derive(Debug, Clone)]
pub struct DbLossOutput {
    pub prob_loss: Tensor,
    pub threshold_loss: Tensor,
    pub binary_loss: Option<Tensor>,
    pub prob_threshold_loss: Tensor,
    pub total_loss: Tensor,
}

/// Host copies of [`DbLossOutput`] for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossValues {
    pub prob_loss: f32,
    pub threshold_loss: f32,
    pub binary_loss: f32,
    pub prob_threshold_loss: f32,
    pub total_loss: f32,
}

impl DbLossOutput {
    pub fn values(&self) -> Result<LossValues> {
        Ok(LossValues {
            prob_loss: self.prob_loss.to_scalar::<f32>()?,
            threshold_loss: self.threshold_loss.to_scalar::<f32>()?,
            binary_loss: match &self.binary_loss {
                Some(t) => t.to_scalar::<f32>()?,
                None => 0.0,
            },
            prob_threshold_loss: self.prob_threshold_loss.to_scalar::<f32>()?,
            total_loss: self.total_loss.to_scalar::<f32>()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DbLoss {
    pub alpha: f64,
    pub beta: f64,
    pub negative_ratio: f64,
    pub reduction: Reduction,
    pub eps: f64,
}

impl Default for DbLoss {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 10.0,
            negative_ratio: 3.0,
            reduction: Reduction::Mean,
            eps: 1e-6,
        }
    }
}

impl From<&OptimizerConfig> for DbLoss {
    fn from(cfg: &OptimizerConfig) -> Self {
        Self {
            alpha: cfg.alpha,
            beta: cfg.beta,
            negative_ratio: cfg.negative_ratio,
            reduction: cfg.reduction,
            ..Self::default()
        }
    }
}

struct Terms {
    prob: Tensor,
    threshold: Tensor,
    binary: Option<Tensor>,
}

impl DbLoss {
    /// `preds` is `N x C x H x W` with C = 3 (training) or 2 (evaluation).
    pub fn forward(&self, preds: &Tensor, targets: &BatchTargets) -> Result<DbLossOutput> {
        let (_, channels, _, _) = preds.dims4()?;
        if channels < 2 {
            return Err(Error::ModelOutput(format!(
                "expected at least 2 prediction channels, got {channels}"
            )));
        }

        let terms = match self.reduction {
            Reduction::Mean => self.terms(preds, targets)?,
            Reduction::Sum => {
                let batch = preds.dim(0)?;
                let mut acc: Option<Terms> = None;
                for i in 0..batch {
                    let item = BatchTargets {
                        prob_maps: targets.prob_maps.narrow(0, i, 1)?,
                        supervision_masks: targets.supervision_masks.narrow(0, i, 1)?,
                        threshold_maps: targets.threshold_maps.narrow(0, i, 1)?,
                        text_area_maps: targets.text_area_maps.narrow(0, i, 1)?,
                    };
                    let t = self.terms(&preds.narrow(0, i, 1)?, &item)?;
                    acc = Some(match acc {
                        None => t,
                        Some(a) => Terms {
                            prob: (a.prob + t.prob)?,
                            threshold: (a.threshold + t.threshold)?,
                            binary: match (a.binary, t.binary) {
                                (Some(x), Some(y)) => Some((x + y)?),
                                _ => None,
                            },
                        },
                    });
                }
                acc.ok_or_else(|| Error::ModelOutput("empty batch".to_string()))?
            }
        };

        let prob_threshold_loss =
            (terms.prob.affine(self.alpha, 0.0)? + terms.threshold.affine(self.beta, 0.0)?)?;
        let total_loss = match &terms.binary {
            Some(binary) => (&prob_threshold_loss + binary)?,
            None => prob_threshold_loss.clone(),
        };

        Ok(DbLossOutput {
            prob_loss: terms.prob,
            threshold_loss: terms.threshold,
            binary_loss: terms.binary,
            prob_threshold_loss,
            total_loss,
        })
    }

    fn terms(&self, preds: &Tensor, targets: &BatchTargets) -> Result<Terms> {
        let channel = |c: usize| -> Result<Tensor> { Ok(preds.narrow(1, c, 1)?.squeeze(1)?) };

        let prob = self.balanced_bce(&channel(0)?, &targets.prob_maps, &targets.supervision_masks)?;
        let threshold = self.masked_l1(&channel(1)?, &targets.threshold_maps, &targets.text_area_maps)?;
        let binary = if preds.dim(1)? > 2 {
            Some(self.dice(&channel(2)?, &targets.prob_maps, &targets.supervision_masks)?)
        } else {
            None
        };
        Ok(Terms {
            prob,
            threshold,
            binary,
        })
    }

    /// BCE over positives plus the `negative_ratio x positives` hardest negatives.
    pub fn balanced_bce(&self, pred: &Tensor, gt: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let positive = gt.mul(mask)?;
        let negative = gt.affine(-1.0, 1.0)?.mul(mask)?;
        let positive_count = positive.sum_all()?.to_scalar::<f32>()?.round() as usize;
        let negative_total = negative.sum_all()?.to_scalar::<f32>()?.round() as usize;
        let negative_count = negative_total.min((positive_count as f64 * self.negative_ratio) as usize);

        let p = pred.clamp(self.eps as f32, 1.0 - self.eps as f32)?;
        let loss = (gt.mul(&p.log()?)? + gt.affine(-1.0, 1.0)?.mul(&p.affine(-1.0, 1.0)?.log()?)?)?.neg()?;

        let positive_loss = loss.mul(&positive)?.sum_all()?;
        let negative_loss = loss.mul(&negative)?.flatten_all()?;
        let hard_negative_loss = if negative_count > 0 {
            let values = negative_loss.to_vec1::<f32>()?;
            let mut order: Vec<u32> = (0..values.len() as u32).collect();
            order.select_nth_unstable_by(negative_count - 1, |&a, &b| {
                values[b as usize].total_cmp(&values[a as usize])
            });
            order.truncate(negative_count);
            let index = Tensor::from_vec(order, negative_count, negative_loss.device())?;
            negative_loss.index_select(&index, 0)?.sum_all()?
        } else {
            Tensor::zeros((), DType::F32, negative_loss.device())?
        };

        let denom = positive_count as f64 + negative_count as f64 + self.eps;
        Ok((positive_loss + hard_negative_loss)?.affine(1.0 / denom, 0.0)?)
    }

    /// L1 distance averaged over the pixels where `mask` is set.
    pub fn masked_l1(&self, pred: &Tensor, gt: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let mask_sum = mask.sum_all()?.to_scalar::<f32>()? as f64;
        let l1 = (pred - gt)?.abs()?.mul(mask)?.sum_all()?;
        Ok(l1.affine(1.0 / (mask_sum + self.eps), 0.0)?)
    }

    /// `1 - 2|P∩G| / (|P| + |G|)` inside `mask`.
    pub fn dice(&self, pred: &Tensor, gt: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let intersection = pred.mul(gt)?.mul(mask)?.sum_all()?;
        let union = (pred.mul(mask)?.sum_all()? + gt.mul(mask)?.sum_all()?)?.affine(1.0, self.eps)?;
        Ok(intersection.div(&union)?.affine(-2.0, 1.0)?)
    }
}
