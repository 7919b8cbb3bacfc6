//! Pixel-level segmentation scores for the shrink map.

use ndarray::{Array2, ArrayView3, Axis, Zip};

/// Scores derived from the accumulated confusion matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Scores {
    pub overall_acc: f64,
    pub mean_acc: f64,
    pub freq_weighted_acc: f64,
    pub mean_iou: f64,
    pub class_iou: Vec<f64>,
}

/// Confusion matrix accumulated over batches; rows are ground truth, columns predictions.
#[derive(Debug, Clone)]
pub struct RunningScore {
    n_classes: usize,
    confusion_matrix: Array2<u64>,
}

const EPS: f64 = 1e-4;

impl RunningScore {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            confusion_matrix: Array2::zeros((n_classes, n_classes)),
        }
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn confusion_matrix(&self) -> &Array2<u64> {
        &self.confusion_matrix
    }

    /// Labels outside `0..n_classes` are skipped.
    pub fn update(&mut self, label_true: impl IntoIterator<Item = usize>, label_pred: impl IntoIterator<Item = usize>) {
        for (t, p) in label_true.into_iter().zip(label_pred) {
            if t < self.n_classes && p < self.n_classes {
                self.confusion_matrix[[t, p]] += 1;
            }
        }
    }

    pub fn scores(&self) -> Scores {
        let hist = self.confusion_matrix.mapv(|v| v as f64);
        let diag: Vec<f64> = hist.diag().to_vec();
        let total = hist.sum();
        let row_sums = hist.sum_axis(Axis(1));
        let col_sums = hist.sum_axis(Axis(0));

        let overall_acc = diag.iter().sum::<f64>() / (total + EPS);
        let class_acc: Vec<f64> = diag.iter().zip(row_sums.iter()).map(|(d, r)| d / (r + EPS)).collect();
        let class_iou: Vec<f64> = (0..self.n_classes)
            .map(|i| diag[i] / (row_sums[i] + col_sums[i] - diag[i] + EPS))
            .collect();
        let freq: Vec<f64> = row_sums.iter().map(|r| r / (total + EPS)).collect();
        let freq_weighted_acc = freq
            .iter()
            .zip(class_iou.iter())
            .filter(|(f, _)| **f > 0.0)
            .map(|(f, iu)| f * iu)
            .sum();

        Scores {
            overall_acc,
            mean_acc: mean(&class_acc),
            freq_weighted_acc,
            mean_iou: mean(&class_iou),
            class_iou,
        }
    }

    pub fn reset(&mut self) {
        self.confusion_matrix.fill(0);
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Binarizes the predicted probability maps at `thred` after masking, updates
/// `running` with the masked ground truth and returns the running scores.
/// All inputs are `N x H x W`.
pub fn cal_text_score(
    pred: ArrayView3<f32>,
    gt: ArrayView3<f32>,
    mask: ArrayView3<f32>,
    running: &mut RunningScore,
    thred: f32,
) -> Scores {
    let mut pred_labels = Vec::with_capacity(pred.len());
    let mut gt_labels = Vec::with_capacity(gt.len());
    Zip::from(&pred).and(&gt).and(&mask).for_each(|&p, &g, &m| {
        pred_labels.push(usize::from(p * m > thred));
        gt_labels.push((g * m) as usize);
    });
    running.update(gt_labels, pred_labels);
    running.scores()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_perfect_prediction() {
        let mut running = RunningScore::new(2);
        running.update(vec![0, 0, 1, 1], vec![0, 0, 1, 1]);
        let scores = running.scores();
        assert!((scores.overall_acc - 1.0).abs() < 1e-3);
        assert!((scores.mean_iou - 1.0).abs() < 1e-3);
        assert!((scores.mean_acc - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_half_wrong() {
        let mut running = RunningScore::new(2);
        running.update(vec![0, 0, 1, 1], vec![0, 1, 1, 0]);
        let scores = running.scores();
        assert!((scores.overall_acc - 0.5).abs() < 1e-3);
        // each class: tp 1, fp 1, fn 1
        assert!((scores.class_iou[0] - 1.0 / 3.0).abs() < 1e-3);
        assert!((scores.mean_iou - 1.0 / 3.0).abs() < 1e-3);
    }

    #[test]
    fn test_out_of_range_labels_skipped() {
        let mut running = RunningScore::new(2);
        running.update(vec![0, 5], vec![0, 1]);
        assert_eq!(running.confusion_matrix().sum(), 1);
        running.reset();
        assert_eq!(running.confusion_matrix().sum(), 0);
    }

    #[test]
    fn test_cal_text_score_respects_mask() {
        let mut pred = Array3::<f32>::zeros((1, 2, 2));
        pred[[0, 0, 0]] = 0.9;
        pred[[0, 1, 1]] = 0.8;
        let mut gt = Array3::<f32>::zeros((1, 2, 2));
        gt[[0, 0, 0]] = 1.0;
        let mut mask = Array3::<f32>::ones((1, 2, 2));
        // the false positive at (1, 1) is masked out
        mask[[0, 1, 1]] = 0.0;

        let mut running = RunningScore::new(2);
        let scores = cal_text_score(pred.view(), gt.view(), mask.view(), &mut running, 0.3);
        assert!((scores.overall_acc - 1.0).abs() < 1e-3);
        assert!((scores.mean_iou - 1.0).abs() < 1e-3);
    }
}
