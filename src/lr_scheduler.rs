//! Learning-rate schedules driven by the training loop.

use candle_nn::Optimizer;
use tracing::info;

use crate::config::{LrsConfig, LrsMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupMethod {
    Constant,
    Linear,
}

/// Polynomial decay after a warm-up phase, stepped once per iteration.
#[derive(Debug, Clone)]
pub struct WarmupPolyLr {
    pub base_lr: f64,
    pub target_lr: f64,
    pub max_iters: usize,
    pub power: f64,
    pub warmup_factor: f64,
    pub warmup_iters: usize,
    pub warmup_method: WarmupMethod,
    last_iter: usize,
}

impl WarmupPolyLr {
    pub fn new(base_lr: f64, max_iters: usize, warmup_iters: usize) -> Self {
        Self {
            base_lr,
            target_lr: 0.0,
            max_iters,
            power: 0.9,
            warmup_factor: 1.0 / 3.0,
            warmup_iters,
            warmup_method: WarmupMethod::Linear,
            last_iter: 0,
        }
    }

    pub fn lr_at(&self, iter: usize) -> f64 {
        let factor = if iter < self.warmup_iters {
            match self.warmup_method {
                WarmupMethod::Constant => self.warmup_factor,
                WarmupMethod::Linear => {
                    let alpha = iter as f64 / self.warmup_iters as f64;
                    self.warmup_factor * (1.0 - alpha) + alpha
                }
            }
        } else {
            let n = self.max_iters.saturating_sub(self.warmup_iters).max(1) as f64;
            let t = (iter - self.warmup_iters) as f64;
            (1.0 - t / n).max(0.0).powf(self.power)
        };
        self.target_lr + (self.base_lr - self.target_lr) * factor
    }

    pub fn current_lr(&self) -> f64 {
        self.lr_at(self.last_iter)
    }

    /// Advances one iteration and returns the new learning rate.
    pub fn step(&mut self) -> f64 {
        self.last_iter += 1;
        self.current_lr()
    }
}

/// Divides the learning rate by `1 / factor` once the monitored loss has not
/// improved for `patience` epochs.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    pub factor: f64,
    pub patience: usize,
    /// Relative improvement required to reset the patience counter.
    pub threshold: f64,
    pub min_lr: f64,
    pub eps: f64,
    best: f64,
    num_bad_epochs: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(factor: f64, patience: usize) -> Self {
        Self {
            factor,
            patience,
            threshold: 1e-4,
            min_lr: 0.0,
            eps: 1e-8,
            best: f64::INFINITY,
            num_bad_epochs: 0,
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    /// Records `metric` and returns the reduced learning rate when a reduction happens.
    pub fn step(&mut self, metric: f64, lr: f64) -> Option<f64> {
        if metric < self.best * (1.0 - self.threshold) {
            self.best = metric;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.num_bad_epochs > self.patience {
            self.num_bad_epochs = 0;
            let new_lr = (lr * self.factor).max(self.min_lr);
            if lr - new_lr > self.eps {
                return Some(new_lr);
            }
        }
        None
    }
}

#[derive(Debug, Clone)]
pub enum LrScheduler {
    Poly(WarmupPolyLr),
    Plateau(ReduceLrOnPlateau),
    Constant,
}

impl LrScheduler {
    /// `iters_per_epoch * epochs` bounds the polynomial decay.
    pub fn from_config(cfg: &LrsConfig, base_lr: f64, epochs: usize, iters_per_epoch: usize) -> Self {
        match cfg.mode {
            LrsMode::Poly => Self::Poly(WarmupPolyLr::new(base_lr, epochs * iters_per_epoch, cfg.warmup_iters)),
            LrsMode::Reduce => Self::Plateau(ReduceLrOnPlateau::new(cfg.factor, cfg.patience)),
            LrsMode::None => Self::Constant,
        }
    }

    /// Learning rate to start the first iteration with.
    pub fn initial_lr(&self, base_lr: f64) -> f64 {
        match self {
            Self::Poly(poly) => poly.current_lr(),
            _ => base_lr,
        }
    }

    /// Called after every optimizer step.
    pub fn step_iter<O: Optimizer>(&mut self, optimizer: &mut O) {
        if let Self::Poly(poly) = self {
            optimizer.set_learning_rate(poly.step());
        }
    }

    /// Called once per epoch with the evaluation loss.
    pub fn step_epoch<O: Optimizer>(&mut self, optimizer: &mut O, metric: f64) {
        if let Self::Plateau(plateau) = self {
            let lr = optimizer.learning_rate();
            if let Some(new_lr) = plateau.step(metric, lr) {
                info!("reducing learning rate from {lr:.3e} to {new_lr:.3e}");
                optimizer.set_learning_rate(new_lr);
            }
        }
    }
}
