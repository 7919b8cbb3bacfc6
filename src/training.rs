//! The configuration-driven training loop.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, ModuleT, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use ndarray::{Array4, Ix3, Ix4};
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{info, warn};

use crate::config::Config;
use crate::data::{load_metadata, to_array, DataLoader, TotalTextDataset};
use crate::error::{Error, Result};
use crate::loss::DbLoss;
use crate::lr_scheduler::LrScheduler;
use crate::metrics::{cal_text_score, RunningScore};
use crate::models::{DbNetConfig, DbTextModel};
use crate::scalars::ScalarWriter;
use crate::utils;
use crate::visualize;

pub const SEED: u64 = 42;

/// Losses of one finished epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train_loss: f32,
    pub test_loss: f32,
    pub lr: f64,
    pub saved_best: bool,
}

pub struct Trainer {
    config: Config,
    device: Device,
    varmap: VarMap,
    model: DbTextModel,
    criterion: DbLoss,
    optimizer: AdamW,
    scheduler: LrScheduler,
    train_loader: DataLoader,
    test_loader: DataLoader,
    writer: ScalarWriter,
    run_dir: PathBuf,
    rng: StdRng,
    global_steps: usize,
    best_test_loss: f32,
    best_train_loss: f32,
}

fn build_loader(config: &Config, img_dir: &Path, gt_dir: &Path, is_training: bool) -> Result<DataLoader> {
    let img_dir = config.resolve(img_dir);
    let gt_dir = config.resolve(gt_dir);
    let (img_paths, gt_paths) = load_metadata(&img_dir, &gt_dir)?;
    if img_paths.is_empty() {
        return Err(Error::EmptyDataset(img_dir));
    }
    info!(
        "{} set: {} images from {}",
        if is_training { "train" } else { "test" },
        img_paths.len(),
        img_dir.display()
    );
    let dataset = TotalTextDataset::new(img_paths, gt_paths, is_training, config.hps.img_size, config.labels)?;
    Ok(DataLoader::new(dataset, config.hps.batch_size, is_training))
}

impl Trainer {
    /// Sets up data, model, optimizer and the run directory on the best
    /// available device.
    pub fn new(config: Config) -> Result<Self> {
        let device = utils::select_device()?;
        Self::with_device(config, device)
    }

    pub fn with_device(config: Config, device: Device) -> Result<Self> {
        config.validate()?;
        let rng = utils::seed_everything(SEED, &device);

        let run_dir = utils::run_dir(&config.meta.root_dir, utils::unix_time());
        info!("{}", run_dir.display());
        let writer = ScalarWriter::create(&run_dir)?;
        info!("device: {device:?}");

        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = DbTextModel::new(&DbNetConfig::from(&config.model), vb)?;
        if let Some(cp_path) = config.finetune_checkpoint() {
            if cp_path.exists() {
                info!("loading checkpoint: {}", cp_path.display());
                varmap.load(&cp_path)?;
            } else {
                warn!("fine-tune checkpoint {} not found, starting from scratch", cp_path.display());
            }
        }

        let totaltext = &config.data.totaltext;
        let train_loader = build_loader(&config, &totaltext.train_dir, &totaltext.train_gt_dir, true)?;
        let test_loader = build_loader(&config, &totaltext.test_dir, &totaltext.test_gt_dir, false)?;

        let opt = &config.optimizer;
        if opt.amsgrad {
            warn!("amsgrad is not supported, using plain AdamW");
        }
        let scheduler = LrScheduler::from_config(&config.lrs, opt.lr, config.hps.no_epochs, train_loader.len());
        info!("learning rate scheduler: {:?}", config.lrs.mode);
        let params = ParamsAdamW {
            lr: scheduler.initial_lr(opt.lr),
            weight_decay: opt.weight_decay,
            ..ParamsAdamW::default()
        };
        let optimizer = AdamW::new(varmap.all_vars(), params)?;
        let criterion = DbLoss::from(opt);

        Ok(Self {
            config,
            device,
            varmap,
            model,
            criterion,
            optimizer,
            scheduler,
            train_loader,
            test_loader,
            writer,
            run_dir,
            rng,
            global_steps: 0,
            best_test_loss: f32::INFINITY,
            best_train_loss: f32::INFINITY,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn global_steps(&self) -> usize {
        self.global_steps
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub fn run(&mut self) -> Result<Vec<EpochSummary>> {
        info!("start training");
        let mut summaries = Vec::with_capacity(self.config.hps.no_epochs);
        for epoch in 0..self.config.hps.no_epochs {
            summaries.push(self.run_epoch(epoch)?);
        }
        info!("training completed");

        let last = self.config.resolve(&self.config.model.last_cp_path);
        self.save_checkpoint(&last)?;
        info!("saved model to {}", last.display());
        self.writer.flush()?;
        Ok(summaries)
    }

    pub fn run_epoch(&mut self, epoch: usize) -> Result<EpochSummary> {
        let train_loss = self.train_epoch(epoch)?;
        info!("train loss: {train_loss}");
        let test_loss = self.evaluate()?;
        info!("[{}] - test_loss: {test_loss}", self.global_steps);

        let saved_best = test_loss <= self.best_test_loss && train_loss < self.best_train_loss;
        if saved_best {
            self.best_test_loss = test_loss;
            self.best_train_loss = train_loss;
            let best = self.config.resolve(&self.config.model.best_cp_path);
            self.save_checkpoint(&best)?;
            info!("saved best checkpoint to {}", best.display());
        }

        self.scheduler.step_epoch(&mut self.optimizer, test_loss as f64);
        self.writer.flush()?;

        Ok(EpochSummary {
            epoch,
            train_loss,
            test_loss,
            lr: self.optimizer.learning_rate(),
            saved_best,
        })
    }

    /// One pass over the training set; returns the mean total loss.
    pub fn train_epoch(&mut self, epoch: usize) -> Result<f32> {
        let mut running = RunningScore::new(self.config.hps.no_classes);
        let mut loss_sum = 0.0f32;
        let mut batches = 0usize;
        let mut last_batch: Option<(Array4<f32>, Tensor)> = None;

        let loader = self.train_loader.clone();
        for batch in loader.iter(&mut self.rng) {
            let batch = batch?;
            let lr = self.optimizer.learning_rate();
            self.global_steps += 1;

            let imgs = batch.images_tensor(&self.device)?;
            let targets = batch.targets(&self.device)?;
            let preds = self.model.forward_t(&imgs, true)?;
            let channels = preds.dim(1)?;
            if channels != 3 {
                return Err(Error::ModelOutput(format!("training output has {channels} channels, expected 3")));
            }

            let losses = self.criterion.forward(&preds, &targets)?;
            self.optimizer.backward_step(&losses.total_loss)?;
            self.scheduler.step_iter(&mut self.optimizer);

            let prob = to_array::<Ix3>(&preds.narrow(1, 0, 1)?.squeeze(1)?)?;
            let scores = cal_text_score(
                prob.view(),
                batch.prob_maps.view(),
                batch.supervision_masks.view(),
                &mut running,
                self.config.metric.thred_text_score,
            );

            let values = losses.values()?;
            loss_sum += values.total_loss;
            batches += 1;

            let step = self.global_steps;
            self.writer.add_scalar("TRAIN/LOSS/total_loss", step, values.total_loss as f64)?;
            self.writer.add_scalar("TRAIN/LOSS/loss", step, values.prob_threshold_loss as f64)?;
            self.writer.add_scalar("TRAIN/LOSS/prob_loss", step, values.prob_loss as f64)?;
            self.writer.add_scalar("TRAIN/LOSS/threshold_loss", step, values.threshold_loss as f64)?;
            self.writer.add_scalar("TRAIN/LOSS/binary_loss", step, values.binary_loss as f64)?;
            self.writer.add_scalar("TRAIN/ACC_IOU/acc", step, scores.mean_acc)?;
            self.writer.add_scalar("TRAIN/ACC_IOU/iou_shrink_map", step, scores.mean_iou)?;
            self.writer.add_scalar("TRAIN/HPs/lr", step, lr)?;

            if step % self.config.hps.log_iter.max(1) == 0 {
                info!(
                    "[{}-{}] - lr: {lr:.3e} - loss: {:.4} - acc: {:.4} - iou: {:.4}",
                    epoch + 1,
                    step,
                    values.total_loss,
                    scores.mean_acc,
                    scores.mean_iou
                );
            }
            last_batch = Some((batch.images, preds.detach()));
        }

        if let Some((images, preds)) = last_batch {
            self.save_visualization("TRAIN", &images, &preds)?;
        }
        Ok(loss_sum / batches.max(1) as f32)
    }

    /// Mean evaluation loss over the test set, model in inference mode.
    pub fn evaluate(&mut self) -> Result<f32> {
        let mut running = RunningScore::new(self.config.hps.no_classes);
        let visualize_index = self.rng.gen_range(0..self.test_loader.len().max(1));
        let mut loss_sum = 0.0f32;
        let mut batches = 0usize;

        let loader = self.test_loader.clone();
        for (index, batch) in loader.iter(&mut self.rng).enumerate() {
            let batch = batch?;
            let imgs = batch.images_tensor(&self.device)?;
            let targets = batch.targets(&self.device)?;
            let preds = self.model.forward_t(&imgs, false)?.detach();
            let channels = preds.dim(1)?;
            if channels != 2 {
                return Err(Error::ModelOutput(format!("inference output has {channels} channels, expected 2")));
            }

            let values = self.criterion.forward(&preds, &targets)?.values()?;
            loss_sum += values.total_loss;
            batches += 1;

            if index == visualize_index {
                self.save_visualization("TEST", &batch.images, &preds)?;
            }

            let prob = to_array::<Ix3>(&preds.narrow(1, 0, 1)?.squeeze(1)?)?;
            let scores = cal_text_score(
                prob.view(),
                batch.prob_maps.view(),
                batch.supervision_masks.view(),
                &mut running,
                self.config.metric.thred_text_score,
            );
            let step = self.global_steps;
            self.writer.add_scalar("TEST/LOSS/val_loss", step, values.total_loss as f64)?;
            self.writer.add_scalar("TEST/ACC_IOU/val_acc", step, scores.mean_acc)?;
            self.writer.add_scalar("TEST/ACC_IOU/val_iou_shrink_map", step, scores.mean_iou)?;
        }

        Ok(loss_sum / batches.max(1) as f32)
    }

    fn save_visualization(&self, mode: &str, images: &Array4<f32>, preds: &Tensor) -> Result<()> {
        let preds = to_array::<Ix4>(preds)?;
        let grid = visualize::prediction_grid(images.view(), preds.view(), self.config.metric.prob_threshold, 4);
        let path = self
            .run_dir
            .join("images")
            .join(format!("{mode}_{:06}.png", self.global_steps));
        visualize::save_png(&grid, path)
    }

    pub fn save_checkpoint(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.varmap.save(path)?;
        Ok(())
    }
}
