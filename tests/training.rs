use std::path::Path;

use candle_core::Device;
use dbtext::config::{Config, LrsMode};
use dbtext::models::{open_detector, TextDetector};
use dbtext::scalars::{read_scalars, ScalarWriter};
use dbtext::training::Trainer;
use image::{Rgb, RgbImage};

fn write_split(root: &Path, split: &str, count: usize) {
    let img_dir = root.join(split).join("images");
    let gt_dir = root.join(split).join("gts");
    std::fs::create_dir_all(&img_dir).unwrap();
    std::fs::create_dir_all(&gt_dir).unwrap();
    for i in 0..count {
        let mut img = RgbImage::from_pixel(96, 96, Rgb([230, 230, 230]));
        let y0 = 20 + 10 * i as u32;
        for y in y0..y0 + 16 {
            for x in 10..80 {
                img.put_pixel(x, y, Rgb([20, 20, 20]));
            }
        }
        img.save(img_dir.join(format!("img{i}.png"))).unwrap();
        std::fs::write(
            gt_dir.join(format!("img{i}.txt")),
            format!("10,{y0},80,{y0},80,{},10,{},WORD\n", y0 + 16, y0 + 16),
        )
        .unwrap();
    }
}

fn tiny_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.meta.root_dir = root.to_path_buf();
    config.data.totaltext.train_dir = "train/images".into();
    config.data.totaltext.train_gt_dir = "train/gts".into();
    config.data.totaltext.test_dir = "test/images".into();
    config.data.totaltext.test_gt_dir = "test/gts".into();
    config.hps.batch_size = 2;
    config.hps.no_epochs = 1;
    config.hps.log_iter = 1;
    config.hps.img_size = 64;
    config.model.inner_channels = 16;
    config.lrs.mode = LrsMode::Poly;
    config.lrs.warmup_iters = 1;
    config.test.img_size = 64;
    config
}

#[test]
fn one_epoch_writes_checkpoints_and_scalars() {
    let dir = tempfile::tempdir().unwrap();
    write_split(dir.path(), "train", 3);
    write_split(dir.path(), "test", 2);
    let config = tiny_config(dir.path());

    let mut trainer = Trainer::with_device(config.clone(), Device::Cpu).unwrap();
    let summaries = trainer.run().unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].train_loss.is_finite());
    assert!(summaries[0].test_loss.is_finite());
    assert_eq!(trainer.global_steps(), 2);

    let last_cp = config.resolve(&config.model.last_cp_path);
    assert!(last_cp.exists());
    if summaries[0].saved_best {
        assert!(config.resolve(&config.model.best_cp_path).exists());
    }

    let records = read_scalars(trainer.run_dir().join(ScalarWriter::FILE_NAME)).unwrap();
    for tag in [
        "TRAIN/LOSS/total_loss",
        "TRAIN/LOSS/binary_loss",
        "TRAIN/ACC_IOU/iou_shrink_map",
        "TRAIN/HPs/lr",
        "TEST/LOSS/val_loss",
        "TEST/ACC_IOU/val_acc",
    ] {
        assert!(records.iter().any(|r| r.tag == tag), "missing {tag}");
    }
    assert!(trainer.run_dir().join("images").read_dir().unwrap().count() >= 2);

    // the saved checkpoint serves inference
    let detector = open_detector(&last_cp, &config, &Device::Cpu).unwrap();
    let img = image::open(dir.path().join("test/images/img0.png")).unwrap();
    let detection = detector.predict(&img).unwrap();
    assert_eq!((detection.image_width, detection.image_height), (96, 96));
    assert_eq!(detection.prob_map.dim(), (64, 64));
}

#[test]
fn empty_training_dir_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_split(dir.path(), "test", 1);
    std::fs::create_dir_all(dir.path().join("train/images")).unwrap();
    std::fs::create_dir_all(dir.path().join("train/gts")).unwrap();

    let result = Trainer::with_device(tiny_config(dir.path()), Device::Cpu);
    assert!(matches!(result, Err(dbtext::Error::EmptyDataset(_))));
}
