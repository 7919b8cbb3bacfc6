use std::path::Path;

use dbtext::config::LabelConfig;
use dbtext::data::{load_metadata, DataLoader, TotalTextDataset};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn write_sample(img_dir: &Path, gt_dir: &Path, name: &str) {
    let mut img = RgbImage::from_pixel(160, 120, Rgb([255, 255, 255]));
    for y in 40..70 {
        for x in 20..140 {
            img.put_pixel(x, y, Rgb([0, 0, 0]));
        }
    }
    img.save(img_dir.join(format!("{name}.png"))).unwrap();
    std::fs::write(
        gt_dir.join(format!("poly_gt_{name}.txt")),
        "x: [[20 140 140 20]], y: [[40 40 70 70]], ornt: [u'h'], transcriptions: [u'TEXT']\n\
         x: [[100 110 110\n 100]], y: [[90 90 100 100]], ornt: [u'#'], transcriptions: [u'#']\n",
    )
    .unwrap();
}

#[test]
fn eval_batches_have_expected_shapes() {
    let dir = tempfile::tempdir().unwrap();
    let (img_dir, gt_dir) = (dir.path().join("images"), dir.path().join("gts"));
    std::fs::create_dir_all(&img_dir).unwrap();
    std::fs::create_dir_all(&gt_dir).unwrap();
    for name in ["img1", "img2", "img3"] {
        write_sample(&img_dir, &gt_dir, name);
    }

    let (imgs, gts) = load_metadata(&img_dir, &gt_dir).unwrap();
    assert_eq!(imgs.len(), 3);
    assert!(gts[0].ends_with("poly_gt_img1.txt"));

    let dataset = TotalTextDataset::new(imgs, gts, false, 64, LabelConfig::default()).unwrap();
    let loader = DataLoader::new(dataset, 2, false);
    assert_eq!(loader.len(), 2);

    let mut rng = StdRng::seed_from_u64(0);
    let batches: Vec<_> = loader.iter(&mut rng).collect::<Result<_, _>>().unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].images.dim(), (2, 3, 64, 64));
    assert_eq!(batches[0].prob_maps.dim(), (2, 64, 64));
    assert_eq!(batches[1].len(), 1);

    // the text block is scaled to x 8..56, y 21..37 and shrunk inwards
    let batch = &batches[0];
    assert_eq!(batch.prob_maps[[0, 29, 32]], 1.0);
    assert_eq!(batch.prob_maps[[0, 5, 5]], 0.0);
    // the don't-care box is excluded from supervision
    assert_eq!(batch.supervision_masks[[0, 50, 43]], 0.0);
    assert_eq!(batch.supervision_masks[[0, 5, 5]], 1.0);
}

#[test]
fn training_samples_are_augmented_to_size() {
    let dir = tempfile::tempdir().unwrap();
    write_sample(dir.path(), dir.path(), "only");

    let (imgs, gts) = load_metadata(dir.path(), dir.path()).unwrap();
    let dataset = TotalTextDataset::new(imgs, gts, true, 96, LabelConfig::default()).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..4 {
        let sample = dataset.get(0, &mut rng).unwrap();
        assert_eq!(sample.image.dim(), (3, 96, 96));
        assert_eq!(sample.threshold_map.dim(), (96, 96));
        assert!(sample.prob_map.iter().all(|&v| v == 0.0 || v == 1.0));
    }
}

#[test]
fn missing_ground_truth_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(8, 8).save(dir.path().join("lonely.jpg")).unwrap();
    let err = load_metadata(dir.path(), dir.path()).unwrap_err();
    assert!(matches!(err, dbtext::Error::MissingAnnotation(_)));
}

#[test]
fn mismatched_paths_are_rejected() {
    let imgs = vec!["a.jpg".into(), "b.jpg".into()];
    let gts = vec!["poly_gt_a.txt".into()];
    let err = TotalTextDataset::new(imgs, gts, false, 64, LabelConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        dbtext::Error::MismatchedDataset {
            images: 2,
            annotations: 1
        }
    ));
}
