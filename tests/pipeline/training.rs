#[path = "../common/mod.rs"]
mod common;

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{face_image, full_frame, full_frame_factory, write_face, NoFaceDetector};
use faceid::pipeline::cache::ModelCache;
use faceid::pipeline::engine::{spawn_engine, EngineError};
use faceid::pipeline::model::{load_or_train, retrain, ModelSource, UNKNOWN};
use faceid::pipeline::recognize::Recognizer;
use faceid::pipeline::reference::{ReferenceError, ReferenceSet};
use image::DynamicImage;
use tempfile::TempDir;

struct Fixture {
    tmp: TempDir,
    reference: ReferenceSet,
    cache: ModelCache,
}

fn fixture(people: &[(&str, u32)]) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let reference = ReferenceSet::open(tmp.path().join("known_faces")).unwrap();
    for (name, seed) in people {
        write_face(&reference.root().join(name).join(format!("{seed}.png")), *seed);
    }
    let cache = ModelCache::new(tmp.path().join("face_model.json"), tmp.path().join("face_labels.json"));
    Fixture { tmp, reference, cache }
}

fn recognize(model: faceid::pipeline::model::FaceModel, seed: u32) -> Vec<faceid::models::face::RecognizedFace> {
    let mut recognizer = Recognizer::new(Box::new(full_frame()), Arc::new(model), 100.0);
    recognizer.recognize_image(&DynamicImage::ImageRgb8(face_image(seed)))
}

#[test]
fn test_train_then_recognize_same_image() {
    let fx = fixture(&[("ada", 1), ("bob", 2)]);
    let (model, report) = load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    assert_eq!(report.source, ModelSource::Trained);
    assert_eq!(report.encoded, 2);
    assert_eq!(report.people, 2);
    assert_eq!(model.names(), vec!["ada", "bob"]);

    let faces = recognize(model, 2);
    assert_eq!(faces.len(), 1);
    assert_eq!(faces[0].name, "bob");
    assert!(faces[0].confidence > 0.0 && faces[0].confidence <= 1.0);
    assert_eq!(faces[0].location.right, 120);
}

#[test]
fn test_cache_round_trip_skips_scan() {
    let fx = fixture(&[("ada", 1), ("bob", 2)]);
    let (trained, _) = load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    assert!(fx.cache.model_path().exists());
    assert!(fx.cache.labels_path().exists());

    let detector = full_frame();
    let calls = detector.calls.clone();
    let mut detector = detector;
    let (cached, report) = load_or_train(&fx.reference, &fx.cache, &mut detector).unwrap();
    assert_eq!(report.source, ModelSource::Cache);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(cached.names(), trained.names());

    for seed in [1, 2, 3] {
        assert_eq!(recognize(trained.clone(), seed), recognize(cached.clone(), seed));
    }
}

#[test]
fn test_external_change_forces_retrain() {
    let fx = fixture(&[("ada", 1)]);
    load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();

    write_face(&fx.reference.root().join("cy").join("3.png"), 3);
    let (model, report) = load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    assert_eq!(report.source, ModelSource::Trained);
    assert_eq!(model.names(), vec!["ada", "cy"]);
    assert_eq!(recognize(model, 3)[0].name, "cy");
}

#[test]
fn test_add_then_reload_recognizes_new_person() {
    let fx = fixture(&[("bob", 2)]);
    load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();

    let upload = fx.tmp.path().join("upload.png");
    write_face(&upload, 7);
    fx.reference.add_image(&upload, "ada").unwrap();
    fx.cache.invalidate().unwrap();

    let (model, report) = load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    assert_eq!(report.source, ModelSource::Trained);
    assert!(model.labels().label_of("ada").is_some());
    assert_eq!(recognize(model, 7)[0].name, "ada");
}

#[test]
fn test_labels_survive_rescans() {
    let fx = fixture(&[("bob", 2)]);
    let (before, _) = load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    let bob = before.labels().label_of("bob").unwrap();

    // "aaron" sorts before "bob" but must not take its label.
    write_face(&fx.reference.root().join("aaron").join("5.png"), 5);
    let (after, _) = load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    assert_eq!(after.labels().label_of("bob"), Some(bob));
    assert_ne!(after.labels().label_of("aaron"), Some(bob));
}

#[test]
fn test_remove_then_reload_forgets_person() {
    let fx = fixture(&[("ada", 1), ("bob", 2)]);
    load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();

    fx.reference.remove_person("ada").unwrap();
    fx.cache.invalidate().unwrap();
    let (model, _) = load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    assert_eq!(model.names(), vec!["bob"]);
    assert_eq!(model.labels().label_of("ada"), None);
    assert_ne!(recognize(model, 1)[0].name, "ada");
}

#[test]
fn test_bad_images_are_skipped() {
    let fx = fixture(&[("ada", 1)]);
    fs::write(fx.reference.root().join("ada").join("broken.jpg"), b"not a jpeg").unwrap();
    fs::create_dir_all(fx.reference.root().join("bob")).unwrap();
    // Too small for the detector to find anything.
    image::RgbImage::new(10, 10).save(fx.reference.root().join("bob").join("tiny.png")).unwrap();

    let (model, report) = load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    assert_eq!(report.encoded, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(model.sample_count(), 1);
    assert_eq!(recognize(model, 1)[0].name, "ada");
}

#[test]
fn test_folder_with_padded_name_still_trains() {
    let fx = fixture(&[("ada", 1)]);
    write_face(&fx.reference.root().join("bob ").join("2.png"), 2);

    let (model, report) = load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    assert_eq!(report.source, ModelSource::Trained);
    assert_eq!(report.encoded, 2);
    assert_eq!(model.names(), vec!["ada", "bob "]);
    assert_eq!(recognize(model, 1)[0].name, "ada");

    let (model, report) = load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    assert_eq!(report.source, ModelSource::Cache);
    assert_eq!(recognize(model, 2)[0].name, "bob ");
}

#[test]
fn test_no_faces_leaves_no_model() {
    let fx = fixture(&[("ada", 1), ("bob", 2)]);
    let (model, report) = load_or_train(&fx.reference, &fx.cache, &mut NoFaceDetector).unwrap();
    assert_eq!(report.source, ModelSource::Untrained);
    assert_eq!(report.encoded, 0);
    assert!(!model.is_trained());
    assert!(!fx.cache.model_path().exists());

    let faces = recognize(model, 1);
    assert_eq!(faces[0].name, UNKNOWN);
    assert_eq!(faces[0].confidence, 0.0);

    // The unstamped label table never counts as a cache hit.
    let (_, report) = load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    assert_eq!(report.source, ModelSource::Trained);
}

#[test]
fn test_corrupt_cache_retrains() {
    let fx = fixture(&[("ada", 1)]);
    load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    fs::write(fx.cache.model_path(), b"{\"fingerprint\": 3").unwrap();

    let (model, report) = load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    assert_eq!(report.source, ModelSource::Trained);
    assert_eq!(recognize(model, 1)[0].name, "ada");
}

#[test]
fn test_retrain_ignores_valid_cache() {
    let fx = fixture(&[("ada", 1)]);
    load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    let (_, report) = retrain(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    assert_eq!(report.source, ModelSource::Trained);
}

#[test]
fn test_unknown_threshold_applies() {
    let fx = fixture(&[("ada", 1)]);
    let (model, _) = load_or_train(&fx.reference, &fx.cache, &mut full_frame()).unwrap();
    // Exact match has distance 0, which is at a zero threshold.
    let mut recognizer = Recognizer::new(Box::new(full_frame()), Arc::new(model), 0.0);
    let faces = recognizer.recognize_image(&DynamicImage::ImageRgb8(face_image(1)));
    assert_eq!(faces[0].name, UNKNOWN);
    assert_eq!(faces[0].confidence, 0.0);
}

#[tokio::test]
async fn test_engine_add_recognize_remove() {
    let fx = fixture(&[("bob", 2)]);
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let (engine, report) = tokio::task::spawn_blocking({
        let reference = fx.reference.clone();
        let cache = fx.cache.clone();
        let factory = full_frame_factory(calls.clone());
        move || spawn_engine(reference, cache, factory, 100.0)
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(report.source, ModelSource::Trained);

    let upload = fx.tmp.path().join("ada.png");
    write_face(&upload, 9);
    let report = engine.add_face(upload.clone(), "ada".into()).await.unwrap();
    assert_eq!(report.encoded, 2);

    let result = engine.recognize(upload.clone()).await.unwrap();
    assert!(result.error.is_none());
    assert_eq!(result.faces[0].name, "ada");

    let snapshot = engine.snapshot().await.unwrap();
    assert_eq!(snapshot.names(), vec!["ada", "bob"]);

    engine.remove_face("ada".into()).await.unwrap();
    let result = engine.recognize(upload).await.unwrap();
    assert_ne!(result.faces[0].name, "ada");

    // Nothing changed on disk since the remove retrained, so the cache is reused.
    let report = engine.reload().await.unwrap();
    assert_eq!(report.source, ModelSource::Cache);
    assert_eq!(report.people, 1);

    let err = engine.remove_face("ada".into()).await.unwrap_err();
    assert!(matches!(err, EngineError::Reference(ReferenceError::PersonNotFound(_))));
}

#[tokio::test]
async fn test_engine_reports_missing_image() {
    let fx = fixture(&[]);
    let (engine, _) = tokio::task::spawn_blocking({
        let reference = fx.reference.clone();
        let cache = fx.cache.clone();
        let factory = full_frame_factory(Arc::new(Default::default()));
        move || spawn_engine(reference, cache, factory, 100.0)
    })
    .await
    .unwrap()
    .unwrap();

    let report = engine.recognize(fx.tmp.path().join("missing.png")).await.unwrap();
    assert!(report.error.unwrap().starts_with("Failed to load image"));
    assert!(report.faces.is_empty());
}
