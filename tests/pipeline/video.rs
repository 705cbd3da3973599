#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{face_image, full_frame, write_face};
use faceid::pipeline::cache::ModelCache;
use faceid::pipeline::model::load_or_train;
use faceid::pipeline::overlay::Overlay;
use faceid::pipeline::recognize::Recognizer;
use faceid::pipeline::reference::ReferenceSet;
use faceid::pipeline::video::{FrameSource, FrameStream, VideoError};
use image::RgbImage;
use tempfile::TempDir;

struct Replay(Vec<RgbImage>);

impl FrameSource for Replay {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
        Ok(if self.0.is_empty() { None } else { Some(self.0.remove(0)) })
    }
}

fn near(px: &image::Rgb<u8>, want: [u8; 3]) -> bool {
    px.0.iter().zip(want).all(|(&a, b)| (a as i32 - b as i32).abs() < 60)
}

#[test]
fn test_stream_annotates_known_and_unknown_faces() {
    let tmp = TempDir::new().unwrap();
    let reference = ReferenceSet::open(tmp.path().join("known_faces")).unwrap();
    write_face(&reference.root().join("ada").join("1.png"), 1);
    let cache = ModelCache::new(tmp.path().join("m.json"), tmp.path().join("l.json"));
    let (model, _) = load_or_train(&reference, &cache, &mut full_frame()).unwrap();

    // Frames 2 and 4 are processed: a known face, then one past a zero threshold.
    let frames = vec![face_image(1), face_image(1), face_image(1), face_image(1)];
    let recognizer = Recognizer::new(Box::new(full_frame()), Arc::new(model.clone()), 100.0);
    let jpegs: Vec<Vec<u8>> = FrameStream::new(Replay(frames.clone()), recognizer, Overlay::without_text())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(jpegs.len(), 2);

    let decoded = image::load_from_memory(&jpegs[0]).unwrap().to_rgb8();
    assert_eq!(decoded.dimensions(), (120, 120));
    // Label bar along the bottom edge is green for a known face.
    assert!(near(decoded.get_pixel(60, 110), [0, 200, 0]), "{:?}", decoded.get_pixel(60, 110));

    let recognizer = Recognizer::new(Box::new(full_frame()), Arc::new(model), 0.0);
    let jpegs: Vec<Vec<u8>> = FrameStream::new(Replay(frames), recognizer, Overlay::without_text())
        .with_max_frames(2)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(jpegs.len(), 1);
    let decoded = image::load_from_memory(&jpegs[0]).unwrap().to_rgb8();
    assert!(near(decoded.get_pixel(60, 110), [220, 0, 0]), "{:?}", decoded.get_pixel(60, 110));
}
