#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::serve;
use faceid::api::routes;
use faceid::pipeline::detect::{DetectorFactory, FaceBox, FaceDetector};
use faceid::utils::config::Config;
use faceid::AppState;
use image::{GrayImage, Rgb, RgbImage};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Duration;

/// Pseudo-random texture standing in for a face photo; each seed is distinct.
pub fn face_image(seed: u32) -> RgbImage {
    RgbImage::from_fn(120, 120, |x, y| {
        let v = (x * 31 + y * 17 + seed * 7919).wrapping_mul(2_654_435_761);
        Rgb([(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8])
    })
}

pub fn write_face(path: &Path, seed: u32) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    face_image(seed).save(path).unwrap();
}

pub fn png_bytes(seed: u32) -> Vec<u8> {
    let mut out = std::io::Cursor::new(Vec::new());
    face_image(seed).write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Reports the whole image as one face, counting calls.
pub struct FullFrameDetector {
    pub calls: Arc<AtomicUsize>,
}

impl FaceDetector for FullFrameDetector {
    fn detect(&mut self, gray: &GrayImage) -> Vec<FaceBox> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if gray.width() < 30 || gray.height() < 30 {
            return Vec::new();
        }
        vec![FaceBox::new(0, 0, gray.width(), gray.height())]
    }
}

/// Never finds a face.
pub struct NoFaceDetector;

impl FaceDetector for NoFaceDetector {
    fn detect(&mut self, _gray: &GrayImage) -> Vec<FaceBox> {
        Vec::new()
    }
}

pub fn full_frame() -> FullFrameDetector {
    FullFrameDetector { calls: Arc::new(AtomicUsize::new(0)) }
}

/// Factory whose detectors all share `calls`.
pub fn full_frame_factory(calls: Arc<AtomicUsize>) -> DetectorFactory {
    Arc::new(move || Ok(Box::new(FullFrameDetector { calls: calls.clone() }) as Box<dyn FaceDetector>))
}

pub fn test_config(root: &Path) -> Config {
    Config {
        known_faces: root.join("known_faces"),
        model_file: root.join("face_model.json"),
        labels_file: root.join("face_labels.json"),
        detector_model: root.join("missing-detector.bin"),
        upload_dir: root.join("uploads"),
        port: 0,
        video_source: root.join("no-such-video.mp4").to_string_lossy().into_owned(),
        font: None,
        unknown_distance: 100.0,
    }
}

pub struct TestServer {
    pub tmp: TempDir,
    pub base: String,
    pub calls: Arc<AtomicUsize>,
    pub config: Config,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn upload_dir_is_empty(&self) -> bool {
        match std::fs::read_dir(&self.config.upload_dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }
}

async fn wait_for_port(port: u16) {
    for _ in 0..30 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("Server never started");
}

/// Start the router on an ephemeral port with reference images for `people`
/// (name, seed) already on disk.
pub async fn spawn_server(people: &[(&str, u32)]) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    for (name, seed) in people {
        write_face(&config.known_faces.join(name).join(format!("{seed}.png")), *seed);
    }
    std::fs::create_dir_all(&config.upload_dir).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let factory = full_frame_factory(calls.clone());
    let cfg = config.clone();
    let (state, _) = tokio::task::spawn_blocking(move || AppState::start(cfg, factory))
        .await
        .unwrap()
        .unwrap();

    let app = routes::router(state);
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        serve(listener, app.into_make_service()).await.unwrap();
    });
    wait_for_port(port).await;

    TestServer { tmp, base: format!("http://127.0.0.1:{port}"), calls, config }
}
