//! Video capture and the lazy stream of annotated JPEG frames.

use std::fmt;
use std::io::{BufReader, ErrorKind, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdout};
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pipeline::overlay::Overlay;
use crate::pipeline::recognize::Recognizer;
use crate::utils::ffmpeg::{self, FfmpegError};

/// Only every Nth frame read from the source is recognized and emitted.
pub const PROCESS_EVERY_N_FRAMES: u64 = 2;
const JPEG_QUALITY: u8 = 80;

/// Multipart boundary used by the frame stream.
pub const BOUNDARY: &str = "frame";

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("invalid video source {0:?}")]
    InvalidSource(String),
    #[error("video file not found: {0}")]
    SourceMissing(PathBuf),
    #[error(transparent)]
    Ffmpeg(#[from] FfmpegError),
    #[error("failed to open video source: {0}")]
    Open(String),
    #[error("failed to read frame: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
}

/// Camera index or path to a video file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    Camera(u32),
    File(PathBuf),
}

impl FromStr for VideoSource {
    type Err = VideoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VideoError::InvalidSource(s.to_string()));
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            return s.parse().map(VideoSource::Camera).map_err(|_| VideoError::InvalidSource(s.to_string()));
        }
        Ok(VideoSource::File(PathBuf::from(s)))
    }
}

impl fmt::Display for VideoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoSource::Camera(i) => write!(f, "camera {i}"),
            VideoSource::File(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Anything that yields RGB frames until exhausted.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, VideoError>;
}

/// ffmpeg child process decoding a source to raw rgb24 on its stdout.
///
/// The child is killed and reaped when the capture is dropped.
pub struct FfmpegCapture {
    child: Child,
    stdout: BufReader<ChildStdout>,
    width: u32,
    height: u32,
}

impl FfmpegCapture {
    pub fn open(source: &VideoSource) -> Result<Self, VideoError> {
        if let VideoSource::File(path) = source {
            if !path.is_file() {
                return Err(VideoError::SourceMissing(path.clone()));
            }
        }
        let (width, height) = ffmpeg::probe_dimensions(source)?;
        let mut child = ffmpeg::spawn_rgb_decoder(source)?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(VideoError::Open("decoder stdout unavailable".to_string()));
        };
        info!(%source, width, height, "opened video source");
        Ok(Self { child, stdout: BufReader::new(stdout), width, height })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl FrameSource for FfmpegCapture {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
        let mut buf = vec![0u8; self.width as usize * self.height as usize * 3];
        match self.stdout.read_exact(&mut buf) {
            Ok(()) => {}
            // A truncated trailing frame counts as end of stream.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(VideoError::Read(e)),
        }
        RgbImage::from_raw(self.width, self.height, buf)
            .map(Some)
            .ok_or_else(|| VideoError::Read(std::io::Error::new(ErrorKind::InvalidData, "short frame buffer")))
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            // InvalidInput means it already exited.
            if e.kind() != ErrorKind::InvalidInput {
                warn!(error = %e, "failed to stop ffmpeg decoder");
            }
        }
        match self.child.wait() {
            Ok(status) => debug!(?status, "ffmpeg decoder exited"),
            Err(e) => warn!(error = %e, "failed to reap ffmpeg decoder"),
        }
    }
}

pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>, VideoError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

/// Wrap one JPEG as a `multipart/x-mixed-replace` part.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let head = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = BytesMut::with_capacity(head.len() + jpeg.len() + 2);
    part.put_slice(head.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Pulls frames from a source, recognizes and annotates every Nth one, and
/// yields it JPEG-encoded.
///
/// Ends when the source is exhausted, the frame cap is reached, or after the
/// first error. The source is dropped as soon as the stream ends, and with the
/// stream itself if the consumer stops early.
pub struct FrameStream<S: FrameSource> {
    source: Option<S>,
    recognizer: Recognizer,
    overlay: Overlay,
    max_frames: Option<u64>,
    frames_read: u64,
}

impl<S: FrameSource> FrameStream<S> {
    pub fn new(source: S, recognizer: Recognizer, overlay: Overlay) -> Self {
        Self { source: Some(source), recognizer, overlay, max_frames: None, frames_read: 0 }
    }

    /// Stop after `max` frames have been read from the source.
    pub fn with_max_frames(mut self, max: u64) -> Self {
        self.max_frames = Some(max);
        self
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn is_finished(&self) -> bool {
        self.source.is_none()
    }

    fn release(&mut self) {
        if self.source.take().is_some() {
            debug!(frames = self.frames_read, "released video source");
        }
    }
}

impl<S: FrameSource> Iterator for FrameStream<S> {
    type Item = Result<Vec<u8>, VideoError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.max_frames.is_some_and(|max| self.frames_read >= max) {
                self.release();
                return None;
            }
            let source = self.source.as_mut()?;
            let mut frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.release();
                    return None;
                }
                Err(e) => {
                    self.release();
                    return Some(Err(e));
                }
            };
            self.frames_read += 1;
            if self.frames_read % PROCESS_EVERY_N_FRAMES != 0 {
                continue;
            }

            let gray = image::imageops::grayscale(&frame);
            let faces = self.recognizer.recognize_gray(&gray);
            self.overlay.draw_all(&mut frame, &faces);
            match encode_jpeg(&frame) {
                Ok(jpeg) => return Some(Ok(jpeg)),
                Err(e) => {
                    self.release();
                    return Some(Err(e));
                }
            }
        }
    }
}
