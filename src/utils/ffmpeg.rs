//! Thin wrappers around the `ffmpeg`/`ffprobe` executables used to decode
//! camera and file sources into raw RGB frames.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use thiserror::Error;
use tracing::debug;

use crate::pipeline::video::VideoSource;

#[derive(Error, Debug)]
pub enum FfmpegError {
    #[error("{0} not found on PATH; install ffmpeg to stream video")]
    NotFound(&'static str),
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("ffprobe could not read the video size: {0}")]
    Probe(String),
}

fn locate(tool: &'static str) -> Result<PathBuf, FfmpegError> {
    which::which(tool).map_err(|_| FfmpegError::NotFound(tool))
}

/// Demuxer/input arguments that make ffmpeg or ffprobe read `source`.
pub fn input_args(source: &VideoSource) -> Vec<String> {
    match source {
        #[cfg(target_os = "macos")]
        VideoSource::Camera(index) => vec![
            "-f".to_string(),
            "avfoundation".to_string(),
            "-i".to_string(),
            index.to_string(),
        ],
        #[cfg(not(target_os = "macos"))]
        VideoSource::Camera(index) => vec![
            "-f".to_string(),
            "v4l2".to_string(),
            "-i".to_string(),
            format!("/dev/video{index}"),
        ],
        VideoSource::File(path) => vec!["-i".to_string(), path.to_string_lossy().into_owned()],
    }
}

/// Parse ffprobe's `WIDTHxHEIGHT` csv output.
pub fn parse_dimensions(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut parts = line.split('x').filter(|p| !p.is_empty());
    let width = parts.next()?.trim().parse().ok()?;
    let height = parts.next()?.trim().parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// Ask ffprobe for the frame size of the first video stream.
pub fn probe_dimensions(source: &VideoSource) -> Result<(u32, u32), FfmpegError> {
    let ffprobe = locate("ffprobe")?;
    let mut args = vec!["-v".to_string(), "error".to_string()];
    let input = input_args(source);
    // ffprobe takes the input as a bare trailing argument, not `-i`.
    let (demuxer, target) = input.split_at(input.len() - 2);
    args.extend_from_slice(demuxer);
    args.extend([
        "-select_streams".to_string(),
        "v:0".to_string(),
        "-show_entries".to_string(),
        "stream=width,height".to_string(),
        "-of".to_string(),
        "csv=s=x:p=0".to_string(),
        target[1].clone(),
    ]);

    let output = Command::new(&ffprobe)
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| FfmpegError::Spawn { tool: "ffprobe", source })?;
    if !output.status.success() {
        return Err(FfmpegError::Probe(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_dimensions(&stdout).ok_or_else(|| FfmpegError::Probe(format!("unexpected output {:?}", stdout.trim())))
}

/// Start ffmpeg decoding `source` to packed rgb24 frames on its stdout.
pub fn spawn_rgb_decoder(source: &VideoSource) -> Result<Child, FfmpegError> {
    let ffmpeg = locate("ffmpeg")?;
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostdin".to_string(),
    ];
    args.extend(input_args(source));
    args.extend(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"].iter().map(|s| s.to_string()));
    debug!(?args, "spawning ffmpeg decoder");

    Command::new(&ffmpeg)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| FfmpegError::Spawn { tool: "ffmpeg", source })
}
