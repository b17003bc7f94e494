//! Keyframe extraction from video files.
//!
//! Sampling is driven by a [`Strategy`] over an abstract [`VideoSource`],
//! so the stride logic stays testable without real video files. The real
//! source shells out to ffmpeg/ffprobe for decoding.

use crate::error::{BridgeError, Result};
use image::RgbImage;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::{debug, warn};

/// How frames are sampled from the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
    /// One frame every `interval_sec` seconds of wall-clock video time,
    /// derived from the source frame rate.
    ConstantInterval { interval_sec: f64 },
    /// Spread `max_frames` samples evenly over the whole source.
    EvenInterval,
}

/// Ordered frame supply for [`extract`].
pub trait VideoSource {
    fn fps(&self) -> f64;
    fn frame_count(&self) -> u64;
    /// Next decoded frame, or `None` when the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Sample keyframes from `source` into `output_dir` as JPEG files.
///
/// The output directory is owned by this call: pre-existing contents are
/// destroyed and the directory recreated. The caller is responsible for
/// eventual removal. Returns the written paths in extraction order.
pub fn extract<S: VideoSource + ?Sized>(
    source: &mut S,
    output_dir: &Path,
    strategy: Strategy,
    max_frames: usize,
) -> Result<Vec<PathBuf>> {
    if output_dir.is_dir() {
        std::fs::remove_dir_all(output_dir)?;
    }
    std::fs::create_dir_all(output_dir)?;

    let max_frames = max_frames.max(1);
    let stride = match strategy {
        Strategy::ConstantInterval { interval_sec } => {
            ((source.fps() * interval_sec).round() as u64).max(1)
        }
        Strategy::EvenInterval => (source.frame_count() / max_frames as u64).max(1),
    };
    debug!(
        "extracting up to {} frames, stride {} ({:?}, {} source frames at {:.2} fps)",
        max_frames,
        stride,
        strategy,
        source.frame_count(),
        source.fps()
    );

    let mut saved = Vec::new();
    let mut idx: u64 = 0;
    while let Some(frame) = source.next_frame()? {
        if idx % stride == 0 {
            let path = output_dir.join(format!("frame_{:04}.jpg", saved.len()));
            frame.save(&path)?;
            saved.push(path);
            if saved.len() >= max_frames {
                break;
            }
        }
        idx += 1;
    }
    Ok(saved)
}

/// Real video source backed by ffprobe (metadata) and an ffmpeg child
/// process streaming raw RGB frames on its stdout.
#[derive(Debug)]
pub struct FfmpegSource {
    width: u32,
    height: u32,
    fps: f64,
    frame_count: u64,
    child: Child,
    stdout: ChildStdout,
}

impl FfmpegSource {
    /// Probe and open `path`. Fails with [`BridgeError::SourceNotFound`]
    /// when the file cannot be opened or probed.
    pub fn open(path: &Path) -> Result<Self> {
        let meta = probe(path)?;
        debug!(
            "opened {}: {}x{}, {:.2} fps, ~{} frames",
            path.display(),
            meta.width,
            meta.height,
            meta.fps,
            meta.frame_count
        );

        let mut child = Command::new("ffmpeg")
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                warn!("failed to spawn ffmpeg: {e}");
                BridgeError::SourceNotFound(path.to_path_buf())
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Other("ffmpeg stdout not captured".to_string()))?;

        Ok(Self {
            width: meta.width,
            height: meta.height,
            fps: meta.fps,
            frame_count: meta.frame_count,
            child,
            stdout,
        })
    }
}

impl VideoSource for FfmpegSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let len = self.width as usize * self.height as usize * 3;
        let mut buf = vec![0u8; len];
        match self.stdout.read_exact(&mut buf) {
            Ok(()) => RgbImage::from_raw(self.width, self.height, buf)
                .map(Some)
                .ok_or_else(|| BridgeError::Other("short frame from ffmpeg".to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

struct ProbedMeta {
    width: u32,
    height: u32,
    fps: f64,
    frame_count: u64,
}

fn probe(path: &Path) -> Result<ProbedMeta> {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-select_streams", "v:0"])
        .args(["-show_entries", "stream=width,height,r_frame_rate,nb_frames"])
        .args(["-show_entries", "format=duration"])
        .args(["-of", "json"])
        .arg(path)
        .output()
        .map_err(|e| {
            warn!("failed to run ffprobe: {e}");
            BridgeError::SourceNotFound(path.to_path_buf())
        })?;

    if !output.status.success() {
        warn!("ffprobe failed for {}: {}", path.display(), output.status);
        return Err(BridgeError::SourceNotFound(path.to_path_buf()));
    }

    let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let stream = value["streams"]
        .get(0)
        .ok_or_else(|| BridgeError::SourceNotFound(path.to_path_buf()))?;

    let width = stream["width"].as_u64().unwrap_or(0) as u32;
    let height = stream["height"].as_u64().unwrap_or(0) as u32;
    if width == 0 || height == 0 {
        return Err(BridgeError::SourceNotFound(path.to_path_buf()));
    }

    let fps = stream["r_frame_rate"]
        .as_str()
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);

    // nb_frames is container-dependent; estimate from duration when absent
    let frame_count = stream["nb_frames"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .or_else(|| {
            let duration = value["format"]["duration"].as_str()?.parse::<f64>().ok()?;
            Some((duration * fps).round() as u64)
        })
        .unwrap_or(0);

    Ok(ProbedMeta {
        width,
        height,
        fps,
        frame_count,
    })
}

fn parse_frame_rate(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}
