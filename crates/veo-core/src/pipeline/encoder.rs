//! Frame sequence to video file

use crate::error::VeoError;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame, RgbImage};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Encodes frames to H.264 MP4 through an ffmpeg subprocess
///
/// Frames are piped as raw RGB24 on stdin. When the ffmpeg binary cannot be
/// spawned at all, an animated GIF is written next to the requested path.
#[derive(Debug, Clone)]
pub struct VideoEncoder {
    ffmpeg: PathBuf,
}

impl VideoEncoder {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Write `frames` to `output` and return the path actually written
    pub async fn encode(
        &self,
        frames: &[RgbImage],
        fps: u32,
        output: &Path,
    ) -> Result<PathBuf, VeoError> {
        let first = frames
            .first()
            .ok_or_else(|| VeoError::Encode("no frames to encode".to_string()))?;
        let (width, height) = first.dimensions();
        if frames.iter().any(|f| f.dimensions() != (width, height)) {
            return Err(VeoError::Encode("frames differ in size".to_string()));
        }
        let fps = fps.max(1);

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let spawned = Command::new(&self.ffmpeg)
            .args(["-y", "-loglevel", "error", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("-s")
            .arg(format!("{}x{}", width, height))
            .arg("-r")
            .arg(fps.to_string())
            .args(["-i", "-", "-c:v", "libx264", "-pix_fmt", "yuv420p", "-movflags", "+faststart"])
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    "{} not found, writing an animated GIF instead",
                    self.ffmpeg.display()
                );
                let gif_path = output.with_extension("gif");
                write_gif(frames.to_vec(), fps, gif_path.clone()).await?;
                return Ok(gif_path);
            }
            Err(e) => return Err(e.into()),
        };

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VeoError::Encode("ffmpeg stdin unavailable".to_string()))?;
        for frame in frames {
            if let Err(e) = stdin.write_all(frame.as_raw()).await {
                // ffmpeg exited early; its stderr explains why
                debug!("Writing to ffmpeg failed: {}", e);
                break;
            }
        }
        drop(stdin);

        let result = child.wait_with_output().await?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(VeoError::Encode(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        debug!("Encoded {} frames to {}", frames.len(), output.display());
        Ok(output.to_path_buf())
    }
}

async fn write_gif(frames: Vec<RgbImage>, fps: u32, path: PathBuf) -> Result<(), VeoError> {
    tokio::task::spawn_blocking(move || -> Result<(), VeoError> {
        let file = std::fs::File::create(&path)?;
        let mut encoder = GifEncoder::new(std::io::BufWriter::new(file));
        encoder.set_repeat(Repeat::Infinite)?;
        let delay = Delay::from_numer_denom_ms(1000, fps);
        for rgb in frames {
            let rgba = DynamicImage::ImageRgb8(rgb).to_rgba8();
            encoder.encode_frame(Frame::from_parts(rgba, 0, 0, delay))?;
        }
        Ok(())
    })
    .await?
}
