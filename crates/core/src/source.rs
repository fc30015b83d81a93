//! Frame sources: where the JPEG frames come from.
//!
//! The server only needs a complete baseline JPEG per tick. A camera driver
//! implements [`FrameSource`]; [`JpegFileSource`] plays back files from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, RtspError};
use crate::media::jpeg::frame_dimensions;

/// A captured frame, borrowed from the source until
/// [`FrameSource::release`] is called.
#[derive(Debug, Clone, Copy)]
pub struct JpegFrame<'a> {
    /// Complete JPEG file bytes (SOI through EOI).
    pub data: &'a [u8],
    pub width: u16,
    pub height: u16,
}

/// The camera collaborator.
///
/// `capture` hands out the current frame; `release` is called once the
/// frame has been sent and the buffer may be reused.
pub trait FrameSource: Send {
    fn capture(&mut self) -> Result<JpegFrame<'_>>;

    fn release(&mut self) {}

    /// Dimensions advertised before the first capture.
    fn dimensions(&self) -> Option<(u16, u16)> {
        None
    }
}

struct LoadedFrame {
    path: PathBuf,
    data: Vec<u8>,
    width: u16,
    height: u16,
}

/// Cycles through JPEG files loaded into memory at startup.
pub struct JpegFileSource {
    frames: Vec<LoadedFrame>,
    next: usize,
}

impl JpegFileSource {
    /// Load every JPEG named by `paths`. Directories contribute their
    /// `.jpg`/`.jpeg` files in name order.
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut files = Vec::new();
        for path in paths {
            let path = path.as_ref();
            if path.is_dir() {
                let mut entries = fs::read_dir(path)?
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|p| p.is_file() && is_jpeg_path(p))
                    .collect::<Vec<_>>();
                entries.sort();
                files.extend(entries);
            } else {
                files.push(path.to_path_buf());
            }
        }

        let mut frames = Vec::with_capacity(files.len());
        for path in files {
            let data = fs::read(&path)?;
            match load_frame(path.clone(), data) {
                Some(frame) => frames.push(frame),
                None => tracing::warn!(path = %path.display(), "skipping file without SOF0 header"),
            }
        }

        Self::from_loaded(frames)
    }

    /// Build a source from in-memory JPEG images.
    pub fn from_images(images: Vec<Vec<u8>>) -> Result<Self> {
        let frames = images
            .into_iter()
            .enumerate()
            .filter_map(|(i, data)| load_frame(PathBuf::from(format!("<memory {}>", i)), data))
            .collect();
        Self::from_loaded(frames)
    }

    fn from_loaded(frames: Vec<LoadedFrame>) -> Result<Self> {
        if frames.is_empty() {
            return Err(RtspError::Capture("no usable JPEG frames".to_string()));
        }
        tracing::info!(frames = frames.len(), "JPEG file source loaded");
        Ok(Self { frames, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

fn is_jpeg_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

fn load_frame(path: PathBuf, data: Vec<u8>) -> Option<LoadedFrame> {
    let (width, height) = frame_dimensions(&data)?;
    tracing::debug!(path = %path.display(), width, height, bytes = data.len(), "loaded frame");
    Some(LoadedFrame {
        path,
        data,
        width,
        height,
    })
}

impl FrameSource for JpegFileSource {
    fn capture(&mut self) -> Result<JpegFrame<'_>> {
        let frame = self
            .frames
            .get(self.next)
            .ok_or_else(|| RtspError::Capture("frame index out of range".to_string()))?;
        tracing::trace!(path = %frame.path.display(), "capture");
        Ok(JpegFrame {
            data: &frame.data,
            width: frame.width,
            height: frame.height,
        })
    }

    fn release(&mut self) {
        self.next = (self.next + 1) % self.frames.len();
    }

    fn dimensions(&self) -> Option<(u16, u16)> {
        self.frames.first().map(|f| (f.width, f.height))
    }
}
