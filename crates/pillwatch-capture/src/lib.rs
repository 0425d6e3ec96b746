//! Video source abstraction and per-region frame capture.

use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pillwatch_types::{frame::RawImage, geometry::Rectangle, PillwatchError, Result};
use tracing::debug;

mod command;

pub use command::CommandSource;

/// Aggregated frame-grab counters.
#[derive(Debug, Default, Clone)]
pub struct CaptureMetrics {
    pub successful_grabs: u64,
    pub failed_grabs: u64,
    pub last_grab_ms: Option<u64>,
    pub last_frame_at: Option<DateTime<Utc>>,
}

impl CaptureMetrics {
    fn record(&mut self, start: Instant, ok: bool) {
        if ok {
            self.successful_grabs += 1;
            self.last_frame_at = Some(Utc::now());
        } else {
            self.failed_grabs += 1;
        }
        self.last_grab_ms = Some(start.elapsed().as_millis() as u64);
    }
}

/// Live camera feed. Frames are delivered unmirrored; the on-screen preview is mirrored.
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn connect(&mut self) -> Result<()>;
    /// `Ok(None)` means the source is healthy but has no frame yet.
    /// `Err(SourceLost)` means the camera itself is gone.
    async fn current_frame(&self) -> Result<Option<RawImage>>;
    fn metrics(&self) -> CaptureMetrics;
}

/// In-memory source whose frame is set by the caller. Clones share the same frame.
#[derive(Clone, Default)]
pub struct StaticSource {
    frame: Arc<Mutex<Option<RawImage>>>,
    lost: Arc<Mutex<Option<String>>>,
    metrics: Arc<Mutex<CaptureMetrics>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame(frame: RawImage) -> Self {
        let source = Self::default();
        source.set_frame(frame);
        source
    }

    pub fn set_frame(&self, frame: RawImage) {
        if let Ok(mut guard) = self.frame.lock() {
            *guard = Some(frame);
        }
    }

    /// Mutate the current frame in place; no-op without a frame.
    pub fn update_frame(&self, f: impl FnOnce(&mut RawImage)) {
        if let Ok(mut guard) = self.frame.lock() {
            if let Some(frame) = guard.as_mut() {
                f(frame);
                frame.captured_at = Utc::now();
            }
        }
    }

    pub fn clear_frame(&self) {
        if let Ok(mut guard) = self.frame.lock() {
            *guard = None;
        }
    }

    /// Simulate the device disappearing; every later grab fails with `SourceLost`.
    pub fn disconnect(&self, reason: impl Into<String>) {
        if let Ok(mut guard) = self.lost.lock() {
            *guard = Some(reason.into());
        }
    }
}

#[async_trait]
impl VideoSource for StaticSource {
    async fn connect(&mut self) -> Result<()> {
        if let Ok(mut guard) = self.lost.lock() {
            *guard = None;
        }
        Ok(())
    }

    async fn current_frame(&self) -> Result<Option<RawImage>> {
        let start = Instant::now();
        let lost = self
            .lost
            .lock()
            .map_err(|_| capture_error("failed to lock source state"))?
            .clone();
        if let Some(reason) = lost {
            if let Ok(mut metrics) = self.metrics.lock() {
                metrics.record(start, false);
            }
            return Err(PillwatchError::SourceLost(reason));
        }

        let frame = self
            .frame
            .lock()
            .map_err(|_| capture_error("failed to lock frame"))?
            .clone();
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.record(start, frame.is_some());
        }
        Ok(frame)
    }

    fn metrics(&self) -> CaptureMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

/// Top-left corner in source-frame pixels of a `width` x `height` crop for `rect`.
///
/// `rect` is expressed against the mirrored preview, so the horizontal offset is
/// measured from the right edge of the source frame. Offsets are clamped so the crop
/// always stays inside the frame.
pub fn source_origin(frame_width: u32, frame_height: u32, rect: &Rectangle, width: u32, height: u32) -> (u32, u32) {
    let max_x = f64::from(frame_width.saturating_sub(width));
    let max_y = f64::from(frame_height.saturating_sub(height));
    let sx = (f64::from(frame_width) - rect.x - rect.width).round();
    let sy = rect.y.round();
    (sx.clamp(0.0, max_x) as u32, sy.clamp(0.0, max_y) as u32)
}

/// Copy the pixels under `rect` out of `frame`.
///
/// The result is always `rect.pixel_size()` so repeated captures of a cell compare
/// against its baseline without dimension drift.
pub fn capture_region(frame: &RawImage, rect: &Rectangle) -> Result<RawImage> {
    rect.validate()
        .map_err(|err| capture_error(format!("cannot capture region: {err}")))?;
    if frame.is_empty() {
        return Err(capture_error("no frame available"));
    }
    if !frame.is_well_formed() {
        return Err(capture_error(format!(
            "frame buffer holds {} bytes, expected {} for {}x{}",
            frame.data.len(),
            frame.pixel_count() * 4,
            frame.width,
            frame.height
        )));
    }

    let (width, height) = rect.pixel_size();
    if width > frame.width || height > frame.height {
        return Err(capture_error(format!(
            "region {width}x{height} larger than frame {}x{}",
            frame.width, frame.height
        )));
    }

    let (sx, sy) = source_origin(frame.width, frame.height, rect, width, height);
    let stride = frame.width as usize * 4;
    let row_bytes = width as usize * 4;
    let mut data = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = (sy as usize + row) * stride + sx as usize * 4;
        let line = frame
            .data
            .get(start..start + row_bytes)
            .ok_or_else(|| capture_error("pixel read outside frame"))?;
        data.extend_from_slice(line);
    }
    debug!(
        "captured {}x{} at source ({}, {}) for region {}",
        width, height, sx, sy, rect
    );

    let mut image = RawImage::from_rgba(width, height, data);
    image.captured_at = frame.captured_at;
    Ok(image)
}

/// Generate an error aligned with capture semantics.
pub fn capture_error(message: impl Into<String>) -> PillwatchError {
    PillwatchError::Capture(message.into())
}
