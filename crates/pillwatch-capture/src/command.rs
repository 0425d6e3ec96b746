use std::{
    io::ErrorKind,
    sync::{Arc, Mutex},
    time::Instant,
};

use async_trait::async_trait;
use image::ImageFormat;
use pillwatch_types::{config::CameraConfig, frame::RawImage, PillwatchError, Result};
use tokio::{process::Command, time::Duration};

use crate::{capture_error, CaptureMetrics, VideoSource};

/// Camera source backed by an external program that prints one PNG frame to stdout,
/// e.g. `ffmpeg -f v4l2 -i /dev/video0 -frames:v 1 -f image2pipe -vcodec png -`.
pub struct CommandSource {
    config: CameraConfig,
    metrics: Arc<Mutex<CaptureMetrics>>,
}

impl CommandSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.command.is_empty() {
            return Err(PillwatchError::Configuration(
                "camera.command must name a program".into(),
            ));
        }
        Ok(Self {
            config,
            metrics: Arc::new(Mutex::new(CaptureMetrics::default())),
        })
    }

    fn program(&self) -> &str {
        &self.config.command[0]
    }

    async fn run_command(&self) -> Result<Vec<u8>> {
        let mut command = Command::new(self.program());
        command.args(&self.config.command[1..]).kill_on_drop(true);

        let timeout = Duration::from_millis(self.config.frame_timeout_ms);
        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                return Err(PillwatchError::SourceLost(format!(
                    "camera command {:?} unavailable: {err}",
                    self.program()
                )));
            }
            Ok(Err(err)) => {
                return Err(capture_error(format!(
                    "camera command {:?} failed to run: {err}",
                    self.program()
                )));
            }
            Err(_) => {
                return Err(capture_error(format!(
                    "camera command timed out after {}ms",
                    self.config.frame_timeout_ms
                )));
            }
        };

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(capture_error(format!(
                "camera command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn record(&self, start: Instant, ok: bool) {
        if let Ok(mut guard) = self.metrics.lock() {
            guard.record(start, ok);
        }
    }
}

#[async_trait]
impl VideoSource for CommandSource {
    async fn connect(&mut self) -> Result<()> {
        tracing::info!("camera command source: {}", self.config.command.join(" "));
        // A frame grab proves the device is reachable; a missing program is fatal.
        match self.current_frame().await {
            Err(err) if err.is_source_lost() => Err(err),
            Err(err) => {
                tracing::warn!("first camera frame failed: {err}");
                Ok(())
            }
            Ok(_) => Ok(()),
        }
    }

    async fn current_frame(&self) -> Result<Option<RawImage>> {
        let start = Instant::now();
        let raw = match self.run_command().await {
            Ok(raw) => raw,
            Err(err) => {
                self.record(start, false);
                return Err(err);
            }
        };
        if raw.is_empty() {
            self.record(start, false);
            return Ok(None);
        }

        let decoded = image::load_from_memory_with_format(&raw, ImageFormat::Png)
            .map_err(|err| capture_error(format!("camera frame decoding failed: {err}")));
        let img = match decoded {
            Ok(img) => img,
            Err(err) => {
                self.record(start, false);
                return Err(err);
            }
        };
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        self.record(start, true);
        tracing::debug!("camera frame {}x{} in {}ms", width, height, start.elapsed().as_millis());
        Ok(Some(RawImage::from_rgba(width, height, rgba.into_raw())))
    }

    fn metrics(&self) -> CaptureMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_rejected() {
        let config = CameraConfig {
            command: Vec::new(),
            frame_timeout_ms: 100,
        };
        assert!(matches!(
            CommandSource::new(config),
            Err(PillwatchError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn missing_program_is_source_lost() {
        let source = CommandSource::new(CameraConfig {
            command: vec!["pillwatch-definitely-not-a-camera".into()],
            frame_timeout_ms: 1_000,
        })
        .expect("source");
        let err = source.current_frame().await.unwrap_err();
        assert!(err.is_source_lost());
        assert_eq!(source.metrics().failed_grabs, 1);
    }
}
