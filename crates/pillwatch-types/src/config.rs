use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{PillwatchError, Result};

pub const DEFAULT_ROWS: u16 = 7;
pub const DEFAULT_COLS: u16 = 4;
pub const DEFAULT_TOLERANCE: u8 = 30;
pub const DEFAULT_THRESHOLD_PERCENT: f64 = 10.0;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

const DAY_LABELS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];
const SLOT_LABELS: [&str; 4] = ["Morning", "Noon", "Evening", "Bedtime"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Program (and arguments) that writes a single PNG frame to stdout.
    /// Empty means the built-in synthetic source is used.
    pub command: Vec<String>,
    pub frame_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            frame_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub rows: u16,
    pub cols: u16,
    /// One entry per row.
    pub day_labels: Vec<String>,
    /// One entry per column.
    pub slot_labels: Vec<String>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            day_labels: DAY_LABELS.iter().map(|s| s.to_string()).collect(),
            slot_labels: SLOT_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl GridConfig {
    pub fn cell_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(PillwatchError::Configuration(
                "grid.rows and grid.cols must be greater than zero".into(),
            ));
        }
        if self.day_labels.len() < self.rows as usize {
            return Err(PillwatchError::Configuration(format!(
                "grid.day_labels has {} entries but grid.rows is {}",
                self.day_labels.len(),
                self.rows
            )));
        }
        if self.slot_labels.len() < self.cols as usize {
            return Err(PillwatchError::Configuration(format!(
                "grid.slot_labels has {} entries but grid.cols is {}",
                self.slot_labels.len(),
                self.cols
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Per-channel absolute difference a pixel may show before it counts as changed.
    pub tolerance: u8,
    /// Percentage of changed pixels above which a cell is reported as changed.
    pub threshold_percent: f64,
    pub poll_interval_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            threshold_percent: DEFAULT_THRESHOLD_PERCENT,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub change_display_ms: u64,
    pub error_display_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            change_display_ms: 6_000,
            error_display_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub log_level: String,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

/// Everything a grid session needs besides its collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    pub grid: GridConfig,
    pub detection: DetectionConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PillwatchConfig {
    pub camera: CameraConfig,
    pub grid: GridConfig,
    pub detection: DetectionConfig,
    pub notifications: NotificationConfig,
    pub ops: OpsConfig,
}

impl PillwatchConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            PillwatchError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            PillwatchError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.grid.validate()?;
        if !(0.0..=100.0).contains(&self.detection.threshold_percent) {
            return Err(PillwatchError::Configuration(
                "detection.threshold_percent must be between 0 and 100".into(),
            ));
        }
        if self.detection.poll_interval_ms == 0 {
            return Err(PillwatchError::Configuration(
                "detection.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.camera.frame_timeout_ms == 0 {
            return Err(PillwatchError::Configuration(
                "camera.frame_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            grid: self.grid.clone(),
            detection: self.detection,
            notifications: self.notifications,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn load_pillwatch_config_from_file() {
        let temp_path = std::env::temp_dir().join("pillwatch-config-test.toml");
        let config = PillwatchConfig {
            camera: CameraConfig {
                command: vec!["ffmpeg".into(), "-i".into(), "/dev/video0".into()],
                frame_timeout_ms: 2_000,
            },
            grid: GridConfig {
                rows: 2,
                cols: 3,
                day_labels: vec!["Sat".into(), "Sun".into()],
                slot_labels: vec!["AM".into(), "PM".into(), "Night".into()],
            },
            detection: DetectionConfig {
                tolerance: 12,
                threshold_percent: 25.0,
                poll_interval_ms: 500,
            },
            notifications: NotificationConfig::default(),
            ops: OpsConfig {
                log_level: "debug".into(),
            },
        };

        let doc = toml::to_string(&config).expect("serialize config");
        fs::write(&temp_path, doc).expect("write temp config");

        let loaded = PillwatchConfig::from_file(&temp_path).expect("load config");
        assert_eq!(loaded.grid, config.grid);
        assert_eq!(loaded.detection, config.detection);
        assert_eq!(loaded.camera.command, config.camera.command);
        fs::remove_file(&temp_path).expect("cleanup temp config");
    }

    #[test]
    fn partial_file_uses_defaults() {
        let loaded: PillwatchConfig =
            toml::from_str("[detection]\ntolerance = 40\n").expect("parse partial config");
        assert_eq!(loaded.detection.tolerance, 40);
        assert_eq!(loaded.detection.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(loaded.grid.cell_count(), 28);
    }

    #[test]
    fn validate_configuration_rules() {
        let mut config = PillwatchConfig::default();
        assert!(config.validate().is_ok());

        config.grid.rows = 8;
        assert!(config.validate().is_err());
        config.grid.rows = 7;
        config.grid.cols = 0;
        assert!(config.validate().is_err());
        config.grid.cols = 4;
        config.detection.threshold_percent = 120.0;
        assert!(config.validate().is_err());
        config.detection.threshold_percent = 10.0;
        config.detection.poll_interval_ms = 0;
        assert!(config.validate().is_err());
        config.detection.poll_interval_ms = 1000;
        config.camera.frame_timeout_ms = 0;
        assert!(config.validate().is_err());
        config.camera.frame_timeout_ms = 1000;
        assert!(config.validate().is_ok());
    }
}
