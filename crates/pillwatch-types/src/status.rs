use std::fmt;

use serde::{Deserialize, Serialize};

/// Observable status of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CellStatus {
    #[default]
    NoBaseline,
    BaselineError,
    Idle,
    Changed,
    ComparisonError,
    CaptureError,
}

impl CellStatus {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            CellStatus::BaselineError | CellStatus::ComparisonError | CellStatus::CaptureError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CellStatus::NoBaseline => "no baseline",
            CellStatus::BaselineError => "baseline error",
            CellStatus::Idle => "idle",
            CellStatus::Changed => "changed",
            CellStatus::ComparisonError => "comparison error",
            CellStatus::CaptureError => "capture error",
        }
    }
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status plus the last successfully computed diff percentage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CellState {
    pub status: CellStatus,
    pub diff: Option<f64>,
}

impl CellState {
    pub const fn new(status: CellStatus, diff: Option<f64>) -> Self {
        Self { status, diff }
    }

    pub const fn no_baseline() -> Self {
        Self::new(CellStatus::NoBaseline, None)
    }
}

/// Where a cell's baseline is in its capture/decode lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BaselineStatus {
    #[default]
    Missing,
    /// Encoded baseline stored, decode still in flight.
    Pending,
    Ready,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_states_are_flagged() {
        let errors: Vec<CellStatus> = [
            CellStatus::NoBaseline,
            CellStatus::BaselineError,
            CellStatus::Idle,
            CellStatus::Changed,
            CellStatus::ComparisonError,
            CellStatus::CaptureError,
        ]
        .into_iter()
        .filter(|status| status.is_error())
        .collect();
        assert_eq!(
            errors,
            vec![
                CellStatus::BaselineError,
                CellStatus::ComparisonError,
                CellStatus::CaptureError
            ]
        );
        assert_eq!(CellStatus::default(), CellStatus::NoBaseline);
    }
}
