//! Per-cell change state machine.

use pillwatch_types::{
    config::DetectionConfig,
    frame::RawImage,
    status::{CellState, CellStatus},
    Result,
};
use pillwatch_vision::diff::{diff_percent, DIFF_MISMATCH};
use tracing::debug;

/// Scores how different a fresh capture is from its baseline.
pub trait ChangeMetric: Send + Sync {
    /// Percentage in `[0, 100]`, or a negative value when the images cannot be compared.
    fn score(&self, baseline: &RawImage, current: &RawImage) -> f64;
}

/// Fixed per-channel tolerance, see [`pillwatch_vision::diff`].
#[derive(Debug, Clone, Copy)]
pub struct ToleranceMetric {
    pub tolerance: u8,
}

impl ToleranceMetric {
    pub fn new(tolerance: u8) -> Self {
        Self { tolerance }
    }
}

impl ChangeMetric for ToleranceMetric {
    fn score(&self, baseline: &RawImage, current: &RawImage) -> f64 {
        diff_percent(baseline, current, self.tolerance)
    }
}

impl From<&DetectionConfig> for ToleranceMetric {
    fn from(config: &DetectionConfig) -> Self {
        Self::new(config.tolerance)
    }
}

/// Result of one polling cycle for one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleOutcome {
    pub previous: CellStatus,
    pub state: CellState,
    /// Set only when the cell just entered `Changed`.
    pub rising_edge: bool,
}

impl CycleOutcome {
    pub fn is_transition(&self) -> bool {
        self.previous != self.state.status
    }
}

/// Tracks one cell's status and the edge memory used for notifications.
///
/// The edge memory only follows successful comparisons: a capture or comparison
/// error between two `Changed` cycles does not re-arm the notification.
#[derive(Debug, Clone, Default)]
pub struct CellMonitor {
    state: CellState,
    was_changed: bool,
}

impl CellMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CellState {
        self.state
    }

    pub fn status(&self) -> CellStatus {
        self.state.status
    }

    /// Baseline decoded; comparisons may start.
    pub fn baseline_ready(&mut self) {
        self.state = CellState::new(CellStatus::Idle, None);
        self.was_changed = false;
    }

    pub fn baseline_failed(&mut self) {
        self.state = CellState::new(CellStatus::BaselineError, None);
        self.was_changed = false;
    }

    pub fn baseline_cleared(&mut self) {
        self.state = CellState::no_baseline();
        self.was_changed = false;
    }

    /// Forget the rising-edge history, e.g. when the polling loop restarts.
    pub fn reset_edge(&mut self) {
        self.was_changed = false;
    }

    pub fn capture_failed(&mut self) -> CycleOutcome {
        self.apply(CellStatus::CaptureError, self.state.diff)
    }

    /// Classify a diff percentage. Negative values are the comparison-error sentinel.
    pub fn observe_diff(&mut self, diff: f64, threshold_percent: f64) -> CycleOutcome {
        if diff < 0.0 {
            return self.apply(CellStatus::ComparisonError, self.state.diff);
        }

        let changed = diff > threshold_percent;
        let rising = changed && !self.was_changed;
        self.was_changed = changed;

        let status = if changed {
            CellStatus::Changed
        } else {
            CellStatus::Idle
        };
        let mut outcome = self.apply(status, Some(diff));
        outcome.rising_edge = rising;
        outcome
    }

    /// Run one full cycle against a capture attempt.
    pub fn evaluate(
        &mut self,
        baseline: &RawImage,
        capture: Result<RawImage>,
        metric: &dyn ChangeMetric,
        threshold_percent: f64,
    ) -> CycleOutcome {
        match capture {
            Ok(current) => {
                let diff = if baseline.same_dimensions(&current) {
                    metric.score(baseline, &current)
                } else {
                    debug!(
                        "capture {:?} does not match baseline {:?}",
                        current.dimensions(),
                        baseline.dimensions()
                    );
                    DIFF_MISMATCH
                };
                self.observe_diff(diff, threshold_percent)
            }
            Err(err) => {
                debug!("cell capture failed: {err}");
                self.capture_failed()
            }
        }
    }

    fn apply(&mut self, status: CellStatus, diff: Option<f64>) -> CycleOutcome {
        let previous = self.state.status;
        self.state = CellState::new(status, diff);
        CycleOutcome {
            previous,
            state: self.state,
            rising_edge: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use pillwatch_types::PillwatchError;

    use super::*;

    const THRESHOLD: f64 = 10.0;

    fn ready_monitor() -> CellMonitor {
        let mut monitor = CellMonitor::new();
        monitor.baseline_ready();
        monitor
    }

    #[test]
    fn starts_without_baseline() {
        let monitor = CellMonitor::new();
        assert_eq!(monitor.status(), CellStatus::NoBaseline);
        assert_eq!(monitor.state().diff, None);
    }

    #[test]
    fn notifies_only_on_rising_edges() {
        let mut monitor = ready_monitor();
        let diffs = [5.0, 15.0, 20.0, 8.0, 30.0];
        let edges: Vec<bool> = diffs
            .iter()
            .map(|d| monitor.observe_diff(*d, THRESHOLD).rising_edge)
            .collect();
        assert_eq!(edges, vec![false, true, false, false, true]);
        assert_eq!(monitor.status(), CellStatus::Changed);
        assert_eq!(monitor.state().diff, Some(30.0));
    }

    #[test]
    fn threshold_is_exclusive() {
        let mut monitor = ready_monitor();
        let outcome = monitor.observe_diff(THRESHOLD, THRESHOLD);
        assert_eq!(outcome.state.status, CellStatus::Idle);
        assert!(!outcome.rising_edge);
    }

    #[test]
    fn errors_are_not_sticky_and_keep_edge_memory() {
        let mut monitor = ready_monitor();
        assert!(monitor.observe_diff(50.0, THRESHOLD).rising_edge);

        let outcome = monitor.capture_failed();
        assert_eq!(outcome.state.status, CellStatus::CaptureError);
        assert_eq!(outcome.state.diff, Some(50.0));

        let outcome = monitor.observe_diff(DIFF_MISMATCH, THRESHOLD);
        assert_eq!(outcome.state.status, CellStatus::ComparisonError);

        let outcome = monitor.observe_diff(45.0, THRESHOLD);
        assert_eq!(outcome.previous, CellStatus::ComparisonError);
        assert_eq!(outcome.state.status, CellStatus::Changed);
        assert!(!outcome.rising_edge);
    }

    #[test]
    fn reset_edge_rearms_notification() {
        let mut monitor = ready_monitor();
        assert!(monitor.observe_diff(50.0, THRESHOLD).rising_edge);
        monitor.reset_edge();
        assert!(monitor.observe_diff(50.0, THRESHOLD).rising_edge);
    }

    #[test]
    fn baseline_lifecycle() {
        let mut monitor = ready_monitor();
        monitor.observe_diff(80.0, THRESHOLD);
        monitor.baseline_cleared();
        assert_eq!(monitor.state(), CellState::no_baseline());
        monitor.baseline_failed();
        assert_eq!(monitor.status(), CellStatus::BaselineError);
        monitor.baseline_ready();
        assert_eq!(monitor.status(), CellStatus::Idle);
    }

    #[test]
    fn evaluate_covers_capture_and_dimension_failures() {
        let metric = ToleranceMetric::new(30);
        let baseline = RawImage::filled(4, 4, [10, 10, 10, 255]);
        let mut monitor = ready_monitor();

        let outcome = monitor.evaluate(
            &baseline,
            Err(PillwatchError::Capture("no frame".into())),
            &metric,
            THRESHOLD,
        );
        assert_eq!(outcome.state.status, CellStatus::CaptureError);

        let outcome = monitor.evaluate(
            &baseline,
            Ok(RawImage::filled(4, 3, [10, 10, 10, 255])),
            &metric,
            THRESHOLD,
        );
        assert_eq!(outcome.state.status, CellStatus::ComparisonError);

        let outcome = monitor.evaluate(
            &baseline,
            Ok(RawImage::filled(4, 4, [200, 10, 10, 255])),
            &metric,
            THRESHOLD,
        );
        assert_eq!(outcome.state, CellState::new(CellStatus::Changed, Some(100.0)));
        assert!(outcome.rising_edge);
    }
}
