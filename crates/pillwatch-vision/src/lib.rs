//! Baseline image codec and change metric.

pub mod codec;
pub mod diff;

use pillwatch_types::PillwatchError;

pub use codec::{decode, decode_blocking, encode};
pub use diff::{diff_percent, try_diff_percent, DIFF_MISMATCH};

pub fn vision_error(message: impl Into<String>) -> PillwatchError {
    PillwatchError::Vision(message.into())
}
