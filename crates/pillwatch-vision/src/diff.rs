//! Per-pixel change metric between a baseline and a fresh capture.

use pillwatch_types::{frame::RawImage, PillwatchError, Result};

/// Returned by [`diff_percent`] when the images cannot be compared.
pub const DIFF_MISMATCH: f64 = -1.0;

/// Number of pixels where any of R, G or B moved by more than `tolerance`. Alpha is ignored.
pub fn changed_pixels(baseline: &RawImage, current: &RawImage, tolerance: u8) -> Result<usize> {
    if !baseline.same_dimensions(current)
        || !baseline.is_well_formed()
        || !current.is_well_formed()
    {
        return Err(PillwatchError::DimensionMismatch {
            expected: baseline.dimensions(),
            actual: current.dimensions(),
        });
    }

    let changed = baseline
        .data
        .chunks_exact(4)
        .zip(current.data.chunks_exact(4))
        .filter(|(a, b)| {
            a[..3]
                .iter()
                .zip(&b[..3])
                .any(|(x, y)| x.abs_diff(*y) > tolerance)
        })
        .count();
    Ok(changed)
}

/// Percentage of changed pixels in `[0, 100]`; an image without pixels scores 0.
pub fn try_diff_percent(baseline: &RawImage, current: &RawImage, tolerance: u8) -> Result<f64> {
    let changed = changed_pixels(baseline, current, tolerance)?;
    let total = baseline.pixel_count();
    if total == 0 {
        return Ok(0.0);
    }
    Ok(100.0 * changed as f64 / total as f64)
}

/// Like [`try_diff_percent`] but never fails: mismatched inputs yield [`DIFF_MISMATCH`].
pub fn diff_percent(baseline: &RawImage, current: &RawImage, tolerance: u8) -> f64 {
    try_diff_percent(baseline, current, tolerance).unwrap_or(DIFF_MISMATCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: u8 = 30;

    #[test]
    fn identical_images_do_not_differ() {
        let img = RawImage::filled(10, 10, [120, 80, 40, 255]);
        assert_eq!(diff_percent(&img, &img.clone(), TOLERANCE), 0.0);
    }

    #[test]
    fn one_channel_past_tolerance_counts_every_pixel() {
        let base = RawImage::filled(6, 5, [100, 100, 100, 255]);
        let moved = RawImage::filled(6, 5, [100, 100 + TOLERANCE + 1, 100, 255]);
        assert_eq!(diff_percent(&base, &moved, TOLERANCE), 100.0);

        let within = RawImage::filled(6, 5, [100 + TOLERANCE, 100, 100 - TOLERANCE, 255]);
        assert_eq!(diff_percent(&base, &within, TOLERANCE), 0.0);
    }

    #[test]
    fn alpha_is_ignored() {
        let base = RawImage::filled(2, 2, [10, 20, 30, 255]);
        let transparent = RawImage::filled(2, 2, [10, 20, 30, 0]);
        assert_eq!(diff_percent(&base, &transparent, TOLERANCE), 0.0);
    }

    #[test]
    fn partial_change_is_proportional() {
        let base = RawImage::filled(4, 1, [0, 0, 0, 255]);
        let mut current = base.clone();
        current.data[0] = 255;
        assert_eq!(diff_percent(&base, &current, TOLERANCE), 25.0);
    }

    #[test]
    fn mismatched_dimensions_use_sentinel() {
        let a = RawImage::filled(4, 4, [0, 0, 0, 255]);
        let b = RawImage::filled(4, 5, [0, 0, 0, 255]);
        assert_eq!(diff_percent(&a, &b, TOLERANCE), DIFF_MISMATCH);
        assert!(matches!(
            try_diff_percent(&a, &b, TOLERANCE),
            Err(PillwatchError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn empty_images_score_zero() {
        assert_eq!(
            diff_percent(&RawImage::empty(), &RawImage::empty(), TOLERANCE),
            0.0
        );
    }
}
