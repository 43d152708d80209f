//! Frame types produced by the camera session.

use ndarray::Array2;

/// One raw exposure, shape `(rows, cols)` = `(frame_h, frame_w)`.
pub type RawFrame = Array2<i32>;

/// Floating point image (averaged exposures, dark frames, processed frames).
pub type Frame = Array2<f64>;

/// Largest pixel value, `None` for an empty frame.
pub fn peak_value(frame: &Frame) -> Option<f64> {
    frame.iter().copied().reduce(f64::max)
}
