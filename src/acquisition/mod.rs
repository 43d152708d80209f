//! Frame acquisition: averaged light frames and cached dark frames.

pub mod dark;
pub mod pipeline;

pub use dark::{DarkFrameCache, DarkFrameKey};
pub use pipeline::{
    check_saturation, crop_bounds, crop_centered, rotate_ccw, subtract_dark, AcquisitionPipeline,
};
