use thiserror::Error;

use crate::geometry::RasterRect;
use crate::mask::RasterHandle;
use crate::transform::TransformError;

#[derive(Debug, Error)]
pub enum AnnotError {
    #[error("GPU initialization failed: {0}")]
    GpuInit(String),

    #[error("GPU readback failed: {0}")]
    Readback(String),

    #[error("unknown raster handle {0:?}")]
    UnknownRaster(RasterHandle),

    #[error("region {rect:?} lies outside the {width}x{height} raster")]
    RegionOutOfBounds {
        rect: RasterRect,
        width: u32,
        height: u32,
    },

    #[error("expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("class value {value} exceeds the maximum of {max}")]
    InvalidClass { value: u8, max: u8 },

    #[error("raster dimensions {width}x{height} are not supported")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("annotation surface is not ready")]
    NotReady,

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, AnnotError>;
