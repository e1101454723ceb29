use image::imageops::FilterType;
use image::{GrayImage, ImageFormat};
use rfd::FileDialog;
use std::path::{Path, PathBuf};

use crate::error::{AnnotError, Result};

/// Extensions offered when picking a source image.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "tiff", "tif"];

// ============================================================================
// SOURCE IMAGE
// ============================================================================

/// Decoded source image, RGBA8 row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl SourceImage {
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 {
            return Err(AnnotError::InvalidDimensions { width, height });
        }
        if rgba.len() != expected {
            return Err(AnnotError::SizeMismatch {
                expected,
                actual: rgba.len(),
            });
        }
        Ok(Self { width, height, rgba })
    }

    /// RGBA of pixel `(x, y)`; out-of-range coordinates read as transparent.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0, 0];
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.rgba[i], self.rgba[i + 1], self.rgba[i + 2], self.rgba[i + 3]]
    }
}

/// Decode any supported image file to RGBA8.
pub fn load_source_image(path: &Path) -> Result<SourceImage> {
    let img = image::open(path)?.to_rgba8();
    let (width, height) = img.dimensions();
    crate::log_info!("Loaded image {} ({}x{})", path.display(), width, height);
    SourceImage::from_rgba(width, height, img.into_raw())
}

// ============================================================================
// MASK FILES — raw class ids stored as 8-bit grayscale PNG
// ============================================================================

/// Read a class mask for a `width` × `height` raster.
///
/// A mask saved at another resolution (e.g. image resolution) is resampled
/// with nearest-neighbour so class ids are never blended.
pub fn read_mask_png(path: &Path, width: u32, height: u32) -> Result<Vec<u8>> {
    let gray = image::open(path)?.to_luma8();
    if gray.dimensions() == (width, height) {
        return Ok(gray.into_raw());
    }
    crate::log_warn!(
        "Mask {} is {}x{}, resampling to {}x{}",
        path.display(),
        gray.width(),
        gray.height(),
        width,
        height
    );
    Ok(image::imageops::resize(&gray, width, height, FilterType::Nearest).into_raw())
}

/// Write raster bytes as a grayscale PNG.
pub fn write_mask_png(path: &Path, width: u32, height: u32, bytes: &[u8]) -> Result<()> {
    let expected = width as usize * height as usize;
    let img = GrayImage::from_raw(width, height, bytes.to_vec()).ok_or(AnnotError::SizeMismatch {
        expected,
        actual: bytes.len(),
    })?;
    img.save_with_format(path, ImageFormat::Png)?;
    crate::log_info!("Saved mask {} ({}x{})", path.display(), width, height);
    Ok(())
}

// ============================================================================
// FILE DIALOGS
// ============================================================================

/// Remembers the last opened image so save dialogs can suggest a mask path.
#[derive(Default)]
pub struct FileHandler {
    pub current_image: Option<PathBuf>,
}

impl FileHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show native file dialog to pick a source image.
    pub fn pick_image(&mut self) -> Option<PathBuf> {
        let path = FileDialog::new()
            .add_filter("Images", IMAGE_EXTENSIONS)
            .add_filter("All Files", &["*"])
            .pick_file()?;
        self.current_image = Some(path.clone());
        Some(path)
    }

    pub fn pick_mask_to_load(&self) -> Option<PathBuf> {
        let mut dialog = FileDialog::new().add_filter("Mask PNG", &["png"]);
        if let Some(dir) = self.current_image.as_ref().and_then(|p| p.parent()) {
            dialog = dialog.set_directory(dir);
        }
        dialog.pick_file()
    }

    /// Save dialog pre-filled with `<image stem>_mask.png`.
    pub fn pick_mask_to_save(&self) -> Option<PathBuf> {
        let mut dialog = FileDialog::new().add_filter("Mask PNG", &["png"]);
        if let Some(image) = &self.current_image {
            if let Some(dir) = image.parent() {
                dialog = dialog.set_directory(dir);
            }
            dialog = dialog.set_file_name(default_mask_name(image));
        }
        dialog.save_file()
    }
}

/// `photo.jpg` → `photo_mask.png`.
pub fn default_mask_name(image: &Path) -> String {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "annotation".to_string());
    format!("{}_mask.png", stem)
}
