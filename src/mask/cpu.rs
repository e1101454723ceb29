// ============================================================================
// CPU RASTER BACKEND — fallback when no GPU adapter is available
// ============================================================================

use rayon::prelude::*;

use super::{RasterBackend, RasterHandle, Stamp};
use crate::error::{AnnotError, Result};
use crate::geometry::RasterRect;

/// Stamps below this footprint area are rasterized on the calling thread.
const PARALLEL_MIN_AREA: usize = 64 * 64;

struct CpuRaster {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// Rasters held in plain memory.  Every operation completes before it
/// returns, so ordering holds trivially.
#[derive(Default)]
pub struct CpuRasterBackend {
    rasters: Vec<Option<CpuRaster>>,
}

impl CpuRasterBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn raster(&self, handle: RasterHandle) -> Result<&CpuRaster> {
        self.rasters
            .get(handle.index())
            .and_then(|r| r.as_ref())
            .ok_or(AnnotError::UnknownRaster(handle))
    }

    fn raster_mut(&mut self, handle: RasterHandle) -> Result<&mut CpuRaster> {
        self.rasters
            .get_mut(handle.index())
            .and_then(|r| r.as_mut())
            .ok_or(AnnotError::UnknownRaster(handle))
    }
}

fn check_rect(raster: &CpuRaster, rect: RasterRect) -> Result<()> {
    if rect.fits_within(raster.width, raster.height) {
        Ok(())
    } else {
        Err(AnnotError::RegionOutOfBounds {
            rect,
            width: raster.width,
            height: raster.height,
        })
    }
}

/// Overwrite every pixel of `stamp` inside its footprint with the stamp value.
fn rasterize_stamp(raster: &mut CpuRaster, stamp: &Stamp) {
    let rect = stamp.footprint(raster.width, raster.height);
    if rect.is_empty() {
        return;
    }
    let width = raster.width as usize;
    let value = stamp.value as u8;
    let rows = &mut raster.pixels[rect.y as usize * width..rect.bottom() as usize * width];

    let paint_row = |(i, row): (usize, &mut [u8])| {
        let y = rect.y + i as u32;
        for x in rect.x..rect.right() {
            if stamp.covers(x, y) {
                row[x as usize] = value;
            }
        }
    };

    if rect.area() >= PARALLEL_MIN_AREA {
        rows.par_chunks_mut(width).enumerate().for_each(paint_row);
    } else {
        rows.chunks_mut(width).enumerate().for_each(paint_row);
    }
}

impl RasterBackend for CpuRasterBackend {
    fn name(&self) -> &str {
        "CPU"
    }

    fn is_gpu(&self) -> bool {
        false
    }

    fn create(&mut self, width: u32, height: u32, initial: Option<&[u8]>) -> Result<RasterHandle> {
        let len = width as usize * height as usize;
        if len == 0 {
            return Err(AnnotError::InvalidDimensions { width, height });
        }
        let pixels = match initial {
            Some(bytes) if bytes.len() != len => {
                return Err(AnnotError::SizeMismatch {
                    expected: len,
                    actual: bytes.len(),
                });
            }
            Some(bytes) => bytes.to_vec(),
            None => vec![0; len],
        };
        let raster = CpuRaster { width, height, pixels };
        // Reuse a freed arena slot before growing.
        if let Some(i) = self.rasters.iter().position(|r| r.is_none()) {
            self.rasters[i] = Some(raster);
            return Ok(RasterHandle(i as u32));
        }
        self.rasters.push(Some(raster));
        Ok(RasterHandle((self.rasters.len() - 1) as u32))
    }

    fn destroy(&mut self, handle: RasterHandle) {
        if let Some(slot) = self.rasters.get_mut(handle.index()) {
            *slot = None;
        }
    }

    fn size(&self, handle: RasterHandle) -> Option<(u32, u32)> {
        self.raster(handle).ok().map(|r| (r.width, r.height))
    }

    fn submit_stamps(&mut self, handle: RasterHandle, stamps: &[Stamp], _footprint: RasterRect) -> Result<()> {
        let raster = self.raster_mut(handle)?;
        for stamp in stamps {
            rasterize_stamp(raster, stamp);
        }
        Ok(())
    }

    fn read_region(&mut self, handle: RasterHandle, rect: RasterRect) -> Result<Vec<u8>> {
        let raster = self.raster(handle)?;
        check_rect(raster, rect)?;
        Ok(crate::geometry::crop_bytes(
            RasterRect::full(raster.width, raster.height),
            &raster.pixels,
            rect,
        ))
    }

    fn write_region(&mut self, handle: RasterHandle, rect: RasterRect, bytes: &[u8]) -> Result<()> {
        let raster = self.raster_mut(handle)?;
        check_rect(raster, rect)?;
        if bytes.len() != rect.byte_len() {
            return Err(AnnotError::SizeMismatch {
                expected: rect.byte_len(),
                actual: bytes.len(),
            });
        }
        let full = RasterRect::full(raster.width, raster.height);
        crate::geometry::blit_bytes(full, &mut raster.pixels, rect, bytes);
        Ok(())
    }

    fn fill(&mut self, handle: RasterHandle, value: u8) -> Result<()> {
        let raster = self.raster_mut(handle)?;
        raster.pixels.par_iter_mut().for_each(|p| *p = value);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
