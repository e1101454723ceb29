// ============================================================================
// MASK STORE — per-class rasters behind a GPU/CPU backend seam
// ============================================================================
//
// Architecture:
//   mod.rs  — RasterHandle arena ids, Stamp, RasterBackend trait, MaskStore
//   cpu.rs  — Vec<u8> backend (fallback + tests), rayon row stamping
//   ../gpu  — wgpu backend (R32Uint storage textures + stamp compute shader)
//
// Ordering contract: stamps are fire-and-forget, but every read observes all
// previously submitted writes, and `clear` / `flush` block until the queue is
// idle.

pub mod cpu;

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use egui::Pos2;

use crate::error::{AnnotError, Result};
use crate::geometry::RasterRect;

pub use cpu::CpuRasterBackend;

/// Stable index of a raster inside a backend's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RasterHandle(pub(crate) u32);

impl RasterHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One circular stamp in raster space.  Layout matches the WGSL `Stamp`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Stamp {
    pub center: [f32; 2],
    pub radius: f32,
    pub value: u32,
}

impl Stamp {
    pub fn new(center: Pos2, radius: f32, value: u8) -> Self {
        Self {
            center: [center.x, center.y],
            radius,
            value: value as u32,
        }
    }

    /// Pixels this stamp can touch, clipped to the raster.
    pub fn footprint(&self, width: u32, height: u32) -> RasterRect {
        RasterRect::around_circle(self.center[0], self.center[1], self.radius, width, height)
    }

    /// Whether raster pixel `(x, y)` lies inside the stamp.
    #[inline]
    pub fn covers(&self, x: u32, y: u32) -> bool {
        let dx = x as f32 - self.center[0];
        let dy = y as f32 - self.center[1];
        dx * dx + dy * dy <= self.radius * self.radius
    }
}

/// Which raster implementation is live, or why none is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Gpu,
    CpuFallback,
    /// No backend could be created; the surface is view-only.
    Unavailable,
}

impl Readiness {
    pub fn is_ready(self) -> bool {
        !matches!(self, Readiness::Unavailable)
    }
}

/// Storage for single-channel mask rasters.
///
/// Implementations must apply stamps and region writes in submission order,
/// and reads must observe every write submitted before them.
pub trait RasterBackend: Send {
    fn name(&self) -> &str;

    fn is_gpu(&self) -> bool;

    /// Allocate a `width` × `height` raster, zero-filled unless `initial` is given.
    fn create(&mut self, width: u32, height: u32, initial: Option<&[u8]>) -> Result<RasterHandle>;

    fn destroy(&mut self, handle: RasterHandle);

    fn size(&self, handle: RasterHandle) -> Option<(u32, u32)>;

    /// Queue stamps in order.  Does not wait for completion.
    fn submit_stamps(&mut self, handle: RasterHandle, stamps: &[Stamp], footprint: RasterRect) -> Result<()>;

    /// Synchronous read of `rect`, one byte per pixel, row-major.
    fn read_region(&mut self, handle: RasterHandle, rect: RasterRect) -> Result<Vec<u8>>;

    /// Queue an upload of `bytes` into `rect`.  Ordered with stamps.
    fn write_region(&mut self, handle: RasterHandle, rect: RasterRect, bytes: &[u8]) -> Result<()>;

    /// Set every pixel to `value` and wait for completion.
    fn fill(&mut self, handle: RasterHandle, value: u8) -> Result<()>;

    /// Block until every submitted write has executed.
    fn flush(&mut self) -> Result<()>;
}

// ============================================================================
// MASK GEOMETRY — mask raster size derived from the source image
// ============================================================================

/// Mask raster dimensions and the image→mask scale factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskGeometry {
    pub image_width: u32,
    pub image_height: u32,
    pub width: u32,
    pub height: u32,
    pub mask_scale: f32,
}

impl MaskGeometry {
    /// Scale the image by `factor`, shrinking so the longest edge is at most `max_edge`.
    pub fn derive(image_width: u32, image_height: u32, factor: f32, max_edge: u32) -> Result<Self> {
        if image_width == 0 || image_height == 0 || max_edge == 0 {
            return Err(AnnotError::InvalidDimensions {
                width: image_width,
                height: image_height,
            });
        }
        let factor = if factor.is_finite() && factor > 0.0 { factor } else { 1.0 };
        let longest = image_width.max(image_height) as f32;
        let scale = factor.min(max_edge as f32 / longest);
        let width = ((image_width as f32 * scale).round() as u32).clamp(1, max_edge);
        let height = ((image_height as f32 * scale).round() as u32).clamp(1, max_edge);
        Ok(Self {
            image_width,
            image_height,
            width,
            height,
            mask_scale: scale,
        })
    }

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

// ============================================================================
// MASK STORE
// ============================================================================

/// Owns the mask rasters of one annotation and validates every access.
pub struct MaskStore {
    backend: Box<dyn RasterBackend>,
    width: u32,
    height: u32,
    max_value: u8,
    slots: HashMap<u8, RasterHandle>,
    /// Union of all writes since the last `take_dirty`.
    dirty: Option<RasterRect>,
}

impl MaskStore {
    pub fn new(backend: Box<dyn RasterBackend>, width: u32, height: u32, max_value: u8) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(AnnotError::InvalidDimensions { width, height });
        }
        Ok(Self {
            backend,
            width,
            height,
            max_value,
            slots: HashMap::new(),
            dirty: None,
        })
    }

    /// CPU-backed store, mostly for tests and headless use.
    pub fn cpu(width: u32, height: u32, max_value: u8) -> Result<Self> {
        Self::new(Box::new(CpuRasterBackend::new()), width, height, max_value)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> RasterRect {
        RasterRect::full(self.width, self.height)
    }

    pub fn max_value(&self) -> u8 {
        self.max_value
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn is_gpu_accelerated(&self) -> bool {
        self.backend.is_gpu()
    }

    /// The raster for `slot`, allocating a zeroed one on first use.
    pub fn get_or_create_raster(&mut self, slot: u8) -> Result<RasterHandle> {
        if let Some(handle) = self.slots.get(&slot) {
            return Ok(*handle);
        }
        let handle = self.backend.create(self.width, self.height, None)?;
        self.slots.insert(slot, handle);
        Ok(handle)
    }

    /// Allocate `slot` from existing bytes (resuming a saved annotation).
    /// Values above the class range are clamped to 0.
    pub fn load_raster(&mut self, slot: u8, bytes: &[u8]) -> Result<RasterHandle> {
        let expected = self.width as usize * self.height as usize;
        if bytes.len() != expected {
            return Err(AnnotError::SizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let max = self.max_value;
        let sanitized: Vec<u8> = bytes.iter().map(|&v| if v > max { 0 } else { v }).collect();
        let handle = match self.slots.get(&slot) {
            Some(handle) => {
                self.backend.write_region(*handle, self.bounds(), &sanitized)?;
                *handle
            }
            None => {
                let handle = self.backend.create(self.width, self.height, Some(&sanitized))?;
                self.slots.insert(slot, handle);
                handle
            }
        };
        self.mark_dirty(self.bounds());
        Ok(handle)
    }

    /// Release the raster of `slot`.
    pub fn destroy_raster(&mut self, slot: u8) {
        if let Some(handle) = self.slots.remove(&slot) {
            self.backend.destroy(handle);
        }
    }

    /// Stamp one circle.  Centres outside the raster are a no-op.
    pub fn paint_circle(
        &mut self,
        raster: RasterHandle,
        center: Pos2,
        radius: f32,
        value: u8,
    ) -> Result<Option<RasterRect>> {
        self.paint_circles_batch(raster, &[center], radius, value)
    }

    /// Stamp many circles as one submission, in order.  Returns the clipped
    /// footprint that was submitted, or `None` when every centre was rejected.
    pub fn paint_circles_batch(
        &mut self,
        raster: RasterHandle,
        centers: &[Pos2],
        radius: f32,
        value: u8,
    ) -> Result<Option<RasterRect>> {
        self.check_value(value)?;
        self.check_raster(raster)?;
        if !(radius.is_finite() && radius >= 0.0) {
            crate::log_warn!("paint skipped: invalid brush radius {}", radius);
            return Ok(None);
        }
        let mut footprint = RasterRect::default();
        let stamps: Vec<Stamp> = centers
            .iter()
            .filter(|c| self.center_in_bounds(**c))
            .map(|c| Stamp::new(*c, radius, value))
            .inspect(|s| footprint = footprint.union(&s.footprint(self.width, self.height)))
            .collect();
        if stamps.is_empty() || footprint.is_empty() {
            return Ok(None);
        }
        self.backend.submit_stamps(raster, &stamps, footprint)?;
        self.mark_dirty(footprint);
        Ok(Some(footprint))
    }

    /// Footprint `paint_circles_batch` would touch, without painting.
    pub fn batch_footprint(&self, centers: &[Pos2], radius: f32) -> RasterRect {
        centers
            .iter()
            .filter(|c| self.center_in_bounds(**c))
            .fold(RasterRect::default(), |acc, c| {
                acc.union(&RasterRect::around_circle(c.x, c.y, radius, self.width, self.height))
            })
    }

    pub fn read_region(&mut self, raster: RasterHandle, rect: RasterRect) -> Result<Vec<u8>> {
        self.check_rect(rect)?;
        if rect.is_empty() {
            return Ok(Vec::new());
        }
        self.backend.read_region(raster, rect)
    }

    pub fn write_region(&mut self, raster: RasterHandle, rect: RasterRect, bytes: &[u8]) -> Result<()> {
        self.check_rect(rect)?;
        if bytes.len() != rect.byte_len() {
            return Err(AnnotError::SizeMismatch {
                expected: rect.byte_len(),
                actual: bytes.len(),
            });
        }
        if let Some(&bad) = bytes.iter().find(|&&v| v > self.max_value) {
            return Err(AnnotError::InvalidClass {
                value: bad,
                max: self.max_value,
            });
        }
        if rect.is_empty() {
            return Ok(());
        }
        self.backend.write_region(raster, rect, bytes)?;
        self.mark_dirty(rect);
        Ok(())
    }

    pub fn read_full(&mut self, raster: RasterHandle) -> Result<Vec<u8>> {
        self.read_region(raster, self.bounds())
    }

    /// Zero the raster and wait for the GPU to finish.
    pub fn clear(&mut self, raster: RasterHandle) -> Result<()> {
        self.check_raster(raster)?;
        self.backend.fill(raster, 0)?;
        self.mark_dirty(self.bounds());
        Ok(())
    }

    /// Wait until all submitted writes have executed.
    pub fn flush(&mut self) -> Result<()> {
        self.backend.flush()
    }

    /// Region changed since the previous call, for incremental redraws.
    pub fn take_dirty(&mut self) -> Option<RasterRect> {
        self.dirty.take()
    }

    fn mark_dirty(&mut self, rect: RasterRect) {
        if rect.is_empty() {
            return;
        }
        self.dirty = Some(match self.dirty {
            Some(d) => d.union(&rect),
            None => rect,
        });
    }

    fn center_in_bounds(&self, c: Pos2) -> bool {
        c.x.is_finite()
            && c.y.is_finite()
            && c.x >= 0.0
            && c.y >= 0.0
            && c.x < self.width as f32
            && c.y < self.height as f32
    }

    fn check_value(&self, value: u8) -> Result<()> {
        if value > self.max_value {
            return Err(AnnotError::InvalidClass {
                value,
                max: self.max_value,
            });
        }
        Ok(())
    }

    fn check_raster(&self, raster: RasterHandle) -> Result<()> {
        match self.backend.size(raster) {
            Some(_) => Ok(()),
            None => Err(AnnotError::UnknownRaster(raster)),
        }
    }

    fn check_rect(&self, rect: RasterRect) -> Result<()> {
        if !rect.fits_within(self.width, self.height) {
            return Err(AnnotError::RegionOutOfBounds {
                rect,
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_100() -> (MaskStore, RasterHandle) {
        let mut store = MaskStore::cpu(100, 100, 8).expect("store");
        let raster = store.get_or_create_raster(0).expect("raster");
        (store, raster)
    }

    #[test]
    fn circle_of_radius_ten_matches_distance_test() {
        let (mut store, raster) = store_100();
        store
            .paint_circle(raster, Pos2::new(50.0, 50.0), 10.0, 3)
            .expect("paint");
        let rect = RasterRect::new(40, 40, 20, 20);
        let bytes = store.read_region(raster, rect).expect("read");
        for y in 0..20u32 {
            for x in 0..20u32 {
                let (px, py) = (40 + x, 40 + y);
                let dx = px as f32 - 50.0;
                let dy = py as f32 - 50.0;
                let expected = if dx * dx + dy * dy <= 100.0 { 3 } else { 0 };
                assert_eq!(bytes[(y * 20 + x) as usize], expected, "pixel ({px},{py})");
            }
        }
    }

    #[test]
    fn later_stamps_in_a_batch_overwrite_earlier_ones() {
        let (mut store, raster) = store_100();
        store
            .paint_circles_batch(raster, &[Pos2::new(20.0, 20.0), Pos2::new(22.0, 20.0)], 5.0, 2)
            .expect("paint");
        store
            .paint_circles_batch(raster, &[Pos2::new(20.0, 20.0)], 3.0, 0)
            .expect("erase");
        let full = store.read_full(raster).expect("read");
        assert_eq!(full[20 * 100 + 20], 0);
        assert_eq!(full[20 * 100 + 26], 2);
    }

    #[test]
    fn out_of_bounds_centres_are_no_ops() {
        let (mut store, raster) = store_100();
        let footprint = store
            .paint_circles_batch(
                raster,
                &[Pos2::new(-1.0, 5.0), Pos2::new(100.0, 5.0), Pos2::new(f32::NAN, 1.0)],
                4.0,
                1,
            )
            .expect("paint");
        assert!(footprint.is_none());
        assert!(store.read_full(raster).expect("read").iter().all(|&v| v == 0));
        assert!(store.take_dirty().is_none());
    }

    #[test]
    fn class_values_above_maximum_are_rejected() {
        let (mut store, raster) = store_100();
        assert!(matches!(
            store.paint_circle(raster, Pos2::new(5.0, 5.0), 2.0, 9),
            Err(AnnotError::InvalidClass { value: 9, max: 8 })
        ));
        assert!(store
            .write_region(raster, RasterRect::new(0, 0, 1, 1), &[200])
            .is_err());
    }

    #[test]
    fn patch_round_trip_restores_exact_bytes() {
        let (mut store, raster) = store_100();
        store.paint_circle(raster, Pos2::new(30.0, 30.0), 6.0, 1).expect("paint");
        let before_full = store.read_full(raster).expect("read");

        let region = RasterRect::new(20, 20, 30, 30);
        let prior = store.read_region(raster, region).expect("capture");
        store.paint_circle(raster, Pos2::new(35.0, 35.0), 8.0, 4).expect("paint");
        store.paint_circle(raster, Pos2::new(28.0, 40.0), 3.0, 0).expect("erase");
        store.write_region(raster, region, &prior).expect("restore");

        assert_eq!(store.read_full(raster).expect("read"), before_full);
    }

    #[test]
    fn region_checks_reject_bad_requests() {
        let (mut store, raster) = store_100();
        assert!(matches!(
            store.read_region(raster, RasterRect::new(90, 90, 20, 5)),
            Err(AnnotError::RegionOutOfBounds { .. })
        ));
        assert!(matches!(
            store.write_region(raster, RasterRect::new(0, 0, 2, 2), &[0, 0, 0]),
            Err(AnnotError::SizeMismatch { expected: 4, actual: 3 })
        ));
        assert!(matches!(
            store.read_full(RasterHandle(42)),
            Err(AnnotError::UnknownRaster(_))
        ));
    }

    #[test]
    fn clear_zeroes_and_marks_everything_dirty() {
        let (mut store, raster) = store_100();
        store.paint_circle(raster, Pos2::new(10.0, 10.0), 4.0, 5).expect("paint");
        let _ = store.take_dirty();
        store.clear(raster).expect("clear");
        assert_eq!(store.take_dirty(), Some(RasterRect::full(100, 100)));
        assert!(store.read_full(raster).expect("read").iter().all(|&v| v == 0));
    }

    #[test]
    fn slots_reuse_their_raster() {
        let (mut store, raster) = store_100();
        assert_eq!(store.get_or_create_raster(0).expect("slot"), raster);
        let other = store.get_or_create_raster(1).expect("slot");
        assert_ne!(other, raster);
        store.destroy_raster(1);
        assert!(store.read_full(other).is_err());
    }

    #[test]
    fn load_raster_sanitises_out_of_range_values() {
        let mut store = MaskStore::cpu(2, 2, 8).expect("store");
        let raster = store.load_raster(0, &[1, 9, 8, 255]).expect("load");
        assert_eq!(store.read_full(raster).expect("read"), vec![1, 0, 8, 0]);
        assert!(store.load_raster(0, &[0; 3]).is_err());
    }

    #[test]
    fn mask_geometry_doubles_and_clamps() {
        let g = MaskGeometry::derive(1000, 500, 2.0, 4096).expect("geometry");
        assert_eq!((g.width, g.height), (2000, 1000));
        assert_eq!(g.mask_scale, 2.0);

        let g = MaskGeometry::derive(4000, 3000, 2.0, 4096).expect("geometry");
        assert_eq!((g.width, g.height), (4096, 3072));
        assert!((g.mask_scale - 1.024).abs() < 1e-6);

        assert!(MaskGeometry::derive(0, 10, 2.0, 4096).is_err());
    }
}
