use egui::Pos2;

use crate::components::history::{PatchSnapshot, PatchUndoLedger};
use crate::error::Result;
use crate::geometry::RasterRect;
use crate::mask::{MaskStore, RasterHandle};
use crate::settings::Tunables;
use crate::transform::CoordinateTransform;

// ============================================================================
// BRUSH SETTINGS
// ============================================================================

/// Brush applied by the next stroke.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrushSettings {
    /// Radius in image pixels.
    pub radius: f32,
    /// Class painted when not erasing (1..=max class).
    pub class: u8,
    pub erase: bool,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self {
            radius: 10.0,
            class: 1,
            erase: false,
        }
    }
}

impl BrushSettings {
    /// Raster value written by this brush.
    pub fn value(&self) -> u8 {
        if self.erase { 0 } else { self.class }
    }
}

// ============================================================================
// STROKE CONTROLLER - interpolated stamping with a growing prior patch
// ============================================================================

/// Transient state of the stroke in progress.
struct ActiveStroke {
    raster: RasterHandle,
    value: u8,
    /// Radius in raster pixels.
    radius: f32,
    /// Distance between interpolated stamps in raster pixels.
    step: f32,
    /// Last stamped point in raster space.
    last: Pos2,
    /// Pre-stroke bytes of a region that always contains `painted`.
    prior: PatchSnapshot,
    /// Union of submitted stamp footprints.
    painted: RasterRect,
    points_since_check: u32,
    expansions: u32,
}

/// Turns draw gestures into stamps on a mask raster and one undo entry per
/// stroke.
pub struct StrokeController {
    active: Option<ActiveStroke>,
    step_fraction: f32,
    check_interval: u32,
    initial_extent: u32,
    growth_margin: u32,
}

impl Default for StrokeController {
    fn default() -> Self {
        Self::new(&Tunables::default())
    }
}

impl StrokeController {
    pub fn new(tunables: &Tunables) -> Self {
        Self {
            active: None,
            step_fraction: tunables.stamp_step_fraction,
            check_interval: tunables.expansion_check_interval.max(1),
            initial_extent: tunables.initial_patch_extent,
            growth_margin: tunables.patch_growth_margin,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Region currently covered by the stroke's prior snapshot.
    pub fn tracked_region(&self) -> Option<RasterRect> {
        self.active.as_ref().map(|s| s.prior.rect)
    }

    /// Start a stroke at `point` (screen points) and stamp it.
    ///
    /// A stroke still in progress is committed first.  A point that cannot be
    /// mapped into raster space is logged and the stroke is not started.
    pub fn begin(
        &mut self,
        store: &mut MaskStore,
        ledger: &mut PatchUndoLedger,
        raster: RasterHandle,
        brush: &BrushSettings,
        transform: &CoordinateTransform,
        point: Pos2,
    ) -> Result<()> {
        if self.active.is_some() {
            self.end(ledger);
        }
        let center = match transform.screen_to_mask(point) {
            Ok(p) => p,
            Err(e) => {
                crate::log_warn!("Stroke begin skipped at {:?}: {}", point, e);
                return Ok(());
            }
        };
        let radius = brush.radius * transform.mask_scale();
        if !(radius.is_finite() && radius > 0.0) {
            crate::log_warn!("Stroke begin skipped: brush radius {} is not usable", brush.radius);
            return Ok(());
        }

        // Generous initial patch so most strokes never need to grow it.
        let (w, h) = (store.width(), store.height());
        let region = RasterRect::around_point(center.x, center.y, self.initial_extent, w, h)
            .union(&RasterRect::around_circle(center.x, center.y, radius, w, h));
        let prior = PatchSnapshot::capture(store, raster, region)?;

        self.active = Some(ActiveStroke {
            raster,
            value: brush.value(),
            radius,
            step: (radius * self.step_fraction).max(1.0),
            last: center,
            prior,
            painted: RasterRect::default(),
            points_since_check: 0,
            expansions: 0,
        });
        self.stamp(store, &[center])
    }

    /// Extend the stroke to `point` (screen points), stamping every step
    /// along the segment from the last point.
    pub fn continue_to(&mut self, store: &mut MaskStore, transform: &CoordinateTransform, point: Pos2) -> Result<()> {
        let Some(stroke) = self.active.as_mut() else {
            return Ok(());
        };
        let target = match transform.screen_to_mask(point) {
            Ok(p) => p,
            Err(e) => {
                crate::log_warn!("Stroke point skipped at {:?}: {}", point, e);
                return Ok(());
            }
        };
        // Only the part of the segment whose stamps can reach the raster is walked.
        let reach = stroke.radius.ceil();
        let bounds = (-reach, -reach, store.width() as f32 + reach, store.height() as f32 + reach);
        let Some((from, to)) = clip_segment(stroke.last, target, bounds) else {
            stroke.last = target;
            return Ok(());
        };
        let points = interpolate(from, to, stroke.step);
        stroke.last = target;
        if points.is_empty() {
            return Ok(());
        }
        stroke.points_since_check += points.len() as u32;
        self.stamp(store, &points)
    }

    /// Finish the stroke.  Pushes one ledger entry covering everything the
    /// stroke painted and returns that region.
    pub fn end(&mut self, ledger: &mut PatchUndoLedger) -> Option<RasterRect> {
        let stroke = self.active.take()?;
        if stroke.painted.is_empty() {
            return None;
        }
        let prior = stroke.prior.crop(stroke.painted);
        if stroke.expansions > 0 {
            crate::log_info!(
                "Stroke committed over {:?} after {} patch expansion(s)",
                stroke.painted,
                stroke.expansions
            );
        }
        ledger.push(stroke.raster, prior.rect, prior.bytes, stroke_description(stroke.value));
        Some(stroke.painted)
    }

    /// Abandon the stroke and put the pre-stroke pixels back before returning.
    pub fn cancel(&mut self, store: &mut MaskStore) -> Result<Option<RasterRect>> {
        let Some(stroke) = self.active.take() else {
            return Ok(None);
        };
        if stroke.painted.is_empty() {
            return Ok(None);
        }
        stroke.prior.crop(stroke.painted).restore(store, stroke.raster)?;
        store.flush()?;
        Ok(Some(stroke.painted))
    }

    /// Submit `centers` as one batch, growing the prior patch first whenever
    /// the batch would touch pixels outside it.
    fn stamp(&mut self, store: &mut MaskStore, centers: &[Pos2]) -> Result<()> {
        let margin = self.growth_margin;
        let interval = self.check_interval;
        let Some(stroke) = self.active.as_mut() else {
            return Ok(());
        };
        let (w, h) = (store.width(), store.height());

        // Periodic look-ahead: keep a radius-scaled border around the painted
        // area so fast strokes grow the patch in few large steps.
        if stroke.points_since_check >= interval {
            stroke.points_since_check = 0;
            let lookahead = stroke.painted.inflate((stroke.radius * 4.0).ceil() as u32, w, h);
            if !stroke.prior.rect.contains_rect(&lookahead) {
                grow(store, stroke, lookahead, margin)?;
            }
        }

        let footprint = store.batch_footprint(centers, stroke.radius);
        if footprint.is_empty() {
            return Ok(());
        }
        // Nothing may be painted outside the prior patch before it covers it.
        if !stroke.prior.rect.contains_rect(&footprint) {
            grow(store, stroke, footprint, margin)?;
        }
        if let Some(painted) = store.paint_circles_batch(stroke.raster, centers, stroke.radius, stroke.value)? {
            stroke.painted = stroke.painted.union(&painted);
        }
        Ok(())
    }
}

fn grow(store: &mut MaskStore, stroke: &mut ActiveStroke, target: RasterRect, margin: u32) -> Result<()> {
    let new_rect = stroke
        .prior
        .rect
        .union(&target)
        .inflate(margin, store.width(), store.height());
    stroke.prior.expand(store, stroke.raster, new_rect)?;
    stroke.expansions += 1;
    Ok(())
}

/// Liang–Barsky clip of `from → to` against `(min_x, min_y, max_x, max_y)`.
fn clip_segment(from: Pos2, to: Pos2, (min_x, min_y, max_x, max_y): (f32, f32, f32, f32)) -> Option<(Pos2, Pos2)> {
    let d = to - from;
    let (mut t0, mut t1) = (0.0f32, 1.0f32);
    for (p, q) in [
        (-d.x, from.x - min_x),
        (d.x, max_x - from.x),
        (-d.y, from.y - min_y),
        (d.y, max_y - from.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                t0 = t0.max(r);
            } else {
                t1 = t1.min(r);
            }
        }
    }
    (t0 <= t1 && t0.is_finite() && t1.is_finite()).then(|| (from + d * t0, from + d * t1))
}

/// Points after `from` up to and including `to`, spaced at most `step` apart.
fn interpolate(from: Pos2, to: Pos2, step: f32) -> Vec<Pos2> {
    let delta = to - from;
    let distance = delta.length();
    if !(distance.is_finite() && distance > 0.0) {
        return Vec::new();
    }
    let count = (distance / step).ceil().max(1.0) as usize;
    (1..=count)
        .map(|i| from + delta * (i as f32 / count as f32))
        .collect()
}

fn stroke_description(value: u8) -> &'static str {
    if value == 0 { "Eraser Stroke" } else { "Brush Stroke" }
}
