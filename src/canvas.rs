use std::time::Instant;

use egui::{Pos2, Vec2};

use crate::components::gesture::{GestureCoordinator, GestureListener, PointerEvent, ToolMode};
use crate::components::history::PatchUndoLedger;
use crate::components::stroke::{BrushSettings, StrokeController};
use crate::error::{AnnotError, Result};
use crate::geometry::RasterRect;
use crate::mask::{MaskGeometry, MaskStore, RasterBackend, RasterHandle, Readiness};
use crate::ops::flood_fill::flood_fill;
use crate::settings::Tunables;
use crate::transform::CoordinateTransform;

/// Raster slot holding the class mask (values 0..=max class).
pub const CLASS_MASK_SLOT: u8 = 0;

// ============================================================================
// MASK EDITOR - raster, view, stroke and history state of one annotation
// ============================================================================

/// Live raster resources; absent when no backend could be created.
struct Surface {
    store: MaskStore,
    raster: RasterHandle,
}

/// Applies semantic gestures to the class mask and the view transform.
pub struct MaskEditor {
    surface: Option<Surface>,
    readiness: Readiness,
    geometry: MaskGeometry,
    transform: CoordinateTransform,
    strokes: StrokeController,
    ledger: PatchUndoLedger,
    brush: BrushSettings,
    max_class: u8,
}

impl MaskEditor {
    /// Build an editor for an image of `image_width` × `image_height` pixels.
    ///
    /// `backend` is `None` when raster creation already failed; the editor is
    /// then view-only and reports `Readiness::Unavailable`.
    pub fn new(
        image_width: u32,
        image_height: u32,
        viewport: Vec2,
        device_scale: f32,
        tunables: &Tunables,
        backend: Option<Box<dyn RasterBackend>>,
        readiness: Readiness,
    ) -> Result<Self> {
        let geometry = MaskGeometry::derive(
            image_width,
            image_height,
            tunables.mask_resolution_factor,
            tunables.max_raster_edge,
        )?;
        let transform = CoordinateTransform::new(
            Vec2::new(image_width as f32, image_height as f32),
            viewport,
            device_scale,
            geometry.mask_scale,
        )?
        .with_zoom_limits(tunables.min_zoom, tunables.max_zoom);

        let (surface, readiness) = match backend {
            Some(backend) if readiness.is_ready() => match Self::create_surface(backend, &geometry, tunables) {
                Ok(surface) => (Some(surface), readiness),
                Err(e) => {
                    crate::log_err!("Mask raster creation failed: {}", e);
                    (None, Readiness::Unavailable)
                }
            },
            _ => (None, Readiness::Unavailable),
        };

        crate::log_info!(
            "Annotation surface {}x{} (image {}x{}, mask scale {:.3}, {:?})",
            geometry.width,
            geometry.height,
            image_width,
            image_height,
            geometry.mask_scale,
            readiness
        );

        Ok(Self {
            surface,
            readiness,
            geometry,
            transform,
            strokes: StrokeController::new(tunables),
            ledger: PatchUndoLedger::new(tunables.max_undo_entries, tunables.max_undo_bytes),
            brush: BrushSettings::default(),
            max_class: tunables.max_classes,
        })
    }

    fn create_surface(backend: Box<dyn RasterBackend>, geometry: &MaskGeometry, tunables: &Tunables) -> Result<Surface> {
        let mut store = MaskStore::new(backend, geometry.width, geometry.height, tunables.max_classes)?;
        let raster = store.get_or_create_raster(CLASS_MASK_SLOT)?;
        Ok(Surface { store, raster })
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn geometry(&self) -> &MaskGeometry {
        &self.geometry
    }

    pub fn transform(&self) -> &CoordinateTransform {
        &self.transform
    }

    pub fn backend_name(&self) -> &str {
        self.surface.as_ref().map_or("none", |s| s.store.backend_name())
    }

    // ------------------------------------------------------------------
    // Brush
    // ------------------------------------------------------------------

    pub fn brush(&self) -> BrushSettings {
        self.brush
    }

    /// Select the painted class; values outside `1..=max class` are ignored.
    pub fn set_class(&mut self, class: u8) {
        if (1..=self.max_class).contains(&class) {
            self.brush.class = class;
        } else {
            crate::log_warn!("Class {} outside 1..={}", class, self.max_class);
        }
    }

    pub fn set_eraser(&mut self, erase: bool) {
        self.brush.erase = erase;
    }

    /// Brush radius in image pixels.
    pub fn set_brush_radius(&mut self, radius: f32) {
        if radius.is_finite() && radius > 0.0 {
            self.brush.radius = radius;
        }
    }

    // ------------------------------------------------------------------
    // View
    // ------------------------------------------------------------------

    pub fn current_scale(&self) -> f32 {
        self.transform.current_scale()
    }

    /// On-screen brush diameter in points.
    pub fn brush_preview_size(&self) -> f32 {
        self.transform.brush_preview_size(self.brush.radius)
    }

    pub fn reset_view(&mut self) {
        self.transform.reset();
    }

    pub fn set_viewport_size(&mut self, viewport: Vec2) {
        self.transform.set_viewport_size(viewport);
    }

    pub fn set_device_scale(&mut self, device_scale: f32) {
        self.transform.set_device_scale(device_scale);
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    pub fn is_stroke_active(&self) -> bool {
        self.strokes.is_active()
    }

    /// Flood-fill the region under `point` (screen points) with the brush
    /// value.  Returns the number of pixels changed.
    pub fn fill_at(&mut self, point: Pos2) -> Result<usize> {
        let seed = self.transform.screen_to_mask(point)?;
        let value = self.brush.value();
        let surface = self.surface.as_mut().ok_or(AnnotError::NotReady)?;
        let (w, h) = (surface.store.width(), surface.store.height());
        if seed.x < 0.0 || seed.y < 0.0 || seed.x >= w as f32 || seed.y >= h as f32 {
            return Ok(0);
        }

        // Fill can reach anywhere, so the whole raster is the undo unit.
        let prior = surface.store.read_full(surface.raster)?;
        let (filled, affected) = flood_fill(prior.clone(), w, h, seed.x as u32, seed.y as u32, value);
        if affected == 0 {
            return Ok(0);
        }
        let full = surface.store.bounds();
        surface.store.write_region(surface.raster, full, &filled)?;
        self.ledger.push(surface.raster, full, prior, "Fill");
        crate::log_info!("Fill at ({}, {}) changed {} pixels", seed.x as u32, seed.y as u32, affected);
        Ok(affected)
    }

    /// Revert the newest edit.  A stroke in progress is committed first.
    pub fn undo(&mut self) -> Result<Option<RasterRect>> {
        let surface = self.surface.as_mut().ok_or(AnnotError::NotReady)?;
        self.strokes.end(&mut self.ledger);
        self.ledger.undo(&mut surface.store)
    }

    pub fn redo(&mut self) -> Result<Option<RasterRect>> {
        let surface = self.surface.as_mut().ok_or(AnnotError::NotReady)?;
        self.strokes.end(&mut self.ledger);
        self.ledger.redo(&mut surface.store)
    }

    pub fn can_undo(&self) -> bool {
        self.ledger.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.ledger.can_redo()
    }

    /// Erase every class.  Undoable; waits until the raster is cleared.
    pub fn clear_all(&mut self) -> Result<()> {
        let surface = self.surface.as_mut().ok_or(AnnotError::NotReady)?;
        self.strokes.cancel(&mut surface.store)?;
        let prior = surface.store.read_full(surface.raster)?;
        if prior.iter().all(|&v| v == 0) {
            return Ok(());
        }
        surface.store.clear(surface.raster)?;
        let full = surface.store.bounds();
        self.ledger.push(surface.raster, full, prior, "Clear");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence and display
    // ------------------------------------------------------------------

    /// Full raster bytes, row-major, after every pending write.
    pub fn export_mask(&mut self) -> Result<Vec<u8>> {
        let surface = self.surface.as_mut().ok_or(AnnotError::NotReady)?;
        surface.store.read_full(surface.raster)
    }

    /// Replace the raster with saved bytes.  History is discarded.
    pub fn load_mask(&mut self, bytes: &[u8]) -> Result<()> {
        let surface = self.surface.as_mut().ok_or(AnnotError::NotReady)?;
        self.strokes.cancel(&mut surface.store)?;
        surface.raster = surface.store.load_raster(CLASS_MASK_SLOT, bytes)?;
        self.ledger.clear();
        Ok(())
    }

    pub fn read_region(&mut self, rect: RasterRect) -> Result<Vec<u8>> {
        let surface = self.surface.as_mut().ok_or(AnnotError::NotReady)?;
        surface.store.read_region(surface.raster, rect)
    }

    /// Region changed since the previous call.
    pub fn take_dirty(&mut self) -> Option<RasterRect> {
        self.surface.as_mut().and_then(|s| s.store.take_dirty())
    }

    pub fn undo_memory_usage(&self) -> usize {
        self.ledger.memory_usage()
    }
}

impl GestureListener for MaskEditor {
    fn stroke_begin(&mut self, point: Pos2) {
        let Some(surface) = self.surface.as_mut() else { return };
        if let Err(e) = self.strokes.begin(
            &mut surface.store,
            &mut self.ledger,
            surface.raster,
            &self.brush,
            &self.transform,
            point,
        ) {
            crate::log_err!("Stroke begin failed: {}", e);
        }
    }

    fn stroke_continue(&mut self, point: Pos2) {
        let Some(surface) = self.surface.as_mut() else { return };
        if let Err(e) = self.strokes.continue_to(&mut surface.store, &self.transform, point) {
            crate::log_err!("Stroke continue failed: {}", e);
        }
    }

    fn stroke_end(&mut self, point: Pos2) {
        let Some(surface) = self.surface.as_mut() else { return };
        if let Err(e) = self.strokes.continue_to(&mut surface.store, &self.transform, point) {
            crate::log_err!("Stroke end point failed: {}", e);
        }
        self.strokes.end(&mut self.ledger);
    }

    fn stroke_cancel(&mut self) {
        let Some(surface) = self.surface.as_mut() else { return };
        if let Err(e) = self.strokes.cancel(&mut surface.store) {
            crate::log_err!("Stroke cancel failed: {}", e);
        }
    }

    fn pan(&mut self, delta: Vec2) {
        if let Err(e) = self.transform.apply_pan(delta) {
            crate::log_warn!("Pan {:?} skipped: {}", delta, e);
        }
    }

    fn pinch(&mut self, scale_ratio: f32, center: Pos2) {
        if let Err(e) = self.transform.apply_pinch(scale_ratio, center) {
            crate::log_warn!("Pinch {} at {:?} skipped: {}", scale_ratio, center, e);
        }
    }

    fn rotate(&mut self, angle_delta: f32, center: Pos2) {
        if let Err(e) = self.transform.apply_rotation(angle_delta, center) {
            crate::log_warn!("Rotation {} at {:?} skipped: {}", angle_delta, center, e);
        }
    }

    fn undo(&mut self) {
        if let Err(e) = MaskEditor::undo(self) {
            crate::log_err!("Undo failed: {}", e);
        }
    }

    fn redo(&mut self) {
        if let Err(e) = MaskEditor::redo(self) {
            crate::log_err!("Redo failed: {}", e);
        }
    }

    fn fill_tap(&mut self, point: Pos2) {
        if let Err(e) = self.fill_at(point) {
            crate::log_err!("Fill at {:?} failed: {}", point, e);
        }
    }
}

// ============================================================================
// ANNOTATION SESSION - composition root
// ============================================================================

/// One open annotation: gesture recognition feeding a mask editor.
pub struct AnnotationSession {
    pub gestures: GestureCoordinator,
    pub editor: MaskEditor,
}

impl AnnotationSession {
    /// Create a session, choosing the GPU or CPU raster backend from `tunables`.
    pub fn new(image_width: u32, image_height: u32, viewport: Vec2, device_scale: f32, tunables: &Tunables) -> Result<Self> {
        let (backend, readiness) = crate::gpu::select_backend(tunables);
        Self::with_backend(image_width, image_height, viewport, device_scale, tunables, backend, readiness)
    }

    pub fn with_backend(
        image_width: u32,
        image_height: u32,
        viewport: Vec2,
        device_scale: f32,
        tunables: &Tunables,
        backend: Option<Box<dyn RasterBackend>>,
        readiness: Readiness,
    ) -> Result<Self> {
        Ok(Self {
            gestures: GestureCoordinator::new(tunables),
            editor: MaskEditor::new(image_width, image_height, viewport, device_scale, tunables, backend, readiness)?,
        })
    }

    pub fn readiness(&self) -> Readiness {
        self.editor.readiness()
    }

    /// Route a pointer event.  Ignored while the surface is unavailable.
    pub fn handle_event(&mut self, event: &PointerEvent) {
        if !self.editor.readiness().is_ready() {
            return;
        }
        self.gestures.handle_event(event, &mut self.editor);
    }

    pub fn tick(&mut self, now: Instant) {
        if self.editor.readiness().is_ready() {
            self.gestures.tick(now, &mut self.editor);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.gestures.next_deadline()
    }

    pub fn set_tool(&mut self, tool: ToolMode) {
        self.gestures.set_tool(tool);
    }

    /// Drop all contacts (e.g. window focus lost), rolling back a live stroke.
    pub fn cancel_input(&mut self) {
        self.gestures.cancel_all(&mut self.editor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::gesture::{Contact, DeviceKind, PointerPhase};
    use crate::mask::CpuRasterBackend;
    use std::time::Duration;

    /// 50×50 image → 100×100 mask in a 100×100 viewport: screen points map
    /// 1:1 onto mask pixels.
    fn session() -> AnnotationSession {
        let tunables = Tunables::default();
        let mut session = AnnotationSession::with_backend(
            50,
            50,
            Vec2::splat(100.0),
            1.0,
            &tunables,
            Some(Box::new(CpuRasterBackend::new())),
            Readiness::CpuFallback,
        )
        .expect("session");
        session.editor.set_brush_radius(2.0);
        session
    }

    struct Clock(Instant);

    impl Clock {
        fn event(&self, ms: u64, phase: PointerPhase, contacts: &[Contact]) -> PointerEvent {
            PointerEvent {
                phase,
                contacts: contacts.to_vec(),
                timestamp: self.0 + Duration::from_millis(ms),
            }
        }
    }

    fn contact(id: u64, x: f32, y: f32, device: DeviceKind) -> Contact {
        Contact {
            id,
            position: Pos2::new(x, y),
            device,
        }
    }

    fn painted(session: &mut AnnotationSession) -> usize {
        session
            .editor
            .export_mask()
            .expect("export")
            .iter()
            .filter(|&&v| v != 0)
            .count()
    }

    #[test]
    fn pen_stroke_paints_and_taps_undo_and_redo() {
        let mut s = session();
        let clock = Clock(Instant::now());
        s.handle_event(&clock.event(0, PointerPhase::Began, &[contact(1, 20.0, 20.0, DeviceKind::Stylus)]));
        s.handle_event(&clock.event(10, PointerPhase::Moved, &[contact(1, 60.0, 20.0, DeviceKind::Stylus)]));
        s.handle_event(&clock.event(20, PointerPhase::Ended, &[contact(1, 60.0, 40.0, DeviceKind::Stylus)]));

        let mask = s.editor.export_mask().expect("export");
        assert_eq!(mask[20 * 100 + 40], 1);
        assert_eq!(mask[40 * 100 + 60], 1);
        let stroke_pixels = painted(&mut s);
        assert!(s.editor.can_undo());

        let two = [contact(2, 10.0, 80.0, DeviceKind::Finger), contact(3, 40.0, 80.0, DeviceKind::Finger)];
        s.handle_event(&clock.event(1000, PointerPhase::Began, &two));
        s.handle_event(&clock.event(1080, PointerPhase::Ended, &two));
        assert_eq!(painted(&mut s), 0);

        let three = [
            contact(4, 10.0, 80.0, DeviceKind::Finger),
            contact(5, 40.0, 80.0, DeviceKind::Finger),
            contact(6, 70.0, 80.0, DeviceKind::Finger),
        ];
        s.handle_event(&clock.event(2000, PointerPhase::Began, &three));
        s.handle_event(&clock.event(2080, PointerPhase::Ended, &three));
        assert_eq!(painted(&mut s), stroke_pixels);
    }

    #[test]
    fn second_finger_rolls_back_a_finger_stroke() {
        let mut s = session();
        let clock = Clock(Instant::now());
        s.handle_event(&clock.event(0, PointerPhase::Began, &[contact(1, 20.0, 20.0, DeviceKind::Finger)]));
        s.tick(clock.0 + Duration::from_millis(40));
        s.handle_event(&clock.event(50, PointerPhase::Moved, &[contact(1, 50.0, 20.0, DeviceKind::Finger)]));
        assert!(painted(&mut s) > 0);

        s.handle_event(&clock.event(60, PointerPhase::Began, &[contact(2, 80.0, 80.0, DeviceKind::Finger)]));
        assert_eq!(painted(&mut s), 0);
        assert!(!s.editor.can_undo());
        assert!(!s.editor.is_stroke_active());
    }

    #[test]
    fn fill_tool_fills_enclosed_background() {
        let mut s = session();
        s.set_tool(ToolMode::Fill);
        s.editor.set_class(3);
        let clock = Clock(Instant::now());
        s.handle_event(&clock.event(0, PointerPhase::Began, &[contact(1, 5.0, 5.0, DeviceKind::Finger)]));
        s.handle_event(&clock.event(50, PointerPhase::Ended, &[contact(1, 5.0, 5.0, DeviceKind::Finger)]));
        assert!(s.editor.export_mask().expect("export").iter().all(|&v| v == 3));

        s.editor.undo().expect("undo");
        assert_eq!(painted(&mut s), 0);
    }

    #[test]
    fn fill_outside_raster_or_on_same_class_is_a_no_op() {
        let mut s = session();
        assert_eq!(s.editor.fill_at(Pos2::new(-5.0, 10.0)).expect("fill"), 0);
        s.editor.set_eraser(true);
        assert_eq!(s.editor.fill_at(Pos2::new(10.0, 10.0)).expect("fill"), 0);
        assert!(!s.editor.can_undo());
    }

    #[test]
    fn clear_all_is_undoable() {
        let mut s = session();
        s.editor.fill_at(Pos2::new(10.0, 10.0)).expect("fill");
        s.editor.clear_all().expect("clear");
        assert_eq!(painted(&mut s), 0);
        s.editor.undo().expect("undo");
        assert_eq!(painted(&mut s), 100 * 100);
    }

    #[test]
    fn degenerate_navigation_leaves_the_view_untouched() {
        let mut s = session();
        let before = s.editor.transform().clone();
        GestureListener::pinch(&mut s.editor, f32::NAN, Pos2::new(10.0, 10.0));
        GestureListener::rotate(&mut s.editor, f32::INFINITY, Pos2::new(10.0, 10.0));
        GestureListener::pan(&mut s.editor, Vec2::new(f32::NAN, 0.0));
        assert_eq!(s.editor.transform(), &before);

        GestureListener::pinch(&mut s.editor, 2.0, Pos2::new(50.0, 50.0));
        assert!((s.editor.current_scale() - 4.0).abs() < 1e-5);
        assert!((s.editor.brush_preview_size() - 16.0).abs() < 1e-4);
        s.editor.reset_view();
        assert!((s.editor.current_scale() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn loaded_mask_is_exported_unchanged_and_clears_history() {
        let mut s = session();
        s.editor.fill_at(Pos2::new(1.0, 1.0)).expect("fill");
        let bytes: Vec<u8> = (0..100 * 100).map(|i| (i % 9) as u8).collect();
        s.editor.load_mask(&bytes).expect("load");
        assert!(!s.editor.can_undo());
        assert_eq!(s.editor.export_mask().expect("export"), bytes);
        assert!(s.editor.load_mask(&[0; 10]).is_err());
    }

    #[test]
    fn unavailable_session_ignores_input() {
        let tunables = Tunables::default();
        let mut s = AnnotationSession::with_backend(50, 50, Vec2::splat(100.0), 1.0, &tunables, None, Readiness::Unavailable)
            .expect("session");
        assert_eq!(s.readiness(), Readiness::Unavailable);
        let clock = Clock(Instant::now());
        s.handle_event(&clock.event(0, PointerPhase::Began, &[contact(1, 20.0, 20.0, DeviceKind::Stylus)]));
        assert!(!s.gestures.is_drawing());
        assert!(matches!(s.editor.export_mask(), Err(AnnotError::NotReady)));
    }

    #[test]
    fn dirty_region_tracks_paint() {
        let mut s = session();
        let _ = s.editor.take_dirty();
        GestureListener::stroke_begin(&mut s.editor, Pos2::new(30.0, 30.0));
        GestureListener::stroke_end(&mut s.editor, Pos2::new(30.0, 30.0));
        let dirty = s.editor.take_dirty().expect("dirty");
        assert!(dirty.contains_point(30, 30));
        assert!(s.editor.take_dirty().is_none());
    }
}
