// ============================================================================
// COORDINATE TRANSFORM — screen points ↔ image pixels ↔ mask raster pixels
// ============================================================================
//
// The view is a similarity transform (uniform scale, rotation, translation)
// from image space to screen *pixels*.  Input events arrive in logical points;
// `device_scale` converts points to pixels.  The mask raster is the image
// space scaled by `mask_scale` (2× by default, clamped to the max edge).
//
//   screen_px = scale · R(rotation) · image + translation
//   screen_pt = screen_px / device_scale
//   mask      = image · mask_scale

use egui::{Pos2, Vec2};
use thiserror::Error;

/// Smallest scale accepted before the view is considered singular.
const MIN_SCALE: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("transform produced a non-finite value")]
    NonFinite,
    #[error("transform would become singular")]
    Singular,
}

/// Pan/zoom/rotate state of the canvas plus the fixed image→mask scale.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateTransform {
    scale: f32,
    rotation: f32,
    translation: Vec2,
    mask_scale: f32,
    device_scale: f32,
    image_size: Vec2,
    viewport_size: Vec2,
    fit_scale: f32,
    min_zoom: f32,
    max_zoom: f32,
}

impl CoordinateTransform {
    /// Build a transform already fitted to the viewport.
    pub fn new(
        image_size: Vec2,
        viewport_size: Vec2,
        device_scale: f32,
        mask_scale: f32,
    ) -> Result<Self, TransformError> {
        if !(device_scale.is_finite() && device_scale > 0.0) {
            return Err(TransformError::Singular);
        }
        if !(mask_scale.is_finite() && mask_scale > 0.0) {
            return Err(TransformError::Singular);
        }
        let mut t = Self {
            scale: 1.0,
            rotation: 0.0,
            translation: Vec2::ZERO,
            mask_scale,
            device_scale,
            image_size,
            viewport_size,
            fit_scale: 1.0,
            min_zoom: 0.1,
            max_zoom: 50.0,
        };
        t.fit(image_size, viewport_size)?;
        Ok(t)
    }

    /// Zoom limits relative to the fit scale.
    pub fn with_zoom_limits(mut self, min_zoom: f32, max_zoom: f32) -> Self {
        if min_zoom.is_finite() && max_zoom.is_finite() && 0.0 < min_zoom && min_zoom <= max_zoom {
            self.min_zoom = min_zoom;
            self.max_zoom = max_zoom;
        }
        self
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Translate the view by `delta` screen points.
    pub fn apply_pan(&mut self, delta: Vec2) -> Result<(), TransformError> {
        let translation = self.translation + delta * self.device_scale;
        if !finite_vec(translation) {
            return Err(TransformError::NonFinite);
        }
        self.translation = translation;
        Ok(())
    }

    /// Scale by `scale_ratio` around `center` (screen points), keeping the
    /// image point under `center` fixed.  The resulting zoom is clamped to
    /// the configured limits.
    pub fn apply_pinch(&mut self, scale_ratio: f32, center: Pos2) -> Result<(), TransformError> {
        if !scale_ratio.is_finite() || !finite_pos(center) {
            return Err(TransformError::NonFinite);
        }
        if scale_ratio <= 0.0 {
            return Err(TransformError::Singular);
        }
        let target = (self.scale * scale_ratio).clamp(
            self.fit_scale * self.min_zoom,
            self.fit_scale * self.max_zoom,
        );
        let k = target / self.scale;
        let c = center.to_vec2() * self.device_scale;
        let translation = c + (self.translation - c) * k;
        let scale = self.scale * k;
        if !finite_vec(translation) || !scale.is_finite() {
            return Err(TransformError::NonFinite);
        }
        if scale < MIN_SCALE {
            return Err(TransformError::Singular);
        }
        self.scale = scale;
        self.translation = translation;
        Ok(())
    }

    /// Rotate by `angle_delta` radians around `center` (screen points).
    pub fn apply_rotation(&mut self, angle_delta: f32, center: Pos2) -> Result<(), TransformError> {
        if !angle_delta.is_finite() || !finite_pos(center) {
            return Err(TransformError::NonFinite);
        }
        let c = center.to_vec2() * self.device_scale;
        let translation = c + rotate(self.translation - c, angle_delta);
        let rotation = normalize_angle(self.rotation + angle_delta);
        if !finite_vec(translation) || !rotation.is_finite() {
            return Err(TransformError::NonFinite);
        }
        self.translation = translation;
        self.rotation = rotation;
        Ok(())
    }

    /// Centre the image in the viewport at the largest aspect-preserving scale.
    pub fn fit(&mut self, image_size: Vec2, viewport_size: Vec2) -> Result<(), TransformError> {
        if !finite_vec(image_size) || !finite_vec(viewport_size) {
            return Err(TransformError::NonFinite);
        }
        if image_size.x <= 0.0 || image_size.y <= 0.0 || viewport_size.x <= 0.0 || viewport_size.y <= 0.0 {
            return Err(TransformError::Singular);
        }
        let viewport_px = viewport_size * self.device_scale;
        let scale = (viewport_px.x / image_size.x).min(viewport_px.y / image_size.y);
        if !scale.is_finite() || scale < MIN_SCALE {
            return Err(TransformError::Singular);
        }
        self.image_size = image_size;
        self.viewport_size = viewport_size;
        self.fit_scale = scale;
        self.scale = scale;
        self.rotation = 0.0;
        self.translation = (viewport_px - image_size * scale) * 0.5;
        Ok(())
    }

    /// Re-fit to the current image and viewport.
    pub fn reset(&mut self) {
        if let Err(e) = self.fit(self.image_size, self.viewport_size) {
            crate::log_warn!("CoordinateTransform::reset skipped: {}", e);
        }
    }

    /// Track a resized viewport.  The current view is kept; only `reset`
    /// uses the new size.
    pub fn set_viewport_size(&mut self, viewport_size: Vec2) {
        if finite_vec(viewport_size) && viewport_size.x > 0.0 && viewport_size.y > 0.0 {
            self.viewport_size = viewport_size;
        }
    }

    pub fn set_device_scale(&mut self, device_scale: f32) {
        if device_scale.is_finite() && device_scale > 0.0 {
            self.device_scale = device_scale;
        }
    }

    // ------------------------------------------------------------------
    // Conversions
    // ------------------------------------------------------------------

    pub fn screen_to_image(&self, point: Pos2) -> Result<Pos2, TransformError> {
        if self.scale.abs() < MIN_SCALE {
            return Err(TransformError::Singular);
        }
        let px = point.to_vec2() * self.device_scale;
        let local = rotate(px - self.translation, -self.rotation) / self.scale;
        checked(local.to_pos2())
    }

    pub fn image_to_screen(&self, point: Pos2) -> Result<Pos2, TransformError> {
        let px = rotate(point.to_vec2() * self.scale, self.rotation) + self.translation;
        checked((px / self.device_scale).to_pos2())
    }

    pub fn screen_to_mask(&self, point: Pos2) -> Result<Pos2, TransformError> {
        let image = self.screen_to_image(point)?;
        checked((image.to_vec2() * self.mask_scale).to_pos2())
    }

    pub fn mask_to_screen(&self, point: Pos2) -> Result<Pos2, TransformError> {
        self.image_to_screen((point.to_vec2() / self.mask_scale).to_pos2())
    }

    /// Screen positions of the image corners: top-left, top-right,
    /// bottom-right, bottom-left.
    pub fn image_corners_on_screen(&self) -> Result<[Pos2; 4], TransformError> {
        let (w, h) = (self.image_size.x, self.image_size.y);
        Ok([
            self.image_to_screen(Pos2::new(0.0, 0.0))?,
            self.image_to_screen(Pos2::new(w, 0.0))?,
            self.image_to_screen(Pos2::new(w, h))?,
            self.image_to_screen(Pos2::new(0.0, h))?,
        ])
    }

    // ------------------------------------------------------------------
    // Read-only values for UI feedback
    // ------------------------------------------------------------------

    /// Screen points per image pixel.
    pub fn current_scale(&self) -> f32 {
        self.scale / self.device_scale
    }

    /// Zoom relative to the fit-to-viewport scale (1.0 = fitted).
    pub fn zoom_level(&self) -> f32 {
        self.scale / self.fit_scale
    }

    /// On-screen diameter (points) of a brush of `radius` image pixels.
    pub fn brush_preview_size(&self, radius: f32) -> f32 {
        2.0 * radius * self.current_scale()
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn translation(&self) -> Vec2 {
        self.translation
    }

    pub fn mask_scale(&self) -> f32 {
        self.mask_scale
    }

    pub fn device_scale(&self) -> f32 {
        self.device_scale
    }

    pub fn image_size(&self) -> Vec2 {
        self.image_size
    }
}

fn rotate(v: Vec2, angle: f32) -> Vec2 {
    let (sin, cos) = angle.sin_cos();
    Vec2::new(v.x * cos - v.y * sin, v.x * sin + v.y * cos)
}

fn normalize_angle(angle: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let a = angle.rem_euclid(TAU);
    if a > PI { a - TAU } else { a }
}

fn finite_vec(v: Vec2) -> bool {
    v.x.is_finite() && v.y.is_finite()
}

fn finite_pos(p: Pos2) -> bool {
    p.x.is_finite() && p.y.is_finite()
}

fn checked(p: Pos2) -> Result<Pos2, TransformError> {
    if finite_pos(p) {
        Ok(p)
    } else {
        Err(TransformError::NonFinite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn approx(a: Pos2, b: Pos2) -> bool {
        (a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3
    }

    fn fitted() -> CoordinateTransform {
        // 200x100 image in a 400x400 viewport: scale 2, letterboxed vertically.
        CoordinateTransform::new(Vec2::new(200.0, 100.0), Vec2::new(400.0, 400.0), 1.0, 2.0)
            .expect("valid transform")
    }

    #[test]
    fn fit_centres_and_preserves_aspect() {
        let t = fitted();
        assert_eq!(t.current_scale(), 2.0);
        let corners = t.image_corners_on_screen().expect("finite");
        assert!(approx(corners[0], Pos2::new(0.0, 100.0)));
        assert!(approx(corners[2], Pos2::new(400.0, 300.0)));
    }

    #[test]
    fn screen_image_round_trip_under_rotation() {
        let mut t = fitted();
        t.apply_rotation(0.7, Pos2::new(123.0, 45.0)).expect("rotate");
        t.apply_pinch(1.5, Pos2::new(10.0, 300.0)).expect("pinch");
        t.apply_pan(Vec2::new(-17.0, 9.5)).expect("pan");

        let p = Pos2::new(37.0, 81.0);
        let screen = t.image_to_screen(p).expect("forward");
        let back = t.screen_to_image(screen).expect("inverse");
        assert!(approx(p, back));
    }

    #[test]
    fn pinch_keeps_pivot_fixed() {
        let mut t = fitted();
        let pivot = Pos2::new(150.0, 220.0);
        let before = t.screen_to_image(pivot).expect("finite");
        t.apply_pinch(3.0, pivot).expect("pinch");
        let after = t.screen_to_image(pivot).expect("finite");
        assert!(approx(before, after));
        assert!((t.current_scale() - 6.0).abs() < 1e-4);
    }

    #[test]
    fn rotation_keeps_pivot_fixed() {
        let mut t = fitted();
        let pivot = Pos2::new(200.0, 200.0);
        let before = t.screen_to_image(pivot).expect("finite");
        t.apply_rotation(FRAC_PI_2, pivot).expect("rotate");
        let after = t.screen_to_image(pivot).expect("finite");
        assert!(approx(before, after));
        assert!((t.rotation() - FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn degenerate_updates_are_rejected_without_mutation() {
        let mut t = fitted();
        let snapshot = t.clone();

        assert_eq!(t.apply_pinch(0.0, Pos2::new(1.0, 1.0)), Err(TransformError::Singular));
        assert_eq!(t.apply_pinch(f32::NAN, Pos2::new(1.0, 1.0)), Err(TransformError::NonFinite));
        assert_eq!(
            t.apply_pinch(2.0, Pos2::new(f32::INFINITY, 0.0)),
            Err(TransformError::NonFinite)
        );
        assert_eq!(t.apply_rotation(f32::NAN, Pos2::ZERO), Err(TransformError::NonFinite));
        assert_eq!(t.apply_pan(Vec2::new(f32::NAN, 0.0)), Err(TransformError::NonFinite));
        assert_eq!(t, snapshot);
    }

    #[test]
    fn pinch_is_clamped_to_zoom_limits() {
        let mut t = fitted().with_zoom_limits(0.5, 4.0);
        t.apply_pinch(100.0, Pos2::new(200.0, 200.0)).expect("pinch");
        assert!((t.zoom_level() - 4.0).abs() < 1e-4);
        t.apply_pinch(0.001, Pos2::new(200.0, 200.0)).expect("pinch");
        assert!((t.zoom_level() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn mask_space_applies_mask_scale_and_device_scale() {
        let t = CoordinateTransform::new(Vec2::new(100.0, 100.0), Vec2::new(50.0, 50.0), 2.0, 2.0)
            .expect("valid");
        // 50pt viewport = 100px, image fills it at scale 1 px/px.
        assert!((t.current_scale() - 0.5).abs() < 1e-6);
        let m = t.screen_to_mask(Pos2::new(25.0, 10.0)).expect("finite");
        assert!(approx(m, Pos2::new(100.0, 40.0)));
        let s = t.mask_to_screen(m).expect("finite");
        assert!(approx(s, Pos2::new(25.0, 10.0)));
        assert!((t.brush_preview_size(10.0) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn reset_restores_fit() {
        let mut t = fitted();
        let fitted = t.clone();
        t.apply_rotation(1.0, Pos2::new(5.0, 5.0)).expect("rotate");
        t.apply_pan(Vec2::new(40.0, 0.0)).expect("pan");
        t.reset();
        assert_eq!(t, fitted);
    }

    #[test]
    fn invalid_construction_is_rejected() {
        assert!(CoordinateTransform::new(Vec2::ZERO, Vec2::new(10.0, 10.0), 1.0, 1.0).is_err());
        assert!(CoordinateTransform::new(Vec2::new(10.0, 10.0), Vec2::new(10.0, 10.0), 0.0, 1.0).is_err());
        assert!(CoordinateTransform::new(Vec2::new(10.0, 10.0), Vec2::new(10.0, 10.0), 1.0, f32::NAN).is_err());
    }
}
