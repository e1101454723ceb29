// ============================================================================
// RASTER RECT — integer bounding boxes in mask raster space
// ============================================================================

/// An axis-aligned rectangle of raster pixels: `x..x+width`, `y..y+height`.
///
/// Used for stroke bounding boxes, undo patches and dirty tracking. A rect
/// with zero width or height covers nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RasterRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl RasterRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// The whole raster.
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Build from signed, exclusive bounds, clipping to `0..raster_w` × `0..raster_h`.
    pub fn from_bounds_clamped(
        min_x: i64,
        min_y: i64,
        max_x: i64,
        max_y: i64,
        raster_w: u32,
        raster_h: u32,
    ) -> Self {
        let x0 = min_x.clamp(0, raster_w as i64);
        let y0 = min_y.clamp(0, raster_h as i64);
        let x1 = max_x.clamp(0, raster_w as i64);
        let y1 = max_y.clamp(0, raster_h as i64);
        if x1 <= x0 || y1 <= y0 {
            return Self::new(x0 as u32, y0 as u32, 0, 0);
        }
        Self::new(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32)
    }

    /// Every pixel a circular stamp at `(cx, cy)` with radius `r` can touch.
    pub fn around_circle(cx: f32, cy: f32, r: f32, raster_w: u32, raster_h: u32) -> Self {
        if !(cx.is_finite() && cy.is_finite() && r.is_finite()) || r < 0.0 {
            return Self::default();
        }
        Self::from_bounds_clamped(
            (cx - r).floor() as i64,
            (cy - r).floor() as i64,
            (cx + r).ceil() as i64 + 1,
            (cy + r).ceil() as i64 + 1,
            raster_w,
            raster_h,
        )
    }

    /// A square of side `2 * half_extent` centred on `(cx, cy)`, clipped.
    pub fn around_point(cx: f32, cy: f32, half_extent: u32, raster_w: u32, raster_h: u32) -> Self {
        if !(cx.is_finite() && cy.is_finite()) {
            return Self::default();
        }
        let h = half_extent as i64;
        let (cx, cy) = (cx.round() as i64, cy.round() as i64);
        Self::from_bounds_clamped(cx - h, cy - h, cx + h, cy + h, raster_w, raster_h)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes needed to snapshot this rect of a one-byte-per-pixel raster.
    pub fn byte_len(&self) -> usize {
        self.area()
    }

    pub fn contains_rect(&self, other: &RasterRect) -> bool {
        if other.is_empty() {
            return true;
        }
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    /// Smallest rect covering both. Empty rects are ignored.
    pub fn union(&self, other: &RasterRect) -> RasterRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        RasterRect::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn intersect(&self, other: &RasterRect) -> RasterRect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return RasterRect::default();
        }
        RasterRect::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Grow by `margin` on every side, clipped to the raster.
    pub fn inflate(&self, margin: u32, raster_w: u32, raster_h: u32) -> RasterRect {
        if self.is_empty() {
            return *self;
        }
        let m = margin as i64;
        Self::from_bounds_clamped(
            self.x as i64 - m,
            self.y as i64 - m,
            self.right() as i64 + m,
            self.bottom() as i64 + m,
            raster_w,
            raster_h,
        )
    }

    /// True when the rect lies entirely inside a `raster_w` × `raster_h` raster.
    pub fn fits_within(&self, raster_w: u32, raster_h: u32) -> bool {
        self.right() <= raster_w && self.bottom() <= raster_h
    }
}

/// Copy the `sub` rows of a snapshot taken over `outer` into a new buffer.
///
/// `sub` must lie inside `outer`; both buffers are one byte per pixel, row-major.
pub fn crop_bytes(outer: RasterRect, bytes: &[u8], sub: RasterRect) -> Vec<u8> {
    if sub.is_empty() {
        return Vec::new();
    }
    debug_assert!(outer.contains_rect(&sub));
    let mut out = Vec::with_capacity(sub.byte_len());
    let ox = (sub.x - outer.x) as usize;
    for row in 0..sub.height as usize {
        let start = (sub.y - outer.y) as usize * outer.width as usize
            + row * outer.width as usize
            + ox;
        out.extend_from_slice(&bytes[start..start + sub.width as usize]);
    }
    out
}

/// Write the rows of a `sub` snapshot into a buffer covering `outer`.
pub fn blit_bytes(outer: RasterRect, dst: &mut [u8], sub: RasterRect, src: &[u8]) {
    if sub.is_empty() {
        return;
    }
    debug_assert!(outer.contains_rect(&sub));
    let ox = (sub.x - outer.x) as usize;
    let w = sub.width as usize;
    for row in 0..sub.height as usize {
        let dst_start = ((sub.y - outer.y) as usize + row) * outer.width as usize + ox;
        let src_start = row * w;
        dst[dst_start..dst_start + w].copy_from_slice(&src[src_start..src_start + w]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_ignores_empty_rects() {
        let a = RasterRect::new(10, 10, 5, 5);
        assert_eq!(a.union(&RasterRect::default()), a);
        assert_eq!(RasterRect::default().union(&a), a);

        let b = RasterRect::new(20, 0, 2, 2);
        assert_eq!(a.union(&b), RasterRect::new(10, 0, 12, 15));
    }

    #[test]
    fn circle_bounds_are_clipped_to_raster() {
        let r = RasterRect::around_circle(2.0, 2.0, 5.0, 100, 100);
        assert_eq!(r, RasterRect::new(0, 0, 8, 8));

        let r = RasterRect::around_circle(50.0, 50.0, 10.0, 100, 100);
        assert_eq!(r, RasterRect::new(40, 40, 21, 21));

        let r = RasterRect::around_circle(f32::NAN, 50.0, 10.0, 100, 100);
        assert!(r.is_empty());
    }

    #[test]
    fn contains_and_intersect() {
        let outer = RasterRect::new(0, 0, 10, 10);
        assert!(outer.contains_rect(&RasterRect::new(2, 2, 8, 8)));
        assert!(!outer.contains_rect(&RasterRect::new(2, 2, 9, 8)));
        assert_eq!(
            outer.intersect(&RasterRect::new(5, 5, 10, 10)),
            RasterRect::new(5, 5, 5, 5)
        );
        assert!(outer.intersect(&RasterRect::new(20, 20, 1, 1)).is_empty());
    }

    #[test]
    fn crop_and_blit_are_row_aligned() {
        let outer = RasterRect::new(10, 10, 4, 3);
        let bytes: Vec<u8> = (0..12).collect();
        let sub = RasterRect::new(11, 11, 2, 2);
        let cropped = crop_bytes(outer, &bytes, sub);
        assert_eq!(cropped, vec![5, 6, 9, 10]);

        let mut dst = vec![0u8; 12];
        blit_bytes(outer, &mut dst, sub, &cropped);
        assert_eq!(dst, vec![0, 0, 0, 0, 0, 5, 6, 0, 0, 9, 10, 0]);
    }
}
