// ============================================================================
// MASK OVERLAY — source image + class colours composed for display
// ============================================================================
//
// Output is RGBA8 at mask resolution.  Class 0 shows the adjusted image only;
// other classes blend their colour over it, using the edge alpha on pixels
// whose 4-neighbourhood contains a different class and the fill alpha
// elsewhere.

use rayon::prelude::*;

use crate::geometry::RasterRect;
use crate::io::SourceImage;

/// Background plus eight classes.
pub const CLASS_SLOTS: usize = 9;

#[derive(Clone, Debug, PartialEq)]
pub struct OverlayStyle {
    /// Index 0 is unused (background).
    pub class_colors: [[u8; 3]; CLASS_SLOTS],
    pub mask_fill_alpha: f32,
    pub mask_edge_alpha: f32,
    /// -1.0..=1.0, 0.0 = unchanged.
    pub image_brightness: f32,
    /// 0.0..=2.0, 1.0 = unchanged.
    pub image_contrast: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            class_colors: [
                [0, 0, 0],
                [255, 59, 48],
                [52, 199, 89],
                [0, 122, 255],
                [255, 204, 0],
                [175, 82, 222],
                [255, 149, 0],
                [90, 200, 250],
                [255, 45, 85],
            ],
            mask_fill_alpha: 0.45,
            mask_edge_alpha: 0.9,
            image_brightness: 0.0,
            image_contrast: 1.0,
        }
    }
}

impl OverlayStyle {
    pub fn class_color(&self, class: u8) -> [u8; 3] {
        self.class_colors
            .get(class as usize)
            .copied()
            .unwrap_or([255, 255, 255])
    }

    fn adjust(&self, channel: u8) -> f32 {
        let c = channel as f32 / 255.0;
        ((c - 0.5) * self.image_contrast.clamp(0.0, 2.0) + 0.5 + self.image_brightness.clamp(-1.0, 1.0)).clamp(0.0, 1.0)
    }
}

/// Compose `region` of the mask over the image.
///
/// `context` must contain `region` and holds the mask bytes used for edge
/// detection (normally `region` inflated by one pixel).  Neighbours outside
/// `context` count as the same class.
pub fn compose_region(
    style: &OverlayStyle,
    image: &SourceImage,
    mask_scale: f32,
    context: RasterRect,
    context_bytes: &[u8],
    region: RasterRect,
) -> Vec<u8> {
    let mut out = vec![0u8; region.area() * 4];
    if region.is_empty() || !context.contains_rect(&region) || context_bytes.len() != context.byte_len() {
        return out;
    }
    let cw = context.width as usize;
    let class_at = |x: u32, y: u32| context_bytes[(y - context.y) as usize * cw + (x - context.x) as usize];
    let inv_scale = if mask_scale > 0.0 { 1.0 / mask_scale } else { 1.0 };

    out.par_chunks_mut(region.width as usize * 4)
        .enumerate()
        .for_each(|(row, line)| {
            let my = region.y + row as u32;
            let iy = (((my as f32 + 0.5) * inv_scale) as u32).min(image.height.saturating_sub(1));
            for col in 0..region.width {
                let mx = region.x + col;
                let ix = (((mx as f32 + 0.5) * inv_scale) as u32).min(image.width.saturating_sub(1));
                let src = image.pixel(ix, iy);
                let mut rgb = [style.adjust(src[0]), style.adjust(src[1]), style.adjust(src[2])];

                let class = class_at(mx, my);
                if class != 0 {
                    let neighbours = [
                        (mx.wrapping_sub(1), my),
                        (mx + 1, my),
                        (mx, my.wrapping_sub(1)),
                        (mx, my + 1),
                    ];
                    let edge = neighbours.iter().any(|&(nx, ny)| {
                        context.contains_point(nx, ny) && class_at(nx, ny) != class
                    });
                    let alpha = if edge { style.mask_edge_alpha } else { style.mask_fill_alpha }.clamp(0.0, 1.0);
                    let color = style.class_color(class);
                    for (c, k) in rgb.iter_mut().zip(color) {
                        *c = *c * (1.0 - alpha) + (k as f32 / 255.0) * alpha;
                    }
                }

                let px = &mut line[col as usize * 4..col as usize * 4 + 4];
                px[0] = (rgb[0] * 255.0).round() as u8;
                px[1] = (rgb[1] * 255.0).round() as u8;
                px[2] = (rgb[2] * 255.0).round() as u8;
                px[3] = 255;
            }
        });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_image(w: u32, h: u32, v: u8) -> SourceImage {
        SourceImage {
            width: w,
            height: h,
            rgba: vec![v, v, v, 255].repeat((w * h) as usize),
        }
    }

    #[test]
    fn background_shows_the_image_unchanged() {
        let image = gray_image(2, 2, 100);
        let rect = RasterRect::full(4, 4);
        let out = compose_region(&OverlayStyle::default(), &image, 2.0, rect, &[0; 16], rect);
        assert_eq!(out.len(), 64);
        assert!(out.chunks_exact(4).all(|p| p == [100, 100, 100, 255]));
    }

    #[test]
    fn edges_use_edge_alpha_and_interiors_fill_alpha() {
        let style = OverlayStyle {
            mask_fill_alpha: 0.0,
            mask_edge_alpha: 1.0,
            ..OverlayStyle::default()
        };
        let image = gray_image(3, 3, 0);
        let mask = vec![
            1, 1, 1, //
            1, 1, 1, //
            1, 1, 0,
        ];
        let rect = RasterRect::full(3, 3);
        let out = compose_region(&style, &image, 1.0, rect, &mask, rect);
        let red = style.class_color(1);
        let pixel = |x: usize, y: usize| &out[(y * 3 + x) * 4..(y * 3 + x) * 4 + 3];
        // (0,0) touches only class 1 inside the context: interior, image shows.
        assert_eq!(pixel(0, 0), [0, 0, 0]);
        // (2,1) neighbours the background pixel at (2,2): edge colour.
        assert_eq!(pixel(2, 1), red);
        assert_eq!(pixel(2, 2), [0, 0, 0]);
    }

    #[test]
    fn contrast_and_brightness_adjust_the_image() {
        let style = OverlayStyle {
            image_brightness: 0.2,
            image_contrast: 0.0,
            ..OverlayStyle::default()
        };
        let image = gray_image(1, 1, 10);
        let rect = RasterRect::full(1, 1);
        let out = compose_region(&style, &image, 1.0, rect, &[0], rect);
        // Zero contrast flattens to mid-grey, then brightness lifts it.
        assert_eq!(out[0], (0.7f32 * 255.0).round() as u8);
    }

    #[test]
    fn mismatched_context_yields_blank_output() {
        let image = gray_image(1, 1, 10);
        let out = compose_region(
            &OverlayStyle::default(),
            &image,
            1.0,
            RasterRect::full(2, 2),
            &[0; 3],
            RasterRect::full(2, 2),
        );
        assert!(out.iter().all(|&b| b == 0));
    }
}
