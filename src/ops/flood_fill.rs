// ============================================================================
// FLOOD FILL — 4-connected region fill on a class raster snapshot
// ============================================================================

use std::collections::VecDeque;

/// Replace the 4-connected region of the seed's value with `target`.
///
/// Returns the modified buffer and the number of pixels changed.  A seed
/// outside the raster, a buffer that does not match `width × height`, or a
/// seed already holding `target` leave the buffer untouched with a count of 0.
pub fn flood_fill(
    mut pixels: Vec<u8>,
    width: u32,
    height: u32,
    seed_x: u32,
    seed_y: u32,
    target: u8,
) -> (Vec<u8>, usize) {
    let w = width as usize;
    if seed_x >= width || seed_y >= height || pixels.len() != w * height as usize {
        return (pixels, 0);
    }
    let seed_idx = seed_y as usize * w + seed_x as usize;
    let source = pixels[seed_idx];
    if source == target {
        return (pixels, 0);
    }

    // Pixels are overwritten when queued, so a filled pixel never matches
    // `source` again and no visited set is needed.
    let mut queue = VecDeque::with_capacity(1024);
    pixels[seed_idx] = target;
    queue.push_back((seed_x, seed_y));
    let mut affected = 1usize;

    while let Some((px, py)) = queue.pop_front() {
        let neighbors = [
            (px.wrapping_sub(1), py),
            (px + 1, py),
            (px, py.wrapping_sub(1)),
            (px, py + 1),
        ];
        for (nx, ny) in neighbors {
            if nx >= width || ny >= height {
                continue;
            }
            let idx = ny as usize * w + nx as usize;
            if pixels[idx] == source {
                pixels[idx] = target;
                affected += 1;
                queue.push_back((nx, ny));
            }
        }
    }

    (pixels, affected)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 5×5 grid: a class-1 ring enclosing a background hole, background outside.
    fn ring() -> Vec<u8> {
        vec![
            0, 0, 0, 0, 0, //
            0, 1, 1, 1, 0, //
            0, 1, 0, 1, 0, //
            0, 1, 1, 1, 0, //
            0, 0, 0, 0, 0,
        ]
    }

    #[test]
    fn fills_only_the_connected_region() {
        let (out, affected) = flood_fill(ring(), 5, 5, 0, 0, 4);
        assert_eq!(affected, 16);
        assert_eq!(out[2 * 5 + 2], 0, "enclosed hole is not 4-connected to the seed");
        assert!(out.iter().filter(|&&v| v == 1).count() == 8);
    }

    #[test]
    fn diagonal_neighbours_are_not_connected() {
        let pixels = vec![
            2, 0, //
            0, 2,
        ];
        let (out, affected) = flood_fill(pixels, 2, 2, 0, 0, 5);
        assert_eq!(affected, 1);
        assert_eq!(out, vec![5, 0, 0, 2]);
    }

    #[test]
    fn second_identical_fill_is_a_no_op() {
        let (once, first) = flood_fill(ring(), 5, 5, 1, 1, 3);
        assert_eq!(first, 8);
        let (twice, second) = flood_fill(once.clone(), 5, 5, 1, 1, 3);
        assert_eq!(second, 0);
        assert_eq!(twice, once);
    }

    #[test]
    fn out_of_bounds_seed_changes_nothing() {
        let (out, affected) = flood_fill(ring(), 5, 5, 5, 0, 2);
        assert_eq!(affected, 0);
        assert_eq!(out, ring());
        let (_, affected) = flood_fill(vec![0; 3], 2, 2, 0, 0, 1);
        assert_eq!(affected, 0);
    }

    #[test]
    fn large_open_raster_fills_completely() {
        let (out, affected) = flood_fill(vec![0; 512 * 300], 512, 300, 511, 299, 8);
        assert_eq!(affected, 512 * 300);
        assert!(out.iter().all(|&v| v == 8));
    }
}
