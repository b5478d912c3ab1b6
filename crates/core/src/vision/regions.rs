use super::frame::Mask;

/// One connected region of a binary mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Pixel count.
    pub area: usize,
}

/// Connected regions (8-connectivity) of `mask`, in scan order of their top-left-most pixel.
pub fn find_regions(mask: &Mask) -> Vec<Region> {
    let (w, h) = (mask.width(), mask.height());
    let mut seen = Mask::empty(w, h);
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if !mask.get(x, y) || seen.get(x, y) {
                continue;
            }
            seen.set(x, y, true);
            stack.push((x, y));
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
            let mut area = 0usize;

            while let Some((cx, cy)) = stack.pop() {
                area += 1;
                min_x = min_x.min(cx);
                min_y = min_y.min(cy);
                max_x = max_x.max(cx);
                max_y = max_y.max(cy);

                for ny in cy.saturating_sub(1)..=(cy + 1).min(h - 1) {
                    for nx in cx.saturating_sub(1)..=(cx + 1).min(w - 1) {
                        if mask.get(nx, ny) && !seen.get(nx, ny) {
                            seen.set(nx, ny, true);
                            stack.push((nx, ny));
                        }
                    }
                }
            }

            regions.push(Region {
                x: min_x,
                y: min_y,
                width: max_x - min_x + 1,
                height: max_y - min_y + 1,
                area,
            });
        }
    }
    regions
}

/// First region whose area is strictly greater than `min_area`.
pub fn first_qualifying(mask: &Mask, min_area: usize) -> Option<Region> {
    find_regions(mask).into_iter().find(|r| r.area > min_area)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_with(w: u32, h: u32, on: &[(u32, u32)]) -> Mask {
        let mut m = Mask::empty(w, h);
        for &(x, y) in on {
            m.set(x, y, true);
        }
        m
    }

    #[test]
    fn empty_mask_has_no_regions() {
        assert!(find_regions(&Mask::empty(5, 5)).is_empty());
    }

    #[test]
    fn separate_blobs_are_separate_regions() {
        let m = mask_with(6, 3, &[(0, 0), (1, 0), (4, 2), (5, 2)]);
        let regions = find_regions(&m);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0], Region { x: 0, y: 0, width: 2, height: 1, area: 2 });
        assert_eq!(regions[1], Region { x: 4, y: 2, width: 2, height: 1, area: 2 });
    }

    #[test]
    fn diagonal_pixels_are_connected() {
        let m = mask_with(3, 3, &[(0, 0), (1, 1), (2, 2)]);
        let regions = find_regions(&m);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area, 3);
        assert_eq!((regions[0].width, regions[0].height), (3, 3));
    }

    #[test]
    fn area_filter_is_strict() {
        let m = Mask::roi(10, 10, &crate::vision::Roi::new(0, 0, 5, 5));
        assert!(first_qualifying(&m, 24).is_some());
        assert!(first_qualifying(&m, 25).is_none());
    }

    #[test]
    fn edge_pixels_do_not_overflow() {
        let m = mask_with(2, 2, &[(1, 1), (0, 1)]);
        assert_eq!(find_regions(&m).len(), 1);
    }
}
