/// A packed RGB frame, row-major, 3 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap a raw RGB buffer. Returns `None` if the length is not `width * height * 3`.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * 3 {
            return None;
        }
        Some(Self { width, height, data })
    }

    /// A frame filled with one color.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self { width, height, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Paint an axis-aligned rectangle, clipped to the frame.
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, rgb: [u8; 3]) {
        let x2 = x.saturating_add(w).min(self.width);
        let y2 = y.saturating_add(h).min(self.height);
        for py in y.min(self.height)..y2 {
            for px in x.min(self.width)..x2 {
                let i = (py as usize * self.width as usize + px as usize) * 3;
                self.data[i..i + 3].copy_from_slice(&rgb);
            }
        }
    }

    /// HSV value of one pixel.
    pub fn hsv(&self, x: u32, y: u32) -> Hsv {
        Hsv::from_rgb(self.pixel(x, y))
    }

    /// Convert to HSV, keeping only pixels where `within` is set.
    pub fn to_hsv(&self, within: &Mask) -> HsvImage {
        let mut pixels = Vec::with_capacity(self.width as usize * self.height as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push(within.get(x, y).then(|| self.hsv(x, y)));
            }
        }
        HsvImage { width: self.width, height: self.height, pixels }
    }
}

/// HSV conversion of a frame restricted to a mask. Masked-out pixels are `None`.
#[derive(Debug, Clone)]
pub struct HsvImage {
    width: u32,
    height: u32,
    pixels: Vec<Option<Hsv>>,
}

impl HsvImage {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> Option<Hsv> {
        self.pixels[y as usize * self.width as usize + x as usize]
    }
}

impl From<image::RgbImage> for Frame {
    fn from(img: image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self { width, height, data: img.into_raw() }
    }
}

/// 8-bit HSV in the OpenCV convention: hue 0..=179, saturation and value 0..=255.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv(pub [u8; 3]);

impl Hsv {
    pub fn from_rgb([r, g, b]: [u8; 3]) -> Self {
        let (r, g, b) = (r as f32, g as f32, b as f32);
        let v = r.max(g).max(b);
        let min = r.min(g).min(b);
        let diff = v - min;
        let s = if v > 0.0 { diff * 255.0 / v } else { 0.0 };
        let mut h = if diff == 0.0 {
            0.0
        } else if v == r {
            60.0 * (g - b) / diff
        } else if v == g {
            120.0 + 60.0 * (b - r) / diff
        } else {
            240.0 + 60.0 * (r - g) / diff
        };
        if h < 0.0 {
            h += 360.0;
        }
        let h = ((h / 2.0).round() as u16 % 180) as u8;
        Self([h, s.round() as u8, v as u8])
    }
}

/// Half-open rectangle `[x1, x2) x [y1, y2)` in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Roi {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// The ROI intersected with a `width x height` frame. May be empty.
    pub fn clamp(&self, width: u32, height: u32) -> Roi {
        let x2 = self.x2.min(width);
        let y2 = self.y2.min(height);
        Roi {
            x1: self.x1.min(x2),
            y1: self.y1.min(y2),
            x2,
            y2,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x1 >= self.x2 || self.y1 >= self.y2
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x1 && x < self.x2 && y >= self.y1 && y < self.y2
    }
}

/// Binary mask with the same dimensions as a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    /// Mask set exactly over `roi` (clamped to the frame).
    pub fn roi(width: u32, height: u32, roi: &Roi) -> Self {
        let mut mask = Self::empty(width, height);
        let r = roi.clamp(width, height);
        for y in r.y1..r.y2 {
            for x in r.x1..r.x2 {
                mask.set(x, y, true);
            }
        }
        mask
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.bits[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, on: bool) {
        self.bits[y as usize * self.width as usize + x as usize] = on;
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// Pixel-wise OR with a mask of the same size.
    pub fn union(&mut self, other: &Mask) {
        debug_assert_eq!((self.width, self.height), (other.width, other.height));
        for (a, b) in self.bits.iter_mut().zip(&other.bits) {
            *a |= *b;
        }
    }
}
