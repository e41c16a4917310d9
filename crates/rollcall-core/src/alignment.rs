//! Five-point face alignment.
//!
//! Fits a least-squares similarity transform (scale, rotation, translation)
//! from detected landmarks onto canonical positions and warps the face into
//! a 112×112 RGB crop.

use image::{Rgb, RgbImage};

/// Side length of the aligned crop.
pub const ALIGNED_SIZE: u32 = 112;

/// Canonical landmark positions in a 112×112 crop.
const REFERENCE: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Similarity transform `dst = [a -b; b a] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit of `src` onto `dst`.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let (sx, sy) = src.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
        let (dx, dy) = dst.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
        let (msx, msy, mdx, mdy) = (sx / n, sy / n, dx / n, dy / n);

        let mut var = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for (s, d) in src.iter().zip(dst.iter()) {
            let (ux, uy) = (s.0 - msx, s.1 - msy);
            let (vx, vy) = (d.0 - mdx, d.1 - mdy);
            var += ux * ux + uy * uy;
            dot += ux * vx + uy * vy;
            cross += ux * vy - uy * vx;
        }
        if var < 1e-9 {
            return None;
        }

        let a = dot / var;
        let b = cross / var;
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    /// Map a crop-space point back to source-frame coordinates.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (px, py) = (x - self.tx, y - self.ty);
        Some((
            (self.a * px + self.b * py) / det,
            (-self.b * px + self.a * py) / det,
        ))
    }
}

/// Warp the face described by `landmarks` into an aligned 112×112 crop.
///
/// Pixels that fall outside the source frame are black. Degenerate
/// landmarks yield an all-black crop.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let mut out = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    let Some(transform) = Similarity::fit(landmarks, &REFERENCE) else {
        return out;
    };

    for (x, y, px) in out.enumerate_pixels_mut() {
        if let Some((sx, sy)) = transform.invert_point(x as f32, y as f32) {
            *px = sample_bilinear(frame, sx, sy);
        }
    }
    out
}

fn sample_bilinear(frame: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (frame.width() as f32, frame.height() as f32);
    if x < 0.0 || y < 0.0 || x > w - 1.0 || y > h - 1.0 {
        return Rgb([0, 0, 0]);
    }

    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let x1 = (x0 + 1).min(frame.width() - 1);
    let y1 = (y0 + 1).min(frame.height() - 1);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let tl = frame.get_pixel(x0, y0).0;
    let tr = frame.get_pixel(x1, y0).0;
    let bl = frame.get_pixel(x0, y1).0;
    let br = frame.get_pixel(x1, y1).0;

    Rgb(std::array::from_fn(|c| {
        let top = tl[c] as f32 * (1.0 - fx) + tr[c] as f32 * fx;
        let bottom = bl[c] as f32 * (1.0 - fx) + br[c] as f32 * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_identity() {
        let t = Similarity::fit(&REFERENCE, &REFERENCE).unwrap();
        assert!((t.a - 1.0).abs() < 1e-4);
        assert!(t.b.abs() < 1e-4);
        assert!(t.tx.abs() < 1e-3 && t.ty.abs() < 1e-3);
    }

    #[test]
    fn test_fit_recovers_scale_and_shift() {
        // Source landmarks are the reference at twice the size, shifted by (100, 50).
        let src = REFERENCE.map(|(x, y)| (x * 2.0 + 100.0, y * 2.0 + 50.0));
        let t = Similarity::fit(&src, &REFERENCE).unwrap();
        assert!((t.a - 0.5).abs() < 1e-4);
        assert!(t.b.abs() < 1e-4);
        let (x, y) = t.invert_point(REFERENCE[2].0, REFERENCE[2].1).unwrap();
        assert!((x - src[2].0).abs() < 1e-2 && (y - src[2].1).abs() < 1e-2);
    }

    #[test]
    fn test_fit_rotation() {
        // 90° rotation: (x, y) -> (-y, x).
        let src = REFERENCE.map(|(x, y)| (y, -x));
        let t = Similarity::fit(&src, &REFERENCE).unwrap();
        assert!(t.a.abs() < 1e-4);
        assert!((t.b - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_fit_degenerate() {
        let src = [(5.0, 5.0); 5];
        assert!(Similarity::fit(&src, &REFERENCE).is_none());
    }

    #[test]
    fn test_align_uniform_frame() {
        let frame = RgbImage::from_pixel(400, 300, Rgb([90, 120, 150]));
        let src = REFERENCE.map(|(x, y)| (x + 100.0, y + 80.0));
        let crop = align_face(&frame, &src);
        assert_eq!(crop.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert_eq!(*crop.get_pixel(56, 56), Rgb([90, 120, 150]));
    }

    #[test]
    fn test_align_out_of_frame_is_black() {
        let frame = RgbImage::from_pixel(20, 20, Rgb([255, 255, 255]));
        let src = REFERENCE.map(|(x, y)| (x + 500.0, y + 500.0));
        let crop = align_face(&frame, &src);
        assert!(crop.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }
}
