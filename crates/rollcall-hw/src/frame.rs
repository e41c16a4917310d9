//! Frame type and pixel handling: YUYV conversion, JPEG in and out.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};

/// A captured RGB8 camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Wrap an RGB buffer, checking its length.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = (width * height * 3) as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    pub fn into_image(self) -> Result<RgbImage, FrameError> {
        let expected = (self.width * self.height * 3) as usize;
        let actual = self.data.len();
        RgbImage::from_raw(self.width, self.height, self.data)
            .ok_or(FrameError::InvalidLength { expected, actual })
    }
}

/// Convert packed YUYV (4:2:2) to RGB8 using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (u, v) = (chunk[1] as f32 - 128.0, chunk[3] as f32 - 128.0);
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_u8(y + 1.402 * v));
            rgb.push(clamp_u8(y - 0.344_136 * u - 0.714_136 * v));
            rgb.push(clamp_u8(y + 1.772 * u));
        }
    }
    Ok(rgb)
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Decode a Motion-JPEG buffer into RGB8.
pub fn mjpeg_to_rgb(buf: &[u8]) -> Result<RgbImage, FrameError> {
    let img = image::load_from_memory_with_format(buf, ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?;
    Ok(img.to_rgb8())
}

/// Encode an RGB image as baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| FrameError::Encode(e.to_string()))?;
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("JPEG decode failed: {0}")]
    Decode(String),
    #[error("JPEG encode failed: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_yuyv_gray_pixels() {
        // Neutral chroma: RGB equals luma.
        let yuyv = vec![100, 128, 200, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_red_dominant() {
        // High V pushes red up and green down.
        let yuyv = vec![128, 128, 128, 255];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb[0], 255);
        assert!(rgb[1] < 128);
        assert_eq!(rgb[2], 128);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(matches!(
            yuyv_to_rgb(&[1, 2], 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_from_rgb_checks_length() {
        assert!(Frame::from_rgb(vec![0; 12], 2, 2, 0).is_ok());
        assert!(Frame::from_rgb(vec![0; 11], 2, 2, 0).is_err());
    }

    #[test]
    fn test_jpeg_encode_decode() {
        let img = RgbImage::from_pixel(16, 8, Rgb([200, 30, 30]));
        let jpeg = encode_jpeg(&img, 90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let back = mjpeg_to_rgb(&jpeg).unwrap();
        assert_eq!(back.dimensions(), (16, 8));
        let px = back.get_pixel(4, 4);
        assert!(px.0[0] > 150 && px.0[1] < 80);
    }

    #[test]
    fn test_mjpeg_garbage_rejected() {
        assert!(matches!(mjpeg_to_rgb(&[0, 1, 2, 3]), Err(FrameError::Decode(_))));
    }
}
