//! Imaging Module - preprocessing and heatmap overlays
//!
//! Upload bytes → RGB → bilinear resize → `[0, 1]` → ImageNet normalization
//! → `NCHW` tensor. Heatmaps are colored with the jet map and blended over
//! the uploaded image for display.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array4, ArrayView2};

use crate::error::ImagingError;
use crate::explain::upsample_bilinear;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Heatmap weight in the blended overlay
pub const OVERLAY_ALPHA: f32 = 0.35;
/// Longest side of a rendered overlay
pub const OVERLAY_MAX_SIDE: u32 = 512;

const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// A decoded upload and its model input
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub original: RgbImage,
    pub tensor: Array4<f32>,
}

pub fn decode(bytes: &[u8]) -> Result<RgbImage, ImagingError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(ImagingError::Decode)
}

/// Resize to `size`×`size` and normalize into a `[1, 3, size, size]` tensor.
pub fn to_tensor(image: &RgbImage, size: u32) -> Array4<f32> {
    let resized = imageops::resize(image, size, size, FilterType::Triangle);
    let side = size as usize;
    Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
        let v = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
        (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
    })
}

pub fn prepare(bytes: &[u8], size: u32) -> Result<PreparedImage, ImagingError> {
    let original = decode(bytes)?;
    let tensor = to_tensor(&original, size);
    Ok(PreparedImage { original, tensor })
}

/// Jet colormap for `v` in `[0, 1]` (blue → cyan → yellow → red).
pub fn jet(v: f32) -> [u8; 3] {
    let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    let channel = |centre: f32| ((1.5 - (4.0 * v - centre).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Blend a jet-colored heatmap over `original`, capped at [`OVERLAY_MAX_SIDE`].
pub fn render_overlay(original: &RgbImage, heatmap: ArrayView2<f32>) -> Result<RgbImage, ImagingError> {
    if heatmap.is_empty() || original.width() == 0 || original.height() == 0 {
        return Err(ImagingError::EmptyHeatmap);
    }

    let (w, h) = original.dimensions();
    let longest = w.max(h);
    let base = if longest > OVERLAY_MAX_SIDE {
        let scale = OVERLAY_MAX_SIDE as f32 / longest as f32;
        let nw = ((w as f32 * scale).round() as u32).max(1);
        let nh = ((h as f32 * scale).round() as u32).max(1);
        imageops::resize(original, nw, nh, FilterType::Triangle)
    } else {
        original.clone()
    };

    let (w, h) = base.dimensions();
    let resized = upsample_bilinear(heatmap, h as usize, w as usize);

    Ok(RgbImage::from_fn(w, h, |x, y| {
        let src = base.get_pixel(x, y);
        let color = jet(resized[[y as usize, x as usize]]);
        let mut out = [0u8; 3];
        for c in 0..3 {
            let blended = (1.0 - OVERLAY_ALPHA) * src[c] as f32 + OVERLAY_ALPHA * color[c] as f32;
            out[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    }))
}

/// PNG-encode and wrap as a `data:image/png;base64,` URI.
pub fn encode_png_data_uri(image: &RgbImage) -> Result<String, ImagingError> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(ImagingError::Encode)?;
    Ok(format!("{}{}", PNG_DATA_URI_PREFIX, STANDARD.encode(&buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn png_bytes(w: u32, h: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, Rgb(color));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_prepare_normalizes_to_nchw() {
        let prepared = prepare(&png_bytes(10, 6, [255, 0, 128]), 8).unwrap();

        assert_eq!(prepared.tensor.dim(), (1, 3, 8, 8));
        assert_eq!(prepared.original.dimensions(), (10, 6));
        let red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let green = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!((prepared.tensor[[0, 0, 3, 3]] - red).abs() < 1e-5);
        assert!((prepared.tensor[[0, 1, 0, 7]] - green).abs() < 1e-5);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b"definitely not an image"), Err(ImagingError::Decode(_))));
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0.0), [0, 0, 128]);
        assert_eq!(jet(0.5), [128, 255, 128]);
        assert_eq!(jet(1.0), [128, 0, 0]);
        assert_eq!(jet(f32::NAN), jet(0.0));
    }

    #[test]
    fn test_overlay_caps_longest_side() {
        let original = RgbImage::from_pixel(1024, 256, Rgb([10, 20, 30]));
        let heatmap = Array2::from_elem((4, 4), 0.5f32);
        let overlay = render_overlay(&original, heatmap.view()).unwrap();
        assert_eq!(overlay.dimensions(), (512, 128));
    }

    #[test]
    fn test_overlay_blends_with_alpha() {
        let original = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        let heatmap = Array2::from_elem((2, 2), 1.0f32);
        let overlay = render_overlay(&original, heatmap.view()).unwrap();

        let expected = (OVERLAY_ALPHA * 128.0).round() as u8;
        assert_eq!(overlay.get_pixel(0, 0).0, [expected, 0, 0]);
    }

    #[test]
    fn test_overlay_rejects_empty_heatmap() {
        let original = RgbImage::new(4, 4);
        let empty = Array2::<f32>::zeros((0, 0));
        assert!(matches!(
            render_overlay(&original, empty.view()),
            Err(ImagingError::EmptyHeatmap)
        ));
    }

    #[test]
    fn test_data_uri() {
        let uri = encode_png_data_uri(&RgbImage::new(2, 2)).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
        let payload = STANDARD.decode(&uri[PNG_DATA_URI_PREFIX.len()..]).unwrap();
        assert_eq!(&payload[1..4], b"PNG");
    }
}
