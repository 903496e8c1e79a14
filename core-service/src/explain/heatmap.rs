//! Heatmap resampling and normalization

use ndarray::{Array2, ArrayView2};

use crate::error::ExplainError;

const NORM_EPS: f32 = 1e-8;

/// Bilinear resize with half-pixel centres (`align_corners = false`).
pub fn upsample_bilinear(src: ArrayView2<f32>, out_h: usize, out_w: usize) -> Array2<f32> {
    let (in_h, in_w) = src.dim();
    if in_h == 0 || in_w == 0 {
        return Array2::zeros((out_h, out_w));
    }

    let axis = |out: usize, len_in: usize, len_out: usize| {
        let scale = len_in as f32 / len_out as f32;
        let pos = ((out as f32 + 0.5) * scale - 0.5).max(0.0);
        let i0 = (pos.floor() as usize).min(len_in - 1);
        let i1 = (i0 + 1).min(len_in - 1);
        (i0, i1, pos - i0 as f32)
    };

    let rows: Vec<_> = (0..out_h).map(|y| axis(y, in_h, out_h)).collect();
    let cols: Vec<_> = (0..out_w).map(|x| axis(x, in_w, out_w)).collect();

    Array2::from_shape_fn((out_h, out_w), |(y, x)| {
        let (y0, y1, ly) = rows[y];
        let (x0, x1, lx) = cols[x];
        let top = src[[y0, x0]] * (1.0 - lx) + src[[y0, x1]] * lx;
        let bottom = src[[y1, x0]] * (1.0 - lx) + src[[y1, x1]] * lx;
        top * (1.0 - ly) + bottom * ly
    })
}

/// `(x - min) / (max - min + 1e-8)`, clamped to `[0, 1]`.
pub fn min_max_normalize(map: Array2<f32>) -> Result<Array2<f32>, ExplainError> {
    if map.iter().any(|v| !v.is_finite()) {
        return Err(ExplainError::NonFinite);
    }
    let min = map.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = map.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min + NORM_EPS;
    Ok(map.mapv(|v| ((v - min) / range).clamp(0.0, 1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_upsample_preserves_constant() {
        let src = Array2::from_elem((3, 3), 0.25f32);
        let out = upsample_bilinear(src.view(), 7, 5);
        assert_eq!(out.dim(), (7, 5));
        assert!(out.iter().all(|v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_upsample_half_pixel_centres() {
        let src = array![[0.0f32, 1.0]];
        let out = upsample_bilinear(src.view(), 1, 4);
        // Output x = 0..4 map to source positions -0.25 (clamped), 0.25, 0.75, 1.25
        assert_eq!(out.row(0).to_vec(), vec![0.0, 0.25, 0.75, 1.0]);
    }

    #[test]
    fn test_normalize_range() {
        let map = array![[2.0f32, 4.0], [6.0, 10.0]];
        let out = min_max_normalize(map).unwrap();
        assert_eq!(out[[0, 0]], 0.0);
        assert!((out[[1, 1]] - 1.0).abs() < 1e-6);
        assert!((out[[0, 1]] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_flat_map_is_zero() {
        let out = min_max_normalize(Array2::from_elem((2, 2), 3.0f32)).unwrap();
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_normalize_rejects_nan() {
        let map = array![[0.0f32, f32::NAN]];
        assert!(matches!(min_max_normalize(map), Err(ExplainError::NonFinite)));
    }
}
