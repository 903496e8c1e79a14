//! Small hand-built networks shared by unit tests

use ndarray::{array, Array1, Array4};

use super::{Conv2d, Layer, Linear, NamedLayer, NativeNetwork};

/// conv(3→2, 3x3, pad 1) → relu → global pool → linear(2→3)
pub(crate) fn tiny_cnn() -> NativeNetwork {
    let conv_w = Array4::from_shape_fn((2, 3, 3, 3), |(o, i, y, x)| {
        ((o * 27 + i * 9 + y * 3 + x) % 5) as f32 * 0.1 - 0.2
    });
    let fc_w = array![[1.0f32, -0.5], [-0.3, 0.8], [0.2, 0.2]];
    NativeNetwork::new(vec![
        NamedLayer::new("features.0", Layer::Conv2d(Conv2d::new(conv_w, None, 1, 1).unwrap())),
        NamedLayer::new("features.1", Layer::Relu),
        NamedLayer::new("pool", Layer::GlobalAvgPool),
        NamedLayer::new(
            "classifier",
            Layer::Linear(Linear::new(fc_w, Some(Array1::from(vec![0.0, 0.1, -0.1]))).unwrap()),
        ),
    ])
}

/// flatten → linear, no convolution anywhere
pub(crate) fn dense_only(size: usize, classes: usize) -> NativeNetwork {
    let features = 3 * size * size;
    let weight = ndarray::Array2::from_shape_fn((classes, features), |(o, i)| {
        ((o * 31 + i * 7) % 13) as f32 * 0.01 - 0.06
    });
    NativeNetwork::new(vec![
        NamedLayer::new("flatten", Layer::Flatten),
        NamedLayer::new("fc", Layer::Linear(Linear::new(weight, None).unwrap())),
    ])
}

/// Deterministic 1×3×size×size input in roughly [-0.5, 0.7]
pub(crate) fn sample_input(size: usize) -> Array4<f32> {
    Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        ((c + y * 2 + x) % 7) as f32 * 0.2 - 0.5
    })
}
