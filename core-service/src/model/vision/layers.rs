//! Network layers with forward and input-gradient passes
//!
//! Tensors are `ArrayD<f32>`: `[N, C, H, W]` for spatial layers, `[N, F]`
//! after flattening or pooling. Backward passes return the gradient w.r.t. the
//! layer input only; parameters are frozen.

use ndarray::{s, Array1, Array2, Array4, ArrayD, ArrayView3, Axis, Ix2, Ix4, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Serialized layer description inside a native network artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Conv2d {
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        #[serde(default = "default_stride")]
        stride: usize,
        #[serde(default)]
        padding: usize,
        /// Row-major `[out, in, k, k]`
        weight: Vec<f32>,
        #[serde(default)]
        bias: Vec<f32>,
    },
    /// Eval-mode batch norm folded into a per-channel affine transform
    BatchNorm2d { scale: Vec<f32>, shift: Vec<f32> },
    Relu,
    MaxPool2d {
        kernel_size: usize,
        #[serde(default)]
        stride: Option<usize>,
    },
    GlobalAvgPool,
    Flatten,
    Linear {
        in_features: usize,
        out_features: usize,
        /// Row-major `[out, in]`
        weight: Vec<f32>,
        #[serde(default)]
        bias: Vec<f32>,
    },
}

fn default_stride() -> usize {
    1
}

/// 2-D convolution, square kernel
#[derive(Debug, Clone)]
pub struct Conv2d {
    /// `[out, in * k * k]`
    kernel: Array2<f32>,
    bias: Array1<f32>,
    in_channels: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
}

/// Per-channel `x * scale + shift`
#[derive(Debug, Clone)]
pub struct ChannelAffine {
    scale: Array1<f32>,
    shift: Array1<f32>,
}

/// Fully connected layer
#[derive(Debug, Clone)]
pub struct Linear {
    /// `[out, in]`
    weight: Array2<f32>,
    bias: Array1<f32>,
}

#[derive(Debug, Clone)]
pub enum Layer {
    Conv2d(Conv2d),
    BatchNorm2d(ChannelAffine),
    Relu,
    MaxPool2d { kernel: usize, stride: usize },
    GlobalAvgPool,
    Flatten,
    Linear(Linear),
}

impl Conv2d {
    pub fn new(
        weight: Array4<f32>,
        bias: Option<Array1<f32>>,
        stride: usize,
        padding: usize,
    ) -> Result<Self, ModelError> {
        let (out, inp, kh, kw) = weight.dim();
        if kh != kw || kh == 0 {
            return Err(ModelError::shape(format!("conv kernel must be square, got {}x{}", kh, kw)));
        }
        if stride == 0 {
            return Err(ModelError::shape("conv stride must be positive"));
        }
        let bias = bias.unwrap_or_else(|| Array1::zeros(out));
        if bias.len() != out {
            return Err(ModelError::shape(format!("conv bias has {} values for {} filters", bias.len(), out)));
        }
        let kernel = weight
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((out, inp * kh * kw))
            .map_err(|e| ModelError::shape(e.to_string()))?;

        Ok(Self {
            kernel,
            bias,
            in_channels: inp,
            kernel_size: kh,
            stride,
            padding,
        })
    }

    fn output_size(&self, h: usize, w: usize) -> Result<(usize, usize), ModelError> {
        let k = self.kernel_size;
        let (ph, pw) = (h + 2 * self.padding, w + 2 * self.padding);
        if ph < k || pw < k {
            return Err(ModelError::shape(format!("input {}x{} smaller than kernel {}", h, w, k)));
        }
        Ok(((ph - k) / self.stride + 1, (pw - k) / self.stride + 1))
    }

    /// Source pixel for an output position and kernel offset, if inside the input.
    fn source(&self, out: usize, offset: usize, extent: usize) -> Option<usize> {
        let pos = (out * self.stride + offset) as isize - self.padding as isize;
        if pos < 0 || pos as usize >= extent {
            None
        } else {
            Some(pos as usize)
        }
    }

    fn im2col(&self, x: ArrayView3<f32>, oh: usize, ow: usize) -> Array2<f32> {
        let (c, h, w) = x.dim();
        let k = self.kernel_size;
        let mut cols = Array2::zeros((c * k * k, oh * ow));
        for ch in 0..c {
            for ky in 0..k {
                for kx in 0..k {
                    let row = (ch * k + ky) * k + kx;
                    for oy in 0..oh {
                        let Some(iy) = self.source(oy, ky, h) else { continue };
                        for ox in 0..ow {
                            if let Some(ix) = self.source(ox, kx, w) {
                                cols[[row, oy * ow + ox]] = x[[ch, iy, ix]];
                            }
                        }
                    }
                }
            }
        }
        cols
    }

    fn forward(&self, x: &Array4<f32>) -> Result<Array4<f32>, ModelError> {
        let (n, c, h, w) = x.dim();
        if c != self.in_channels {
            return Err(ModelError::shape(format!("conv expects {} channels, got {}", self.in_channels, c)));
        }
        let (oh, ow) = self.output_size(h, w)?;
        let out_channels = self.kernel.nrows();

        let mut out = Array4::zeros((n, out_channels, oh, ow));
        for b in 0..n {
            let cols = self.im2col(x.index_axis(Axis(0), b), oh, ow);
            let y = self
                .kernel
                .dot(&cols)
                .into_shape_with_order((out_channels, oh, ow))
                .map_err(|e| ModelError::shape(e.to_string()))?;
            let mut dst = out.index_axis_mut(Axis(0), b);
            dst.assign(&y);
            for (o, bias) in self.bias.iter().enumerate() {
                dst.index_axis_mut(Axis(0), o).mapv_inplace(|v| v + bias);
            }
        }
        Ok(out)
    }

    fn backward(&self, x: &Array4<f32>, grad: &Array4<f32>) -> Result<Array4<f32>, ModelError> {
        let (n, c, h, w) = x.dim();
        let (oh, ow) = self.output_size(h, w)?;
        let out_channels = self.kernel.nrows();
        if grad.dim() != (n, out_channels, oh, ow) {
            return Err(ModelError::shape("conv gradient does not match output"));
        }
        let k = self.kernel_size;

        let mut grad_in = Array4::zeros((n, c, h, w));
        for b in 0..n {
            let g = grad
                .index_axis(Axis(0), b)
                .to_owned()
                .into_shape_with_order((out_channels, oh * ow))
                .map_err(|e| ModelError::shape(e.to_string()))?;
            let cols = self.kernel.t().dot(&g);

            // col2im
            for ch in 0..c {
                for ky in 0..k {
                    for kx in 0..k {
                        let row = (ch * k + ky) * k + kx;
                        for oy in 0..oh {
                            let Some(iy) = self.source(oy, ky, h) else { continue };
                            for ox in 0..ow {
                                if let Some(ix) = self.source(ox, kx, w) {
                                    grad_in[[b, ch, iy, ix]] += cols[[row, oy * ow + ox]];
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(grad_in)
    }
}

impl ChannelAffine {
    pub fn new(scale: Array1<f32>, shift: Array1<f32>) -> Result<Self, ModelError> {
        if scale.len() != shift.len() {
            return Err(ModelError::shape("batch norm scale and shift differ in length"));
        }
        Ok(Self { scale, shift })
    }

    fn check(&self, channels: usize) -> Result<(), ModelError> {
        if channels != self.scale.len() {
            return Err(ModelError::shape(format!(
                "batch norm has {} channels, input has {}",
                self.scale.len(),
                channels
            )));
        }
        Ok(())
    }

    fn forward(&self, x: &Array4<f32>) -> Result<Array4<f32>, ModelError> {
        self.check(x.dim().1)?;
        let mut y = x.clone();
        for (c, mut plane) in y.axis_iter_mut(Axis(1)).enumerate() {
            let (a, b) = (self.scale[c], self.shift[c]);
            plane.mapv_inplace(|v| v * a + b);
        }
        Ok(y)
    }

    fn backward(&self, grad: &Array4<f32>) -> Result<Array4<f32>, ModelError> {
        self.check(grad.dim().1)?;
        let mut g = grad.clone();
        for (c, mut plane) in g.axis_iter_mut(Axis(1)).enumerate() {
            let a = self.scale[c];
            plane.mapv_inplace(|v| v * a);
        }
        Ok(g)
    }
}

impl Linear {
    pub fn new(weight: Array2<f32>, bias: Option<Array1<f32>>) -> Result<Self, ModelError> {
        let out = weight.nrows();
        let bias = bias.unwrap_or_else(|| Array1::zeros(out));
        if bias.len() != out {
            return Err(ModelError::shape(format!("linear bias has {} values for {} outputs", bias.len(), out)));
        }
        Ok(Self { weight, bias })
    }

    fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>, ModelError> {
        if x.ncols() != self.weight.ncols() {
            return Err(ModelError::shape(format!(
                "linear expects {} features, got {}",
                self.weight.ncols(),
                x.ncols()
            )));
        }
        Ok(x.dot(&self.weight.t()) + &self.bias)
    }

    fn backward(&self, grad: &Array2<f32>) -> Result<Array2<f32>, ModelError> {
        if grad.ncols() != self.weight.nrows() {
            return Err(ModelError::shape("linear gradient does not match output"));
        }
        Ok(grad.dot(&self.weight))
    }
}

impl Layer {
    /// Build a runtime layer from its serialized form
    pub fn from_spec(spec: LayerSpec) -> Result<Self, ModelError> {
        match spec {
            LayerSpec::Conv2d {
                in_channels,
                out_channels,
                kernel_size,
                stride,
                padding,
                weight,
                bias,
            } => {
                let weight = Array4::from_shape_vec(
                    (out_channels, in_channels, kernel_size, kernel_size),
                    weight,
                )
                .map_err(|e| ModelError::shape(format!("conv weight: {}", e)))?;
                let bias = (!bias.is_empty()).then(|| Array1::from(bias));
                Ok(Layer::Conv2d(Conv2d::new(weight, bias, stride, padding)?))
            }
            LayerSpec::BatchNorm2d { scale, shift } => Ok(Layer::BatchNorm2d(ChannelAffine::new(
                Array1::from(scale),
                Array1::from(shift),
            )?)),
            LayerSpec::Relu => Ok(Layer::Relu),
            LayerSpec::MaxPool2d { kernel_size, stride } => {
                let stride = stride.unwrap_or(kernel_size);
                if kernel_size == 0 || stride == 0 {
                    return Err(ModelError::shape("max pool kernel and stride must be positive"));
                }
                Ok(Layer::MaxPool2d {
                    kernel: kernel_size,
                    stride,
                })
            }
            LayerSpec::GlobalAvgPool => Ok(Layer::GlobalAvgPool),
            LayerSpec::Flatten => Ok(Layer::Flatten),
            LayerSpec::Linear {
                in_features,
                out_features,
                weight,
                bias,
            } => {
                let weight = Array2::from_shape_vec((out_features, in_features), weight)
                    .map_err(|e| ModelError::shape(format!("linear weight: {}", e)))?;
                let bias = (!bias.is_empty()).then(|| Array1::from(bias));
                Ok(Layer::Linear(Linear::new(weight, bias)?))
            }
        }
    }

    pub fn is_conv(&self) -> bool {
        matches!(self, Layer::Conv2d(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Conv2d(_) => "conv2d",
            Layer::BatchNorm2d(_) => "batch_norm2d",
            Layer::Relu => "relu",
            Layer::MaxPool2d { .. } => "max_pool2d",
            Layer::GlobalAvgPool => "global_avg_pool",
            Layer::Flatten => "flatten",
            Layer::Linear(_) => "linear",
        }
    }

    pub fn forward(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        match self {
            Layer::Conv2d(conv) => Ok(conv.forward(&as4(x)?)?.into_dyn()),
            Layer::BatchNorm2d(bn) => Ok(bn.forward(&as4(x)?)?.into_dyn()),
            Layer::Relu => Ok(x.mapv(|v| v.max(0.0))),
            Layer::MaxPool2d { kernel, stride } => {
                Ok(max_pool_forward(&as4(x)?, *kernel, *stride)?.into_dyn())
            }
            Layer::GlobalAvgPool => {
                let x = as4(x)?;
                let (n, c, h, w) = x.dim();
                let area = (h * w).max(1) as f32;
                let pooled = x
                    .into_shape_with_order((n, c, h * w))
                    .map_err(|e| ModelError::shape(e.to_string()))?
                    .sum_axis(Axis(2))
                    / area;
                Ok(pooled.into_dyn())
            }
            Layer::Flatten => {
                let n = x.shape().first().copied().unwrap_or(0);
                let rest = if n == 0 { 0 } else { x.len() / n };
                reshape(x, &[n, rest])
            }
            Layer::Linear(linear) => Ok(linear.forward(&as2(x)?)?.into_dyn()),
        }
    }

    /// Gradient w.r.t. the layer input, given the input `x` and the gradient
    /// w.r.t. the layer output.
    pub fn backward(&self, x: &ArrayD<f32>, grad: &ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        match self {
            Layer::Conv2d(conv) => Ok(conv.backward(&as4(x)?, &as4(grad)?)?.into_dyn()),
            Layer::BatchNorm2d(bn) => Ok(bn.backward(&as4(grad)?)?.into_dyn()),
            Layer::Relu => {
                if x.shape() != grad.shape() {
                    return Err(ModelError::shape("relu gradient does not match input"));
                }
                let mut g = grad.clone();
                g.zip_mut_with(x, |g, &v| {
                    if v <= 0.0 {
                        *g = 0.0;
                    }
                });
                Ok(g)
            }
            Layer::MaxPool2d { kernel, stride } => {
                Ok(max_pool_backward(&as4(x)?, &as4(grad)?, *kernel, *stride)?.into_dyn())
            }
            Layer::GlobalAvgPool => {
                let x = as4(x)?;
                let g = as2(grad)?;
                let (n, c, h, w) = x.dim();
                if g.dim() != (n, c) {
                    return Err(ModelError::shape("pool gradient does not match output"));
                }
                let area = (h * w).max(1) as f32;
                let mut grad_in = Array4::zeros((n, c, h, w));
                for b in 0..n {
                    for ch in 0..c {
                        grad_in.slice_mut(s![b, ch, .., ..]).fill(g[[b, ch]] / area);
                    }
                }
                Ok(grad_in.into_dyn())
            }
            Layer::Flatten => reshape(grad, x.shape()),
            Layer::Linear(linear) => Ok(linear.backward(&as2(grad)?)?.into_dyn()),
        }
    }
}

fn pool_size(h: usize, w: usize, kernel: usize, stride: usize) -> Result<(usize, usize), ModelError> {
    if h < kernel || w < kernel {
        return Err(ModelError::shape(format!("input {}x{} smaller than pool {}", h, w, kernel)));
    }
    Ok(((h - kernel) / stride + 1, (w - kernel) / stride + 1))
}

/// Position of the maximum inside one pooling window (first one on ties)
fn window_argmax(x: &Array4<f32>, b: usize, c: usize, y0: usize, x0: usize, kernel: usize) -> (usize, usize) {
    let mut best = (y0, x0);
    let mut best_v = f32::NEG_INFINITY;
    for y in y0..y0 + kernel {
        for xx in x0..x0 + kernel {
            let v = x[[b, c, y, xx]];
            if v > best_v {
                best_v = v;
                best = (y, xx);
            }
        }
    }
    best
}

fn max_pool_forward(x: &Array4<f32>, kernel: usize, stride: usize) -> Result<Array4<f32>, ModelError> {
    let (n, c, h, w) = x.dim();
    let (oh, ow) = pool_size(h, w, kernel, stride)?;
    let mut out = Array4::zeros((n, c, oh, ow));
    for b in 0..n {
        for ch in 0..c {
            for oy in 0..oh {
                for ox in 0..ow {
                    let (y, xx) = window_argmax(x, b, ch, oy * stride, ox * stride, kernel);
                    out[[b, ch, oy, ox]] = x[[b, ch, y, xx]];
                }
            }
        }
    }
    Ok(out)
}

fn max_pool_backward(
    x: &Array4<f32>,
    grad: &Array4<f32>,
    kernel: usize,
    stride: usize,
) -> Result<Array4<f32>, ModelError> {
    let (n, c, h, w) = x.dim();
    let (oh, ow) = pool_size(h, w, kernel, stride)?;
    if grad.dim() != (n, c, oh, ow) {
        return Err(ModelError::shape("pool gradient does not match output"));
    }
    let mut grad_in = Array4::zeros((n, c, h, w));
    for b in 0..n {
        for ch in 0..c {
            for oy in 0..oh {
                for ox in 0..ow {
                    let (y, xx) = window_argmax(x, b, ch, oy * stride, ox * stride, kernel);
                    grad_in[[b, ch, y, xx]] += grad[[b, ch, oy, ox]];
                }
            }
        }
    }
    Ok(grad_in)
}

fn as4(x: &ArrayD<f32>) -> Result<Array4<f32>, ModelError> {
    x.clone()
        .into_dimensionality::<Ix4>()
        .map_err(|_| ModelError::shape(format!("expected a 4-D tensor, got shape {:?}", x.shape())))
}

fn as2(x: &ArrayD<f32>) -> Result<Array2<f32>, ModelError> {
    x.clone()
        .into_dimensionality::<Ix2>()
        .map_err(|_| ModelError::shape(format!("expected a 2-D tensor, got shape {:?}", x.shape())))
}

fn reshape(x: &ArrayD<f32>, shape: &[usize]) -> Result<ArrayD<f32>, ModelError> {
    x.as_standard_layout()
        .into_owned()
        .into_shape_with_order(IxDyn(shape))
        .map_err(|e| ModelError::shape(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    fn ramp(shape: &[usize], scale: f32) -> ArrayD<f32> {
        let len: usize = shape.iter().product();
        Array::from_shape_vec(
            IxDyn(shape),
            (0..len).map(|i| ((i * 7 % 11) as f32 - 5.0) * scale).collect(),
        )
        .unwrap()
    }

    /// Compare backward() against central differences of sum(forward(x) * r).
    fn check_gradient(layer: &Layer, x: ArrayD<f32>) {
        let out = layer.forward(&x).unwrap();
        let r = ramp(out.shape(), 0.1);
        let analytic = layer.backward(&x, &r).unwrap();
        assert_eq!(analytic.shape(), x.shape());

        let eps = 1e-2;
        for i in 0..x.len() {
            let mut plus = x.clone();
            let mut minus = x.clone();
            plus.as_slice_mut().unwrap()[i] += eps;
            minus.as_slice_mut().unwrap()[i] -= eps;
            let fp = (layer.forward(&plus).unwrap() * &r).sum();
            let fm = (layer.forward(&minus).unwrap() * &r).sum();
            let numeric = (fp - fm) / (2.0 * eps);
            let a = analytic.as_slice().unwrap()[i];
            assert!(
                (numeric - a).abs() < 1e-2 * (1.0 + a.abs()),
                "element {}: numeric {} vs analytic {}",
                i,
                numeric,
                a
            );
        }
    }

    fn conv(in_c: usize, out_c: usize, k: usize, stride: usize, padding: usize) -> Layer {
        let weight = ramp(&[out_c, in_c, k, k], 0.05)
            .into_dimensionality::<Ix4>()
            .unwrap();
        let bias = Array1::from_iter((0..out_c).map(|o| o as f32 * 0.1));
        Layer::Conv2d(Conv2d::new(weight, Some(bias), stride, padding).unwrap())
    }

    #[test]
    fn test_conv_forward_known_values() {
        // 1x1 input channel, 2x2 kernel of ones, no padding: window sums
        let weight = Array4::from_elem((1, 1, 2, 2), 1.0);
        let layer = Layer::Conv2d(Conv2d::new(weight, None, 1, 0).unwrap());
        let x = array![[[[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]]].into_dyn();

        let y = layer.forward(&x).unwrap();
        assert_eq!(y.shape(), &[1, 1, 2, 2]);
        let y = y.into_dimensionality::<Ix4>().unwrap();
        assert_eq!(y[[0, 0, 0, 0]], 12.0);
        assert_eq!(y[[0, 0, 1, 1]], 28.0);
    }

    #[test]
    fn test_conv_padding_and_stride_shapes() {
        let layer = conv(3, 4, 3, 2, 1);
        let x = ramp(&[1, 3, 8, 8], 0.1);
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.shape(), &[1, 4, 4, 4]);
    }

    #[test]
    fn test_conv_rejects_wrong_channels() {
        let layer = conv(3, 2, 3, 1, 0);
        let x = ramp(&[1, 1, 5, 5], 0.1);
        assert!(layer.forward(&x).is_err());
    }

    #[test]
    fn test_conv_gradient() {
        check_gradient(&conv(2, 3, 3, 1, 1), ramp(&[1, 2, 5, 5], 0.2));
        check_gradient(&conv(2, 2, 3, 2, 0), ramp(&[1, 2, 7, 7], 0.2));
    }

    #[test]
    fn test_linear_gradient() {
        let weight = ramp(&[3, 4], 0.3).into_dimensionality::<Ix2>().unwrap();
        let layer = Layer::Linear(Linear::new(weight, None).unwrap());
        check_gradient(&layer, ramp(&[2, 4], 0.5));
    }

    #[test]
    fn test_batch_norm_gradient() {
        let layer = Layer::BatchNorm2d(
            ChannelAffine::new(array![2.0f32, -0.5], array![0.1f32, 0.3]).unwrap(),
        );
        check_gradient(&layer, ramp(&[1, 2, 3, 3], 0.2));
    }

    #[test]
    fn test_global_pool_and_flatten_gradient() {
        check_gradient(&Layer::GlobalAvgPool, ramp(&[1, 3, 4, 4], 0.2));
        check_gradient(&Layer::Flatten, ramp(&[2, 2, 3, 3], 0.2));
    }

    #[test]
    fn test_relu_masks_gradient() {
        let x = array![[-1.0f32, 0.0, 2.0]].into_dyn();
        let g = array![[1.0f32, 1.0, 1.0]].into_dyn();
        let back = Layer::Relu.backward(&x, &g).unwrap();
        assert_eq!(back.as_slice().unwrap(), &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_max_pool_routes_gradient_to_max() {
        let layer = Layer::MaxPool2d { kernel: 2, stride: 2 };
        let x = array![[[[1.0f32, 3.0], [2.0, 0.5]]]].into_dyn();

        let y = layer.forward(&x).unwrap();
        assert_eq!(y.as_slice().unwrap(), &[3.0]);

        let g = array![[[[2.0f32]]]].into_dyn();
        let back = layer.backward(&x, &g).unwrap();
        assert_eq!(back.as_slice().unwrap(), &[0.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_from_spec_validates_weight_length() {
        let spec = LayerSpec::Linear {
            in_features: 3,
            out_features: 2,
            weight: vec![0.0; 5],
            bias: vec![],
        };
        assert!(Layer::from_spec(spec).is_err());

        let spec = LayerSpec::MaxPool2d {
            kernel_size: 2,
            stride: None,
        };
        assert!(matches!(
            Layer::from_spec(spec).unwrap(),
            Layer::MaxPool2d { kernel: 2, stride: 2 }
        ));
    }

    #[test]
    fn test_layer_spec_json_tagging() {
        let spec: LayerSpec = serde_json::from_str(r#"{"type": "relu"}"#).unwrap();
        assert_eq!(spec, LayerSpec::Relu);

        let spec: LayerSpec = serde_json::from_str(
            r#"{"type": "conv2d", "in_channels": 1, "out_channels": 1, "kernel_size": 1, "weight": [2.0]}"#,
        )
        .unwrap();
        assert!(matches!(spec, LayerSpec::Conv2d { stride: 1, padding: 0, .. }));
    }
}
