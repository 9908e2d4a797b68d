//! Network layers
//!
//! Every layer maps a `[rows, cols]` activation matrix to another one. For
//! the convolutional stack rows are time steps and columns are channels;
//! after `Flatten` the activation is a single row.
//!
//! `forward` is side-effect free and used for inference. `forward_train`
//! additionally caches what `backward` needs; gradients accumulate in each
//! `Param` until `zero_grad`.

use ndarray::{s, Array2, Axis, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpeakerError};

/// A trainable tensor and its accumulated gradient.
///
/// Only the value is serialized; the gradient is recreated as zeros.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Array2<f32>", into = "Array2<f32>")]
pub struct Param {
    pub value: Array2<f32>,
    pub grad: Array2<f32>,
}

impl Param {
    /// Glorot-uniform initialized parameter
    pub fn glorot_uniform<R: Rng + ?Sized>(
        rng: &mut R,
        shape: (usize, usize),
        fan_in: usize,
        fan_out: usize,
    ) -> Self {
        let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
        Array2::from_shape_fn(shape, |_| rng.gen_range(-limit..limit)).into()
    }

    pub fn zeros(shape: (usize, usize)) -> Self {
        Array2::zeros(shape).into()
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl From<Array2<f32>> for Param {
    fn from(value: Array2<f32>) -> Self {
        let grad = Array2::zeros(value.raw_dim());
        Self { value, grad }
    }
}

impl From<Param> for Array2<f32> {
    fn from(param: Param) -> Self {
        param.value
    }
}

/// Element-wise activation applied after a layer's affine transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
}

impl Activation {
    fn apply(self, mut z: Array2<f32>) -> Array2<f32> {
        match self {
            Activation::Linear => {}
            Activation::Relu => z.mapv_inplace(|v| v.max(0.0)),
            Activation::Sigmoid => z.mapv_inplace(super::loss::sigmoid),
        }
        z
    }

    /// Gradient w.r.t. the pre-activation, given the activation output
    fn backward(self, grad_out: &Array2<f32>, output: &Array2<f32>) -> Array2<f32> {
        let mut grad = grad_out.clone();
        match self {
            Activation::Linear => {}
            Activation::Relu => Zip::from(&mut grad).and(output).for_each(|g, &o| {
                if o <= 0.0 {
                    *g = 0.0;
                }
            }),
            Activation::Sigmoid => Zip::from(&mut grad)
                .and(output)
                .for_each(|g, &o| *g *= o * (1.0 - o)),
        }
        grad
    }
}

fn missing_cache(layer: &str) -> SpeakerError {
    SpeakerError::TrainingError {
        reason: format!("{} backward called without a training forward pass", layer),
    }
}

fn check_input(expected_cols: usize, min_rows: usize, x: &Array2<f32>) -> Result<()> {
    if x.ncols() != expected_cols || x.nrows() < min_rows {
        return Err(SpeakerError::ShapeMismatch {
            expected: vec![min_rows, expected_cols],
            actual: vec![x.nrows(), x.ncols()],
        });
    }
    Ok(())
}

// ============================================================================
// Conv1d
// ============================================================================

#[derive(Debug, Clone)]
struct ConvCache {
    input_len: usize,
    patches: Array2<f32>,
    output: Array2<f32>,
}

/// 1-D convolution with "valid" padding and stride 1.
///
/// The kernel is stored unrolled as `[kernel_size * in_channels, filters]`,
/// row index `k * in_channels + c`, so the convolution is one matrix
/// product against the unrolled input patches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv1d {
    pub kernel_size: usize,
    pub in_channels: usize,
    pub filters: usize,
    pub activation: Activation,
    pub weight: Param,
    pub bias: Param,
    #[serde(skip)]
    cache: Option<ConvCache>,
}

impl Conv1d {
    pub fn new<R: Rng + ?Sized>(
        rng: &mut R,
        in_channels: usize,
        filters: usize,
        kernel_size: usize,
        activation: Activation,
    ) -> Self {
        let weight = Param::glorot_uniform(
            rng,
            (kernel_size * in_channels, filters),
            kernel_size * in_channels,
            kernel_size * filters,
        );
        Self {
            kernel_size,
            in_channels,
            filters,
            activation,
            weight,
            bias: Param::zeros((1, filters)),
            cache: None,
        }
    }

    pub fn output_len(&self, input_len: usize) -> usize {
        (input_len + 1).saturating_sub(self.kernel_size)
    }

    fn im2col(&self, x: &Array2<f32>) -> Array2<f32> {
        let out_len = self.output_len(x.nrows());
        let cin = self.in_channels;
        let mut patches = Array2::zeros((out_len, self.kernel_size * cin));
        for t in 0..out_len {
            for k in 0..self.kernel_size {
                patches
                    .slice_mut(s![t, k * cin..(k + 1) * cin])
                    .assign(&x.row(t + k));
            }
        }
        patches
    }

    fn compute(&self, x: &Array2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        check_input(self.in_channels, self.kernel_size, x)?;
        let patches = self.im2col(x);
        let z = patches.dot(&self.weight.value) + &self.bias.value;
        Ok((patches, self.activation.apply(z)))
    }

    pub fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        self.compute(x).map(|(_, out)| out)
    }

    pub fn forward_train(&mut self, x: &Array2<f32>) -> Result<Array2<f32>> {
        let (patches, output) = self.compute(x)?;
        self.cache = Some(ConvCache {
            input_len: x.nrows(),
            patches,
            output: output.clone(),
        });
        Ok(output)
    }

    pub fn backward(&mut self, grad_out: &Array2<f32>) -> Result<Array2<f32>> {
        let cache = self.cache.take().ok_or_else(|| missing_cache("Conv1d"))?;
        let dz = self.activation.backward(grad_out, &cache.output);

        self.weight.grad += &cache.patches.t().dot(&dz);
        self.bias.grad += &dz.sum_axis(Axis(0)).insert_axis(Axis(0));

        // Scatter patch gradients back onto the overlapping input rows
        let dpatches = dz.dot(&self.weight.value.t());
        let cin = self.in_channels;
        let mut dx = Array2::<f32>::zeros((cache.input_len, cin));
        for t in 0..dpatches.nrows() {
            for k in 0..self.kernel_size {
                let mut row = dx.row_mut(t + k);
                row += &dpatches.slice(s![t, k * cin..(k + 1) * cin]);
            }
        }
        Ok(dx)
    }
}

// ============================================================================
// MaxPool1d
// ============================================================================

#[derive(Debug, Clone)]
struct PoolCache {
    input_shape: (usize, usize),
    argmax: Array2<usize>,
}

/// Non-overlapping max pooling along time; trailing rows that do not fill
/// a whole window are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxPool1d {
    pub pool_size: usize,
    #[serde(skip)]
    cache: Option<PoolCache>,
}

impl MaxPool1d {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            cache: None,
        }
    }

    pub fn output_len(&self, input_len: usize) -> usize {
        input_len / self.pool_size
    }

    fn compute(&self, x: &Array2<f32>) -> Result<(Array2<f32>, Array2<usize>)> {
        check_input(x.ncols(), self.pool_size, x)?;
        let out_len = self.output_len(x.nrows());
        let mut out = Array2::<f32>::zeros((out_len, x.ncols()));
        let mut argmax = Array2::<usize>::zeros((out_len, x.ncols()));

        for t in 0..out_len {
            let start = t * self.pool_size;
            for c in 0..x.ncols() {
                let mut best = start;
                for r in start + 1..start + self.pool_size {
                    if x[[r, c]] > x[[best, c]] {
                        best = r;
                    }
                }
                out[[t, c]] = x[[best, c]];
                argmax[[t, c]] = best;
            }
        }
        Ok((out, argmax))
    }

    pub fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        self.compute(x).map(|(out, _)| out)
    }

    pub fn forward_train(&mut self, x: &Array2<f32>) -> Result<Array2<f32>> {
        let (out, argmax) = self.compute(x)?;
        self.cache = Some(PoolCache {
            input_shape: x.dim(),
            argmax,
        });
        Ok(out)
    }

    pub fn backward(&mut self, grad_out: &Array2<f32>) -> Result<Array2<f32>> {
        let cache = self.cache.take().ok_or_else(|| missing_cache("MaxPool1d"))?;
        let mut dx = Array2::<f32>::zeros(cache.input_shape);
        for ((t, c), &g) in grad_out.indexed_iter() {
            dx[[cache.argmax[[t, c]], c]] += g;
        }
        Ok(dx)
    }
}

// ============================================================================
// Flatten
// ============================================================================

/// Flattens `[rows, cols]` row-major into `[1, rows * cols]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Flatten {
    #[serde(skip)]
    input_shape: Option<(usize, usize)>,
}

impl Flatten {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        reshape(x, (1, x.len()))
    }

    pub fn forward_train(&mut self, x: &Array2<f32>) -> Result<Array2<f32>> {
        self.input_shape = Some(x.dim());
        self.forward(x)
    }

    pub fn backward(&mut self, grad_out: &Array2<f32>) -> Result<Array2<f32>> {
        let shape = self.input_shape.take().ok_or_else(|| missing_cache("Flatten"))?;
        reshape(grad_out, shape)
    }
}

fn reshape(x: &Array2<f32>, shape: (usize, usize)) -> Result<Array2<f32>> {
    Array2::from_shape_vec(shape, x.iter().copied().collect()).map_err(|_| {
        SpeakerError::ShapeMismatch {
            expected: vec![shape.0, shape.1],
            actual: vec![x.nrows(), x.ncols()],
        }
    })
}

// ============================================================================
// Dense
// ============================================================================

#[derive(Debug, Clone)]
struct DenseCache {
    input: Array2<f32>,
    output: Array2<f32>,
}

/// Fully connected layer, weight shape `[inputs, units]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    pub inputs: usize,
    pub units: usize,
    pub activation: Activation,
    pub weight: Param,
    pub bias: Param,
    #[serde(skip)]
    cache: Option<DenseCache>,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(
        rng: &mut R,
        inputs: usize,
        units: usize,
        activation: Activation,
    ) -> Self {
        Self {
            inputs,
            units,
            activation,
            weight: Param::glorot_uniform(rng, (inputs, units), inputs, units),
            bias: Param::zeros((1, units)),
            cache: None,
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        check_input(self.inputs, 1, x)?;
        let z = x.dot(&self.weight.value) + &self.bias.value;
        Ok(self.activation.apply(z))
    }

    pub fn forward_train(&mut self, x: &Array2<f32>) -> Result<Array2<f32>> {
        let output = self.forward(x)?;
        self.cache = Some(DenseCache {
            input: x.clone(),
            output: output.clone(),
        });
        Ok(output)
    }

    pub fn backward(&mut self, grad_out: &Array2<f32>) -> Result<Array2<f32>> {
        let cache = self.cache.take().ok_or_else(|| missing_cache("Dense"))?;
        let dz = self.activation.backward(grad_out, &cache.output);

        self.weight.grad += &cache.input.t().dot(&dz);
        self.bias.grad += &dz.sum_axis(Axis(0)).insert_axis(Axis(0));

        Ok(dz.dot(&self.weight.value.t()))
    }
}

// ============================================================================
// Layer
// ============================================================================

/// Any layer of the network, tagged by kind when serialized
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Layer {
    Conv1d(Conv1d),
    MaxPool1d(MaxPool1d),
    Flatten(Flatten),
    Dense(Dense),
}

impl Layer {
    pub fn name(&self) -> &'static str {
        match self {
            Layer::Conv1d(_) => "conv1d",
            Layer::MaxPool1d(_) => "max_pool1d",
            Layer::Flatten(_) => "flatten",
            Layer::Dense(_) => "dense",
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        match self {
            Layer::Conv1d(l) => l.forward(x),
            Layer::MaxPool1d(l) => l.forward(x),
            Layer::Flatten(l) => l.forward(x),
            Layer::Dense(l) => l.forward(x),
        }
    }

    pub fn forward_train(&mut self, x: &Array2<f32>) -> Result<Array2<f32>> {
        match self {
            Layer::Conv1d(l) => l.forward_train(x),
            Layer::MaxPool1d(l) => l.forward_train(x),
            Layer::Flatten(l) => l.forward_train(x),
            Layer::Dense(l) => l.forward_train(x),
        }
    }

    pub fn backward(&mut self, grad_out: &Array2<f32>) -> Result<Array2<f32>> {
        match self {
            Layer::Conv1d(l) => l.backward(grad_out),
            Layer::MaxPool1d(l) => l.backward(grad_out),
            Layer::Flatten(l) => l.backward(grad_out),
            Layer::Dense(l) => l.backward(grad_out),
        }
    }

    pub fn params_mut(&mut self) -> Vec<&mut Param> {
        match self {
            Layer::Conv1d(l) => vec![&mut l.weight, &mut l.bias],
            Layer::Dense(l) => vec![&mut l.weight, &mut l.bias],
            Layer::MaxPool1d(_) | Layer::Flatten(_) => Vec::new(),
        }
    }

    /// Hyperparameters and parameter shapes, used to compare a layer
    /// against the one its architecture implies
    pub fn signature(&self) -> Vec<usize> {
        match self {
            Layer::Conv1d(l) => vec![
                l.kernel_size,
                l.in_channels,
                l.filters,
                l.weight.value.nrows(),
                l.weight.value.ncols(),
                l.bias.value.nrows(),
                l.bias.value.ncols(),
            ],
            Layer::MaxPool1d(l) => vec![l.pool_size],
            Layer::Flatten(_) => Vec::new(),
            Layer::Dense(l) => vec![
                l.inputs,
                l.units,
                l.weight.value.nrows(),
                l.weight.value.ncols(),
                l.bias.value.nrows(),
                l.bias.value.ncols(),
            ],
        }
    }

    pub fn num_parameters(&self) -> usize {
        match self {
            Layer::Conv1d(l) => l.weight.len() + l.bias.len(),
            Layer::Dense(l) => l.weight.len() + l.bias.len(),
            Layer::MaxPool1d(_) | Layer::Flatten(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    /// Loss `sum(out * r)` is linear in the weights of a linear layer, so
    /// central differences are exact up to rounding.
    fn weighted_sum(out: &Array2<f32>, r: &Array2<f32>) -> f32 {
        (out * r).sum()
    }

    #[test]
    fn test_conv1d_matches_direct_convolution() {
        let mut conv = Conv1d::new(&mut rng(), 2, 3, 2, Activation::Linear);
        conv.bias.value = array![[0.5, -0.5, 0.0]];
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]];

        let out = conv.forward(&x).unwrap();
        assert_eq!(out.dim(), (3, 3));

        for t in 0..3 {
            for f in 0..3 {
                let mut expected = conv.bias.value[[0, f]];
                for k in 0..2 {
                    for c in 0..2 {
                        expected += x[[t + k, c]] * conv.weight.value[[k * 2 + c, f]];
                    }
                }
                assert_relative_eq!(out[[t, f]], expected, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_conv1d_gradients_match_finite_differences() {
        let mut conv = Conv1d::new(&mut rng(), 2, 3, 3, Activation::Linear);
        let x = Array2::from_shape_fn((6, 2), |(t, c)| (t as f32 * 0.3 - c as f32 * 0.7).sin());
        let r = Array2::from_shape_fn((4, 3), |(t, f)| (t + 2 * f) as f32 * 0.1 - 0.4);

        conv.forward_train(&x).unwrap();
        let dx = conv.backward(&r).unwrap();

        let eps = 1e-2;
        for idx in [(0usize, 0usize), (3, 1), (5, 2)] {
            let mut plus = conv.clone();
            plus.weight.value[idx] += eps;
            let mut minus = conv.clone();
            minus.weight.value[idx] -= eps;
            let numeric = (weighted_sum(&plus.forward(&x).unwrap(), &r)
                - weighted_sum(&minus.forward(&x).unwrap(), &r))
                / (2.0 * eps);
            assert_relative_eq!(conv.weight.grad[idx], numeric, epsilon = 1e-3);
        }

        for idx in [(0usize, 0usize), (2, 1), (5, 0)] {
            let mut xp = x.clone();
            xp[idx] += eps;
            let mut xm = x.clone();
            xm[idx] -= eps;
            let numeric = (weighted_sum(&conv.forward(&xp).unwrap(), &r)
                - weighted_sum(&conv.forward(&xm).unwrap(), &r))
                / (2.0 * eps);
            assert_relative_eq!(dx[idx], numeric, epsilon = 1e-3);
        }

        // bias gradient is the column sum of the upstream gradient
        let expected_bias = r.sum_axis(Axis(0));
        for f in 0..3 {
            assert_relative_eq!(conv.bias.grad[[0, f]], expected_bias[f], epsilon = 1e-5);
        }
    }

    #[test]
    fn test_dense_gradients_match_finite_differences() {
        let mut dense = Dense::new(&mut rng(), 4, 2, Activation::Linear);
        let x = array![[0.2, -0.4, 0.9, 0.1]];
        let r = array![[1.5, -0.5]];

        dense.forward_train(&x).unwrap();
        let dx = dense.backward(&r).unwrap();

        let eps = 1e-2;
        for idx in [(0usize, 0usize), (1, 1), (3, 0)] {
            let mut plus = dense.clone();
            plus.weight.value[idx] += eps;
            let mut minus = dense.clone();
            minus.weight.value[idx] -= eps;
            let numeric = (weighted_sum(&plus.forward(&x).unwrap(), &r)
                - weighted_sum(&minus.forward(&x).unwrap(), &r))
                / (2.0 * eps);
            assert_relative_eq!(dense.weight.grad[idx], numeric, epsilon = 1e-3);
        }

        // dx = r . W^T
        let expected = r.dot(&dense.weight.value.t());
        for j in 0..4 {
            assert_relative_eq!(dx[[0, j]], expected[[0, j]], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_gradients_accumulate_until_zeroed() {
        let mut dense = Dense::new(&mut rng(), 2, 1, Activation::Linear);
        let x = array![[1.0, 2.0]];
        let g = array![[1.0]];

        for _ in 0..2 {
            dense.forward_train(&x).unwrap();
            dense.backward(&g).unwrap();
        }
        assert_eq!(dense.weight.grad, array![[2.0f32], [4.0]]);

        dense.weight.zero_grad();
        assert!(dense.weight.grad.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_relu_blocks_gradient_for_inactive_units() {
        let mut dense = Dense::new(&mut rng(), 1, 2, Activation::Relu);
        dense.weight.value = array![[1.0, -1.0]];
        let x = array![[2.0]];

        let out = dense.forward_train(&x).unwrap();
        assert_eq!(out, array![[2.0f32, 0.0]]);

        dense.backward(&array![[1.0, 1.0]]).unwrap();
        assert_eq!(dense.weight.grad, array![[2.0f32, 0.0]]);
    }

    #[test]
    fn test_max_pool_forward_and_routing() {
        let mut pool = MaxPool1d::new(2);
        let x = array![[1.0, 9.0], [3.0, 2.0], [5.0, 4.0], [0.0, 8.0], [7.0, 7.0]];

        let out = pool.forward_train(&x).unwrap();
        // the odd trailing row is dropped
        assert_eq!(out, array![[3.0f32, 9.0], [5.0, 8.0]]);

        let dx = pool.backward(&array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        assert_eq!(
            dx,
            array![[0.0f32, 2.0], [1.0, 0.0], [3.0, 0.0], [0.0, 4.0], [0.0, 0.0]]
        );
    }

    #[test]
    fn test_flatten_round_trip() {
        let mut flatten = Flatten::new();
        let x = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];

        let flat = flatten.forward_train(&x).unwrap();
        assert_eq!(flat, array![[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]]);

        let back = flatten.backward(&flat).unwrap();
        assert_eq!(back, x);
    }

    #[test]
    fn test_backward_without_forward_fails() {
        let mut layer = Layer::Dense(Dense::new(&mut rng(), 2, 2, Activation::Relu));
        let err = layer.backward(&array![[1.0, 1.0]]).unwrap_err();
        assert_eq!(err.error_code(), "TRAINING_ERROR");
    }

    #[test]
    fn test_shape_mismatch_is_reported() {
        let conv = Conv1d::new(&mut rng(), 13, 4, 3, Activation::Relu);
        let err = conv.forward(&Array2::zeros((10, 12))).unwrap_err();
        assert_eq!(err.error_code(), "SHAPE_MISMATCH");

        let err = conv.forward(&Array2::zeros((2, 13))).unwrap_err();
        assert_eq!(err.error_code(), "SHAPE_MISMATCH");
    }

    #[test]
    fn test_signature_tracks_weight_shape() {
        let mut conv = Conv1d::new(&mut rng(), 2, 3, 3, Activation::Relu);
        assert_eq!(Layer::Conv1d(conv.clone()).signature(), vec![3, 2, 3, 6, 3, 1, 3]);

        conv.weight = Param::zeros((5, 3));
        assert_eq!(Layer::Conv1d(conv).signature(), vec![3, 2, 3, 5, 3, 1, 3]);
        assert!(Layer::Flatten(Flatten::new()).signature().is_empty());
    }

    #[test]
    fn test_param_serializes_value_only() {
        let mut param = Param::from(array![[1.0f32, 2.0]]);
        param.grad.fill(5.0);

        let json = serde_json::to_string(&param).unwrap();
        let restored: Param = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.value, param.value);
        assert!(restored.grad.iter().all(|&g| g == 0.0));
    }
}
