use crate::{
    dictionary::Dictionary,
    error::{Result, SparseNetError},
    expander::Expander,
};
use ndarray::{Array, Array2, Array4, ArrayView2, ArrayView4, Zip};

/// Gradients of an outer-loop loss w.r.t. the model parameters.
#[derive(Debug, Clone)]
pub struct ParameterGrads {
    /// Same shape as the dictionary weight, `[P, Q]`.
    pub dictionary: Array2<f32>,
    /// Same shape as the expander kernel, `[K, 1, F, F]`.
    pub kernel: Array4<f32>,
}

/// `predict(R) = dictionary(flatten(expand(R)))`, together with its closed-form gradients.
pub struct Reconstruction<'a> {
    dictionary: &'a Dictionary,
    expander: &'a Expander,
    code_size: usize,
}

impl<'a> Reconstruction<'a> {
    pub fn new(dictionary: &'a Dictionary, expander: &'a Expander, code_size: usize) -> Self {
        Self {
            dictionary,
            expander,
            code_size,
        }
    }

    pub fn code_size(&self) -> usize {
        self.code_size
    }

    pub fn patch_len(&self) -> usize {
        self.dictionary.out_features()
    }

    pub fn code_shape(&self, batch_size: usize) -> (usize, usize, usize, usize) {
        (
            batch_size,
            self.expander.num_channels(),
            self.code_size,
            self.code_size,
        )
    }

    /// Expander output flattened to `[N, W * W]`.
    pub fn features(&self, codes: &ArrayView4<f32>) -> Result<Array2<f32>> {
        let map = self.expander.expand(codes)?;
        let (batch_size, _, height, width) = map.dim();
        Ok(map.into_shape((batch_size, height * width))?)
    }

    pub fn predict(&self, codes: &ArrayView4<f32>) -> Result<Array2<f32>> {
        let features = self.features(codes)?;
        self.dictionary.reconstruct(&features.view())
    }

    /// Pulls a gradient w.r.t. the prediction back to the codes.
    pub fn code_grad(&self, grad_prediction: &ArrayView2<f32>) -> Result<Array4<f32>> {
        let grad_map = self.grad_map(grad_prediction)?;
        self.expander.adjoint(&grad_map.view(), self.code_size)
    }

    /// Pulls a gradient w.r.t. the prediction back to the dictionary and expander
    /// parameters, evaluated at `codes`.
    pub fn parameter_grads(
        &self,
        codes: &ArrayView4<f32>,
        grad_prediction: &ArrayView2<f32>,
    ) -> Result<ParameterGrads> {
        let features = self.features(codes)?;
        let dictionary = self
            .dictionary
            .weight_grad(&features.view(), grad_prediction)?;
        let grad_map = self.grad_map(grad_prediction)?;
        let kernel = self.expander.kernel_grad(codes, &grad_map.view())?;
        Ok(ParameterGrads { dictionary, kernel })
    }

    fn grad_map(&self, grad_prediction: &ArrayView2<f32>) -> Result<Array4<f32>> {
        let grad_features = self.dictionary.adjoint(grad_prediction)?;
        let width = self.expander.output_width(self.code_size);
        Ok(Array::from_shape_vec(
            (grad_features.nrows(), 1, width, width),
            grad_features.iter().copied().collect(),
        )?)
    }
}

/// Unreduced squared error `sum((target - prediction)^2)`.
pub fn squared_error(targets: &ArrayView2<f32>, predictions: &ArrayView2<f32>) -> Result<f32> {
    check_same_shape(targets, predictions)?;
    Ok(Zip::from(targets)
        .and(predictions)
        .fold(0.0, |acc, &t, &p| acc + (t - p) * (t - p)))
}

/// Gradient of [`squared_error`] w.r.t. the prediction: `2 * (prediction - target)`.
pub fn squared_error_grad(
    targets: &ArrayView2<f32>,
    predictions: &ArrayView2<f32>,
) -> Result<Array2<f32>> {
    check_same_shape(targets, predictions)?;
    Ok(Zip::from(predictions)
        .and(targets)
        .map_collect(|&p, &t| 2.0 * (p - t)))
}

fn check_same_shape(targets: &ArrayView2<f32>, predictions: &ArrayView2<f32>) -> Result<()> {
    if targets.shape() != predictions.shape() {
        return Err(SparseNetError::BatchShape {
            expected: targets.shape().to_vec(),
            actual: predictions.shape().to_vec(),
        });
    }
    Ok(())
}
