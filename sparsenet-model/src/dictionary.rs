use crate::error::{Result, SparseNetError};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::{distributions::Uniform, prelude::*};

/// Bias-free linear map from flattened expander features (Q) to pixels (P).
///
/// The weight is stored as `[out_features, in_features]`, so column `j` is the
/// pixel-space atom for feature `j`.
#[derive(Debug, Clone)]
pub struct Dictionary {
    weight: Array2<f32>,
}

impl Dictionary {
    /// Uniform init in `±1/sqrt(in_features)`. The columns are not normalized yet.
    pub fn new<R: Rng>(in_features: usize, out_features: usize, rng: &mut R) -> Result<Self> {
        if in_features == 0 {
            return Err(SparseNetError::InvalidConfig(
                "dictionary in_features must be at least 1".to_string(),
            ));
        }
        let bound = 1.0 / (in_features as f32).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);
        let weight = Array2::from_shape_simple_fn((out_features, in_features), || {
            dist.sample(&mut *rng)
        });
        Ok(Self { weight })
    }

    pub fn from_weight(weight: Array2<f32>) -> Self {
        Self { weight }
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    pub fn weight_mut(&mut self) -> &mut Array2<f32> {
        &mut self.weight
    }

    /// `y = W x` for every row of `features`.
    pub fn reconstruct(&self, features: &ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_width(features, self.in_features())?;
        Ok(features.dot(&self.weight.t()))
    }

    /// Gradient of a scalar loss w.r.t. the input features, given its gradient w.r.t. the output.
    pub fn adjoint(&self, grad_output: &ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_width(grad_output, self.out_features())?;
        Ok(grad_output.dot(&self.weight))
    }

    /// Gradient of a scalar loss w.r.t. the weight, summed over the batch.
    pub fn weight_grad(
        &self,
        features: &ArrayView2<f32>,
        grad_output: &ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        self.check_width(features, self.in_features())?;
        self.check_width(grad_output, self.out_features())?;
        if features.nrows() != grad_output.nrows() {
            return Err(SparseNetError::BatchShape {
                expected: vec![features.nrows(), self.out_features()],
                actual: grad_output.shape().to_vec(),
            });
        }
        Ok(grad_output.t().dot(features))
    }

    pub fn column_norms(&self) -> Array1<f32> {
        self.weight.map_axis(Axis(0), |col| col.dot(&col).sqrt())
    }

    /// Rescales every column to unit L2 norm. Zero columns are left as they are.
    pub fn normalize(&mut self) {
        let mut zero_columns = 0;
        for mut col in self.weight.axis_iter_mut(Axis(1)) {
            let norm = col.dot(&col).sqrt();
            if norm > 0.0 {
                col.mapv_inplace(|w| w / norm);
            } else {
                zero_columns += 1;
            }
        }
        if zero_columns > 0 {
            tracing::warn!(
                "{} dictionary columns have zero norm and were not normalized",
                zero_columns
            );
        }
    }

    fn check_width(&self, batch: &ArrayView2<f32>, width: usize) -> Result<()> {
        if batch.ncols() != width {
            return Err(SparseNetError::BatchShape {
                expected: vec![batch.nrows(), width],
                actual: batch.shape().to_vec(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;

    #[test]
    fn test_reconstruct_is_matrix_product() {
        let dictionary = Dictionary::from_weight(array![[1.0, 0.0, 2.0], [0.0, 1.0, -1.0]]);
        let features = array![[1.0, 2.0, 3.0]];
        let output = dictionary.reconstruct(&features.view()).unwrap();
        assert_eq!(output, array![[7.0f32, -1.0]]);
    }

    #[test]
    fn test_reconstruct_rejects_wrong_width() {
        let dictionary = Dictionary::from_weight(Array2::zeros((2, 3)));
        let features = Array2::<f32>::zeros((1, 4));
        assert!(matches!(
            dictionary.reconstruct(&features.view()),
            Err(SparseNetError::BatchShape { .. })
        ));
    }

    #[test]
    fn test_normalize_unit_columns() {
        let mut rng = StdRng::from_seed([7; 32]);
        let mut dictionary = Dictionary::new(144, 64, &mut rng).unwrap();
        dictionary.normalize();
        for norm in dictionary.column_norms().iter() {
            assert_abs_diff_eq!(*norm, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_new_rejects_zero_in_features() {
        let mut rng = StdRng::from_seed([7; 32]);
        assert!(matches!(
            Dictionary::new(0, 4, &mut rng),
            Err(SparseNetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let mut dictionary = Dictionary::from_weight(array![[3.0, 1.0], [4.0, 1.0]]);
        dictionary.normalize();
        let once = dictionary.weight().clone();
        dictionary.normalize();
        for (a, b) in once.iter().zip(dictionary.weight().iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
        assert_abs_diff_eq!(once[[0, 0]], 0.6, epsilon = 1e-6);
        assert_abs_diff_eq!(once[[1, 0]], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_normalize_leaves_zero_column() {
        let mut dictionary = Dictionary::from_weight(array![[0.0, 2.0], [0.0, 0.0]]);
        dictionary.normalize();
        assert_eq!(dictionary.weight(), &array![[0.0f32, 1.0], [0.0, 0.0]]);
    }

    #[test]
    fn test_weight_grad_matches_outer_product() {
        let dictionary = Dictionary::from_weight(Array2::zeros((2, 3)));
        let features = array![[1.0, 2.0, 3.0]];
        let grad_output = array![[1.0, -1.0]];
        let grad = dictionary
            .weight_grad(&features.view(), &grad_output.view())
            .unwrap();
        assert_eq!(grad, array![[1.0f32, 2.0, 3.0], [-1.0, -2.0, -3.0]]);
    }
}
