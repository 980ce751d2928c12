use crate::error::{Result, SparseNetError};
use serde::{Deserialize, Serialize};

/// Relative change in the codes below which ISTA stops.
pub const CONVERGENCE_TOLERANCE: f32 = 0.01;

fn default_code_lr() -> f32 {
    0.1
}

fn default_lambda() -> f32 {
    5e-3
}

fn default_max_iterations() -> usize {
    5000
}

/// Hyperparameters of a [`crate::SparseNet`], fixed at construction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SparseNetConfig {
    /// Number of code channels (K).
    pub num_channels: usize,
    /// Spatial extent of the code grid and of the reconstructed patch (M).
    pub code_size: usize,
    /// Expander kernel size (F).
    pub kernel_size: usize,
    /// Expander stride (S).
    pub stride: usize,
    /// ISTA step size.
    #[serde(default = "default_code_lr")]
    pub code_lr: f32,
    /// L1 penalty strength, used directly as the shrinkage threshold.
    #[serde(default = "default_lambda")]
    pub lambda: f32,
    /// Safety cap on ISTA iterations.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Return an error instead of a warning when the cap is reached.
    #[serde(default)]
    pub fail_on_nonconvergence: bool,
}

impl SparseNetConfig {
    pub fn new(num_channels: usize, code_size: usize, kernel_size: usize, stride: usize) -> Self {
        Self {
            num_channels,
            code_size,
            kernel_size,
            stride,
            code_lr: default_code_lr(),
            lambda: default_lambda(),
            max_iterations: default_max_iterations(),
            fail_on_nonconvergence: false,
        }
    }

    #[must_use]
    pub fn with_code_lr(mut self, code_lr: f32) -> Self {
        self.code_lr = code_lr;
        self
    }

    #[must_use]
    pub fn with_lambda(mut self, lambda: f32) -> Self {
        self.lambda = lambda;
        self
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub fn with_fail_on_nonconvergence(mut self, fail: bool) -> Self {
        self.fail_on_nonconvergence = fail;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("num_channels", self.num_channels),
            ("code_size", self.code_size),
            ("kernel_size", self.kernel_size),
            ("stride", self.stride),
            ("max_iterations", self.max_iterations),
        ] {
            if value == 0 {
                return Err(SparseNetError::InvalidConfig(format!(
                    "{} must be at least 1",
                    name
                )));
            }
        }
        if !self.code_lr.is_finite() || self.code_lr <= 0.0 {
            return Err(SparseNetError::InvalidConfig(format!(
                "code_lr must be positive and finite, got {}",
                self.code_lr
            )));
        }
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(SparseNetError::InvalidConfig(format!(
                "lambda must be non-negative and finite, got {}",
                self.lambda
            )));
        }
        Ok(())
    }

    /// Width of the square expander output: (M - 1) * S + F.
    pub fn expander_width(&self) -> usize {
        (self.code_size - 1) * self.stride + self.kernel_size
    }

    /// Flattened expander output length, the dictionary's input size (Q).
    pub fn feature_len(&self) -> usize {
        self.expander_width().pow(2)
    }

    /// Flattened patch length, the dictionary's output size (P).
    pub fn patch_len(&self) -> usize {
        self.code_size.pow(2)
    }

    /// Shape of the code tensor for a batch of `batch_size` targets.
    pub fn code_shape(&self, batch_size: usize) -> (usize, usize, usize, usize) {
        (batch_size, self.num_channels, self.code_size, self.code_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_sizes() {
        let config = SparseNetConfig::new(4, 8, 5, 1);
        assert_eq!(config.expander_width(), 12);
        assert_eq!(config.feature_len(), 144);
        assert_eq!(config.patch_len(), 64);

        let strided = SparseNetConfig::new(2, 4, 3, 2);
        assert_eq!(strided.expander_width(), 9);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(SparseNetConfig::new(0, 8, 5, 1).validate().is_err());
        assert!(SparseNetConfig::new(4, 8, 5, 0).validate().is_err());
        assert!(SparseNetConfig::new(4, 8, 5, 1)
            .with_code_lr(0.0)
            .validate()
            .is_err());
        assert!(SparseNetConfig::new(4, 8, 5, 1)
            .with_lambda(-1.0)
            .validate()
            .is_err());
        assert!(SparseNetConfig::new(4, 8, 5, 1)
            .with_lambda(f32::NAN)
            .validate()
            .is_err());
        assert!(SparseNetConfig::new(4, 8, 5, 1)
            .with_max_iterations(0)
            .validate()
            .is_err());
        assert!(SparseNetConfig::new(4, 8, 5, 1)
            .with_lambda(0.0)
            .validate()
            .is_ok());
    }
}
