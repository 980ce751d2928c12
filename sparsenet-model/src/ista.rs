use crate::{
    config::{SparseNetConfig, CONVERGENCE_TOLERANCE},
    error::{Result, SparseNetError},
    reconstruction::Reconstruction,
    shrink::shrink_inplace,
};
use ndarray::{Array4, ArrayView2, ArrayView4, Zip};

/// Outcome of one ISTA run over a batch.
#[derive(Debug, Clone)]
pub struct IstaReport {
    /// Sparse codes, `[N, K, M, M]`.
    pub codes: Array4<f32>,
    pub iterations: usize,
    pub converged: bool,
    /// Relative change of the codes at the last iteration.
    pub relative_change: f32,
    /// Smooth loss `sum((target - predict(R))^2)` evaluated at the start of each iteration.
    pub loss_history: Vec<f32>,
}

impl IstaReport {
    /// Mean of the per-iteration smooth losses, 0 when no iteration ran.
    pub fn average_loss(&self) -> f32 {
        if self.loss_history.is_empty() {
            return 0.0;
        }
        let total: f64 = self.loss_history.iter().map(|&l| l as f64).sum();
        (total / self.loss_history.len() as f64) as f32
    }

    /// Fraction of code entries that are exactly zero.
    pub fn sparsity(&self) -> f32 {
        if self.codes.is_empty() {
            return 1.0;
        }
        let zeros = self.codes.iter().filter(|&&c| c == 0.0).count();
        zeros as f32 / self.codes.len() as f32
    }
}

/// `||current - previous|| / ||previous||`.
///
/// An unchanged tensor reports 0 even when `previous` is all zero. A change away
/// from an all-zero `previous` reports infinity instead of dividing by zero.
pub fn relative_change(current: &ArrayView4<f32>, previous: &ArrayView4<f32>) -> f32 {
    let delta = Zip::from(current)
        .and(previous)
        .fold(0.0f32, |acc, &c, &p| acc + (c - p) * (c - p))
        .sqrt();
    if delta == 0.0 {
        return 0.0;
    }
    let base = previous.iter().map(|&p| p * p).sum::<f32>().sqrt();
    if base == 0.0 {
        return f32::INFINITY;
    }
    delta / base
}

/// Iterative shrinkage-thresholding for `min_R ||target - predict(R)||^2 + lambda * ||R||_1`.
#[derive(Debug, Clone)]
pub struct IstaSolver {
    pub code_lr: f32,
    pub lambda: f32,
    pub max_iterations: usize,
    pub fail_on_nonconvergence: bool,
}

impl IstaSolver {
    pub fn from_config(config: &SparseNetConfig) -> Self {
        Self {
            code_lr: config.code_lr,
            lambda: config.lambda,
            max_iterations: config.max_iterations,
            fail_on_nonconvergence: config.fail_on_nonconvergence,
        }
    }

    pub fn solve(
        &self,
        reconstruction: &Reconstruction,
        targets: &ArrayView2<f32>,
    ) -> Result<IstaReport> {
        if targets.ncols() != reconstruction.patch_len() {
            return Err(SparseNetError::BatchShape {
                expected: vec![targets.nrows(), reconstruction.patch_len()],
                actual: targets.shape().to_vec(),
            });
        }
        let batch_size = targets.nrows();
        let mut codes = Array4::zeros(reconstruction.code_shape(batch_size));
        if batch_size == 0 {
            return Ok(IstaReport {
                codes,
                iterations: 0,
                converged: true,
                relative_change: 0.0,
                loss_history: Vec::new(),
            });
        }

        let mut loss_history = Vec::new();
        let mut change = f32::INFINITY;
        let mut converged = false;
        while loss_history.len() < self.max_iterations {
            let iteration = loss_history.len() + 1;
            let previous = codes.clone();

            let residual = reconstruction.predict(&codes.view())? - targets;
            let loss: f32 = residual.iter().map(|r| r * r).sum();
            if !loss.is_finite() {
                return Err(SparseNetError::NumericOverflow { iteration });
            }

            // d/dR of sum((pred - target)^2); parameter gradients are never formed here.
            let grad = reconstruction.code_grad(&(residual * 2.0).view())?;
            codes.scaled_add(-self.code_lr, &grad);
            if codes.iter().any(|c| !c.is_finite()) {
                return Err(SparseNetError::NumericOverflow { iteration });
            }
            shrink_inplace(&mut codes, self.lambda);

            loss_history.push(loss);
            change = relative_change(&codes.view(), &previous.view());
            tracing::trace!(
                "ISTA iteration {}: loss {:.6}, relative change {:.6}",
                iteration,
                loss,
                change
            );
            if change < CONVERGENCE_TOLERANCE {
                converged = true;
                break;
            }
        }

        let iterations = loss_history.len();
        if !converged {
            if self.fail_on_nonconvergence {
                return Err(SparseNetError::NonConvergence {
                    iterations,
                    relative_change: change,
                });
            }
            tracing::warn!(
                "ISTA stopped at the iteration cap ({}) with relative change {}",
                iterations,
                change
            );
        }

        let report = IstaReport {
            codes,
            iterations,
            converged,
            relative_change: change,
            loss_history,
        };
        tracing::debug!(
            "ISTA finished after {} iterations: average loss {:.6}, sparsity {:.3}",
            report.iterations,
            report.average_loss(),
            report.sparsity()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dictionary::Dictionary, expander::Expander};
    use ndarray::array;

    #[test]
    fn test_relative_change_of_fixed_point_is_zero() {
        let zeros = Array4::<f32>::zeros((1, 1, 2, 2));
        assert_eq!(relative_change(&zeros.view(), &zeros.view()), 0.0);
    }

    #[test]
    fn test_relative_change_from_zero_is_infinite() {
        let zeros = Array4::<f32>::zeros((1, 1, 2, 2));
        let mut moved = zeros.clone();
        moved[[0, 0, 1, 1]] = 0.5;
        let change = relative_change(&moved.view(), &zeros.view());
        assert!(change.is_infinite());
        assert!(change >= CONVERGENCE_TOLERANCE);
    }

    #[test]
    fn test_relative_change_ratio() {
        let mut previous = Array4::<f32>::zeros((1, 1, 1, 2));
        previous[[0, 0, 0, 0]] = 3.0;
        previous[[0, 0, 0, 1]] = 4.0;
        let mut current = previous.clone();
        current[[0, 0, 0, 0]] = 3.5;
        assert!((relative_change(&current.view(), &previous.view()) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_report_average_and_sparsity() {
        let mut codes = Array4::<f32>::zeros((1, 1, 2, 2));
        codes[[0, 0, 0, 0]] = 1.0;
        let report = IstaReport {
            codes,
            iterations: 2,
            converged: true,
            relative_change: 0.0,
            loss_history: vec![3.0, 1.0],
        };
        assert_eq!(report.average_loss(), 2.0);
        assert_eq!(report.sparsity(), 0.75);
    }

    #[test]
    fn test_solve_rejects_codes_overflowing_in_gradient_step() {
        // The first loss is finite but the gradient overflows, so the check must
        // fire before shrinkage gets to see the infinite codes.
        let dictionary = Dictionary::from_weight(array![[1e20f32]]);
        let kernel = Array4::from_elem((1, 1, 1, 1), 1e20f32);
        let expander = Expander::from_kernel(kernel, 1).unwrap();
        let reconstruction = Reconstruction::new(&dictionary, &expander, 1);
        let targets = array![[1.0f32]];
        let solver = IstaSolver {
            code_lr: 0.1,
            lambda: 5e-3,
            max_iterations: 10,
            fail_on_nonconvergence: false,
        };
        assert!(matches!(
            solver.solve(&reconstruction, &targets.view()),
            Err(SparseNetError::NumericOverflow { iteration: 1 })
        ));
    }
}
