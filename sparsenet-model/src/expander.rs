use crate::error::{Result, SparseNetError};
use ndarray::{s, Array4, ArrayView4, Zip};
use rand::{distributions::Uniform, prelude::*};

/// Single-output-channel transposed convolution mapping a `[N, K, M, M]` code
/// grid to a `[N, 1, W, W]` map, `W = (M - 1) * stride + kernel_size`.
///
/// No padding, no output padding and no bias.
#[derive(Debug, Clone)]
pub struct Expander {
    kernel: Array4<f32>,
    stride: usize,
}

impl Expander {
    /// Uniform init in `±1/kernel_size`, the fan-in bound for one output channel.
    pub fn new<R: Rng>(
        num_channels: usize,
        kernel_size: usize,
        stride: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if stride == 0 || kernel_size == 0 {
            return Err(SparseNetError::InvalidConfig(
                "expander stride and kernel size must be at least 1".to_string(),
            ));
        }
        let bound = 1.0 / kernel_size as f32;
        let dist = Uniform::new_inclusive(-bound, bound);
        let kernel =
            Array4::from_shape_simple_fn((num_channels, 1, kernel_size, kernel_size), || {
                dist.sample(&mut *rng)
            });
        Ok(Self { kernel, stride })
    }

    /// Wraps an explicit `[K, 1, F, F]` kernel.
    pub fn from_kernel(kernel: Array4<f32>, stride: usize) -> Result<Self> {
        let (_, out_channels, height, width) = kernel.dim();
        if out_channels != 1 {
            return Err(SparseNetError::ShapeMismatch {
                what: "expander output channels",
                expected: 1,
                actual: out_channels,
            });
        }
        if height != width {
            return Err(SparseNetError::ShapeMismatch {
                what: "expander kernel width",
                expected: height,
                actual: width,
            });
        }
        if stride == 0 || height == 0 {
            return Err(SparseNetError::InvalidConfig(
                "expander stride and kernel size must be at least 1".to_string(),
            ));
        }
        Ok(Self { kernel, stride })
    }

    pub fn num_channels(&self) -> usize {
        self.kernel.dim().0
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel.dim().2
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn kernel(&self) -> &Array4<f32> {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut Array4<f32> {
        &mut self.kernel
    }

    pub fn output_width(&self, code_size: usize) -> usize {
        code_size.saturating_sub(1) * self.stride + self.kernel_size()
    }

    pub fn expand(&self, codes: &ArrayView4<f32>) -> Result<Array4<f32>> {
        let (batch_size, channels, code_size, _) = self.check_codes(codes)?;
        let (f, stride) = (self.kernel_size(), self.stride);
        let width = self.output_width(code_size);
        let mut output = Array4::zeros((batch_size, 1, width, width));
        for n in 0..batch_size {
            for k in 0..channels {
                let atom = self.kernel.slice(s![k, 0, .., ..]);
                for i in 0..code_size {
                    for j in 0..code_size {
                        let r = codes[[n, k, i, j]];
                        if r == 0.0 {
                            continue;
                        }
                        let (y, x) = (i * stride, j * stride);
                        output
                            .slice_mut(s![n, 0, y..y + f, x..x + f])
                            .scaled_add(r, &atom);
                    }
                }
            }
        }
        Ok(output)
    }

    /// Adjoint of [`Expander::expand`]: maps a gradient w.r.t. the output map
    /// back to a gradient w.r.t. the codes.
    pub fn adjoint(&self, grad_map: &ArrayView4<f32>, code_size: usize) -> Result<Array4<f32>> {
        let batch_size = self.check_map(grad_map, code_size)?;
        let (f, stride) = (self.kernel_size(), self.stride);
        let mut grad_codes =
            Array4::zeros((batch_size, self.num_channels(), code_size, code_size));
        for n in 0..batch_size {
            for k in 0..self.num_channels() {
                let atom = self.kernel.slice(s![k, 0, .., ..]);
                for i in 0..code_size {
                    for j in 0..code_size {
                        let (y, x) = (i * stride, j * stride);
                        let window = grad_map.slice(s![n, 0, y..y + f, x..x + f]);
                        grad_codes[[n, k, i, j]] = Zip::from(&window)
                            .and(&atom)
                            .fold(0.0, |acc, &g, &w| acc + g * w);
                    }
                }
            }
        }
        Ok(grad_codes)
    }

    /// Gradient of a scalar loss w.r.t. the kernel, summed over the batch.
    pub fn kernel_grad(
        &self,
        codes: &ArrayView4<f32>,
        grad_map: &ArrayView4<f32>,
    ) -> Result<Array4<f32>> {
        let (batch_size, channels, code_size, _) = self.check_codes(codes)?;
        if self.check_map(grad_map, code_size)? != batch_size {
            let width = self.output_width(code_size);
            return Err(SparseNetError::BatchShape {
                expected: vec![batch_size, 1, width, width],
                actual: grad_map.shape().to_vec(),
            });
        }
        let (f, stride) = (self.kernel_size(), self.stride);
        let mut grad = Array4::zeros(self.kernel.raw_dim());
        for n in 0..batch_size {
            for k in 0..channels {
                for i in 0..code_size {
                    for j in 0..code_size {
                        let r = codes[[n, k, i, j]];
                        if r == 0.0 {
                            continue;
                        }
                        let (y, x) = (i * stride, j * stride);
                        grad.slice_mut(s![k, 0, .., ..])
                            .scaled_add(r, &grad_map.slice(s![n, 0, y..y + f, x..x + f]));
                    }
                }
            }
        }
        Ok(grad)
    }

    fn check_codes(&self, codes: &ArrayView4<f32>) -> Result<(usize, usize, usize, usize)> {
        let (batch_size, channels, height, width) = codes.dim();
        if channels != self.num_channels() || height != width || height == 0 {
            return Err(SparseNetError::BatchShape {
                expected: vec![batch_size, self.num_channels(), height, height],
                actual: codes.shape().to_vec(),
            });
        }
        Ok((batch_size, channels, height, width))
    }

    fn check_map(&self, grad_map: &ArrayView4<f32>, code_size: usize) -> Result<usize> {
        let width = self.output_width(code_size);
        let (batch_size, channels, height, map_width) = grad_map.dim();
        if channels != 1 || height != width || map_width != width {
            return Err(SparseNetError::BatchShape {
                expected: vec![batch_size, 1, width, width],
                actual: grad_map.shape().to_vec(),
            });
        }
        Ok(batch_size)
    }
}
