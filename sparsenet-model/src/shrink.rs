use ndarray::{ArrayBase, DataMut, Dimension};

/// Soft-thresholding: sign(x) * max(|x| - threshold, 0).
///
/// This is the proximal operator of `threshold * |x|`, so values inside
/// `[-threshold, threshold]` become exactly zero.
#[inline]
pub fn soft_threshold(x: f32, threshold: f32) -> f32 {
    let shrunk = x.abs() - threshold;
    if shrunk > 0.0 {
        shrunk.copysign(x)
    } else {
        0.0
    }
}

/// Applies [`soft_threshold`] to every element in place.
pub fn shrink_inplace<S, D>(values: &mut ArrayBase<S, D>, threshold: f32)
where
    S: DataMut<Elem = f32>,
    D: Dimension,
{
    values.mapv_inplace(|x| soft_threshold(x, threshold));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_soft_threshold() {
        assert_eq!(soft_threshold(1.0, 0.25), 0.75);
        assert_eq!(soft_threshold(-1.0, 0.25), -0.75);
        assert_eq!(soft_threshold(0.2, 0.25), 0.0);
        assert_eq!(soft_threshold(-0.25, 0.25), 0.0);
        assert_eq!(soft_threshold(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_shrink_inplace() {
        let mut values = array![[0.5f32, -0.01], [0.0, -2.0]];
        shrink_inplace(&mut values, 0.1);
        assert_eq!(values, array![[0.4f32, 0.0], [0.0, -1.9]]);
    }
}
