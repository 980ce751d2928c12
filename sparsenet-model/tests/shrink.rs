use ndarray::Array1;
use sparsenet_model::*;

fn samples() -> Vec<f32> {
    (-40..=40).map(|i| i as f32 * 0.037).collect()
}

#[test]
fn test_shrink_keeps_sign_and_reduces_magnitude() {
    for lambda in [0.0f32, 0.01, 0.2, 1.0, 5.0] {
        for x in samples() {
            let y = soft_threshold(x, lambda);
            assert!(y == 0.0 || y.signum() == x.signum(), "x {} lambda {}", x, lambda);
            let expected = (x.abs() - lambda).max(0.0);
            assert!((y.abs() - expected).abs() <= 1e-6, "x {} lambda {}", x, lambda);
        }
    }
}

#[test]
fn test_shrink_without_penalty_is_identity() {
    for x in samples() {
        assert_eq!(soft_threshold(x, 0.0), x);
    }
    let mut values = Array1::from(samples());
    shrink_inplace(&mut values, 0.0);
    assert_eq!(values, Array1::from(samples()));
}

#[test]
fn test_shrink_zeroes_inside_threshold() {
    let mut values = Array1::from(samples());
    shrink_inplace(&mut values, 0.5);
    for (y, x) in values.iter().zip(samples()) {
        if x.abs() <= 0.5 {
            assert_eq!(*y, 0.0);
        }
    }
}
