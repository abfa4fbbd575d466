// Vector helpers for the ranking pipeline

use ndarray::Array1;

/// L2 norm of a vector
pub fn l2_norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

/// Normalize vector to unit length in place
pub fn normalize(v: &mut Array1<f64>) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        *v /= norm;
    }
}

/// Index of the maximum element (first one on ties)
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &x) in values.iter().enumerate().skip(1) {
        if x > values[best] {
            best = i;
        }
    }
    best
}
