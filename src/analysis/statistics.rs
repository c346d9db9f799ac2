//! Scalar summaries of an amplitude sequence. Every function returns 0.0 for
//! empty input instead of failing.

pub fn max(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::max).unwrap_or(0.0)
}

pub fn min(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::min).unwrap_or(0.0)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Root mean square, `sqrt(mean(x²))`
pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = values.iter().map(|v| v * v).sum();
    (sum_squares / values.len() as f64).sqrt()
}

/// Sample standard deviation (denominator `n - 1`); 0.0 below two values
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    let sum_squared_diff: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (sum_squared_diff / (values.len() - 1) as f64).sqrt()
}
