use num_complex::Complex64;
use std::f64::consts::PI;

/// Smallest power of two that is `>= n` (1 for `n <= 1`)
pub fn next_pow2(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

fn reverse_bits(mut value: usize, bits: u32) -> usize {
    let mut reversed = 0;
    for _ in 0..bits {
        reversed = (reversed << 1) | (value & 1);
        value >>= 1;
    }
    reversed
}

/// In-place iterative radix-2 Cooley-Tukey transform.
///
/// `data.len()` must be a power of two.
pub fn fft_in_place(data: &mut [Complex64]) {
    let n = data.len();
    if n <= 1 {
        return;
    }
    debug_assert!(n.is_power_of_two());

    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = reverse_bits(i, bits);
        if j > i {
            data.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let angle = -2.0 * PI / len as f64;
        let wlen = Complex64::new(angle.cos(), angle.sin());
        let half = len / 2;

        for start in (0..n).step_by(len) {
            let mut w = Complex64::new(1.0, 0.0);
            for j in 0..half {
                let u = data[start + j];
                let v = data[start + j + half] * w;
                data[start + j] = u + v;
                data[start + j + half] = u - v;
                w *= wlen;
            }
        }
        len *= 2;
    }
}

/// Magnitudes of the first `padded / 2` bins of the zero-padded transform
pub fn magnitude_spectrum(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    let padded = next_pow2(values.len());
    let mut data: Vec<Complex64> = values.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    data.resize(padded, Complex64::new(0.0, 0.0));

    fft_in_place(&mut data);

    data.iter().take(padded / 2).map(|c| c.norm()).collect()
}

pub fn power_spectrum(values: &[f64]) -> Vec<f64> {
    magnitude_spectrum(values).into_iter().map(|m| m * m).collect()
}

/// Bin with the largest magnitude, ignoring DC; the first bin wins ties
pub fn peak_bin(magnitudes: &[f64]) -> Option<usize> {
    if magnitudes.len() < 2 {
        return None;
    }
    let mut best = 1;
    for (i, &m) in magnitudes.iter().enumerate().skip(2) {
        if m > magnitudes[best] {
            best = i;
        }
    }
    Some(best)
}

/// Frequency of the strongest non-DC bin, `bin * sample_rate / padded`
pub fn dominant_frequency(values: &[f64], sample_rate: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let magnitudes = magnitude_spectrum(values);
    match peak_bin(&magnitudes) {
        Some(bin) => bin as f64 * sample_rate / next_pow2(values.len()) as f64,
        None => 0.0,
    }
}
