//! Signal conditioning applied to sample sequences before display or analysis.
//! Timestamps are carried through untouched unless stated otherwise.

use crate::core::Sample;
use std::f64::consts::PI;

fn rc_constant(cutoff_hz: f64) -> f64 {
    1.0 / (2.0 * PI * cutoff_hz)
}

/// First-order RC low-pass
pub fn low_pass(samples: &[Sample], cutoff_hz: f64, sample_rate: f64) -> Vec<Sample> {
    let mut filtered = samples.to_vec();
    let dt = 1.0 / sample_rate;
    let rc = rc_constant(cutoff_hz);
    let alpha = dt / (rc + dt);

    for i in 1..filtered.len() {
        filtered[i].amplitude = alpha * samples[i].amplitude + (1.0 - alpha) * filtered[i - 1].amplitude;
    }
    filtered
}

/// First-order RC high-pass
pub fn high_pass(samples: &[Sample], cutoff_hz: f64, sample_rate: f64) -> Vec<Sample> {
    let mut filtered = samples.to_vec();
    let dt = 1.0 / sample_rate;
    let rc = rc_constant(cutoff_hz);
    let alpha = rc / (rc + dt);

    for i in 1..filtered.len() {
        filtered[i].amplitude =
            alpha * (filtered[i - 1].amplitude + samples[i].amplitude - samples[i - 1].amplitude);
    }
    filtered
}

/// Keep every `factor`-th sample starting with the first
pub fn downsample(samples: &[Sample], factor: usize) -> Vec<Sample> {
    if factor <= 1 {
        return samples.to_vec();
    }
    samples.iter().step_by(factor).copied().collect()
}

/// Centred moving average over `window` samples, shrinking at the edges
pub fn moving_average(samples: &[Sample], window: usize) -> Vec<Sample> {
    if window <= 1 || samples.is_empty() {
        return samples.to_vec();
    }
    let half = window / 2;
    let last = samples.len() - 1;

    samples
        .iter()
        .enumerate()
        .map(|(i, sample)| {
            let span = &samples[i.saturating_sub(half)..=(i + half).min(last)];
            let sum: f64 = span.iter().map(|s| s.amplitude).sum();
            Sample::new(sample.time, sum / span.len() as f64)
        })
        .collect()
}

/// Min-max rescale of amplitudes into `[0, 1]`; a flat signal is returned unchanged
pub fn normalize(samples: &[Sample]) -> Vec<Sample> {
    let (lo, hi) = samples.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
        (lo.min(s.amplitude), hi.max(s.amplitude))
    });
    let range = hi - lo;
    if samples.is_empty() || range == 0.0 {
        return samples.to_vec();
    }

    samples
        .iter()
        .map(|s| Sample::new(s.time, (s.amplitude - lo) / range))
        .collect()
}

/// Multiply times by `scale_time` and amplitudes by `scale_amplitude`
pub fn scale(samples: &[Sample], scale_time: f64, scale_amplitude: f64) -> Vec<Sample> {
    samples
        .iter()
        .map(|s| Sample::new(s.time * scale_time, s.amplitude * scale_amplitude))
        .collect()
}
