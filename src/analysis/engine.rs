use chrono::{DateTime, Local};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::{spectral, statistics};
use crate::core::{amplitudes, ChannelId, Sample};

/// Advisory progress observer: percentage (0-100) and a short message
pub type ProgressCallback = Box<dyn Fn(u8, &str) + Send + Sync>;

/// Summary of one channel snapshot, ready to be persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Assigned by the store when the result is saved
    pub analysis_id: Option<i64>,
    pub task_id: i64,
    pub channel: ChannelId,
    pub max_amplitude: f64,
    pub min_amplitude: f64,
    pub avg_amplitude: f64,
    pub rms_value: f64,
    pub std_dev: f64,
    /// Dominant frequency in Hz
    pub frequency: f64,
    pub analysis_time: DateTime<Local>,
}

impl AnalysisResult {
    fn empty(task_id: i64, channel: ChannelId) -> Self {
        Self {
            analysis_id: None,
            task_id,
            channel,
            max_amplitude: 0.0,
            min_amplitude: 0.0,
            avg_amplitude: 0.0,
            rms_value: 0.0,
            std_dev: 0.0,
            frequency: 0.0,
            analysis_time: Local::now(),
        }
    }
}

/// Statistical and spectral analysis over sample snapshots.
///
/// The engine holds no data of its own; each call works on the slice it is
/// given, so one engine can be shared between threads.
#[derive(Default)]
pub struct SpectralEngine {
    progress: Option<ProgressCallback>,
}

impl SpectralEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u8, &str) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    fn report(&self, percent: u8, message: &str) {
        if let Some(progress) = &self.progress {
            progress(percent, message);
        }
    }

    pub fn magnitude_spectrum(&self, samples: &[Sample]) -> Vec<f64> {
        if samples.is_empty() {
            return Vec::new();
        }
        self.report(10, "Preparing FFT input");
        let values = amplitudes(samples);
        self.report(30, "Running FFT");
        let magnitudes = spectral::magnitude_spectrum(&values);
        self.report(90, "FFT complete");
        magnitudes
    }

    pub fn power_spectrum(&self, samples: &[Sample]) -> Vec<f64> {
        let power = self
            .magnitude_spectrum(samples)
            .into_iter()
            .map(|m| m * m)
            .collect();
        self.report(100, "Power spectrum complete");
        power
    }

    pub fn dominant_frequency(&self, samples: &[Sample], sample_rate: f64) -> f64 {
        if samples.len() < 2 {
            return 0.0;
        }
        let magnitudes = self.magnitude_spectrum(samples);
        self.report(70, "Locating spectral peak");

        let Some(bin) = spectral::peak_bin(&magnitudes) else {
            return 0.0;
        };
        let frequency = bin as f64 * sample_rate / spectral::next_pow2(samples.len()) as f64;
        debug!(
            "Dominant frequency {:.3} Hz (bin {}, magnitude {:.3})",
            frequency, bin, magnitudes[bin]
        );
        frequency
    }

    /// Statistics plus dominant frequency for one channel snapshot
    pub fn analyze(
        &self,
        samples: &[Sample],
        task_id: i64,
        channel: ChannelId,
        sample_rate: f64,
    ) -> AnalysisResult {
        let mut result = AnalysisResult::empty(task_id, channel);
        if samples.is_empty() {
            warn!("No samples to analyse on channel {}", channel);
            return result;
        }

        self.report(0, "Starting analysis");
        let values = amplitudes(samples);

        self.report(10, "Computing statistics");
        result.max_amplitude = statistics::max(&values);
        result.min_amplitude = statistics::min(&values);
        result.avg_amplitude = statistics::mean(&values);
        result.rms_value = statistics::rms(&values);
        result.std_dev = statistics::std_dev(&values);

        self.report(50, "Frequency analysis");
        result.frequency = self.dominant_frequency(samples, sample_rate);
        result.analysis_time = Local::now();

        self.report(100, "Analysis complete");
        debug!(
            "Task {} channel {}: max {:.4} min {:.4} mean {:.4} rms {:.4} f {:.3} Hz",
            task_id,
            channel,
            result.max_amplitude,
            result.min_amplitude,
            result.avg_amplitude,
            result.rms_value,
            result.frequency
        );

        result
    }
}
