pub mod engine;
pub mod filters;
pub mod spectral;
pub mod statistics;

pub use engine::{AnalysisResult, ProgressCallback, SpectralEngine};
pub use spectral::{dominant_frequency, fft_in_place, magnitude_spectrum, next_pow2, power_spectrum};
