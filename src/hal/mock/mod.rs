pub mod adc;

pub use adc::{SimulatedAdc, Waveform};
