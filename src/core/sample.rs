use serde::{Deserialize, Serialize};

/// Number of channel slots a session can address (hardware channels 0..12)
pub const MAX_CHANNELS: usize = 13;

/// Channel index in `0..MAX_CHANNELS`
pub type ChannelId = usize;

/// One reading on a channel's timeline
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the start of the acquisition
    pub time: f64,
    pub amplitude: f64,
}

impl Sample {
    pub fn new(time: f64, amplitude: f64) -> Self {
        Self { time, amplitude }
    }
}

pub fn is_valid_channel(channel: ChannelId) -> bool {
    channel < MAX_CHANNELS
}

/// Extract the amplitude column of a sample sequence
pub fn amplitudes(samples: &[Sample]) -> Vec<f64> {
    samples.iter().map(|s| s.amplitude).collect()
}
