pub mod sample;

pub use sample::{amplitudes, is_valid_channel, ChannelId, Sample, MAX_CHANNELS};
