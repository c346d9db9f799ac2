use crate::core::{is_valid_channel, ChannelId};
use crate::error::DeviceError;
use serde::{Deserialize, Serialize};

pub const ADC0_NAME: &str = "cf_axi_adc";
pub const ADC1_NAME: &str = "cf_axi_adc_1";

/// Bytes occupied by one channel inside a scan
pub const SLOT_SIZE: usize = 4;

pub const DEFAULT_BUFFER_SIZE: usize = 2560;
pub const DEFAULT_SAMPLE_RATE: f64 = 1000.0;

/// How one sub-device's local channels map into the session channel space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubDeviceLayout {
    pub name: &'static str,
    pub first_channel: ChannelId,
    pub channel_count: usize,
}

impl SubDeviceLayout {
    pub fn global(&self, local: usize) -> ChannelId {
        self.first_channel + local
    }

    pub fn local(&self, global: ChannelId) -> Option<usize> {
        global
            .checked_sub(self.first_channel)
            .filter(|&local| local < self.channel_count)
    }
}

/// Channels 0..7 live on the first ADC, channels 8..12 on the first five of the second
pub const SUB_DEVICES: [SubDeviceLayout; 2] = [
    SubDeviceLayout {
        name: ADC0_NAME,
        first_channel: 0,
        channel_count: 8,
    },
    SubDeviceLayout {
        name: ADC1_NAME,
        first_channel: 8,
        channel_count: 5,
    },
];

/// Acquisition parameters captured by the producer when it starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub device_uri: String,
    pub enabled_channels: Vec<ChannelId>,
    pub sample_rate: f64,
    /// Scans per refill on each sub-device
    pub buffer_size: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            device_uri: "ip:192.168.10.131".to_string(),
            enabled_channels: vec![0, 1],
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl AcquisitionConfig {
    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.enabled_channels.is_empty() {
            return Err(DeviceError::InvalidConfig("no channels enabled".to_string()));
        }
        if let Some(ch) = self.enabled_channels.iter().find(|&&ch| !is_valid_channel(ch)) {
            return Err(DeviceError::InvalidConfig(format!("channel {} out of range", ch)));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(DeviceError::InvalidConfig(format!(
                "sample rate {} must be positive",
                self.sample_rate
            )));
        }
        if self.buffer_size == 0 {
            return Err(DeviceError::InvalidConfig("buffer size must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn is_enabled(&self, channel: ChannelId) -> bool {
        self.enabled_channels.contains(&channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_mapping() {
        let adc1 = SUB_DEVICES[1];
        assert_eq!(adc1.local(8), Some(0));
        assert_eq!(adc1.local(12), Some(4));
        assert_eq!(adc1.local(13), None);
        assert_eq!(adc1.local(7), None);
        assert_eq!(adc1.global(3), 11);
        assert_eq!(SUB_DEVICES[0].local(7), Some(7));
    }

    #[test]
    fn test_config_validation() {
        assert!(AcquisitionConfig::default().validate().is_ok());

        let mut config = AcquisitionConfig::default();
        config.enabled_channels = vec![0, 13];
        assert!(config.validate().is_err());

        let mut config = AcquisitionConfig::default();
        config.sample_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = AcquisitionConfig::default();
        config.enabled_channels.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_defaults_from_partial_json() {
        let config: AcquisitionConfig =
            serde_json::from_str(r#"{"enabled_channels": [3, 9]}"#).unwrap();
        assert_eq!(config.enabled_channels, vec![3, 9]);
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
    }
}
