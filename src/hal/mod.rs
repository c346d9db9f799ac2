pub mod format_converter;
pub mod mock;
pub mod traits;
pub mod types;

pub use traits::{AdcBackend, AdcContext, AdcDevice, DeviceBuffer};
pub use types::{
    AcquisitionConfig, SubDeviceLayout, ADC0_NAME, ADC1_NAME, DEFAULT_BUFFER_SIZE,
    DEFAULT_SAMPLE_RATE, SLOT_SIZE, SUB_DEVICES,
};
