use anyhow::Result;

/// Block buffer of interleaved scans captured by one sub-device
pub trait DeviceBuffer: Send {
    /// Block until the next block of scans has been captured; returns the byte count
    fn refill(&mut self) -> Result<usize>;

    /// Bytes of the most recent refill, beginning at the first scan
    fn start(&self) -> &[u8];

    /// Distance in bytes between consecutive scans
    fn step(&self) -> usize;
}

/// One ADC sub-device exposing a set of scan-element channels
pub trait AdcDevice: Send {
    fn name(&self) -> &str;

    fn channel_count(&self) -> usize;

    /// Whether the channel can take part in buffered reads
    fn is_scan_element(&self, channel: usize) -> bool;

    fn set_channel_enabled(&mut self, channel: usize, enabled: bool);

    fn is_channel_enabled(&self, channel: usize) -> bool;

    /// The channel's `scale` attribute, if the device exposes one
    fn channel_scale(&self, channel: usize) -> Option<f64>;

    /// Allocate a buffer holding `samples` scans per refill
    fn create_buffer(&mut self, samples: usize) -> Result<Box<dyn DeviceBuffer>>;
}

/// An open connection to acquisition hardware
pub trait AdcContext: Send {
    fn find_device(&mut self, name: &str) -> Option<Box<dyn AdcDevice>>;

    /// Release the connection and everything created from it
    fn close(&mut self);
}

/// Entry point implemented by each hardware access layer
pub trait AdcBackend: Send + Sync {
    /// Unique backend identifier (e.g., "simulated")
    fn backend_id(&self) -> &str;

    /// Connect to the hardware addressed by `uri`
    fn open(&self, uri: &str) -> Result<Box<dyn AdcContext>>;
}
