use crate::core::ChannelId;
use crate::hal::format_converter::pack_code_24;
use crate::hal::traits::{AdcBackend, AdcContext, AdcDevice, DeviceBuffer};
use crate::hal::types::{SubDeviceLayout, SLOT_SIZE, SUB_DEVICES};
use anyhow::{anyhow, Result};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Slots per scan on every simulated sub-device
const SLOTS_PER_SCAN: usize = 8;

/// Filler written into the unused top byte of each slot
const PAD_BYTE: u8 = 0xA5;

/// Signal generated on one simulated channel, in raw 24-bit codes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    Sine { frequency: f64, amplitude: i32 },
    Constant(i32),
    /// Code equals the running scan index, wrapping inside the 24-bit range
    Ramp,
}

impl Waveform {
    fn code_at(&self, scan: u64, sample_rate: f64) -> i32 {
        match *self {
            Waveform::Sine { frequency, amplitude } => {
                let phase = 2.0 * PI * frequency * scan as f64 / sample_rate;
                (amplitude as f64 * phase.sin()).round() as i32
            }
            Waveform::Constant(code) => code,
            Waveform::Ramp => (scan % (1 << 23)) as i32,
        }
    }
}

#[derive(Debug, Clone)]
struct RefillFault {
    device: String,
    successful_refills: usize,
}

#[derive(Debug, Clone)]
struct SimSettings {
    sample_rate: f64,
    waveforms: HashMap<ChannelId, Waveform>,
    scales: HashMap<ChannelId, f64>,
    locked_channels: HashSet<ChannelId>,
    missing_device: Option<String>,
    refill_fault: Option<RefillFault>,
    refill_delay: Duration,
    unreachable: bool,
}

impl SimSettings {
    fn waveform(&self, channel: ChannelId) -> Waveform {
        self.waveforms.get(&channel).copied().unwrap_or(Waveform::Sine {
            frequency: 10.0 * (channel + 1) as f64,
            amplitude: 1_000_000,
        })
    }
}

/// In-process stand-in for the two-ADC acquisition board.
///
/// Both sub-devices expose eight 32-bit slots per scan. Every slot carries a
/// 24-bit code with a junk top byte, as the hardware does.
#[derive(Debug, Clone)]
pub struct SimulatedAdc {
    settings: SimSettings,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl SimulatedAdc {
    pub fn new() -> Self {
        Self {
            settings: SimSettings {
                sample_rate: 1000.0,
                waveforms: HashMap::new(),
                scales: HashMap::new(),
                locked_channels: HashSet::new(),
                missing_device: None,
                refill_fault: None,
                refill_delay: Duration::from_millis(1),
                unreachable: false,
            },
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Rate at which the simulated scans are generated
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.settings.sample_rate = sample_rate;
        self
    }

    pub fn with_waveform(mut self, channel: ChannelId, waveform: Waveform) -> Self {
        self.settings.waveforms.insert(channel, waveform);
        self
    }

    /// Expose a `scale` attribute on the channel; channels without one report none
    pub fn with_scale(mut self, channel: ChannelId, scale: f64) -> Self {
        self.settings.scales.insert(channel, scale);
        self
    }

    /// Make the channel ignore enable requests, as a channel claimed elsewhere does
    pub fn with_locked_channel(mut self, channel: ChannelId) -> Self {
        self.settings.locked_channels.insert(channel);
        self
    }

    /// Pretend the named sub-device is absent from the context
    pub fn without_device(mut self, name: &str) -> Self {
        self.settings.missing_device = Some(name.to_string());
        self
    }

    /// Make refills on the named sub-device fail after `successful_refills` successes
    pub fn fail_refill_after(mut self, device: &str, successful_refills: usize) -> Self {
        self.settings.refill_fault = Some(RefillFault {
            device: device.to_string(),
            successful_refills,
        });
        self
    }

    pub fn with_refill_delay(mut self, delay: Duration) -> Self {
        self.settings.refill_delay = delay;
        self
    }

    /// Refuse every connection attempt
    pub fn unreachable(mut self) -> Self {
        self.settings.unreachable = true;
        self
    }

    /// Number of contexts opened so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of contexts closed so far
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedAdc {
    fn default() -> Self {
        Self::new()
    }
}

impl AdcBackend for SimulatedAdc {
    fn backend_id(&self) -> &str {
        "simulated"
    }

    fn open(&self, uri: &str) -> Result<Box<dyn AdcContext>> {
        if self.settings.unreachable {
            return Err(anyhow!("No route to {}", uri));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        debug!("Simulated context opened at {}", uri);

        Ok(Box::new(SimContext {
            settings: self.settings.clone(),
            closes: self.closes.clone(),
            closed: false,
        }))
    }
}

struct SimContext {
    settings: SimSettings,
    closes: Arc<AtomicUsize>,
    closed: bool,
}

impl AdcContext for SimContext {
    fn find_device(&mut self, name: &str) -> Option<Box<dyn AdcDevice>> {
        if self.closed || self.settings.missing_device.as_deref() == Some(name) {
            return None;
        }
        let layout = SUB_DEVICES.iter().find(|layout| layout.name == name)?;

        Some(Box::new(SimDevice {
            layout: *layout,
            settings: self.settings.clone(),
            enabled: [false; SLOTS_PER_SCAN],
        }))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct SimDevice {
    layout: SubDeviceLayout,
    settings: SimSettings,
    enabled: [bool; SLOTS_PER_SCAN],
}

impl AdcDevice for SimDevice {
    fn name(&self) -> &str {
        self.layout.name
    }

    fn channel_count(&self) -> usize {
        SLOTS_PER_SCAN
    }

    fn is_scan_element(&self, channel: usize) -> bool {
        channel < SLOTS_PER_SCAN
    }

    fn set_channel_enabled(&mut self, channel: usize, enabled: bool) {
        if self.settings.locked_channels.contains(&self.layout.global(channel)) {
            debug!("{} channel {} is locked", self.layout.name, channel);
            return;
        }
        if let Some(slot) = self.enabled.get_mut(channel) {
            *slot = enabled;
        }
    }

    fn is_channel_enabled(&self, channel: usize) -> bool {
        self.enabled.get(channel).copied().unwrap_or(false)
    }

    fn channel_scale(&self, channel: usize) -> Option<f64> {
        self.settings.scales.get(&self.layout.global(channel)).copied()
    }

    fn create_buffer(&mut self, samples: usize) -> Result<Box<dyn DeviceBuffer>> {
        if samples == 0 {
            return Err(anyhow!("Buffer of zero scans requested on {}", self.layout.name));
        }

        let failing_after = self
            .settings
            .refill_fault
            .as_ref()
            .filter(|fault| fault.device == self.layout.name)
            .map(|fault| fault.successful_refills);

        let block_len = samples
            .checked_mul(SLOTS_PER_SCAN * SLOT_SIZE)
            .ok_or_else(|| anyhow!("Buffer of {} scans is too large", samples))?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(block_len)
            .map_err(|e| anyhow!("Cannot allocate {} bytes on {}: {}", block_len, self.layout.name, e))?;

        let waveforms = (0..SLOTS_PER_SCAN)
            .map(|local| self.settings.waveform(self.layout.global(local)))
            .collect();

        Ok(Box::new(SimBuffer {
            device: self.layout.name.to_string(),
            waveforms,
            sample_rate: self.settings.sample_rate,
            scans: samples,
            bytes,
            next_scan: 0,
            refills: 0,
            failing_after,
            delay: self.settings.refill_delay,
        }))
    }
}

struct SimBuffer {
    device: String,
    waveforms: Vec<Waveform>,
    sample_rate: f64,
    scans: usize,
    bytes: Vec<u8>,
    next_scan: u64,
    refills: usize,
    failing_after: Option<usize>,
    delay: Duration,
}

impl DeviceBuffer for SimBuffer {
    fn refill(&mut self) -> Result<usize> {
        if self.failing_after.is_some_and(|limit| self.refills >= limit) {
            return Err(anyhow!("Simulated refill fault on {}", self.device));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        self.bytes.clear();
        for _ in 0..self.scans {
            for waveform in &self.waveforms {
                let code = waveform.code_at(self.next_scan, self.sample_rate);
                self.bytes
                    .extend_from_slice(&pack_code_24(code, PAD_BYTE).to_le_bytes());
            }
            self.next_scan += 1;
        }
        self.refills += 1;

        Ok(self.bytes.len())
    }

    fn start(&self) -> &[u8] {
        &self.bytes
    }

    fn step(&self) -> usize {
        SLOTS_PER_SCAN * SLOT_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::format_converter::demux_block;
    use crate::hal::types::{ADC0_NAME, ADC1_NAME};

    #[test]
    fn test_buffer_layout() {
        let adc = SimulatedAdc::new()
            .with_waveform(9, Waveform::Constant(-5))
            .with_refill_delay(Duration::ZERO);
        let mut ctx = adc.open("ip:sim").unwrap();
        let mut dev = ctx.find_device(ADC1_NAME).unwrap();
        let mut buf = dev.create_buffer(4).unwrap();

        assert_eq!(buf.refill().unwrap(), 4 * 32);
        let codes = demux_block(buf.start(), buf.step(), 4, &[1]).unwrap();
        assert_eq!(codes[0], vec![-5; 4]);
    }

    #[test]
    fn test_ramp_continues_across_refills() {
        let adc = SimulatedAdc::new()
            .with_waveform(0, Waveform::Ramp)
            .with_refill_delay(Duration::ZERO);
        let mut ctx = adc.open("ip:sim").unwrap();
        let mut dev = ctx.find_device(ADC0_NAME).unwrap();
        let mut buf = dev.create_buffer(3).unwrap();

        buf.refill().unwrap();
        buf.refill().unwrap();
        let codes = demux_block(buf.start(), buf.step(), 3, &[0]).unwrap();
        assert_eq!(codes[0], vec![3, 4, 5]);
    }

    #[test]
    fn test_fault_injection() {
        let adc = SimulatedAdc::new()
            .fail_refill_after(ADC0_NAME, 1)
            .without_device("missing")
            .with_refill_delay(Duration::ZERO);
        let mut ctx = adc.open("ip:sim").unwrap();
        let mut dev = ctx.find_device(ADC0_NAME).unwrap();
        let mut buf = dev.create_buffer(1).unwrap();

        assert!(buf.refill().is_ok());
        assert!(buf.refill().is_err());
        assert!(ctx.find_device("missing").is_none());
    }

    #[test]
    fn test_close_is_counted_once() {
        let adc = SimulatedAdc::new();
        let mut ctx = adc.open("ip:sim").unwrap();
        ctx.close();
        ctx.close();
        assert_eq!(adc.open_count(), 1);
        assert_eq!(adc.close_count(), 1);
        assert!(ctx.find_device(ADC0_NAME).is_none());
    }

    #[test]
    fn test_scale_attribute_per_channel() {
        let adc = SimulatedAdc::new().with_scale(10, 0.25);
        let mut ctx = adc.open("ip:sim").unwrap();
        let dev = ctx.find_device(ADC1_NAME).unwrap();
        assert_eq!(dev.channel_scale(2), Some(0.25));
        assert_eq!(dev.channel_scale(0), None);
    }

    #[test]
    fn test_locked_channel_ignores_enable() {
        let adc = SimulatedAdc::new().with_locked_channel(9);
        let mut ctx = adc.open("ip:sim").unwrap();
        let mut dev = ctx.find_device(ADC1_NAME).unwrap();

        dev.set_channel_enabled(0, true);
        dev.set_channel_enabled(1, true);
        assert!(dev.is_channel_enabled(0));
        assert!(!dev.is_channel_enabled(1));
    }

    #[test]
    fn test_oversized_buffer_is_refused() {
        let adc = SimulatedAdc::new();
        let mut ctx = adc.open("ip:sim").unwrap();
        let mut dev = ctx.find_device(ADC0_NAME).unwrap();

        assert!(dev.create_buffer(usize::MAX / 4).is_err());
        assert!(dev.create_buffer(usize::MAX / 64).is_err());
    }
}
