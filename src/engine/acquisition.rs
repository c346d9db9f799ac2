use crate::buffers::SampleSink;
use crate::core::ChannelId;
use crate::error::DeviceError;
use crate::hal::format_converter::{codes_to_samples, demux_block};
use crate::hal::{AcquisitionConfig, AdcBackend, AdcContext, AdcDevice, DeviceBuffer, SubDeviceLayout, SUB_DEVICES};
use crate::observability::StreamMetrics;
use crossbeam_channel::{Sender, TrySendError};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Refills between two status reports
pub const STATUS_INTERVAL: u64 = 100;

/// Queue slots kept free for `Connected`, `Error` and `Disconnected`
pub const LIFECYCLE_RESERVE: usize = 4;

/// Progress and failure reports sent from the producer thread
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    Connected,
    /// `points` samples were pushed to `channel`
    Batch { channel: ChannelId, points: usize },
    Status(String),
    Error(String),
    Disconnected,
}

/// A sub-device opened for streaming, with its enabled channels resolved
struct ActiveBlock {
    layout: SubDeviceLayout,
    // Kept alive for as long as its buffer
    _device: Box<dyn AdcDevice>,
    buffer: Box<dyn DeviceBuffer>,
    /// Local channel indices, ascending
    channels: Vec<usize>,
    scales: Vec<f64>,
}

/// Continuous hardware read loop.
///
/// The producer owns a private copy of the configuration taken when it was
/// built. Every iteration refills both sub-devices before emitting anything so
/// that the channels of the two ADCs stay sample-aligned; a failed refill on
/// either one ends the loop.
pub struct AcquisitionProducer {
    config: AcquisitionConfig,
    sink: Arc<dyn SampleSink>,
    events: Sender<AcquisitionEvent>,
    running: Arc<AtomicBool>,
    metrics: Arc<StreamMetrics>,
}

impl AcquisitionProducer {
    pub fn new(
        config: AcquisitionConfig,
        sink: Arc<dyn SampleSink>,
        events: Sender<AcquisitionEvent>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            sink,
            events,
            running,
            metrics: Arc::new(StreamMetrics::new("acquisition")),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<StreamMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<StreamMetrics> {
        self.metrics.clone()
    }

    /// Run until the `running` flag is cleared or the device fails.
    ///
    /// The context is closed exactly once on every exit path, after which
    /// `Disconnected` is sent. A fatal error is also reported as an `Error` event.
    pub fn run(self, backend: &dyn AdcBackend) -> Result<(), DeviceError> {
        let result = self.open_and_stream(backend);

        if let Err(e) = &result {
            error!("Acquisition stopped: {}", e);
            self.metrics.record_error();
            self.send(AcquisitionEvent::Error(e.to_string()));
        }
        self.running.store(false, Ordering::SeqCst);
        self.send(AcquisitionEvent::Disconnected);

        result
    }

    fn open_and_stream(&self, backend: &dyn AdcBackend) -> Result<(), DeviceError> {
        self.config.validate()?;

        let uri = &self.config.device_uri;
        let mut context = backend.open(uri).map_err(|e| DeviceError::ContextUnavailable {
            uri: uri.clone(),
            reason: e.to_string(),
        })?;
        info!("Connected to {} via {}", uri, backend.backend_id());

        let result = self.stream(context.as_mut());
        context.close();
        debug!("Context {} closed", uri);

        result
    }

    fn stream(&self, context: &mut dyn AdcContext) -> Result<(), DeviceError> {
        let mut blocks = Vec::with_capacity(SUB_DEVICES.len());
        for layout in SUB_DEVICES {
            blocks.push(self.prepare_block(context, layout)?);
        }

        self.send(AcquisitionEvent::Connected);

        let sample_rate = self.config.sample_rate;
        let block_duration = self.config.buffer_size as f64 / sample_rate;
        let mut current_time = 0.0;
        let mut refills: u64 = 0;

        while self.running.load(Ordering::SeqCst) {
            let cycle = self.metrics.start_cycle();

            for block in blocks.iter_mut() {
                block.buffer.refill().map_err(|e| DeviceError::RefillFailed {
                    device: block.layout.name.to_string(),
                    reason: e.to_string(),
                })?;
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            for block in &blocks {
                self.emit_block(block, current_time)?;
            }

            current_time += block_duration;
            refills += 1;
            self.metrics.finish_cycle(cycle);

            if refills % STATUS_INTERVAL == 0 {
                let status = format!("Acquired {} blocks ({:.3} s)", refills, current_time);
                info!("{}", status);
                self.send(AcquisitionEvent::Status(status));
            }
        }

        Ok(())
    }

    /// Locate a sub-device, enable exactly the configured scan elements and allocate its buffer
    fn prepare_block(
        &self,
        context: &mut dyn AdcContext,
        layout: SubDeviceLayout,
    ) -> Result<ActiveBlock, DeviceError> {
        let mut device = context
            .find_device(layout.name)
            .ok_or_else(|| DeviceError::DeviceNotFound(layout.name.to_string()))?;

        let mut channels = Vec::new();
        for local in 0..device.channel_count() {
            if !device.is_scan_element(local) {
                continue;
            }
            let wanted = local < layout.channel_count && self.config.is_enabled(layout.global(local));
            device.set_channel_enabled(local, wanted);
            if !wanted {
                continue;
            }
            // Only channels the device reports as enabled are present in the scan
            if device.is_channel_enabled(local) {
                channels.push(local);
            } else {
                warn!(
                    "{} did not enable channel {}, it will not be acquired",
                    device.name(),
                    layout.global(local)
                );
            }
        }

        for &global in &self.config.enabled_channels {
            if let Some(local) = layout.local(global) {
                if !device.is_scan_element(local) {
                    warn!("Channel {} is not a scan element of {}", global, device.name());
                }
            }
        }

        let scales = channels
            .iter()
            .map(|&local| match device.channel_scale(local) {
                Some(scale) if scale.is_finite() => scale,
                _ => 1.0,
            })
            .collect();

        let buffer = device
            .create_buffer(self.config.buffer_size)
            .map_err(|e| DeviceError::BufferCreation {
                device: layout.name.to_string(),
                reason: e.to_string(),
            })?;

        debug!("{} streaming local channels {:?}", layout.name, channels);

        Ok(ActiveBlock {
            layout,
            _device: device,
            buffer,
            channels,
            scales,
        })
    }

    fn emit_block(&self, block: &ActiveBlock, current_time: f64) -> Result<(), DeviceError> {
        if block.channels.is_empty() {
            return Ok(());
        }

        let codes = demux_block(
            block.buffer.start(),
            block.buffer.step(),
            self.config.buffer_size,
            &block.channels,
        )
        .map_err(|e| DeviceError::RefillFailed {
            device: block.layout.name.to_string(),
            reason: e.to_string(),
        })?;

        for ((&local, &scale), channel_codes) in block.channels.iter().zip(&block.scales).zip(&codes) {
            let channel = block.layout.global(local);
            let samples = codes_to_samples(channel_codes, scale, current_time, self.config.sample_rate);
            let points = samples.len();

            self.sink.push_samples(channel, samples);
            self.metrics.record_batch(points);
            self.send(AcquisitionEvent::Batch { channel, points });
        }

        Ok(())
    }

    /// Never blocks. On a bounded queue `Batch` and `Status` are dropped once
    /// only the lifecycle reserve is left.
    fn send(&self, event: AcquisitionEvent) {
        let advisory = matches!(
            event,
            AcquisitionEvent::Batch { .. } | AcquisitionEvent::Status(_)
        );
        if advisory {
            if let Some(capacity) = self.events.capacity() {
                if self.events.len() + LIFECYCLE_RESERVE >= capacity {
                    return;
                }
            }
        }

        match self.events.try_send(event) {
            // Nobody listening is not an error for the producer
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event)) => warn!("Event queue full, dropped {:?}", event),
        }
    }
}
