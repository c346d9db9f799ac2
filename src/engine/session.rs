use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::buffers::SampleBuffer;
use crate::engine::acquisition::{AcquisitionEvent, AcquisitionProducer};
use crate::engine::state::SessionState;
use crate::error::DeviceError;
use crate::hal::{AcquisitionConfig, AdcBackend};
use crate::observability::StreamMetrics;

/// Producer events held until `poll_events`; beyond this `Batch` and `Status`
/// events are dropped
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Controller that owns one hardware acquisition and the buffer it fills.
///
/// The producer runs on its own OS thread because `refill` blocks on device
/// I/O. Configuration changes are stored immediately but only reach the
/// producer on the next `start`.
pub struct AcquisitionSession {
    config: AcquisitionConfig,
    buffer: Arc<SampleBuffer>,
    state: SessionState,
    running: Arc<AtomicBool>,
    events_tx: Sender<AcquisitionEvent>,
    events_rx: Receiver<AcquisitionEvent>,
    worker: Option<JoinHandle<Result<(), DeviceError>>>,
    metrics: Arc<StreamMetrics>,
}

impl AcquisitionSession {
    pub fn new(buffer: Arc<SampleBuffer>) -> Self {
        let (events_tx, events_rx) = bounded(EVENT_QUEUE_CAPACITY);
        Self {
            config: AcquisitionConfig::default(),
            buffer,
            state: SessionState::Idle,
            running: Arc::new(AtomicBool::new(false)),
            events_tx,
            events_rx,
            worker: None,
            metrics: Arc::new(StreamMetrics::new("acquisition")),
        }
    }

    /// Replace the configuration used by the next `start`
    pub fn configure(&mut self, config: AcquisitionConfig) -> Result<(), DeviceError> {
        config.validate()?;
        if self.state.is_active() {
            info!("Configuration updated, takes effect on next start");
        }
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn buffer(&self) -> Arc<SampleBuffer> {
        self.buffer.clone()
    }

    pub fn metrics(&self) -> Arc<StreamMetrics> {
        self.metrics.clone()
    }

    /// Spawn the producer thread against `backend`
    pub fn start(&mut self, backend: Arc<dyn AdcBackend>) -> Result<()> {
        // Reap a producer that has ended (or is ending) on its own
        if self.worker.is_some() && !self.is_running() {
            self.stop()?;
        }
        if self.state.is_active() || self.worker.is_some() {
            return Err(anyhow!("Acquisition is already running"));
        }
        self.config.validate()?;

        self.transition(SessionState::Connecting);
        self.running.store(true, Ordering::SeqCst);

        let producer = AcquisitionProducer::new(
            self.config.clone(),
            self.buffer.clone(),
            self.events_tx.clone(),
            self.running.clone(),
        )
        .with_metrics(self.metrics.clone());

        let spawned = std::thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || producer.run(backend.as_ref()));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!(
                    "Acquisition started on {} channels at {} Hz",
                    self.config.enabled_channels.len(),
                    self.config.sample_rate
                );
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.transition(SessionState::Error {
                    message: e.to_string(),
                });
                Err(e).context("Failed to spawn acquisition thread")
            }
        }
    }

    /// Clear the running flag and wait for the producer to release the device.
    ///
    /// The producer notices the flag at its next refill, so this may block for
    /// up to one block duration.
    pub fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);

        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        let joined = handle.join();

        self.poll_events();

        match joined {
            Ok(Ok(())) => {
                if self.state.is_active() {
                    self.transition(SessionState::Stopped);
                }
                info!("Acquisition stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                // Already reported through the event stream
                if !matches!(self.state, SessionState::Error { .. }) {
                    self.transition(SessionState::Error {
                        message: e.to_string(),
                    });
                }
                Ok(())
            }
            Err(_) => {
                self.transition(SessionState::Error {
                    message: "acquisition thread panicked".to_string(),
                });
                Err(anyhow!("Acquisition thread panicked"))
            }
        }
    }

    /// Drain pending producer events, updating the session state from them
    pub fn poll_events(&mut self) -> Vec<AcquisitionEvent> {
        let events: Vec<AcquisitionEvent> = self.events_rx.try_iter().collect();

        for event in &events {
            match event {
                AcquisitionEvent::Connected => self.transition(SessionState::Running),
                AcquisitionEvent::Error(message) => self.transition(SessionState::Error {
                    message: message.clone(),
                }),
                AcquisitionEvent::Disconnected => {
                    if self.state.is_active() {
                        self.transition(SessionState::Stopped);
                    }
                }
                AcquisitionEvent::Batch { .. } | AcquisitionEvent::Status(_) => {}
            }
        }

        events
    }

    fn transition(&mut self, next: SessionState) {
        if self.state.can_transition_to(&next) {
            self.state = next;
        } else {
            warn!(
                "Ignoring session transition {} -> {}",
                self.state.name(),
                next.name()
            );
        }
    }
}

/// Dropping a session only signals the producer; call `stop()` to wait for it.
impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
