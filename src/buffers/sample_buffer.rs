use crate::core::{is_valid_channel, ChannelId, Sample, MAX_CHANNELS};
use crate::error::BufferError;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_MAX_CAPACITY: usize = 100_000;

/// Pending notifications held per subscriber before new ones are dropped
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// `DataAdded` stops at this depth so `ChannelFull` still finds room
const DATA_EVENT_LIMIT: usize = EVENT_QUEUE_CAPACITY / 2;

/// Notifications emitted after a mutating call has released the data lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferEvent {
    DataAdded(ChannelId),
    /// The channel exceeded capacity and its oldest samples were evicted
    ChannelFull(ChannelId),
}

/// Destination for decoded sample batches produced by an acquisition source
pub trait SampleSink: Send + Sync {
    fn push_samples(&self, channel: ChannelId, samples: Vec<Sample>);
}

struct Channels {
    data: [VecDeque<Sample>; MAX_CHANNELS],
    max_capacity: usize,
}

/// Bounded per-channel sample store shared between producer and consumer threads.
///
/// A single mutex guards every channel, so each method is one critical section
/// and `read_all` observes all channels at the same instant. When a channel
/// grows past `max_capacity` its oldest samples are dropped first.
pub struct SampleBuffer {
    inner: Mutex<Channels>,
    subscribers: Mutex<Vec<Sender<BufferEvent>>>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_CAPACITY)
    }

    /// Create a buffer with the given per-channel bound; zero falls back to the default
    pub fn with_capacity(max_capacity: usize) -> Self {
        let max_capacity = if max_capacity == 0 {
            warn!("Invalid buffer capacity 0, using {}", DEFAULT_MAX_CAPACITY);
            DEFAULT_MAX_CAPACITY
        } else {
            max_capacity
        };

        Self {
            inner: Mutex::new(Channels {
                data: std::array::from_fn(|_| VecDeque::new()),
                max_capacity,
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register for buffer notifications.
    ///
    /// Each subscriber gets a queue of [`EVENT_QUEUE_CAPACITY`] events. A
    /// subscriber that stops reading loses `DataAdded` first, then `ChannelFull`;
    /// appends never wait on it.
    pub fn subscribe(&self) -> Receiver<BufferEvent> {
        let (tx, rx) = bounded(EVENT_QUEUE_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    pub fn append(&self, channel: ChannelId, sample: Sample) {
        self.append_batch(channel, std::slice::from_ref(&sample));
    }

    pub fn append_batch(&self, channel: ChannelId, samples: &[Sample]) {
        if samples.is_empty() {
            return;
        }
        if !is_valid_channel(channel) {
            warn!("Rejected append to invalid channel {}", channel);
            return;
        }

        let trimmed = {
            let mut inner = self.channels();
            let max_capacity = inner.max_capacity;
            let data = &mut inner.data[channel];
            data.extend(samples.iter().copied());

            if data.len() > max_capacity {
                let excess = data.len() - max_capacity;
                data.drain(..excess);
                true
            } else {
                false
            }
        };

        if trimmed {
            self.notify(BufferEvent::ChannelFull(channel));
        }
        self.notify(BufferEvent::DataAdded(channel));
    }

    /// Copy of the newest `max_points` samples in time order, or all of them for `None`
    pub fn read(&self, channel: ChannelId, max_points: Option<usize>) -> Vec<Sample> {
        if !is_valid_channel(channel) {
            warn!("Rejected read of invalid channel {}", channel);
            return Vec::new();
        }

        let inner = self.channels();
        let data = &inner.data[channel];
        let skip = match max_points {
            Some(n) if n < data.len() => data.len() - n,
            _ => 0,
        };
        data.iter().skip(skip).copied().collect()
    }

    /// Snapshot of every channel, indexed by channel id
    pub fn read_all(&self) -> Vec<Vec<Sample>> {
        let inner = self.channels();
        inner
            .data
            .iter()
            .map(|data| data.iter().copied().collect())
            .collect()
    }

    pub fn count(&self, channel: ChannelId) -> usize {
        if !is_valid_channel(channel) {
            warn!("Rejected count of invalid channel {}", channel);
            return 0;
        }
        self.channels().data[channel].len()
    }

    pub fn clear(&self) {
        let mut inner = self.channels();
        for data in inner.data.iter_mut() {
            data.clear();
        }
        debug!("Sample buffer cleared");
    }

    pub fn clear_channel(&self, channel: ChannelId) {
        if !is_valid_channel(channel) {
            warn!("Rejected clear of invalid channel {}", channel);
            return;
        }
        self.channels().data[channel].clear();
        debug!("Channel {} cleared", channel);
    }

    pub fn max_capacity(&self) -> usize {
        self.channels().max_capacity
    }

    /// Change the per-channel bound, trimming every channel down to its newest samples
    pub fn set_max_capacity(&self, capacity: usize) -> Result<(), BufferError> {
        if capacity == 0 {
            warn!("Rejected buffer capacity {}", capacity);
            return Err(BufferError::InvalidCapacity(capacity));
        }

        let mut inner = self.channels();
        inner.max_capacity = capacity;
        for data in inner.data.iter_mut() {
            if data.len() > capacity {
                let excess = data.len() - capacity;
                data.drain(..excess);
            }
        }
        debug!("Buffer capacity set to {}", capacity);
        Ok(())
    }

    fn channels(&self) -> MutexGuard<'_, Channels> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, event: BufferEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|tx| {
            if matches!(event, BufferEvent::DataAdded(_)) && tx.len() >= DATA_EVENT_LIMIT {
                return true;
            }
            match tx.try_send(event) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!("Subscriber queue full, dropped {:?}", event);
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSink for SampleBuffer {
    fn push_samples(&self, channel: ChannelId, samples: Vec<Sample>) {
        self.append_batch(channel, &samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: usize, len: usize) -> Vec<Sample> {
        (start..start + len)
            .map(|i| Sample::new(i as f64, i as f64 * 10.0))
            .collect()
    }

    #[test]
    fn test_capacity_three_scenario() {
        let buffer = SampleBuffer::with_capacity(3);
        let events = buffer.subscribe();

        buffer.append_batch(0, &[Sample::new(0.0, 1.0), Sample::new(1.0, 2.0)]);
        buffer.append_batch(0, &[Sample::new(2.0, 3.0), Sample::new(3.0, 4.0)]);

        assert_eq!(
            buffer.read(0, None),
            vec![Sample::new(1.0, 2.0), Sample::new(2.0, 3.0), Sample::new(3.0, 4.0)]
        );

        let full = events
            .try_iter()
            .filter(|e| *e == BufferEvent::ChannelFull(0))
            .count();
        assert_eq!(full, 1);
    }

    #[test]
    fn test_empty_batch_is_silent() {
        let buffer = SampleBuffer::with_capacity(3);
        let events = buffer.subscribe();

        buffer.append_batch(4, &[]);

        assert_eq!(buffer.count(4), 0);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_read_newest_points() {
        let buffer = SampleBuffer::with_capacity(100);
        buffer.append_batch(2, &ramp(0, 10));

        let tail = buffer.read(2, Some(3));
        assert_eq!(tail, ramp(7, 3));

        // Asking for more than stored returns everything
        assert_eq!(buffer.read(2, Some(50)).len(), 10);
        assert_eq!(buffer.read(2, Some(0)).len(), 0);
    }

    #[test]
    fn test_invalid_channel_is_noop() {
        let buffer = SampleBuffer::with_capacity(10);
        buffer.append(13, Sample::new(0.0, 1.0));
        buffer.append(usize::MAX, Sample::new(0.0, 1.0));
        buffer.clear_channel(99);

        assert_eq!(buffer.count(13), 0);
        assert!(buffer.read(13, None).is_empty());
        assert!(buffer.read_all().iter().all(|c| c.is_empty()));
    }

    #[test]
    fn test_set_max_capacity_trims_existing() {
        let buffer = SampleBuffer::with_capacity(10);
        buffer.append_batch(0, &ramp(0, 8));
        buffer.append_batch(5, &ramp(0, 4));

        buffer.set_max_capacity(5).unwrap();

        assert_eq!(buffer.max_capacity(), 5);
        assert_eq!(buffer.read(0, None), ramp(3, 5));
        assert_eq!(buffer.read(5, None), ramp(0, 4));
    }

    #[test]
    fn test_set_max_capacity_rejects_zero() {
        let buffer = SampleBuffer::with_capacity(10);
        assert_eq!(
            buffer.set_max_capacity(0),
            Err(BufferError::InvalidCapacity(0))
        );
        assert_eq!(buffer.max_capacity(), 10);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let buffer = SampleBuffer::with_capacity(7);
        buffer.append_batch(1, &ramp(0, 5));
        buffer.append_batch(2, &ramp(0, 5));

        buffer.clear_channel(1);
        assert_eq!(buffer.count(1), 0);
        assert_eq!(buffer.count(2), 5);

        buffer.clear();
        assert_eq!(buffer.count(2), 0);
        assert_eq!(buffer.max_capacity(), 7);
    }

    #[test]
    fn test_read_returns_copy() {
        let buffer = SampleBuffer::with_capacity(4);
        buffer.append_batch(0, &ramp(0, 2));

        let snapshot = buffer.read(0, None);
        buffer.append_batch(0, &ramp(2, 4));

        assert_eq!(snapshot, ramp(0, 2));
        assert_eq!(buffer.read(0, None), ramp(2, 4));
    }
}
