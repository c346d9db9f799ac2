pub mod sample_buffer;

pub use sample_buffer::{BufferEvent, SampleBuffer, SampleSink, DEFAULT_MAX_CAPACITY, EVENT_QUEUE_CAPACITY};
