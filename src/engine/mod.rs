pub mod acquisition;
pub mod session;
pub mod state;
pub mod tcp_receiver;

pub use acquisition::{AcquisitionEvent, AcquisitionProducer, LIFECYCLE_RESERVE, STATUS_INTERVAL};
pub use session::{AcquisitionSession, EVENT_QUEUE_CAPACITY};
pub use state::SessionState;
pub use tcp_receiver::{TcpEvent, TcpReceiver, DEFAULT_TCP_PORT};
