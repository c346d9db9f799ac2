pub mod capture;
pub mod exporter;
pub mod gateway;
pub mod json_store;
pub mod memory;

pub use capture::persist_capture;
pub use exporter::JsonExporter;
pub use gateway::{PersistenceGateway, TaskInfo, SAVE_CHUNK_SIZE};
pub use json_store::JsonFileStore;
pub use memory::MemoryStore;
