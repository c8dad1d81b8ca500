pub mod memory;
pub mod storage;
pub mod valkey;

pub use memory::MemoryStorage;
pub use storage::{Notification, Storage, StorageError, StorageResult};
pub use valkey::ValkeyStorage;
