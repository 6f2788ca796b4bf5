pub mod lock;
pub mod store;

pub use lock::{MemoryFingerprintLock, MemoryLockGuard};
pub use store::MemoryStore;
