pub mod config;
pub mod lock;
pub mod migrations;
pub mod store;

pub use config::PostgresConfig;
pub use lock::{PgFingerprintLock, PgLockGuard};
pub use store::PostgresStore;
