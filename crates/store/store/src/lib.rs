pub mod error;
pub mod lock;
pub mod repo;

pub use error::StoreError;
pub use lock::{FingerprintLock, LockGuard};
pub use repo::{
    AlertStore, ChannelStore, DefinitionStore, DiagnosticsStore, IncidentStore, ProviderStore,
    RunStore, Store,
};
