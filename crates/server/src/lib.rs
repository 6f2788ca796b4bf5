pub mod api;
pub mod config;
pub mod error;
pub mod telemetry;

pub use api::AppState;
pub use config::KlaxonConfig;
pub use error::ServerError;
