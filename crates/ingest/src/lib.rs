pub mod driver;
pub mod drivers;
pub mod error;
pub mod normalizer;
pub mod result;

pub use driver::{SourceDriver, SourceRegistry, default_registry};
pub use error::IngestError;
pub use normalizer::Normalizer;
pub use result::IngestResult;
