pub mod canonical;
pub mod config;
pub mod deps;
pub mod error;
pub mod fingerprint;
pub mod payload;
pub mod textnorm;
pub mod urlnorm;

pub use config::{AppConfig, DedupConfig, EmbedderConfig};
pub use deps::{EmbeddingService, PipelineDeps};
pub use error::{PipelineError, PipelineResult, ValidationError};
pub use payload::CanonicalItem;
