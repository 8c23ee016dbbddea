//! Article embeddings: one vector per article per model generation.

pub mod activities;
pub mod models;

pub use activities::run_embed_batch;
pub use models::ArticleEmbedding;
