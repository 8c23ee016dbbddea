//! Story assignment: the exact / lexical / semantic decision cascade.

pub mod activities;
pub mod cascade;
pub mod engine;
pub mod memory;
pub mod pg;
pub mod store;

pub use activities::run_dedup_batch;
pub use cascade::{Decision, RuleFired, SemanticVerdict};
pub use engine::dedup_article;
pub use memory::MemoryDedupStore;
pub use pg::PgDedupStore;
pub use store::{DedupStore, Persisted};
