//! Canonical articles: the normalized form of a raw arrival.

pub mod activities;
pub mod models;

pub use activities::{build_article, run_normalize_batch};
pub use models::{Article, NewArticle};
