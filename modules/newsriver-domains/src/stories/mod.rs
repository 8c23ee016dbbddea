//! Canonical stories: clusters of articles describing one real-world event.

pub mod models;

pub use models::{DedupEvent, DecisionKind, MatchType, Story, StoryMember, StoryStatus};
