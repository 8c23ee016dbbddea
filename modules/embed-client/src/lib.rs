//! Client for the embedding inference service.
//!
//! The service is a stateless HTTP endpoint: POST a batch of inputs, get
//! fixed-dimension vectors back, aligned to input order. The client owns
//! response validation (vector count, dimension, finiteness) so callers can
//! trust what they receive.

mod client;

pub use client::{EmbedRequest, EmbedResponse, InferenceClient};
