//! Multi-time-point sampling, pairwise rule scoring, graph build, and
//! formation synthesis, plus the stateful incremental-mode wrapper used
//! by the stream service.

pub mod algorithm;
pub mod engine;

pub use algorithm::{RecognitionParams, recognize};
pub use engine::RecognitionEngine;
