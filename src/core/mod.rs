//! Core deterministic primitives.
//!
//! Everything here is platform-independent: the world simulation must produce
//! identical results for identical seeds and intent sequences.

pub mod hash;
pub mod rng;

// Re-export core types
pub use hash::{StateHash, StateHasher};
pub use rng::DeterministicRng;
