//! Process-local stores for in-flight work.
//!
//! Entries live exactly as long as the UoW they belong to is in flight; the
//! orchestrator's aggregation step is the only place they are reclaimed.

pub mod outcome;
pub mod stimulus;
pub mod work;

pub use outcome::OutcomeCache;
pub use stimulus::StimulusCache;
pub use work::{WorkCache, WorkEntry};
