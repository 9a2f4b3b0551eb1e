//! Manual review: capacity-bounded holding area for ambiguous scores.

pub mod queue;

pub use queue::{BandCounts, ManualReviewQueue, ReviewFilter, ReviewPage, ReviewQueueStatus};
