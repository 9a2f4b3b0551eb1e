//! Failure handling: classification, backoff, and the per-task retry state
//! machine.

pub mod backoff;
pub mod classifier;
pub mod coordinator;

pub use backoff::BackoffPolicy;
pub use classifier::{classify, classify_message};
pub use coordinator::{GiveUpReason, RetryCoordinator, RetryDecision};
