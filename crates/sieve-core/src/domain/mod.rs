//! Domain model: ids, jobs, url tasks, layer results, review entries,
//! failure signals, errors, events.

pub mod errors;
pub mod events;
pub mod ids;
pub mod job;
pub mod layer;
pub mod review;
pub mod signal;
pub mod task;

pub use errors::{ErrorKind, QueueError, SieveError, StoreError};
pub use events::DomainEvent;
pub use ids::{JobId, ParseIdError, TaskId};
pub use job::{Bucket, CounterDelta, Job, JobStatus};
pub use layer::{Classification, Layer, LayerResult, clamp_score};
pub use review::{ConfidenceBand, ManualReviewEntry, ReviewDecision};
pub use signal::{Signal, SignalCode};
pub use task::{LAST_ERROR_MAX_CHARS, UrlTask, UrlTaskStatus, truncate_error};
