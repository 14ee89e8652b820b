//! Tokio-based concurrency building blocks: a cancellable fan-out worker
//! pool, a capacity-one rate limiter, an O(1) LRU cache, and lock-based and
//! lock-free counters.

mod cache;
mod counter;
mod error;
mod job;
mod job_queue;
mod limiter;
mod pool;
mod stream;

pub use cache::{LruCache, SharedLruCache};
pub use counter::{AtomicCounter, Counter, OrderedPair, SafeCounter};
pub use error::{JobError, ToolkitError};
pub use job::{BoxedJobFuture, JobResult};
pub use job_queue::{JobConsumer, JobProducer, JobQueue};
pub use limiter::RateLimiter;
pub use pool::{run_pool, WorkerPool};
pub use stream::ResultStream;
pub use tokio_util::sync::CancellationToken;
