mod backoff;
mod cancellation;
pub mod error;
mod worker;

pub use backoff::exponential_backoff;
pub use cancellation::CancellationRegistry;
pub use error::WorkerError;
pub use worker::{AsyncWorker, WorkerSettings};
