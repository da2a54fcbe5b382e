//! Conversion requests and their scheduling.
//!
//! - [`ConversionRequest`] describes one source to convert
//! - [`ConversionExecutor`] runs one request under the crash guard
//! - [`ConversionQueue`] serves requests in order on one worker thread

mod executor;
mod queue;
mod request;

pub use executor::{ConversionExecutor, ConversionOutcome};
pub use queue::{ConversionQueue, WORKER_THREAD_NAME};
pub use request::ConversionRequest;
