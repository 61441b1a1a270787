//! Generation layer: the collaborator trait and retry policy.
//!
//! - [`generator`]: the [`Generator`] trait every model backend implements,
//!   the typed [`GenerateError`] taxonomy, and the built-in
//!   [`ChatGenerator`] / [`FnGenerator`] implementations.
//! - [`retry`]: transient error detection (429, 5xx, network timeouts) with
//!   configurable exponential backoff and jitter. Never retries permanent
//!   failures.

pub mod generator;
pub mod retry;

pub use generator::{
    ChatGenerator, ErrorKind, FnGenerator, GenerateError, GenerateFuture, Generation, Generator,
};
pub use retry::RetryConfig;
