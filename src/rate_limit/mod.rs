//! Rate limiting for failure logging.
//!
//! Failure storms can produce thousands of identical errors per second. The recovery layer
//! consults a [`LogRateLimiter`] before each failure log and drops the log when no permit is
//! available. The returned error is never affected.

pub mod local;

pub use local::LogRateLimiter;
