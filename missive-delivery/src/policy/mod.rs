//! Policies consulted by the dispatcher

pub mod retry;

pub use retry::RetryPolicy;
