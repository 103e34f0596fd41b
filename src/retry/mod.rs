//! Retry and throttling for remote calls.

mod backoff;
mod scheduler;

pub use backoff::{RetryConfig, with_retry};
pub use scheduler::{RetryScheduler, SchedulerPolicy, SessionThrottleState, Sleeper, TokioSleeper};

#[cfg(test)]
pub use scheduler::RecordingSleeper;
