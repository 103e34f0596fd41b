//! Bounded retry loop for completion calls with per-session throttling.
//!
//! The scheduler owns every policy decision around a completion call: request
//! spacing, backoff between attempts, and the consecutive rate-limit counter
//! that eventually switches a session to the offline path.

use std::future::Future;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;

use super::backoff::RetryConfig;
use crate::ai::CompletionOutcome;
use crate::constants::{THROTTLED_DETAIL, THROTTLE_THRESHOLD};

/// Per-session counters governing whether the remote path is attempted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionThrottleState {
    pub last_request_at: Option<Instant>,
    pub consecutive_failures: u32,
}

impl SessionThrottleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_throttled(&self) -> bool {
        self.consecutive_failures >= THROTTLE_THRESHOLD
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }
}

/// Suspends the caller between attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// Records requested sleeps instead of waiting
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    pub delays: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()> {
        self.delays.lock().unwrap().push(duration);
        async {}.boxed()
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerPolicy {
    /// Attempts per `run` (including the first)
    pub max_attempts: u32,
    /// Backoff after the first failed attempt; doubles per attempt
    pub base_delay: Duration,
    /// Cap on a single backoff sleep
    pub max_delay: Duration,
    /// Cap on the sum of backoff sleeps within one `run`
    pub max_total_wait: Duration,
    /// Minimum spacing between requests; the scheduler waits it out
    pub min_request_interval: Duration,
    /// When set, a throttled session recovers once its last request is this old
    pub throttle_cooldown: Option<Duration>,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            max_total_wait: Duration::from_secs(120),
            min_request_interval: Duration::from_secs(20),
            throttle_cooldown: None,
        }
    }
}

impl SchedulerPolicy {
    fn backoff(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_attempts.saturating_sub(1),
            self.base_delay,
            self.max_delay,
        )
    }
}

pub struct RetryScheduler<S = TokioSleeper> {
    policy: SchedulerPolicy,
    sleeper: S,
}

impl RetryScheduler<TokioSleeper> {
    pub fn new(policy: SchedulerPolicy) -> Self {
        Self::with_sleeper(policy, TokioSleeper)
    }
}

impl<S: Sleeper> RetryScheduler<S> {
    pub fn with_sleeper(policy: SchedulerPolicy, sleeper: S) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> &SchedulerPolicy {
        &self.policy
    }

    #[cfg(test)]
    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Apply the optional cooldown, then report whether the remote path is closed
    pub fn should_bypass(&self, state: &mut SessionThrottleState) -> bool {
        if let (Some(cooldown), Some(last)) = (self.policy.throttle_cooldown, state.last_request_at)
            && state.is_throttled()
            && last.elapsed() >= cooldown
        {
            tracing::info!(
                "Throttle cooldown of {:?} elapsed, re-enabling remote completions",
                cooldown
            );
            state.reset();
        }
        state.is_throttled()
    }

    /// Run `prompt_fn` under the retry policy.
    ///
    /// At most one request is in flight at a time and backoff delays never
    /// decrease within a call. A throttled session returns immediately
    /// without touching `state`.
    pub async fn run<F, Fut>(
        &self,
        mut prompt_fn: F,
        max_attempts: u32,
        state: &mut SessionThrottleState,
    ) -> CompletionOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CompletionOutcome>,
    {
        if self.should_bypass(state) {
            tracing::warn!(
                "Skipping remote completion: {} consecutive rate limits",
                state.consecutive_failures
            );
            return CompletionOutcome::FatalError(THROTTLED_DETAIL.to_string());
        }

        self.wait_for_spacing(state).await;

        let max_attempts = max_attempts.max(1);
        let backoff = self.policy.backoff();
        let mut previous_delay = Duration::ZERO;
        let mut total_wait = Duration::ZERO;
        let mut attempt = 0;

        loop {
            attempt += 1;
            state.last_request_at = Some(Instant::now());
            let outcome = prompt_fn().await;

            tracing::debug!(
                "Completion attempt {}/{}: {}",
                attempt,
                max_attempts,
                outcome.kind()
            );

            let hint = match &outcome {
                CompletionOutcome::Success(_) => {
                    state.consecutive_failures = 0;
                    return outcome;
                }
                CompletionOutcome::RateLimited { retry_after } => {
                    state.consecutive_failures += 1;
                    *retry_after
                }
                CompletionOutcome::TransientError(_) => Duration::ZERO,
                CompletionOutcome::AuthError(_) | CompletionOutcome::FatalError(_) => {
                    return outcome;
                }
            };

            if attempt >= max_attempts {
                tracing::warn!("Giving up after {} attempts: {}", attempt, outcome);
                return outcome;
            }

            let delay = backoff
                .delay_for(attempt)
                .max(hint.min(self.policy.max_delay))
                .max(previous_delay);

            if total_wait + delay > self.policy.max_total_wait {
                tracing::warn!(
                    "Next backoff of {:?} would exceed the {:?} wait ceiling: {}",
                    delay,
                    self.policy.max_total_wait,
                    outcome
                );
                return outcome;
            }

            tracing::warn!(
                "Completion attempt {}/{} failed: {}. Retrying in {:?}...",
                attempt,
                max_attempts,
                outcome,
                delay
            );
            self.sleeper.sleep(delay).await;
            total_wait += delay;
            previous_delay = delay;
        }
    }

    async fn wait_for_spacing(&self, state: &SessionThrottleState) {
        let Some(last) = state.last_request_at else {
            return;
        };
        let elapsed = last.elapsed();
        if elapsed < self.policy.min_request_interval {
            let wait = self.policy.min_request_interval - elapsed;
            tracing::info!("Waiting {:?} before the next completion request", wait);
            self.sleeper.sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scheduler() -> RetryScheduler<RecordingSleeper> {
        RetryScheduler::with_sleeper(SchedulerPolicy::default(), RecordingSleeper::default())
    }

    /// Returns scripted outcomes in order, repeating the last one
    struct Script {
        outcomes: Mutex<Vec<CompletionOutcome>>,
        calls: AtomicU32,
    }

    impl Script {
        fn new(outcomes: Vec<CompletionOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicU32::new(0),
            }
        }

        fn next(&self) -> impl Future<Output = CompletionOutcome> + use<> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            let outcome = if outcomes.len() > 1 {
                outcomes.remove(0)
            } else {
                outcomes[0].clone()
            };
            async move { outcome }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn rate_limited() -> CompletionOutcome {
        CompletionOutcome::RateLimited {
            retry_after: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let scheduler = scheduler();
        let script = Script::new(vec![CompletionOutcome::Success("hi".into())]);
        let mut state = SessionThrottleState {
            last_request_at: None,
            consecutive_failures: 2,
        };

        let outcome = scheduler.run(|| script.next(), 3, &mut state).await;

        assert_eq!(outcome, CompletionOutcome::Success("hi".into()));
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_request_at.is_some());
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn test_rate_limits_back_off_with_increasing_delays() {
        let scheduler = scheduler();
        let script = Script::new(vec![rate_limited()]);
        let mut state = SessionThrottleState::new();

        let outcome = scheduler.run(|| script.next(), 3, &mut state).await;

        assert_eq!(outcome, rate_limited());
        assert_eq!(script.calls(), 3);
        assert_eq!(state.consecutive_failures, 3);

        let delays = scheduler.sleeper().recorded();
        assert_eq!(delays.len(), 2);
        assert!(delays[0] < delays[1], "delays not increasing: {:?}", delays);
        assert_eq!(delays[0], Duration::from_secs(10));
        assert_eq!(delays[1], Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_counter_counts_attempts_not_runs() {
        let scheduler = scheduler();
        let script = Script::new(vec![
            rate_limited(),
            CompletionOutcome::Success("ok".into()),
        ]);
        let mut state = SessionThrottleState::new();

        scheduler.run(|| script.next(), 3, &mut state).await;
        assert_eq!(state.consecutive_failures, 0);

        let script = Script::new(vec![rate_limited()]);
        scheduler.run(|| script.next(), 2, &mut state).await;
        assert_eq!(state.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_throttled_session_makes_no_call() {
        let scheduler = scheduler();
        let script = Script::new(vec![CompletionOutcome::Success("hi".into())]);
        let mut state = SessionThrottleState {
            last_request_at: None,
            consecutive_failures: THROTTLE_THRESHOLD,
        };
        let before = state.clone();

        let outcome = scheduler.run(|| script.next(), 3, &mut state).await;

        assert_eq!(
            outcome,
            CompletionOutcome::FatalError(THROTTLED_DETAIL.to_string())
        );
        assert_eq!(script.calls(), 0);
        assert_eq!(state, before);
        assert!(scheduler.sleeper().recorded().is_empty());
    }

    #[tokio::test]
    async fn test_auth_and_fatal_errors_are_not_retried() {
        for outcome in [
            CompletionOutcome::AuthError("bad key".into()),
            CompletionOutcome::FatalError("404".into()),
        ] {
            let scheduler = scheduler();
            let script = Script::new(vec![outcome.clone()]);
            let mut state = SessionThrottleState::new();

            assert_eq!(scheduler.run(|| script.next(), 3, &mut state).await, outcome);
            assert_eq!(script.calls(), 1);
            assert_eq!(state.consecutive_failures, 0);
        }
    }

    #[tokio::test]
    async fn test_transient_errors_retry_without_throttling() {
        let scheduler = scheduler();
        let script = Script::new(vec![
            CompletionOutcome::TransientError("503".into()),
            CompletionOutcome::TransientError("503".into()),
            CompletionOutcome::Success("done".into()),
        ]);
        let mut state = SessionThrottleState::new();

        let outcome = scheduler.run(|| script.next(), 3, &mut state).await;

        assert_eq!(outcome, CompletionOutcome::Success("done".into()));
        assert_eq!(script.calls(), 3);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(scheduler.sleeper().recorded().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_after_hint_never_shrinks_delays() {
        let scheduler = scheduler();
        let script = Script::new(vec![
            CompletionOutcome::RateLimited {
                retry_after: Duration::from_secs(45),
            },
            CompletionOutcome::RateLimited {
                retry_after: Duration::from_secs(1),
            },
            rate_limited(),
        ]);
        let mut state = SessionThrottleState::new();

        scheduler.run(|| script.next(), 3, &mut state).await;

        let delays = scheduler.sleeper().recorded();
        assert_eq!(delays, vec![Duration::from_secs(45), Duration::from_secs(45)]);
    }

    #[tokio::test]
    async fn test_wait_ceiling_stops_retries() {
        let policy = SchedulerPolicy {
            max_total_wait: Duration::from_secs(15),
            ..SchedulerPolicy::default()
        };
        let scheduler = RetryScheduler::with_sleeper(policy, RecordingSleeper::default());
        let script = Script::new(vec![rate_limited()]);
        let mut state = SessionThrottleState::new();

        let outcome = scheduler.run(|| script.next(), 5, &mut state).await;

        assert_eq!(outcome, rate_limited());
        // 10s fits, the following 20s would not
        assert_eq!(script.calls(), 2);
        assert_eq!(
            scheduler.sleeper().recorded(),
            vec![Duration::from_secs(10)]
        );
    }

    #[tokio::test]
    async fn test_min_spacing_waits_after_recent_request() {
        let scheduler = scheduler();
        let script = Script::new(vec![CompletionOutcome::Success("hi".into())]);
        let mut state = SessionThrottleState {
            last_request_at: Some(Instant::now()),
            consecutive_failures: 0,
        };

        scheduler.run(|| script.next(), 3, &mut state).await;

        let delays = scheduler.sleeper().recorded();
        assert_eq!(delays.len(), 1);
        assert!(delays[0] > Duration::from_secs(19));
        assert!(delays[0] <= Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let scheduler = scheduler();
        let script = Script::new(vec![rate_limited()]);
        let mut state = SessionThrottleState::new();

        scheduler.run(|| script.next(), 0, &mut state).await;
        assert_eq!(script.calls(), 1);
    }

    #[test]
    fn test_cooldown_releases_throttle() {
        let policy = SchedulerPolicy {
            throttle_cooldown: Some(Duration::from_millis(20)),
            ..SchedulerPolicy::default()
        };
        let scheduler = RetryScheduler::with_sleeper(policy, RecordingSleeper::default());

        let mut stale = SessionThrottleState {
            last_request_at: Some(Instant::now()),
            consecutive_failures: THROTTLE_THRESHOLD,
        };
        assert!(scheduler.should_bypass(&mut stale));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!scheduler.should_bypass(&mut stale));
        assert_eq!(stale.consecutive_failures, 0);
    }

    #[test]
    fn test_throttle_is_sticky_without_cooldown() {
        let scheduler = scheduler();
        let mut state = SessionThrottleState {
            last_request_at: Some(Instant::now()),
            consecutive_failures: THROTTLE_THRESHOLD,
        };
        assert!(scheduler.should_bypass(&mut state));
        state.reset();
        assert!(!scheduler.should_bypass(&mut state));
    }
}
