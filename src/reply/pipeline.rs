//! Reply pipeline: prompt → remote completion under the retry scheduler →
//! sanitize, with the offline template engine as the backstop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::offline::OfflineTemplateEngine;
use super::prompt::PromptBuilder;
use super::sanitize::sanitize;
use super::{ReplyRequest, ReplyResult};
use crate::ai::{CompletionClient, CompletionOutcome};
use crate::constants::THROTTLED_DETAIL;
use crate::retry::{RetryScheduler, SessionThrottleState, Sleeper, TokioSleeper};

/// One pipeline per user session; it owns that session's throttle state.
pub struct ReplyPipeline<S = TokioSleeper> {
    client: Option<Arc<dyn CompletionClient>>,
    prompt_builder: PromptBuilder,
    scheduler: RetryScheduler<S>,
    offline: OfflineTemplateEngine,
    request_timeout: Duration,
    throttle: Mutex<SessionThrottleState>,
}

impl<S: Sleeper> ReplyPipeline<S> {
    pub fn new(
        client: Option<Arc<dyn CompletionClient>>,
        prompt_builder: PromptBuilder,
        scheduler: RetryScheduler<S>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            prompt_builder,
            scheduler,
            offline: OfflineTemplateEngine::new(),
            request_timeout,
            throttle: Mutex::new(SessionThrottleState::new()),
        }
    }

    /// Produce a reply. Never fails: every remote failure ends in the
    /// offline template, with `notice` saying why.
    pub async fn generate_reply(&self, request: &ReplyRequest, allow_remote: bool) -> ReplyResult {
        if !allow_remote {
            return self.offline_reply(request, Some("Remote generation disabled".to_string()));
        }

        let Some(client) = self.client.as_deref() else {
            return self.offline_reply(
                request,
                Some("No API key configured; using offline template".to_string()),
            );
        };

        // Held across the remote attempt so concurrent requests in one
        // session cannot interleave counter updates.
        let mut throttle = self.throttle.lock().await;

        if self.scheduler.should_bypass(&mut throttle) {
            return self.offline_reply(request, Some(throttled_notice()));
        }

        let prompt = self.prompt_builder.build(request);
        let timeout = self.request_timeout;
        let max_attempts = self.scheduler.policy().max_attempts;

        tracing::info!(
            "Requesting reply from {} (tone: {})",
            client.name(),
            request.tone()
        );

        let outcome = self
            .scheduler
            .run(|| client.complete(&prompt, timeout), max_attempts, &mut throttle)
            .await;
        drop(throttle);

        match outcome {
            CompletionOutcome::Success(raw) => {
                let text = sanitize(&raw, request.sender_name());
                if text.is_empty() {
                    tracing::warn!("Completion was empty after sanitizing");
                    return self.offline_reply(
                        request,
                        Some("The model returned an empty reply".to_string()),
                    );
                }
                ReplyResult::remote(text)
            }
            other => {
                tracing::warn!("Remote generation failed, using offline template: {}", other);
                let notice = failure_notice(&other, client.name());
                self.offline_reply(request, Some(notice))
            }
        }
    }

    /// Clear the session's rate-limit counter so the remote path is tried again
    pub async fn reset_throttle(&self) {
        self.throttle.lock().await.reset();
    }

    pub async fn throttle_snapshot(&self) -> SessionThrottleState {
        self.throttle.lock().await.clone()
    }

    fn offline_reply(&self, request: &ReplyRequest, notice: Option<String>) -> ReplyResult {
        ReplyResult::offline(self.offline.generate(request), notice)
    }
}

fn throttled_notice() -> String {
    "Rate limit hit repeatedly this session; using offline templates until reset".to_string()
}

fn failure_notice(outcome: &CompletionOutcome, provider: &str) -> String {
    match outcome {
        CompletionOutcome::AuthError(msg) => format!(
            "Invalid {} API key ({}). Check your credentials in secrets.toml or the environment.",
            provider, msg
        ),
        CompletionOutcome::RateLimited { .. } => format!(
            "{} rate limit exceeded. Try again later or check your usage quota.",
            provider
        ),
        CompletionOutcome::FatalError(msg) if msg == THROTTLED_DETAIL => throttled_notice(),
        CompletionOutcome::TransientError(msg) => {
            format!("{} is unavailable right now: {}", provider, msg)
        }
        CompletionOutcome::FatalError(msg) => format!("{} API error: {}", provider, msg),
        CompletionOutcome::Success(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::THROTTLE_THRESHOLD;
    use crate::reply::{Provenance, Tone};
    use crate::retry::{RecordingSleeper, SchedulerPolicy};
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Completion stub that counts calls and replays scripted outcomes
    struct StubClient {
        outcomes: std::sync::Mutex<Vec<CompletionOutcome>>,
        calls: AtomicU32,
    }

    impl StubClient {
        fn new(outcomes: Vec<CompletionOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: std::sync::Mutex::new(outcomes),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CompletionClient for StubClient {
        fn name(&self) -> &str {
            "Stub"
        }

        fn complete<'a>(
            &'a self,
            _prompt: &'a str,
            _timeout: Duration,
        ) -> BoxFuture<'a, CompletionOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            let outcome = if outcomes.len() > 1 {
                outcomes.remove(0)
            } else {
                outcomes[0].clone()
            };
            async move { outcome }.boxed()
        }
    }

    fn pipeline(client: Option<Arc<StubClient>>) -> ReplyPipeline<RecordingSleeper> {
        let scheduler =
            RetryScheduler::with_sleeper(SchedulerPolicy::default(), RecordingSleeper::default());
        ReplyPipeline::new(
            client.map(|c| c as Arc<dyn CompletionClient>),
            PromptBuilder::default(),
            scheduler,
            Duration::from_secs(5),
        )
    }

    fn request(text: &str, tone: Tone, name: Option<&str>) -> ReplyRequest {
        ReplyRequest::new(text, tone, name).unwrap()
    }

    fn rate_limited() -> CompletionOutcome {
        CompletionOutcome::RateLimited {
            retry_after: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_remote_success_is_sanitized() {
        let stub = StubClient::new(vec![CompletionOutcome::Success(
            "Here is a potential reply to the email:\nDear Sam,\n\nThanks!\n\n[Your Name]".into(),
        )]);
        let pipeline = pipeline(Some(stub.clone()));

        let result = pipeline
            .generate_reply(&request("Hi there", Tone::Friendly, Some("Sam Lee")), true)
            .await;

        assert_eq!(result.provenance, Provenance::Remote);
        assert_eq!(result.text, "Dear Sam,\n\nThanks!\n\nSam Lee");
        assert_eq!(result.notice, None);
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_remote_disabled_uses_offline_question_template() {
        let stub = StubClient::new(vec![CompletionOutcome::Success("unused".into())]);
        let pipeline = pipeline(Some(stub.clone()));

        let result = pipeline
            .generate_reply(
                &request(
                    "Hi, I wanted to ask when the shipment will arrive?",
                    Tone::Professional,
                    None,
                ),
                false,
            )
            .await;

        assert_eq!(result.provenance, Provenance::OfflineFallback);
        assert!(result.text.starts_with("Dear there,"));
        assert!(result.text.contains("Thank you for your question."));
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_client_falls_back() {
        let pipeline = pipeline(None);
        let result = pipeline
            .generate_reply(&request("Thanks a lot!", Tone::Casual, None), true)
            .await;

        assert_eq!(result.provenance, Provenance::OfflineFallback);
        assert!(!result.text.is_empty());
        assert!(result.notice.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_rate_limits_fall_back_then_bypass() {
        let stub = StubClient::new(vec![rate_limited()]);
        let pipeline = pipeline(Some(stub.clone()));
        let req = request("Can we schedule a call tomorrow?", Tone::Friendly, None);

        let first = pipeline.generate_reply(&req, true).await;
        assert_eq!(first.provenance, Provenance::OfflineFallback);
        assert!(first.notice.as_deref().unwrap().contains("rate limit"));
        assert_eq!(stub.calls(), 3);
        assert_eq!(
            pipeline.throttle_snapshot().await.consecutive_failures,
            THROTTLE_THRESHOLD
        );

        // Session is now throttled: no further network calls
        let second = pipeline.generate_reply(&req, true).await;
        assert_eq!(second.provenance, Provenance::OfflineFallback);
        assert_eq!(stub.calls(), 3);

        pipeline.reset_throttle().await;
        pipeline.generate_reply(&req, true).await;
        assert_eq!(stub.calls(), 4);
    }

    #[tokio::test]
    async fn test_consecutive_replies_share_request_spacing() {
        let stub = StubClient::new(vec![CompletionOutcome::Success("Hi,\n\nSure.".into())]);
        let pipeline = pipeline(Some(stub.clone()));
        let req = request("Are you free on Monday?", Tone::Casual, None);

        pipeline.generate_reply(&req, true).await;
        assert!(pipeline.scheduler.sleeper().recorded().is_empty());

        pipeline.generate_reply(&req, true).await;
        let waits = pipeline.scheduler.sleeper().recorded();
        assert_eq!(waits.len(), 1);
        assert!(waits[0] > Duration::from_secs(19));
        assert_eq!(stub.calls(), 2);
        assert!(pipeline.throttle_snapshot().await.last_request_at.is_some());
    }

    #[tokio::test]
    async fn test_auth_error_surfaces_remediation_hint() {
        let stub = StubClient::new(vec![CompletionOutcome::AuthError(
            "Incorrect API key provided".into(),
        )]);
        let pipeline = pipeline(Some(stub.clone()));

        let result = pipeline
            .generate_reply(&request("Please send the invoice.", Tone::Formal, None), true)
            .await;

        assert_eq!(result.provenance, Provenance::OfflineFallback);
        let notice = result.notice.unwrap();
        assert!(notice.contains("Invalid Stub API key"));
        assert!(notice.contains("Incorrect API key provided"));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_completion_falls_back() {
        let stub = StubClient::new(vec![CompletionOutcome::Success(
            "Here is the reply:\n   ".into(),
        )]);
        let pipeline = pipeline(Some(stub));

        let result = pipeline
            .generate_reply(&request("Hello", Tone::Professional, None), true)
            .await;
        assert_eq!(result.provenance, Provenance::OfflineFallback);
        assert!(!result.text.is_empty());
    }

    #[tokio::test]
    async fn test_every_failure_kind_yields_text() {
        for outcome in [
            rate_limited(),
            CompletionOutcome::AuthError("nope".into()),
            CompletionOutcome::TransientError("503".into()),
            CompletionOutcome::FatalError("404".into()),
        ] {
            let pipeline = pipeline(Some(StubClient::new(vec![outcome])));
            for tone in Tone::ALL {
                let result = pipeline
                    .generate_reply(&request("Quick note about Friday.", tone, None), true)
                    .await;
                assert!(!result.text.is_empty());
            }
        }
    }
}
