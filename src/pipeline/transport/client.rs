//! Fault-tolerant request/response cycle against a model provider.
//!
//! A single HTTP attempt is classified into an explicit [`AttemptOutcome`];
//! [`RetryPolicy`] is a pure decision table over that outcome. Timeouts,
//! connection failures, HTTP 429 and 5xx are retried within the attempt budget
//! (each attempt with its own, escalating timeout). Any other 4xx is terminal
//! and returned immediately.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use super::provider::{Credential, Provider};
use super::types::{flatten_ocr_response, ChatRequest, ChatResponse, EncodedImage, OcrRequest};
use super::{ModelClient, TransportError};
use crate::config;
use crate::pipeline::context::RunLog;

/// Largest base64 payload the OCR endpoint accepts inline.
pub const OCR_MAX_BASE64_BYTES: usize = 180_000;

/// Maximum characters of an error body kept in a [`TransportError`].
const ERROR_BODY_LIMIT: usize = 500;

// ──────────────────────────────────────────────
// Attempt outcomes
// ──────────────────────────────────────────────

/// Why an attempt may be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    Timeout,
    Connection(String),
    Status(u16),
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::Connection(detail) => write!(f, "connection failed: {detail}"),
            Self::Status(status) => write!(f, "HTTP {status}"),
        }
    }
}

/// Result of one HTTP attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(Value),
    Retryable(RetryReason),
    Terminal(TransportError),
}

/// Classify an HTTP status that is not a success.
pub fn classify_status(provider: &str, status: u16, body: &str) -> AttemptOutcome {
    if status == 429 || (500..600).contains(&status) {
        AttemptOutcome::Retryable(RetryReason::Status(status))
    } else {
        AttemptOutcome::Terminal(TransportError::Client {
            provider: provider.to_string(),
            status,
            body: truncate(body, ERROR_BODY_LIMIT),
        })
    }
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

// ──────────────────────────────────────────────
// Retry policy
// ──────────────────────────────────────────────

/// What to do after a retryable attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    RetryAfter(Duration),
    GiveUp,
}

/// Attempt budget: one timeout per attempt, fixed backoff between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeouts: Vec<Duration>,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeouts: vec![
                Duration::from_secs(config::FIRST_ATTEMPT_TIMEOUT_SECS),
                Duration::from_secs(config::SECOND_ATTEMPT_TIMEOUT_SECS),
            ],
            backoff: Duration::from_secs(config::RETRY_BACKOFF_SECS),
        }
    }
}

impl RetryPolicy {
    /// Decision after the retryable attempt at `index` (0-based).
    pub fn after_retryable(&self, index: usize) -> NextStep {
        if index + 1 < self.timeouts.len() {
            NextStep::RetryAfter(self.backoff)
        } else {
            NextStep::GiveUp
        }
    }
}

// ──────────────────────────────────────────────
// Exchange (single attempt)
// ──────────────────────────────────────────────

/// One outbound POST with a JSON body.
pub struct HttpRequest<'a> {
    pub provider: &'a str,
    pub url: String,
    pub credential: &'a Credential,
    pub body: Value,
}

/// Performs exactly one HTTP attempt. Implementations never retry.
pub trait Exchange: Send + Sync {
    fn attempt(&self, request: &HttpRequest<'_>, timeout: Duration) -> AttemptOutcome;
}

/// Production exchange over a blocking `reqwest` client.
pub struct HttpExchange {
    client: reqwest::blocking::Client,
}

impl HttpExchange {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("{}/{}", config::APP_NAME, config::APP_VERSION))
            .build()
            .map_err(|e| TransportError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Exchange for HttpExchange {
    fn attempt(&self, request: &HttpRequest<'_>, timeout: Duration) -> AttemptOutcome {
        let sent = self
            .client
            .post(&request.url)
            .timeout(timeout)
            .bearer_auth(request.credential.expose())
            .header(reqwest::header::ACCEPT, "application/json")
            .header("HTTP-Referer", config::HTTP_REFERER)
            .header("X-Title", config::APP_TITLE)
            .json(&request.body)
            .send();

        let response = match sent {
            Ok(response) => response,
            Err(e) => return classify_reqwest_error(e),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return classify_status(request.provider, status.as_u16(), &body);
        }

        match response.json::<Value>() {
            Ok(value) => AttemptOutcome::Success(value),
            Err(e) if e.is_timeout() => AttemptOutcome::Retryable(RetryReason::Timeout),
            Err(e) => AttemptOutcome::Terminal(TransportError::MalformedResponse {
                provider: request.provider.to_string(),
                detail: e.to_string(),
            }),
        }
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> AttemptOutcome {
    if e.is_timeout() {
        AttemptOutcome::Retryable(RetryReason::Timeout)
    } else if e.is_connect() {
        AttemptOutcome::Retryable(RetryReason::Connection(e.to_string()))
    } else {
        AttemptOutcome::Terminal(TransportError::HttpClient(e.to_string()))
    }
}

// ──────────────────────────────────────────────
// TransportClient
// ──────────────────────────────────────────────

/// Request body for one provider call.
pub enum Payload<'a> {
    Chat(&'a ChatRequest),
    Ocr(OcrRequest),
}

impl Payload<'_> {
    fn url(&self, provider: &Provider) -> String {
        match self {
            Payload::Chat(_) => provider.endpoint("chat/completions"),
            // OCR providers are configured with their full inference URL.
            Payload::Ocr(_) => provider.endpoint(""),
        }
    }

    fn body(&self) -> Result<Value, TransportError> {
        Ok(match self {
            Payload::Chat(request) => serde_json::to_value(request)?,
            Payload::Ocr(request) => serde_json::to_value(request)?,
        })
    }
}

/// Provider client applying the retry policy on top of an [`Exchange`].
pub struct TransportClient<E: Exchange = HttpExchange> {
    exchange: E,
    policy: RetryPolicy,
}

impl TransportClient<HttpExchange> {
    /// Production client with the given policy.
    pub fn http(policy: RetryPolicy) -> Result<Self, TransportError> {
        Ok(Self::new(HttpExchange::new()?, policy))
    }
}

impl<E: Exchange> TransportClient<E> {
    pub fn new(exchange: E, policy: RetryPolicy) -> Self {
        Self { exchange, policy }
    }

    /// Send a payload to a provider, retrying per the policy.
    ///
    /// Every failed attempt and its classification is written to `log`.
    pub fn send(
        &self,
        payload: &Payload<'_>,
        provider: &Provider,
        log: &mut RunLog,
    ) -> Result<Value, TransportError> {
        let request = HttpRequest {
            provider: provider.name(),
            url: payload.url(provider),
            credential: provider.credential(),
            body: payload.body()?,
        };

        let mut last_reason: Option<RetryReason> = None;
        for (index, timeout) in self.policy.timeouts.iter().enumerate() {
            let attempt = index + 1;
            tracing::debug!(
                provider = provider.name(),
                model = provider.model(),
                attempt,
                timeout_secs = timeout.as_secs_f32(),
                "Provider call attempt"
            );

            let reason = match self.exchange.attempt(&request, *timeout) {
                AttemptOutcome::Success(value) => {
                    tracing::debug!(provider = provider.name(), attempt, "Provider call succeeded");
                    if attempt > 1 {
                        log.info(format!("{}: attempt {attempt} succeeded", provider.name()));
                    }
                    return Ok(value);
                }
                AttemptOutcome::Terminal(e) => {
                    log.warn(format!(
                        "{}: attempt {attempt} failed with a terminal error, not retrying: {e}",
                        provider.name()
                    ));
                    return Err(e);
                }
                AttemptOutcome::Retryable(reason) => reason,
            };

            match self.policy.after_retryable(index) {
                NextStep::RetryAfter(delay) => {
                    log.warn(format!(
                        "{}: attempt {attempt} failed ({reason}, timeout {}s), retrying in {}s",
                        provider.name(),
                        timeout.as_secs_f32(),
                        delay.as_secs_f32()
                    ));
                    std::thread::sleep(delay);
                }
                NextStep::GiveUp => {
                    log.warn(format!(
                        "{}: attempt {attempt} failed ({reason}, timeout {}s), retry budget exhausted",
                        provider.name(),
                        timeout.as_secs_f32()
                    ));
                }
            }
            last_reason = Some(reason);
        }

        Err(TransportError::Exhausted {
            provider: provider.name().to_string(),
            attempts: self.policy.timeouts.len(),
            last: last_reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "no attempts configured".into()),
        })
    }
}

impl<E: Exchange> ModelClient for TransportClient<E> {
    fn chat(
        &self,
        provider: &Provider,
        request: &ChatRequest,
        log: &mut RunLog,
    ) -> Result<String, TransportError> {
        let value = self.send(&Payload::Chat(request), provider, log)?;
        let parsed: ChatResponse =
            serde_json::from_value(value).map_err(|e| TransportError::MalformedResponse {
                provider: provider.name().to_string(),
                detail: e.to_string(),
            })?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::EmptyChoices(provider.name().to_string()))?;
        Ok(choice.message.content.unwrap_or_default())
    }

    fn ocr(
        &self,
        provider: &Provider,
        image: &EncodedImage,
        log: &mut RunLog,
    ) -> Result<String, TransportError> {
        if image.payload_len() >= OCR_MAX_BASE64_BYTES {
            return Err(TransportError::ImageTooLarge(image.payload_len()));
        }
        let value = self.send(&Payload::Ocr(OcrRequest::for_image(image)), provider, log)?;
        Ok(flatten_ocr_response(&value))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::pipeline::context::LogLevel;
    use crate::pipeline::transport::mock::ScriptedExchange;
    use crate::pipeline::transport::ChatMessage;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            timeouts: vec![Duration::from_secs(60), Duration::from_secs(120)],
            backoff: Duration::ZERO,
        }
    }

    fn provider() -> Provider {
        Provider::new(
            "Speed-Reasoning",
            "https://integrate.api.nvidia.com/v1",
            Credential::new("nvapi-test"),
            "reasoner",
        )
        .unwrap()
    }

    fn chat() -> ChatRequest {
        ChatRequest::new("reasoner", vec![ChatMessage::user("hi")])
    }

    #[test]
    fn client_error_is_terminal_and_not_retried() {
        let exchange = ScriptedExchange::new(vec![classify_status("p", 404, "not found")]);
        let client = TransportClient::new(exchange, policy());

        let err = client.send(&Payload::Chat(&chat()), &provider(), &mut RunLog::default()).unwrap_err();

        assert!(matches!(err, TransportError::Client { status: 404, .. }));
        assert_eq!(client.exchange.timeouts(), vec![Duration::from_secs(60)]);
    }

    #[test]
    fn timeout_retries_once_with_extended_timeout_then_fails() {
        let exchange = ScriptedExchange::new(vec![
            AttemptOutcome::Retryable(RetryReason::Timeout),
            AttemptOutcome::Retryable(RetryReason::Timeout),
        ]);
        let client = TransportClient::new(exchange, policy());

        let err = client.send(&Payload::Chat(&chat()), &provider(), &mut RunLog::default()).unwrap_err();

        match err {
            TransportError::Exhausted { attempts, last, .. } => {
                assert_eq!(attempts, 2);
                assert_eq!(last, "request timed out");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            client.exchange.timeouts(),
            vec![Duration::from_secs(60), Duration::from_secs(120)]
        );
    }

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        for status in [429u16, 500, 503] {
            assert!(matches!(
                classify_status("p", status, ""),
                AttemptOutcome::Retryable(RetryReason::Status(s)) if s == status
            ));
        }
        for status in [400u16, 401, 403, 404, 422] {
            assert!(matches!(
                classify_status("p", status, ""),
                AttemptOutcome::Terminal(TransportError::Client { .. })
            ));
        }
    }

    #[test]
    fn server_error_then_success_returns_value() {
        let exchange = ScriptedExchange::new(vec![
            AttemptOutcome::Retryable(RetryReason::Status(503)),
            AttemptOutcome::Success(json!({"choices": [{"message": {"content": "{\"ping_ms\": 9}"}}]})),
        ]);
        let client = TransportClient::new(exchange, policy());

        let content = client.chat(&provider(), &chat(), &mut RunLog::default()).unwrap();
        assert_eq!(content, "{\"ping_ms\": 9}");
        assert_eq!(client.exchange.timeouts().len(), 2);
    }

    #[test]
    fn every_failed_attempt_lands_in_the_run_log() {
        let exchange = ScriptedExchange::new(vec![
            AttemptOutcome::Retryable(RetryReason::Status(429)),
            AttemptOutcome::Retryable(RetryReason::Timeout),
        ]);
        let client = TransportClient::new(exchange, policy());
        let mut log = RunLog::default();

        let result = client.chat(&provider(), &chat(), &mut log);

        assert!(matches!(result, Err(TransportError::Exhausted { attempts: 2, .. })));
        assert!(log.contains(
            LogLevel::Warn,
            "Speed-Reasoning: attempt 1 failed (HTTP 429, timeout 60s), retrying"
        ));
        assert!(log.contains(
            LogLevel::Warn,
            "Speed-Reasoning: attempt 2 failed (request timed out, timeout 120s), retry budget exhausted"
        ));
    }

    #[test]
    fn terminal_rejection_and_late_success_are_logged() {
        let mut log = RunLog::default();
        let rejected = TransportClient::new(
            ScriptedExchange::new(vec![classify_status("Speed-Reasoning", 401, "bad key")]),
            policy(),
        );
        assert!(rejected.chat(&provider(), &chat(), &mut log).is_err());
        assert!(log.contains(LogLevel::Warn, "attempt 1 failed with a terminal error"));

        let recovered = TransportClient::new(
            ScriptedExchange::new(vec![
                AttemptOutcome::Retryable(RetryReason::Connection("refused".into())),
                AttemptOutcome::Success(json!({"choices": [{"message": {"content": "ok"}}]})),
            ]),
            policy(),
        );
        assert_eq!(recovered.chat(&provider(), &chat(), &mut log).unwrap(), "ok");
        assert!(log.contains(LogLevel::Info, "Speed-Reasoning: attempt 2 succeeded"));
    }

    #[test]
    fn chat_targets_completions_endpoint() {
        let exchange = ScriptedExchange::new(vec![AttemptOutcome::Success(
            json!({"choices": [{"message": {"content": "ok"}}]}),
        )]);
        let client = TransportClient::new(exchange, policy());
        client.chat(&provider(), &chat(), &mut RunLog::default()).unwrap();
        assert_eq!(
            client.exchange.urls()[0],
            "https://integrate.api.nvidia.com/v1/chat/completions"
        );
    }

    #[test]
    fn empty_choices_is_an_error() {
        let exchange = ScriptedExchange::new(vec![AttemptOutcome::Success(json!({"choices": []}))]);
        let client = TransportClient::new(exchange, policy());
        assert!(matches!(
            client.chat(&provider(), &chat(), &mut RunLog::default()),
            Err(TransportError::EmptyChoices(_))
        ));
    }

    #[test]
    fn oversized_ocr_image_is_skipped_without_a_call() {
        let exchange = ScriptedExchange::new(vec![]);
        let client = TransportClient::new(exchange, policy());
        let image = EncodedImage {
            mime: "image/png".into(),
            base64: "A".repeat(OCR_MAX_BASE64_BYTES),
        };

        let err = client.ocr(&provider(), &image, &mut RunLog::default()).unwrap_err();
        assert!(matches!(err, TransportError::ImageTooLarge(n) if n == OCR_MAX_BASE64_BYTES));
        assert!(client.exchange.timeouts().is_empty());
    }

    #[test]
    fn policy_decision_table() {
        let p = policy();
        assert_eq!(p.after_retryable(0), NextStep::RetryAfter(Duration::ZERO));
        assert_eq!(p.after_retryable(1), NextStep::GiveUp);
        assert_eq!(RetryPolicy::default().timeouts.len(), 2);
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(2_000);
        match classify_status("p", 400, &body) {
            AttemptOutcome::Terminal(TransportError::Client { body, .. }) => {
                assert!(body.chars().count() <= ERROR_BODY_LIMIT + 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    // ── Real HTTP exchange against a local mock server ──

    mod http {
        use super::*;
        use pretty_assertions::assert_eq;
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        fn local_provider(uri: &str) -> Provider {
            Provider::new("Local", &format!("{uri}/v1"), Credential::new("nvapi-local"), "m").unwrap()
        }

        fn fast_policy() -> RetryPolicy {
            RetryPolicy {
                timeouts: vec![Duration::from_millis(200), Duration::from_millis(400)],
                backoff: Duration::from_millis(10),
            }
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn not_found_is_attempted_exactly_once() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/v1/chat/completions"))
                .and(header("authorization", "Bearer nvapi-local"))
                .respond_with(ResponseTemplate::new(404).set_body_string("no such model"))
                .expect(1)
                .mount(&server)
                .await;

            let provider = local_provider(&server.uri());
            let result = tokio::task::spawn_blocking(move || {
                let client = TransportClient::http(fast_policy()).unwrap();
                client.chat(&provider, &chat(), &mut RunLog::default())
            })
            .await
            .unwrap();

            assert!(matches!(result, Err(TransportError::Client { status: 404, .. })));
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn slow_server_is_retried_once_then_exhausted() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/v1/chat/completions"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"choices": [{"message": {"content": "late"}}]}))
                        .set_delay(Duration::from_secs(2)),
                )
                .expect(2)
                .mount(&server)
                .await;

            let provider = local_provider(&server.uri());
            let result = tokio::task::spawn_blocking(move || {
                let client = TransportClient::http(fast_policy()).unwrap();
                client.chat(&provider, &chat(), &mut RunLog::default())
            })
            .await
            .unwrap();

            assert!(matches!(result, Err(TransportError::Exhausted { attempts: 2, .. })));
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn sends_identifying_headers() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(header("x-title", config::APP_TITLE))
                .and(header("http-referer", config::HTTP_REFERER))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"choices": [{"message": {"content": "ok"}}]})),
                )
                .expect(1)
                .mount(&server)
                .await;

            let provider = local_provider(&server.uri());
            let result = tokio::task::spawn_blocking(move || {
                let client = TransportClient::http(fast_policy()).unwrap();
                client.chat(&provider, &chat(), &mut RunLog::default())
            })
            .await
            .unwrap();

            assert_eq!(result.unwrap(), "ok");
        }
    }
}
