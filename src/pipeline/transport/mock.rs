//! Scripted [`ModelClient`] and [`Exchange`] doubles for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use super::{
    AttemptOutcome, ChatRequest, ContentPart, EncodedImage, Exchange, HttpRequest, MessageContent,
    ModelClient, Provider, RetryReason, TransportError,
};
use crate::pipeline::context::RunLog;

/// Exchange that replays scripted outcomes and records every attempt it saw.
/// Once the script runs out every attempt times out.
pub struct ScriptedExchange {
    outcomes: Mutex<VecDeque<AttemptOutcome>>,
    seen_timeouts: Mutex<Vec<Duration>>,
    seen_urls: Mutex<Vec<String>>,
}

impl ScriptedExchange {
    pub fn new(outcomes: Vec<AttemptOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            seen_timeouts: Mutex::new(Vec::new()),
            seen_urls: Mutex::new(Vec::new()),
        }
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.seen_timeouts.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.seen_urls.lock().unwrap().clone()
    }
}

impl Exchange for ScriptedExchange {
    fn attempt(&self, request: &HttpRequest<'_>, timeout: Duration) -> AttemptOutcome {
        self.seen_timeouts.lock().unwrap().push(timeout);
        self.seen_urls.lock().unwrap().push(request.url.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AttemptOutcome::Retryable(RetryReason::Timeout))
    }
}

/// One recorded call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub provider: String,
    pub kind: CallKind,
    /// Concatenated text of every message in the request.
    pub prompt: String,
    pub json_mode: bool,
    pub image_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Chat,
    Ocr,
}

/// Replays responses in order and records every call it receives.
///
/// `Err(status)` entries simulate a terminal client error with that status.
pub struct ScriptedModelClient {
    responses: Mutex<VecDeque<Result<String, u16>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModelClient {
    pub fn new(responses: Vec<Result<String, u16>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: every scripted response succeeds.
    pub fn replies(responses: &[&str]) -> Self {
        Self::new(responses.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next(&self, provider: &Provider) -> Result<String, TransportError> {
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(status)) => Err(TransportError::Client {
                provider: provider.name().to_string(),
                status,
                body: "scripted failure".into(),
            }),
            None => Err(TransportError::Exhausted {
                provider: provider.name().to_string(),
                attempts: 2,
                last: "script exhausted".into(),
            }),
        }
    }
}

impl ModelClient for ScriptedModelClient {
    fn chat(
        &self,
        provider: &Provider,
        request: &ChatRequest,
        _log: &mut RunLog,
    ) -> Result<String, TransportError> {
        let mut prompt = String::new();
        let mut image_count = 0;
        for message in &request.messages {
            match &message.content {
                MessageContent::Text(text) => prompt.push_str(text),
                MessageContent::Parts(parts) => {
                    for part in parts {
                        match part {
                            ContentPart::Text { text } => prompt.push_str(text),
                            ContentPart::ImageUrl { .. } => image_count += 1,
                        }
                    }
                }
            }
            prompt.push('\n');
        }
        self.calls.lock().unwrap().push(RecordedCall {
            provider: provider.name().to_string(),
            kind: CallKind::Chat,
            prompt,
            json_mode: request.response_format.is_some(),
            image_count,
        });
        self.next(provider)
    }

    fn ocr(
        &self,
        provider: &Provider,
        _image: &EncodedImage,
        _log: &mut RunLog,
    ) -> Result<String, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall {
            provider: provider.name().to_string(),
            kind: CallKind::Ocr,
            prompt: String::new(),
            json_mode: false,
            image_count: 1,
        });
        self.next(provider)
    }
}
