use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::LlmError;

/// Completion capability: given system+user prompts and model parameters,
/// return completion text or a typed failure.
///
/// Provider-enforced timeouts make calls fail cleanly rather than hang;
/// there is no cross-request cancellation.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider identifier (e.g. "openai").
    fn name(&self) -> &str;

    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: &str,
        temperature: f64,
    ) -> Result<String, LlmError>;
}

// ── OpenAI-compatible chat completion provider ───────────────────

pub struct OpenAiCompletion {
    client: reqwest::Client,
    completions_url: String,
    auth_header: String,
}

impl OpenAiCompletion {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        let base = base_url.trim_end_matches('/');
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            completions_url: format!("{base}/v1/chat/completions"),
            auth_header: format!("Bearer {api_key}"),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletion {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: &str,
        temperature: f64,
    ) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
        });

        let resp = self
            .client
            .post(&self.completions_url)
            .header("Authorization", &self.auth_header)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request {
                provider: self.name().into(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LlmError::Request {
                provider: self.name().into(),
                message: format!("completion API error {status}"),
            });
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| LlmError::Unparseable {
            provider: self.name().into(),
            message: e.to_string(),
        })?;

        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| LlmError::Unparseable {
                provider: self.name().into(),
                message: "missing choices[0].message.content".into(),
            })
    }
}

// ── Scripted provider (test double) ──────────────────────────────

/// A request observed by [`ScriptedCompletion`].
#[derive(Debug, Clone)]
pub struct RecordedCompletion {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: String,
    pub temperature: f64,
}

/// Returns queued responses in order and records every request. Once the
/// queue is empty, further calls fail with a provider error — tests that
/// over-call fail loudly instead of receiving silent defaults.
#[derive(Default)]
pub struct ScriptedCompletion {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<RecordedCompletion>>,
}

impl ScriptedCompletion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .expect("scripted responses poisoned")
            .push_back(Ok(response.into()));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.responses
            .lock()
            .expect("scripted responses poisoned")
            .push_back(Err(LlmError::Request {
                provider: "scripted".into(),
                message: message.into(),
            }));
    }

    pub fn requests(&self) -> Vec<RecordedCompletion> {
        self.requests
            .lock()
            .expect("scripted requests poisoned")
            .clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: &str,
        temperature: f64,
    ) -> Result<String, LlmError> {
        self.requests
            .lock()
            .expect("scripted requests poisoned")
            .push(RecordedCompletion {
                prompt: prompt.to_string(),
                system_prompt: system_prompt.map(ToString::to_string),
                model: model.to_string(),
                temperature,
            });
        self.responses
            .lock()
            .expect("scripted responses poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Err(LlmError::Request {
                    provider: "scripted".into(),
                    message: "no scripted response left".into(),
                })
            })
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub fn create_completion_provider(config: &LlmConfig) -> Arc<dyn CompletionProvider> {
    let base_url = config
        .base_url
        .as_deref()
        .unwrap_or("https://api.openai.com");
    let api_key = config.api_key.as_deref().unwrap_or("");
    Arc::new(OpenAiCompletion::new(
        base_url,
        api_key,
        Duration::from_secs(config.timeout_secs),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn scripted_provider_replays_in_order_and_records() {
        let provider = ScriptedCompletion::new();
        provider.push_response("first");
        provider.push_response("second");

        let a = provider.complete("p1", Some("s"), "m", 0.2).await.unwrap();
        let b = provider.complete("p2", None, "m", 0.2).await.unwrap();
        assert_eq!(a, "first");
        assert_eq!(b, "second");

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].prompt, "p1");
        assert_eq!(requests[0].system_prompt.as_deref(), Some("s"));
        assert!(requests[1].system_prompt.is_none());
    }

    #[tokio::test]
    async fn scripted_provider_fails_when_exhausted() {
        let provider = ScriptedCompletion::new();
        let err = provider.complete("p", None, "m", 0.2).await.unwrap_err();
        assert!(err.to_string().contains("no scripted response left"));
    }

    #[tokio::test]
    async fn openai_completion_parses_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "- basic_info::age::User is 40"}}]
            })))
            .mount(&server)
            .await;

        let provider =
            OpenAiCompletion::new(&server.uri(), "test-key", Duration::from_secs(5));
        let out = provider
            .complete("prompt", Some("system"), "gpt-4o-mini", 0.2)
            .await
            .unwrap();
        assert_eq!(out, "- basic_info::age::User is 40");
    }

    #[tokio::test]
    async fn openai_completion_surfaces_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = OpenAiCompletion::new(&server.uri(), "k", Duration::from_secs(5));
        let err = provider.complete("p", None, "m", 0.2).await.unwrap_err();
        assert!(matches!(err, LlmError::Request { .. }));
    }

    #[tokio::test]
    async fn openai_completion_rejects_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let provider = OpenAiCompletion::new(&server.uri(), "k", Duration::from_secs(5));
        let err = provider.complete("p", None, "m", 0.2).await.unwrap_err();
        assert!(matches!(err, LlmError::Unparseable { .. }));
    }
}
