use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use tutorflow_cache::ResultCache;

use super::ReasoningClient;
use crate::error::{Result, TutorialError};

/// Connection settings for an OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 300,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Posts each prompt as a single user message to `{api_base}/chat/completions`.
#[derive(Debug, Clone)]
pub struct HttpReasoningClient {
    http: Client,
    settings: LlmSettings,
}

impl HttpReasoningClient {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self { http, settings })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.api_base.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ReasoningClient for HttpReasoningClient {
    async fn submit(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.settings.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut req = self.http.post(self.endpoint()).json(&body);
        if let Some(api_key) = &self.settings.api_key {
            req = req.header("Authorization", format!("Bearer {api_key}"));
        }

        debug!(model = %self.settings.model, "sending prompt");
        let response = req.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(TutorialError::Api { status, body });
        }

        let payload: Value = response.json().await?;
        extract_content(&payload)
    }
}

fn extract_content(payload: &Value) -> Result<String> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TutorialError::parse("response has no choices[0].message.content"))
}

/// A reasoning client memoized by a [`ResultCache`], keyed by the exact prompt.
///
/// Prompts and responses are logged under the `llm` target.
#[derive(Clone)]
pub struct CachedReasoner {
    client: Arc<dyn ReasoningClient>,
    cache: Arc<ResultCache>,
}

impl CachedReasoner {
    pub fn new(client: Arc<dyn ReasoningClient>, cache: Arc<ResultCache>) -> Self {
        Self { client, cache }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub async fn submit(&self, prompt: &str, use_cache: bool) -> Result<String> {
        info!(target: "llm", %prompt, "PROMPT");
        let response = self
            .cache
            .get_or_compute(prompt, use_cache, || self.client.submit(prompt))
            .await?;
        info!(target: "llm", %response, "RESPONSE");
        Ok(response)
    }

    /// Like [`submit`](Self::submit), but only a response accepted by
    /// `validate` is stored. A cached response that no longer validates is
    /// ignored and replaced by a fresh one.
    pub async fn submit_validated<T, F>(
        &self,
        prompt: &str,
        use_cache: bool,
        validate: F,
    ) -> Result<T>
    where
        F: Fn(&str) -> Result<T> + Send,
    {
        info!(target: "llm", %prompt, "PROMPT");

        if use_cache {
            if let Some(hit) = self.cache.get(prompt).await {
                match validate(&hit) {
                    Ok(value) => {
                        info!(target: "llm", response = %hit, "RESPONSE");
                        return Ok(value);
                    }
                    Err(error) => warn!(%error, "cached response rejected, asking again"),
                }
            }
        }

        let response = self.client.submit(prompt).await?;
        info!(target: "llm", %response, "RESPONSE");
        let value = validate(&response)?;

        if use_cache {
            if let Err(error) = self.cache.insert(prompt, response).await {
                error!(%error, "failed to save result cache");
            }
        }
        Ok(value)
    }
}


#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{testing::ScriptedClient, *};

    fn reasoner(client: Arc<ScriptedClient>) -> CachedReasoner {
        CachedReasoner::new(client, Arc::new(ResultCache::in_memory()))
    }

    #[test]
    fn content_is_read_from_first_choice() {
        let payload = json!({"choices": [{"message": {"role": "assistant", "content": "hi"}}]});
        assert_eq!(extract_content(&payload).unwrap(), "hi");

        let err = extract_content(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, TutorialError::Parse(_)));
    }

    #[tokio::test]
    async fn endpoint_tolerates_trailing_slash() {
        let client = HttpReasoningClient::new(LlmSettings {
            api_base: "http://localhost:8080/v1/".to_string(),
            ..LlmSettings::default()
        })
        .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[tokio::test]
    async fn repeated_prompt_is_served_from_cache() {
        let client = Arc::new(ScriptedClient::replying(|p| Ok(format!("echo {p}"))));
        let reasoner = reasoner(client.clone());

        let first = reasoner.submit("q", true).await.unwrap();
        let second = reasoner.submit("q", true).await.unwrap();

        assert_eq!(first, "echo q");
        assert_eq!(second, first);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn no_cache_always_calls_the_service() {
        let client = Arc::new(ScriptedClient::replying(|_| Ok("x".to_string())));
        let reasoner = reasoner(client.clone());

        reasoner.submit("q", false).await.unwrap();
        reasoner.submit("q", false).await.unwrap();

        assert_eq!(client.calls(), 2);
        assert!(reasoner.cache().is_empty().await);
    }

    #[tokio::test]
    async fn invalid_responses_are_not_cached() {
        let client = Arc::new(ScriptedClient::default());
        client.push(Ok("garbage".to_string()));
        client.push(Ok("42".to_string()));
        let reasoner = reasoner(client.clone());
        let parse = |s: &str| s.parse::<u32>().map_err(|e| TutorialError::parse(e.to_string()));

        let err = reasoner.submit_validated("n", true, parse).await.unwrap_err();
        assert!(matches!(err, TutorialError::Parse(_)));
        assert!(reasoner.cache().is_empty().await);

        let n = reasoner.submit_validated("n", true, parse).await.unwrap();
        assert_eq!(n, 42);
        assert_eq!(reasoner.cache().get("n").await, Some("42".to_string()));
    }

    #[tokio::test]
    async fn stale_cached_response_is_replaced() {
        let client = Arc::new(ScriptedClient::replying(|_| Ok("7".to_string())));
        let reasoner = reasoner(client.clone());
        reasoner.cache().insert("n", "not a number").await.unwrap();
        let parse = |s: &str| s.parse::<u32>().map_err(|e| TutorialError::parse(e.to_string()));

        let n = reasoner.submit_validated("n", true, parse).await.unwrap();

        assert_eq!(n, 7);
        assert_eq!(client.calls(), 1);
        assert_eq!(reasoner.cache().get("n").await, Some("7".to_string()));
    }
}
