//! Transport to the external generation capability.
//!
//! The contract is small: an ordered list of role-tagged messages plus an
//! optional response-format constraint goes out; text comes back, possibly
//! carrying an error or incomplete indicator that the session layer treats
//! as a transient failure.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// A `response_format` value, when a constrained reply is wanted.
    pub format: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub content: String,
    /// Error indicator from the service. Transient from the caller's view.
    pub error: Option<String>,
    /// Incomplete-output indicator. Also treated as transient.
    pub incomplete: Option<String>,
}

impl ChatReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            error: None,
            incomplete: None,
        }
    }
}

pub trait ChatClient: Send + Sync {
    fn submit<'a>(
        &'a self,
        request: ChatRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ChatReply>> + Send + 'a>>;
}

/// Connection settings for an OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434/v1".to_string(),
            model: "gpt-4.1".to_string(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a Value>,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    incomplete_details: Option<Value>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
}

/// Reqwest-backed client for a `/chat/completions` endpoint.
pub struct HttpChatClient {
    settings: LlmSettings,
    client: reqwest::Client,
}

impl HttpChatClient {
    pub fn new(settings: LlmSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self { settings, client })
    }

    async fn submit_inner(&self, request: ChatRequest) -> anyhow::Result<ChatReply> {
        let url = format!(
            "{}/chat/completions",
            self.settings.endpoint.trim_end_matches('/')
        );
        let body = WireRequest {
            model: &request.model,
            messages: &request.messages,
            response_format: request.format.as_ref(),
        };

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            constrained = request.format.is_some(),
            "chat request"
        );

        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.settings.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.context("chat request failed")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("chat endpoint returned {status}: {detail}");
        }

        let wire: WireResponse = response.json().await.context("decode chat response")?;
        let content = wire
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        Ok(ChatReply {
            content,
            error: wire.error.map(|v| v.to_string()),
            incomplete: wire.incomplete_details.map(|v| v.to_string()),
        })
    }
}

impl ChatClient for HttpChatClient {
    fn submit<'a>(
        &'a self,
        request: ChatRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ChatReply>> + Send + 'a>> {
        Box::pin(self.submit_inner(request))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Scripted chat client: queued replies, recorded requests.
    #[derive(Default)]
    pub struct FakeChat {
        replies: Mutex<VecDeque<anyhow::Result<ChatReply>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl FakeChat {
        pub fn push_text(&self, content: impl Into<String>) {
            self.replies
                .lock()
                .unwrap()
                .push_back(Ok(ChatReply::text(content)));
        }

        pub fn push_reply(&self, reply: ChatReply) {
            self.replies.lock().unwrap().push_back(Ok(reply));
        }

        pub fn push_transport_error(&self, message: impl Into<String>) {
            let message = message.into();
            self.replies
                .lock()
                .unwrap()
                .push_back(Err(anyhow::anyhow!(message)));
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ChatClient for FakeChat {
        fn submit<'a>(
            &'a self,
            request: ChatRequest,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ChatReply>> + Send + 'a>> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(request);
                self.replies
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| anyhow::bail!("no chat reply queued"))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeChat;
    use super::*;

    #[tokio::test]
    async fn fake_chat_replays_in_order_and_records_requests() -> anyhow::Result<()> {
        let fake = FakeChat::default();
        fake.push_text("first");
        fake.push_text("second");

        let request = ChatRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage::new(Role::User, "hello")],
            format: None,
        };

        let a = fake.submit(request.clone()).await?;
        let b = fake.submit(request.clone()).await?;
        assert_eq!(a.content, "first");
        assert_eq!(b.content, "second");
        assert_eq!(fake.request_count(), 2);
        assert!(fake.submit(request).await.is_err());
        Ok(())
    }
}
