//! Conversation sessions over the generation endpoint: an append-only
//! role-tagged message log with a submit operation that applies the retry
//! policy and, when asked, extracts a schema-constrained value.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::warn;

use crate::llm::{ChatClient, ChatMessage, ChatRequest, Role};
use crate::schema::{self, CompileError, Sketch};

/// Prefix of the freshness marker system message. The marker is stripped and
/// re-inserted at the head on every submission, so at most one exists.
pub const FRESHNESS_PREFIX: &str = "DATETIME:";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub attempt_limit: u32,
    /// Fixed delay before retrying a transient service failure. Malformed
    /// replies are retried immediately.
    pub backoff: Duration,
    /// Optional process-wide announcement banner, inserted ahead of the
    /// freshness marker on every submission.
    pub announcement: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            attempt_limit: 5,
            backoff: Duration::from_secs(30),
            announcement: None,
        }
    }
}

/// Everything a session needs, passed explicitly instead of living in a
/// process-wide singleton.
#[derive(Clone)]
pub struct ChatContext {
    pub client: Arc<dyn ChatClient>,
    pub model: String,
    pub config: SessionConfig,
}

impl ChatContext {
    pub fn new(client: Arc<dyn ChatClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            config: SessionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }
}

/// How the reply should be constrained.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyFormat {
    Plain,
    /// Any JSON object, no particular shape.
    JsonObject,
    /// A heuristic sketch compiled into a strict schema at submit time.
    Heuristic {
        name: String,
        description: String,
        sketch: Sketch,
    },
    /// An already-compiled response-format value.
    Precompiled(Value),
}

impl ReplyFormat {
    pub fn heuristic(name: &str, description: &str, sketch: Sketch) -> Self {
        ReplyFormat::Heuristic {
            name: name.to_string(),
            description: description.to_string(),
            sketch,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The transport failed outright. Retried after the fixed backoff.
    Transport(String),
    /// The service answered but flagged the reply. Retried after backoff.
    Service(String),
    /// No parseable JSON value in a structured reply. Retried immediately.
    MalformedReply(String),
    /// The heuristic schema did not compile. Never retried.
    Schema(CompileError),
    /// Attempts exhausted without any recorded failure.
    Internal,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Transport(s) => write!(f, "transport failure: {s}"),
            SessionError::Service(s) => write!(f, "service flagged the reply: {s}"),
            SessionError::MalformedReply(s) => {
                write!(f, "no parseable value in reply: {s}")
            }
            SessionError::Schema(e) => write!(f, "schema compile error: {e}"),
            SessionError::Internal => write!(f, "attempts exhausted with no recorded failure"),
        }
    }
}

impl std::error::Error for SessionError {}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Structured(Value),
}

impl Reply {
    pub fn as_text(&self) -> &str {
        match self {
            Reply::Text(s) => s,
            Reply::Structured(_) => "",
        }
    }

    pub fn into_structured(self) -> Option<Value> {
        match self {
            Reply::Structured(v) => Some(v),
            Reply::Text(_) => None,
        }
    }
}

/// One agent-side conversation. Append-only apart from `reset`.
pub struct Session {
    ctx: ChatContext,
    messages: Vec<ChatMessage>,
    last_reply: Option<Reply>,
}

impl Session {
    pub fn new(ctx: ChatContext) -> Self {
        Self {
            ctx,
            messages: Vec::new(),
            last_reply: None,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last_reply(&self) -> Option<&Reply> {
        self.last_reply.as_ref()
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) -> &mut Self {
        self.messages.push(ChatMessage::new(role, content));
        self
    }

    pub fn push_system(&mut self, content: impl Into<String>) -> &mut Self {
        self.push(Role::System, content)
    }

    pub fn push_developer(&mut self, content: impl Into<String>) -> &mut Self {
        self.push(Role::Developer, content)
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> &mut Self {
        self.push(Role::User, content)
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) -> &mut Self {
        self.push(Role::Assistant, content)
    }

    /// Replaces the whole message log.
    pub fn reset(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
        self.last_reply = None;
    }

    /// Appends a message and submits in one step.
    pub async fn submit_pushed(
        &mut self,
        role: Role,
        content: impl Into<String>,
        format: ReplyFormat,
    ) -> Result<Reply, SessionError> {
        self.push(role, content);
        self.submit(format).await
    }

    /// Dispatches the message log and applies the retry policy.
    ///
    /// Transient failures (transport errors, service error/incomplete flags)
    /// sleep the fixed backoff before the next attempt; a structured reply
    /// with no parseable JSON value is retried immediately. Exhausting the
    /// ceiling returns the last observed failure.
    pub async fn submit(&mut self, format: ReplyFormat) -> Result<Reply, SessionError> {
        let wire_format = match &format {
            ReplyFormat::Plain => None,
            ReplyFormat::JsonObject => Some(json!({ "type": "json_object" })),
            ReplyFormat::Heuristic {
                name,
                description,
                sketch,
            } => Some(
                schema::compile_format(name, description, sketch)
                    .map_err(SessionError::Schema)?,
            ),
            ReplyFormat::Precompiled(v) => Some(v.clone()),
        };
        let structured = wire_format.is_some();

        self.refresh_head();
        let request = ChatRequest {
            model: self.ctx.model.clone(),
            messages: self.messages.clone(),
            format: wire_format,
        };

        let limit = self.ctx.config.attempt_limit.max(1);
        let mut last: Option<SessionError> = None;
        for attempt in 1..=limit {
            let reply = match self.ctx.client.submit(request.clone()).await {
                Ok(reply) => reply,
                Err(err) => {
                    let err = SessionError::Transport(format!("{err:#}"));
                    warn!(attempt, limit, %err, "chat submission failed");
                    last = Some(err);
                    self.transient_backoff(attempt, limit).await;
                    continue;
                }
            };

            if let Some(flag) = reply.error.or(reply.incomplete) {
                let err = SessionError::Service(flag);
                warn!(attempt, limit, %err, "service flagged the reply");
                last = Some(err);
                self.transient_backoff(attempt, limit).await;
                continue;
            }

            let text = reply.content.trim().to_string();
            if !structured {
                self.push(Role::Assistant, text.clone());
                let reply = Reply::Text(text);
                self.last_reply = Some(reply.clone());
                return Ok(reply);
            }

            // The service occasionally concatenates several JSON values;
            // only the first one is authoritative.
            match first_json_value(&text) {
                Some(value) => {
                    self.push(Role::Assistant, text);
                    let reply = Reply::Structured(value);
                    self.last_reply = Some(reply.clone());
                    return Ok(reply);
                }
                None => {
                    let err = SessionError::MalformedReply(snippet(&text));
                    warn!(attempt, limit, %err, "retrying immediately");
                    last = Some(err);
                }
            }
        }

        Err(last.unwrap_or(SessionError::Internal))
    }

    async fn transient_backoff(&self, attempt: u32, limit: u32) {
        if attempt < limit {
            tokio::time::sleep(self.ctx.config.backoff).await;
        }
    }

    /// Strips any prior freshness marker (and announcement banner) and
    /// re-inserts them at the head: banner first, marker right behind it.
    fn refresh_head(&mut self) {
        let banner = self
            .ctx
            .config
            .announcement
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string);

        self.messages.retain(|m| {
            !(m.role == Role::System
                && (m.content.starts_with(FRESHNESS_PREFIX)
                    || banner.as_deref() == Some(m.content.as_str())))
        });
        self.messages.insert(0, ChatMessage::new(Role::System, freshness_line()));
        if let Some(banner) = banner {
            self.messages.insert(0, ChatMessage::new(Role::System, banner));
        }
    }
}

fn freshness_line() -> String {
    format!(
        "{FRESHNESS_PREFIX} The current date and time is {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

/// First well-formed JSON value from the start of the text; trailing bytes
/// after it are ignored.
fn first_json_value(text: &str) -> Option<Value> {
    serde_json::Deserializer::from_str(text)
        .into_iter::<Value>()
        .next()
        .and_then(Result::ok)
}

fn snippet(text: &str) -> String {
    const LIMIT: usize = 120;
    if text.len() <= LIMIT {
        text.to_string()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < LIMIT)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &text[..cut])
    }
}
