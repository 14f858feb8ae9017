//! Operations assistant backed by an OpenAI-compatible chat-completions API.

#[cfg(feature = "web")]
use crate::app::SharedState;
#[cfg(feature = "web")]
use crate::config::ChatConfig;
#[cfg(feature = "web")]
use crate::error::AppError;
#[cfg(feature = "web")]
use axum::{Json, extract::State};
#[cfg(feature = "web")]
use log::{debug, error};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant for RINL steel plant operations.";
pub const TEMPERATURE: f32 = 0.7;

#[cfg(feature = "web")]
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("the assistant is not configured")]
    Disabled,

    #[cfg(feature = "web")]
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("No reply from AI.")]
    NoReply,
}

impl ChatError {
    /// Text shown in place of a reply.
    pub fn user_message(&self) -> String {
        format!("AI failed to respond. {}", self)
    }
}

/// One turn of the conversation as the widget keeps it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub text: String,
    #[serde(default, alias = "isBot")]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// The system prompt followed by the conversation.
pub fn build_request(model: &str, history: &[ChatMessage]) -> CompletionRequest {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ApiMessage {
        role: "system".to_string(),
        content: SYSTEM_PROMPT.to_string(),
    });
    messages.extend(history.iter().map(|m| ApiMessage {
        role: if m.is_bot { "assistant" } else { "user" }.to_string(),
        content: m.text.clone(),
    }));

    CompletionRequest {
        model: model.to_string(),
        messages,
        temperature: TEMPERATURE,
    }
}

/// First choice's content; an empty or missing reply is an error.
pub fn parse_reply(body: &str) -> Result<String, ChatError> {
    let response: CompletionResponse =
        serde_json::from_str(body).map_err(|_| ChatError::NoReply)?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .map(|m| m.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or(ChatError::NoReply)
}

/// The provider's error message, falling back to the raw body.
pub fn parse_error(status: u16, body: &str) -> ChatError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| format!("Request failed with status code {}", status));
    ChatError::Api { status, message }
}

#[cfg(feature = "web")]
pub struct ChatClient {
    client: reqwest::Client,
    config: ChatConfig,
}

#[cfg(feature = "web")]
impl ChatClient {
    pub fn new(config: ChatConfig) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(ChatClient { client, config })
    }

    pub async fn reply(&self, history: &[ChatMessage]) -> Result<String, ChatError> {
        let request = build_request(&self.config.model, history);
        debug!("sending {} messages to {}", request.messages.len(), self.config.endpoint);

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(parse_error(status.as_u16(), &body));
        }
        parse_reply(&body)
    }
}

#[cfg(feature = "web")]
#[derive(Debug, Deserialize)]
pub struct ChatForm {
    pub messages: Vec<ChatMessage>,
}

#[cfg(feature = "web")]
impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Disabled => {
                AppError::Unavailable("The assistant is not available right now.".to_string())
            }
            other => AppError::Upstream(other.user_message()),
        }
    }
}

#[cfg(feature = "web")]
pub async fn handle_chat(
    State(state): State<SharedState>,
    Json(form): Json<ChatForm>,
) -> Result<Json<serde_json::Value>, AppError> {
    let client = state.chat.as_ref().ok_or(ChatError::Disabled)?;
    let reply = client
        .reply(&form.messages)
        .await
        .inspect_err(|e| error!("chat completion failed: {}", e))?;
    Ok(Json(serde_json::json!({ "reply": reply })))
}
