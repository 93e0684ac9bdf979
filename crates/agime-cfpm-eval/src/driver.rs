//! Session setup and turn-by-turn conversation driving.

use crate::client::{ApiClient, ReplyOutcome, StreamedReply};
use crate::conversation::{Message, ReplyEvent, SessionDescriptor};
use crate::error::{EvalError, Result};
use crate::memory::session_path;
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

pub const RESUME_TIMEOUT: Duration = Duration::from_secs(180);

const PROVIDER_CONFIG_KEYS: [&str; 3] = ["provider", "agime-provider", "AGIME_PROVIDER"];
const MODEL_CONFIG_KEYS: [&str; 3] = ["model", "agime-model", "AGIME_MODEL"];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProviderSelection {
    pub provider: String,
    pub model: String,
}

async fn first_config_value(client: &ApiClient, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(value) = client.read_config_value(key).await {
            return Some(value);
        }
    }
    None
}

/// Explicit values win; otherwise the service's configuration is consulted.
pub async fn resolve_provider(
    client: &ApiClient,
    provider: Option<String>,
    model: Option<String>,
) -> Result<ProviderSelection> {
    let provider = match provider.filter(|p| !p.trim().is_empty()) {
        Some(provider) => Some(provider),
        None => first_config_value(client, &PROVIDER_CONFIG_KEYS).await,
    };
    let model = match model.filter(|m| !m.trim().is_empty()) {
        Some(model) => Some(model),
        None => first_config_value(client, &MODEL_CONFIG_KEYS).await,
    };

    match (provider, model) {
        (Some(provider), Some(model)) => {
            info!("Using provider {} with model {}", provider, model);
            Ok(ProviderSelection { provider, model })
        }
        _ => Err(EvalError::ProviderUnresolved),
    }
}

fn session_from(value: Option<Value>, url: String) -> Result<SessionDescriptor> {
    let value = value.ok_or_else(|| EvalError::InvalidResponse {
        url: url.clone(),
        reason: "empty body".to_string(),
    })?;
    serde_json::from_value(value).map_err(|e| EvalError::InvalidResponse {
        url,
        reason: e.to_string(),
    })
}

pub async fn start_session(client: &ApiClient, working_dir: &str) -> Result<SessionDescriptor> {
    let path = "/agent/start";
    let value = client
        .post_json(path, &json!({ "working_dir": working_dir }))
        .await?;
    let session = session_from(value, format!("{}{}", client.base_url(), path))?;
    info!("Started session {}", session.id);
    Ok(session)
}

pub async fn update_provider(client: &ApiClient, session_id: &str, selection: &ProviderSelection) -> Result<()> {
    client
        .post_json(
            "/agent/update_provider",
            &json!({
                "provider": selection.provider,
                "model": selection.model,
                "session_id": session_id,
            }),
        )
        .await?;
    Ok(())
}

/// What `/agent/resume` reported about the resumed session.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ResumedSession {
    pub name: Option<String>,
    pub provider: Option<String>,
}

pub async fn resume_session(client: &ApiClient, session_id: &str) -> Result<ResumedSession> {
    let value = client
        .call_with_timeout(
            Method::POST,
            "/agent/resume",
            Some(&json!({
                "session_id": session_id,
                "load_model_and_extensions": true,
            })),
            RESUME_TIMEOUT,
        )
        .await?;

    let field = |key: &str| {
        value
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let resumed = ResumedSession {
        name: field("name"),
        provider: field("provider_name"),
    };
    info!("Resumed session {}", session_id);
    Ok(resumed)
}

/// Every tool command in the session's stored conversation, oldest first. An
/// empty body reads as a session without commands.
pub async fn fetch_session_commands(client: &ApiClient, session_id: &str) -> Result<Vec<String>> {
    let path = session_path(session_id);
    match client.get_json(&path).await? {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => {
            let session = session_from(Some(value), format!("{}{}", client.base_url(), path))?;
            Ok(session.tool_commands())
        }
    }
}

pub fn reply_body(session_id: &str, message: &Message) -> Value {
    json!({
        "session_id": session_id,
        "recipe_name": null,
        "recipe_version": null,
        "messages": [message],
    })
}

/// Everything one turn produced.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub events: Vec<ReplyEvent>,
    pub outcome: ReplyOutcome,
    pub assistant_texts: Vec<String>,
    pub tool_commands: Vec<String>,
    pub tool_request_count: usize,
    pub cfpm_notifications: Vec<String>,
    pub error: Option<String>,
    pub finish_reason: Option<String>,
}

impl From<StreamedReply> for TurnResult {
    fn from(reply: StreamedReply) -> Self {
        let mut result = TurnResult {
            events: Vec::new(),
            outcome: reply.outcome,
            assistant_texts: Vec::new(),
            tool_commands: Vec::new(),
            tool_request_count: 0,
            cfpm_notifications: Vec::new(),
            error: None,
            finish_reason: None,
        };

        for event in &reply.events {
            match event {
                ReplyEvent::Message { message } => {
                    result
                        .assistant_texts
                        .extend(message.texts().map(str::to_string));
                    result.tool_request_count += message.tool_requests().count();
                    result.tool_commands.extend(message.tool_commands());
                    result
                        .cfpm_notifications
                        .extend(message.cfpm_notifications().map(str::to_string));
                }
                ReplyEvent::Error { error } => {
                    if result.error.is_none() {
                        result.error = Some(error.clone());
                    }
                }
                ReplyEvent::Finish { reason } => {
                    if result.finish_reason.is_none() {
                        result.finish_reason = Some(reason.clone());
                    }
                }
                ReplyEvent::Other { .. } => {}
            }
        }
        result.events = reply.events;
        result
    }
}

impl TurnResult {
    pub fn timed_out(&self) -> bool {
        self.outcome == ReplyOutcome::TimedOut
    }

    pub fn summary(&self) -> TurnSummary {
        TurnSummary {
            event_count: self.events.len(),
            event_types: self
                .events
                .iter()
                .map(|event| event.type_name().map(str::to_string))
                .collect(),
            assistant_texts: self.assistant_texts.clone(),
            tool_request_count: self.tool_request_count,
            tool_commands: self.tool_commands.clone(),
            cfpm_system_notifications: self.cfpm_notifications.clone(),
            error: self.error.clone(),
            finish_reason: self.finish_reason.clone(),
            outcome: self.outcome,
            timed_out: self.timed_out(),
        }
    }
}

/// Report form of a [`TurnResult`].
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnSummary {
    pub event_count: usize,
    pub event_types: Vec<Option<String>>,
    pub assistant_texts: Vec<String>,
    pub tool_request_count: usize,
    pub tool_commands: Vec<String>,
    pub cfpm_system_notifications: Vec<String>,
    pub error: Option<String>,
    pub finish_reason: Option<String>,
    pub outcome: ReplyOutcome,
    pub timed_out: bool,
}

/// Submit one user message and wait for its reply stream to end.
pub async fn send_turn(client: &ApiClient, session_id: &str, text: &str, timeout: Duration) -> Result<TurnResult> {
    let message = Message::user_text(text);
    let reply = client
        .stream_call("/reply", &reply_body(session_id, &message), timeout)
        .await?;
    let turn = TurnResult::from(reply);
    info!(
        "Turn finished with {} events ({:?})",
        turn.events.len(),
        turn.outcome
    );
    Ok(turn)
}
