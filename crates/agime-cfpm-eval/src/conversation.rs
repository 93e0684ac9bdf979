//! Wire types for sessions, messages and reply events as served by the agent
//! service.
//!
//! Only the parts the harness reads are modelled. Content items and reply
//! events are closed tagged unions; anything the service adds later lands in
//! an explicit catch-all variant instead of failing the whole payload.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Argument keys that may carry a shell-like command, in lookup order.
pub const COMMAND_ARGUMENT_KEYS: [&str; 3] = ["command", "cmd", "script"];

/// Marker the service puts in system notifications emitted by the memory
/// subsystem.
const CFPM_NOTIFICATION_MARKER: &str = "CFPM";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    pub user_visible: bool,
    pub agent_visible: bool,
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self {
            user_visible: true,
            agent_visible: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub content: Vec<MessageContent>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    /// A user message carrying a single text item, visible to both the user
    /// and the agent.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            id: None,
            role: Role::User,
            created: Utc::now().timestamp(),
            content: vec![MessageContent::Text { text: text.into() }],
            metadata: MessageMetadata::default(),
        }
    }

    /// Non-empty text items, trimmed, in content order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|content| match content {
            MessageContent::Text { text } => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            MessageContent::ToolRequest(_)
            | MessageContent::ToolResponse(_)
            | MessageContent::SystemNotification(_)
            | MessageContent::Unsupported => None,
        })
    }

    pub fn tool_requests(&self) -> impl Iterator<Item = &ToolRequest> {
        self.content.iter().filter_map(|content| match content {
            MessageContent::ToolRequest(request) => Some(request),
            MessageContent::Text { .. }
            | MessageContent::ToolResponse(_)
            | MessageContent::SystemNotification(_)
            | MessageContent::Unsupported => None,
        })
    }

    /// Shell-like commands issued by this message's tool requests.
    pub fn tool_commands(&self) -> impl Iterator<Item = String> + '_ {
        self.tool_requests().filter_map(ToolRequest::command)
    }

    /// System notification texts emitted by the memory subsystem.
    pub fn cfpm_notifications(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|content| match content {
            MessageContent::SystemNotification(note) if note.msg.contains(CFPM_NOTIFICATION_MARKER) => {
                Some(note.msg.as_str())
            }
            MessageContent::SystemNotification(_)
            | MessageContent::Text { .. }
            | MessageContent::ToolRequest(_)
            | MessageContent::ToolResponse(_)
            | MessageContent::Unsupported => None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageContent {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolRequest(ToolRequest),
    ToolResponse(ToolResponse),
    SystemNotification(SystemNotification),
    /// Images, thinking blocks, confirmation prompts and other items the
    /// harness does not inspect.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "tool_call")]
    pub tool_call: Value,
}

impl ToolRequest {
    /// The successful invocation carried by this request, if any.
    ///
    /// The service wraps the call either as `{"status": "success", "value": {...}}`
    /// or as a `Result`-style `{"Ok": {...}}`; a bare `{name, arguments}`
    /// object is accepted too.
    pub fn invocation(&self) -> Option<ToolInvocation> {
        let call = ["value", "Ok", "ok"]
            .iter()
            .find_map(|key| self.tool_call.get(key))
            .or_else(|| self.tool_call.get("name").map(|_| &self.tool_call))?;
        serde_json::from_value(call.clone()).ok()
    }

    pub fn command(&self) -> Option<String> {
        self.invocation()?.command()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolInvocation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolInvocation {
    /// First non-blank string under one of [`COMMAND_ARGUMENT_KEYS`], trimmed.
    pub fn command(&self) -> Option<String> {
        COMMAND_ARGUMENT_KEYS.iter().find_map(|key| {
            self.arguments
                .get(*key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "tool_result")]
    pub tool_result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemNotification {
    #[serde(default)]
    pub notification_type: String,
    #[serde(default)]
    pub msg: String,
}

/// One event from the streaming `/reply` endpoint.
#[derive(Debug, Clone)]
pub enum ReplyEvent {
    Message { message: Message },
    Error { error: String },
    Finish { reason: String },
    /// Keep-alives, notifications, model changes and anything else with an
    /// object payload.
    Other {
        event_type: Option<String>,
        payload: Value,
    },
}

impl ReplyEvent {
    /// Build an event from a decoded JSON payload. Returns `None` when the
    /// payload is not a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(map) = value else {
            return None;
        };
        let event_type = map
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);

        let event = match event_type.as_deref() {
            Some("Message") => {
                let parsed = map
                    .get("message")
                    .cloned()
                    .map(serde_json::from_value::<Message>);
                match parsed {
                    Some(Ok(message)) => Self::Message { message },
                    Some(Err(e)) => {
                        debug!("Message event with unreadable message: {}", e);
                        Self::Other {
                            event_type: event_type.clone(),
                            payload: Value::Object(map),
                        }
                    }
                    None => Self::Other {
                        event_type: event_type.clone(),
                        payload: Value::Object(map),
                    },
                }
            }
            Some("Error") => Self::Error {
                error: text_field(&map, "error"),
            },
            Some("Finish") => Self::Finish {
                reason: text_field(&map, "reason"),
            },
            _ => Self::Other {
                event_type: event_type.clone(),
                payload: Value::Object(map),
            },
        };
        Some(event)
    }

    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Message { .. } => Some("Message"),
            Self::Error { .. } => Some("Error"),
            Self::Finish { .. } => Some("Finish"),
            Self::Other { event_type, .. } => event_type.as_deref(),
        }
    }

    /// `Finish` and `Error` end a turn's stream.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Error { .. } | Self::Finish { .. } => true,
            Self::Message { .. } | Self::Other { .. } => false,
        }
    }
}

fn text_field(map: &Map<String, Value>, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Session object returned by `/agent/start`, `/agent/resume` and
/// `GET /sessions/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionDescriptor {
    pub id: String,
    #[serde(default, alias = "description")]
    pub name: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub conversation: Option<Value>,
}

impl SessionDescriptor {
    /// Messages of the attached conversation. The conversation may be a bare
    /// array or wrapped as `{"messages": [...]}`; unreadable messages are
    /// skipped.
    pub fn messages(&self) -> Vec<Message> {
        let items: &[Value] = match &self.conversation {
            Some(Value::Array(items)) => items.as_slice(),
            Some(Value::Object(wrapper)) => match wrapper.get("messages") {
                Some(Value::Array(items)) => items.as_slice(),
                _ => &[],
            },
            _ => &[],
        };
        items
            .iter()
            .filter_map(|item| serde_json::from_value::<Message>(item.clone()).ok())
            .collect()
    }

    /// Every tool command issued across the whole conversation, oldest first.
    pub fn tool_commands(&self) -> Vec<String> {
        self.messages()
            .iter()
            .flat_map(|message| message.tool_commands().collect::<Vec<_>>())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_command_lookup_order() {
        let request: ToolRequest = serde_json::from_value(json!({
            "id": "t1",
            "toolCall": {
                "status": "success",
                "value": {
                    "name": "developer__shell",
                    "arguments": { "script": "dir", "cmd": "  Get-ChildItem C:\\Users  " }
                }
            }
        }))
        .unwrap();
        assert_eq!(request.command().as_deref(), Some("Get-ChildItem C:\\Users"));
    }

    #[test]
    fn test_tool_command_accepts_result_style_wrapper() {
        let request: ToolRequest = serde_json::from_value(json!({
            "id": "t2",
            "tool_call": { "Ok": { "name": "shell", "arguments": { "command": "echo %USERPROFILE%" } } }
        }))
        .unwrap();
        assert_eq!(request.command().as_deref(), Some("echo %USERPROFILE%"));
    }

    #[test]
    fn test_tool_command_skips_blank_and_error_calls() {
        let blank: ToolRequest = serde_json::from_value(json!({
            "id": "t3",
            "toolCall": { "value": { "name": "shell", "arguments": { "command": "   " } } }
        }))
        .unwrap();
        assert_eq!(blank.command(), None);

        let failed: ToolRequest = serde_json::from_value(json!({
            "id": "t4",
            "toolCall": { "status": "error", "error": "bad call" }
        }))
        .unwrap();
        assert_eq!(failed.command(), None);
    }

    #[test]
    fn test_unknown_content_type_is_tolerated() {
        let message: Message = serde_json::from_value(json!({
            "role": "assistant",
            "created": 1,
            "content": [
                { "type": "thinking", "thinking": "hmm", "signature": "x" },
                { "type": "text", "text": "  done  " },
                { "type": "systemNotification", "notificationType": "inlineMessage", "msg": "[CFPM_TOOL_GATE_V1] {}" }
            ]
        }))
        .unwrap();
        assert_eq!(message.texts().collect::<Vec<_>>(), vec!["done"]);
        assert_eq!(message.cfpm_notifications().count(), 1);
    }

    #[test]
    fn test_reply_event_variants() {
        let finish = ReplyEvent::from_value(json!({"type": "Finish", "reason": "stop"})).unwrap();
        assert!(finish.is_terminal());
        assert_eq!(finish.type_name(), Some("Finish"));

        let error = ReplyEvent::from_value(json!({"type": "Error", "error": "boom"})).unwrap();
        match error {
            ReplyEvent::Error { error } => assert_eq!(error, "boom"),
            other => panic!("unexpected event {:?}", other),
        }

        let ping = ReplyEvent::from_value(json!({"type": "Ping"})).unwrap();
        assert!(!ping.is_terminal());
        assert_eq!(ping.type_name(), Some("Ping"));

        assert!(ReplyEvent::from_value(json!([1, 2, 3])).is_none());
        assert!(ReplyEvent::from_value(json!("Finish")).is_none());
    }

    #[test]
    fn test_session_commands_from_wrapped_and_bare_conversations() {
        let message = json!({
            "role": "assistant",
            "created": 2,
            "content": [{
                "type": "toolRequest",
                "id": "a",
                "toolCall": { "status": "success", "value": { "name": "shell", "arguments": { "command": "Test-Path C:\\x" } } }
            }]
        });

        let wrapped: SessionDescriptor = serde_json::from_value(json!({
            "id": "s1",
            "conversation": { "messages": [message.clone()] }
        }))
        .unwrap();
        assert_eq!(wrapped.tool_commands(), vec!["Test-Path C:\\x".to_string()]);

        let bare: SessionDescriptor = serde_json::from_value(json!({
            "id": "s1",
            "conversation": [message, { "role": "robot", "content": [] }]
        }))
        .unwrap();
        assert_eq!(bare.messages().len(), 1);
        assert_eq!(bare.tool_commands().len(), 1);
    }
}
