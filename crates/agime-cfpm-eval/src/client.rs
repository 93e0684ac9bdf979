//! Thin HTTP client for the agent service.
//!
//! Every request carries the shared secret in `X-Secret-Key` and a JSON
//! content type. Plain calls return the decoded JSON body (or `None` for an
//! empty body); the streaming variant feeds `/reply` through
//! [`EventStreamDecoder`] under a wall-clock deadline.

use crate::conversation::ReplyEvent;
use crate::error::{EvalError, Result};
use crate::stream::EventStreamDecoder;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

pub const SECRET_HEADER: &str = "X-Secret-Key";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How a streamed reply ended.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyOutcome {
    /// A `Finish` or `Error` event was received.
    Terminated,
    /// The server closed the stream without a terminal event.
    Closed,
    /// The deadline passed before a terminal event arrived.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct StreamedReply {
    pub events: Vec<ReplyEvent>,
    pub outcome: ReplyOutcome,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    secret: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .build()
            .map_err(|source| EvalError::Transport {
                url: base_url.clone(),
                source,
            })?;
        Ok(Self {
            base_url,
            secret: secret.into(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(SECRET_HEADER, &self.secret)
            .header(CONTENT_TYPE, "application/json")
    }

    async fn check_status(url: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(EvalError::Http {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    /// Issue a JSON request with the default timeout.
    pub async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<Value>> {
        self.call_with_timeout(method, path, body, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    pub async fn call_with_timeout(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        let url = self.url(path);
        let mut request = self.request(method, &url).timeout(timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|source| EvalError::Transport {
            url: url.clone(),
            source,
        })?;
        let response = Self::check_status(&url, response).await?;
        let raw = response.text().await.map_err(|source| EvalError::Transport {
            url: url.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| EvalError::InvalidResponse {
                url,
                reason: e.to_string(),
            })
    }

    pub async fn get_json(&self, path: &str) -> Result<Option<Value>> {
        self.call(Method::GET, path, None).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Option<Value>> {
        self.call(Method::POST, path, Some(body)).await
    }

    /// HTTP status of `GET /status`.
    pub async fn status(&self) -> Result<u16> {
        let url = self.url("/status");
        let response = self
            .request(Method::GET, &url)
            .timeout(STATUS_REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|source| EvalError::Transport { url, source })?;
        Ok(response.status().as_u16())
    }

    /// Poll `/status` until it answers 200. Transport errors and other status
    /// codes are swallowed until `max_wait` has elapsed.
    pub async fn wait_until_ready(&self, max_wait: Duration) -> Result<()> {
        let started = Instant::now();
        loop {
            match self.status().await {
                Ok(200) => {
                    info!("Server ready at {}", self.base_url);
                    return Ok(());
                }
                Ok(code) => debug!("/status answered {}", code),
                Err(e) => debug!("/status not reachable yet: {}", e),
            }
            if started.elapsed() > max_wait {
                return Err(EvalError::ReadinessTimeout { waited: max_wait });
            }
            sleep(READINESS_POLL_INTERVAL).await;
        }
    }

    /// POST `body` to a streaming endpoint and collect events until a
    /// terminal event, stream closure or `timeout`, whichever comes first.
    ///
    /// Hitting the deadline is not an error: the events seen so far are
    /// returned with [`ReplyOutcome::TimedOut`].
    pub async fn stream_call(&self, path: &str, body: &Value, timeout: Duration) -> Result<StreamedReply> {
        let deadline = Instant::now() + timeout;
        let url = self.url(path);
        let request = self
            .request(Method::POST, &url)
            .header(ACCEPT, "text/event-stream")
            .json(body);

        let response = match timeout_at(deadline, request.send()).await {
            Ok(result) => result.map_err(|source| EvalError::Transport {
                url: url.clone(),
                source,
            })?,
            Err(_) => {
                warn!("{} did not respond within {}s", url, timeout.as_secs());
                return Ok(StreamedReply {
                    events: Vec::new(),
                    outcome: ReplyOutcome::TimedOut,
                });
            }
        };
        let response = Self::check_status(&url, response).await?;

        let mut decoder = EventStreamDecoder::new();
        let mut events = Vec::new();
        let body = response.bytes_stream();
        futures::pin_mut!(body);

        loop {
            match timeout_at(deadline, body.next()).await {
                Err(_) => {
                    warn!(
                        "Reply stream hit the {}s deadline after {} events",
                        timeout.as_secs(),
                        events.len()
                    );
                    return Ok(StreamedReply {
                        events,
                        outcome: ReplyOutcome::TimedOut,
                    });
                }
                Ok(Some(Ok(chunk))) => {
                    events.extend(decoder.push(&chunk));
                    if decoder.is_terminated() {
                        return Ok(StreamedReply {
                            events,
                            outcome: ReplyOutcome::Terminated,
                        });
                    }
                }
                Ok(Some(Err(source))) => return Err(EvalError::Transport { url, source }),
                Ok(None) => {
                    events.extend(decoder.finish());
                    let outcome = if decoder.is_terminated() {
                        ReplyOutcome::Terminated
                    } else {
                        warn!("Reply stream closed without a Finish or Error event");
                        ReplyOutcome::Closed
                    };
                    return Ok(StreamedReply { events, outcome });
                }
            }
        }
    }

    /// Best-effort `POST /config/read`. Any failure reads as "unset".
    pub async fn read_config_value(&self, key: &str) -> Option<String> {
        let body = json!({ "key": key, "is_secret": false });
        let value = match self.post_json("/config/read", &body).await {
            Ok(value) => value?,
            Err(e) => {
                debug!("config key {} unavailable: {}", key, e);
                return None;
            }
        };
        let text = match &value {
            Value::String(text) => text.as_str(),
            Value::Object(map) => map.get("value").and_then(Value::as_str)?,
            _ => return None,
        };
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}
