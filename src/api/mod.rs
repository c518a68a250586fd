//! HTTP surface of the hub
//!
//! Requests are parsed into an [`ApiRequest`] and executed against the
//! [`CoordinationHub`]; the result is an [`ApiResponse`] carrying a status
//! code and a JSON body. Wiring this to an HTTP server is left to the binary
//! that hosts the hub.

use crate::error::HubError;
use crate::hub::CoordinationHub;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Supported API calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiRequest {
    /// `POST /api/agent/{name}/command`
    SendCommand {
        agent: String,
        command: Option<String>,
    },

    /// `GET /api/agent/{name}/info`
    GetInfo { agent: String },

    /// `GET /api/agents`
    ListAgents,

    /// `POST /api/chat/{name}`
    SendChat {
        agent: String,
        message: Option<String>,
    },
}

#[derive(Debug, Default, Deserialize)]
struct CommandBody {
    command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatBody {
    message: Option<String>,
}

impl ApiRequest {
    /// Match a method and path; `Err` carries the response for unroutable or malformed requests
    pub fn parse(method: &str, path: &str, body: Option<&str>) -> Result<Self, ApiResponse> {
        let segments: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        match (method.to_ascii_uppercase().as_str(), segments.as_slice()) {
            ("POST", ["api", "agent", agent, "command"]) => {
                let body: CommandBody = parse_body(body)?;
                Ok(Self::SendCommand {
                    agent: agent.to_string(),
                    command: body.command,
                })
            }
            ("GET", ["api", "agent", agent, "info"]) => Ok(Self::GetInfo {
                agent: agent.to_string(),
            }),
            ("GET", ["api", "agents"]) => Ok(Self::ListAgents),
            ("POST", ["api", "chat", agent]) => {
                let body: ChatBody = parse_body(body)?;
                Ok(Self::SendChat {
                    agent: agent.to_string(),
                    message: body.message,
                })
            }
            _ => Err(ApiResponse::error(404, "Not found")),
        }
    }
}

fn parse_body<T>(body: Option<&str>) -> Result<T, ApiResponse>
where
    T: Default + for<'de> Deserialize<'de>,
{
    match body.map(str::trim).filter(|body| !body.is_empty()) {
        None => Ok(T::default()),
        Some(body) => serde_json::from_str(body).map_err(|err| {
            debug!(error = %err, "malformed request body");
            ApiResponse::error(400, "Invalid JSON body")
        }),
    }
}

/// Status code plus JSON body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl From<HubError> for ApiResponse {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Timeout { .. } => Self::error(408, "Request timeout"),
            other => Self::error(other.status_code(), other.to_string()),
        }
    }
}

/// Executes API requests against a hub
#[derive(Debug, Clone)]
pub struct HubApi {
    hub: CoordinationHub,
}

impl HubApi {
    pub fn new(hub: CoordinationHub) -> Self {
        Self { hub }
    }

    /// Parse and execute a raw request
    pub async fn handle(&self, method: &str, path: &str, body: Option<&str>) -> ApiResponse {
        match ApiRequest::parse(method, path, body) {
            Ok(request) => self.execute(request).await,
            Err(response) => response,
        }
    }

    pub async fn execute(&self, request: ApiRequest) -> ApiResponse {
        let result = match request {
            ApiRequest::SendCommand { agent, command } => self.send_command(&agent, command).await,
            ApiRequest::GetInfo { agent } => self.hub.fetch_info(&agent).await.map(ApiResponse::ok),
            ApiRequest::ListAgents => Ok(ApiResponse::ok(json!(self.hub.agents().await))),
            ApiRequest::SendChat { agent, message } => self.send_chat(&agent, message).await,
        };

        result.unwrap_or_else(|err| {
            warn!(error = %err, "api request failed");
            ApiResponse::from(err)
        })
    }

    async fn send_command(
        &self,
        agent: &str,
        command: Option<String>,
    ) -> Result<ApiResponse, HubError> {
        if !self.hub.is_in_game(agent).await {
            return Err(HubError::AgentNotFound(agent.to_string()));
        }
        let Some(command) = command.filter(|command| !command.is_empty()) else {
            return Ok(ApiResponse::error(400, "Command is required"));
        };

        let done = self.hub.dispatch_command(agent, &command).await?;
        Ok(ApiResponse::ok(json!({
            "success": true,
            "responses": done.responses,
            "executionTime": u64::try_from(done.elapsed.as_millis()).unwrap_or(u64::MAX),
        })))
    }

    async fn send_chat(
        &self,
        agent: &str,
        message: Option<String>,
    ) -> Result<ApiResponse, HubError> {
        let Some(message) = message.filter(|message| !message.is_empty()) else {
            return Ok(ApiResponse::error(400, "Message is required"));
        };

        let started_at = chrono::Utc::now().timestamp_millis();
        self.hub.dispatch_chat_send(agent, &message).await?;
        Ok(ApiResponse::ok(json!({
            "success": true,
            "message": message,
            "agentName": agent,
            "timestamp": started_at,
        })))
    }
}
