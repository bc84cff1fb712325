//! Minimal JSON-over-HTTPS client for the Google REST APIs.
//!
//! Failures are reported in the same shape as CLI failures: a non-2xx
//! response becomes an [`ExecutionError`] with [`Status::Http`] and the
//! response body as its stderr, so the core classifies both the same way.

use crate::auth::TokenSource;
use provision::{Context, ExecutionError, Status};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const COMPUTE_BASE: &str = "https://compute.googleapis.com/compute/v1";
pub const MONITORING_BASE: &str = "https://monitoring.googleapis.com/v3";

const USER_AGENT: &str = concat!("gkforge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

/// Sends one request. Only a request that got no response is an `Err`.
pub trait Transport: Send + Sync {
    fn send(&self, request: &Request, token: &str) -> Result<Response, String>;
}

/// [`Transport`] over a `ureq` agent.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(60)))
            .user_agent(USER_AGENT)
            .build()
            .into();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &Request, token: &str) -> Result<Response, String> {
        let bearer = format!("Bearer {token}");
        let result = match (request.method, &request.body) {
            (Method::Get, _) => self
                .agent
                .get(&request.url)
                .header("Authorization", &bearer)
                .call(),
            (Method::Post, Some(body)) => self
                .agent
                .post(&request.url)
                .header("Authorization", &bearer)
                .send_json(body),
            (Method::Post, None) => self
                .agent
                .post(&request.url)
                .header("Authorization", &bearer)
                .send_empty(),
        };

        let mut response = result.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| e.to_string())?;
        Ok(Response { status, body })
    }
}

/// Authenticated JSON client shared by the REST drivers.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenSource>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, tokens: Arc<dyn TokenSource>) -> Self {
        Self { transport, tokens }
    }

    pub fn get(&self, ctx: &Context, url: &str) -> provision::Result<Value> {
        self.send(
            ctx,
            Request {
                method: Method::Get,
                url: url.to_string(),
                body: None,
            },
        )
    }

    pub fn post(&self, ctx: &Context, url: &str, body: Value) -> provision::Result<Value> {
        self.send(
            ctx,
            Request {
                method: Method::Post,
                url: url.to_string(),
                body: Some(body),
            },
        )
    }

    fn send(&self, ctx: &Context, request: Request) -> provision::Result<Value> {
        let token = self.tokens.token(ctx)?;
        let command = format!("{} {}", request.method, request.url);
        log::debug!("api: {command}");

        let response = match self.transport.send(&request, &token) {
            Ok(response) => response,
            Err(message) => {
                log::debug!("api unreachable: {message}");
                return Err(ExecutionError {
                    command,
                    status: Status::Unreachable,
                    stderr: message,
                }
                .into());
            }
        };

        let status = Status::Http(response.status);
        if !status.success() {
            log::debug!("api failed ({status}): {}", response.body);
            return Err(ExecutionError {
                command,
                status,
                stderr: response.body,
            }
            .into());
        }

        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&response.body).map_err(|e| {
            provision::Error::Other(format!("`{command}` returned invalid JSON: {e}"))
        })
    }
}
