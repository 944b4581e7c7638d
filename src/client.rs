// 🔌 Platform Client - authenticated HTTP verbs against the platform host
//
// Jobs talk to the platform through the `Transport` trait so every job can be
// driven by a scripted transport in tests. `CpdClient` is the real thing:
// a blocking reqwest client with a bearer token acquired on first use.

use crate::config::{AuthMode, Config, EnvType};
use once_cell::unsync::OnceCell;
use reqwest::blocking::Client;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

const IAM_TOKEN_URL: &str = "https://iam.cloud.ibm.com/identity/token";
const SEARCH_ENDPOINT: &str = "/v3/search";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// Token could not be obtained. Fatal for the whole run.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Connection, TLS or timeout failure on a single request
    #[error("request failed: {0}")]
    Transport(String),

    /// Response body did not have the expected shape
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether the run must stop instead of recording a row-level failure
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::Authentication(_))
    }
}

// ============================================================================
// RESPONSE
// ============================================================================

/// Status and raw body of a platform response.
///
/// Non-success statuses are data, not errors: most jobs branch on the exact
/// code (201 vs 400 "already used", 404 user lookups, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        ApiResponse {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body)
            .map_err(|e| ApiError::Decode(format!("HTTP {}: {}", self.status, e)))
    }

    pub fn json_value(&self) -> Result<Value, ApiError> {
        self.json::<Value>()
    }

    /// Body text cut to `max` characters, for status columns and logs
    pub fn snippet(&self, max: usize) -> String {
        if self.body.chars().count() > max {
            let cut: String = self.body.chars().take(max).collect();
            format!("{}...", cut)
        } else {
            self.body.clone()
        }
    }
}

// ============================================================================
// TRANSPORT TRAIT
// ============================================================================

/// Query string pairs, encoded by the transport
pub type Query<'a> = [(&'a str, String)];

/// Authenticated access to the platform REST API.
///
/// `endpoint` is the path below the host (e.g. `/v2/projects`).
pub trait Transport {
    fn send(
        &self,
        method: Method,
        endpoint: &str,
        query: &Query<'_>,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ApiError>;

    fn get(&self, endpoint: &str, query: &Query<'_>) -> Result<ApiResponse, ApiError> {
        self.send(Method::GET, endpoint, query, None)
    }

    fn post(&self, endpoint: &str, query: &Query<'_>, body: &Value) -> Result<ApiResponse, ApiError> {
        self.send(Method::POST, endpoint, query, Some(body))
    }

    /// Global search with an Elasticsearch-style payload
    fn search(&self, payload: &Value) -> Result<ApiResponse, ApiError> {
        self.post(
            SEARCH_ENDPOINT,
            &[("auth_scope", "category".to_string())],
            payload,
        )
    }
}

// ============================================================================
// REAL CLIENT
// ============================================================================

pub struct CpdClient {
    config: Config,
    http: Client,
    token: OnceCell<String>,
}

impl CpdClient {
    pub fn new(config: Config) -> Result<Self, ApiError> {
        let mut builder = Client::builder()
            .user_agent(format!("catalog-bulk/{}", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(!config.verify_tls);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let http = builder
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(CpdClient {
            config,
            http,
            token: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Obtain the bearer token now instead of on the first request
    pub fn authenticate(&self) -> Result<(), ApiError> {
        self.token().map(|_| ())
    }

    fn token(&self) -> Result<&str, ApiError> {
        self.token
            .get_or_try_init(|| self.request_token())
            .map(|t| t.as_str())
    }

    fn request_token(&self) -> Result<String, ApiError> {
        let (response, token_key) = match self.config.env_type {
            EnvType::Saas => {
                let api_key = self.config.api_key.clone().unwrap_or_default();
                let response = self
                    .http
                    .post(IAM_TOKEN_URL)
                    .form(&[
                        ("grant_type", "urn:ibm:params:oauth:grant-type:apikey"),
                        ("apikey", api_key.as_str()),
                    ])
                    .send()
                    .map_err(|e| {
                        ApiError::Authentication(format!("Error authenticating to IBM Cloud: {}", e))
                    })?;
                (response, "access_token")
            }
            EnvType::Software => {
                let payload = match self.config.auth_mode {
                    AuthMode::Password => json!({
                        "username": self.config.username,
                        "password": self.config.password,
                    }),
                    AuthMode::ApiKey => json!({
                        "username": self.config.username,
                        "api_key": self.config.api_key,
                    }),
                };
                let response = self
                    .http
                    .post(self.url("/icp4d-api/v1/authorize"))
                    .json(&payload)
                    .send()
                    .map_err(|e| {
                        ApiError::Authentication(format!("Error authenticating to CPD: {}", e))
                    })?;
                (response, "token")
            }
        };

        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();

        if status != 200 {
            return Err(ApiError::Authentication(format!(
                "Status: {} Response: {}",
                status, body
            )));
        }

        let data: Value = serde_json::from_str(&body)
            .map_err(|e| ApiError::Authentication(format!("token response is not JSON: {}", e)))?;

        let token = data
            .get(token_key)
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Authentication(format!("token response has no '{}'", token_key)))?;

        info!(host = %self.config.host, "authenticated");
        Ok(token.to_string())
    }

    fn url(&self, endpoint: &str) -> String {
        format!("https://{}{}", self.config.host, endpoint)
    }
}

impl Transport for CpdClient {
    fn send(
        &self,
        method: Method,
        endpoint: &str,
        query: &Query<'_>,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ApiError> {
        let token = self.token()?;

        debug!(%method, endpoint, "request");

        let mut request = self
            .http
            .request(method, self.url(endpoint))
            .bearer_auth(token);

        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| ApiError::Transport(format!("failed to read body: {}", e)))?;

        Ok(ApiResponse::new(status, body))
    }
}

// ============================================================================
// TESTS
// ============================================================================
