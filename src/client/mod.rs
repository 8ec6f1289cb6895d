//! HTTP client for a running injectq server.
//!
//! Used by the CLI to stop the server, manage restarts and submit injects.

mod error;

pub use error::{ClientError, Result};

use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;

use crate::api::{
    CancelInjectResponse, CancelRestartResponse, InjectResponse, QueuesResponse, ReadyzResponse,
    SubmitInjectRequest,
};
use crate::restart::{RestartRequest, RestartStatus};

/// HTTP client for an injectq server.
#[derive(Debug, Clone)]
pub struct InjectqClient {
    base_url: String,
    token: Option<String>,
    http: Client,
}

impl InjectqClient {
    /// Example: `InjectqClient::new("http://localhost:8080")`
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            http: Client::new(),
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Calls GET /livez.
    ///
    /// Succeeds while the process is up, including while a restart drains
    /// and /readyz reports 503.
    pub async fn ping(&self) -> Result<()> {
        let response = self.http.get(self.url("/livez")).send().await?;

        if !response.status().is_success() {
            return Err(ClientError::ServerUnhealthy {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Calls GET /readyz.
    pub async fn readiness(&self) -> Result<ReadyzResponse> {
        let response = self.http.get(self.url("/readyz")).send().await?;
        let status = response.status().as_u16();
        if status != 200 && status != 503 {
            return Err(ClientError::ServerUnhealthy { status });
        }
        Ok(response.json().await?)
    }

    // ------------------------------------------------------------------------
    // Injects
    // ------------------------------------------------------------------------

    /// Submit an inject and wait for it to settle.
    pub async fn submit_inject(
        &self,
        session_key: &str,
        request: &SubmitInjectRequest,
    ) -> Result<InjectResponse> {
        let url = self.session_url(session_key, &["injects"])?;
        let response = self.authed(self.http.post(url)).json(request).send().await?;
        self.json_response(response).await
    }

    pub async fn cancel_inject(
        &self,
        session_key: &str,
        unit_id: &str,
    ) -> Result<CancelInjectResponse> {
        let url = self.session_url(session_key, &["injects", unit_id])?;
        let response = self.authed(self.http.delete(url)).send().await?;
        self.json_response(response).await
    }

    pub async fn queues(&self) -> Result<QueuesResponse> {
        let response = self
            .authed(self.http.get(self.url("/api/v1/queues")))
            .send()
            .await?;
        self.json_response(response).await
    }

    // ------------------------------------------------------------------------
    // Admin
    // ------------------------------------------------------------------------

    /// Calls POST /api/admin/v1/shutdown.
    pub async fn shutdown(&self) -> Result<()> {
        let response = self
            .authed(self.http.post(self.url("/api/admin/v1/shutdown")))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.parse_error(response).await)
        }
    }

    pub async fn schedule_restart(&self, request: &RestartRequest) -> Result<RestartStatus> {
        let response = self
            .authed(self.http.post(self.url("/api/admin/v1/restart")))
            .json(request)
            .send()
            .await?;
        self.json_response(response).await
    }

    pub async fn restart_status(&self) -> Result<RestartStatus> {
        let response = self
            .authed(self.http.get(self.url("/api/admin/v1/restart")))
            .send()
            .await?;
        self.json_response(response).await
    }

    pub async fn cancel_restart(&self) -> Result<CancelRestartResponse> {
        let response = self
            .authed(self.http.delete(self.url("/api/admin/v1/restart")))
            .send()
            .await?;
        self.json_response(response).await
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `/api/v1/sessions/{session_key}/...` with every segment escaped.
    fn session_url(&self, session_key: &str, rest: &[&str]) -> Result<Url> {
        let invalid = || ClientError::InvalidUrl(self.base_url.clone());
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["api", "v1", "sessions", session_key])
            .extend(rest);
        Ok(url)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Parse an error response into a ClientError.
    async fn parse_error(&self, response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();

        if let Ok(problem) = response.json::<ProblemDetails>().await {
            ClientError::ApiError {
                status,
                message: problem.detail.unwrap_or(problem.title),
            }
        } else {
            ClientError::ApiError {
                status,
                message: format!("HTTP {status}"),
            }
        }
    }

    async fn json_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(self.parse_error(response).await)
        }
    }
}

/// RFC 7807 Problem Details response.
#[derive(Deserialize)]
struct ProblemDetails {
    title: String,
    detail: Option<String>,
}
