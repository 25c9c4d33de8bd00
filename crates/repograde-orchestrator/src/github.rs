//! Minimal GitHub REST client for filing feedback issues.

use repograde_core::{GradeError, RateLimitState, RepoRef};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::RetryPolicy;
use crate::error::ApiError;
use crate::retry::RateLimitedRetryExecutor;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// An issue created on a graded repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedIssue {
    pub number: u64,
    pub html_url: String,
}

/// GitHub REST client. Every call goes through the rate-limit retry loop.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
    retry: RateLimitedRetryExecutor,
}

impl GithubClient {
    pub fn new(token: Option<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("repograde/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::new(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            token,
            retry: RateLimitedRetryExecutor::default(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RateLimitedRetryExecutor::new(policy);
        self
    }

    /// Open an issue on `repo`.
    pub async fn create_issue(
        &self,
        repo: &RepoRef,
        title: &str,
        body: &str,
    ) -> Result<CreatedIssue, GradeError> {
        let issue = self
            .retry
            .execute(|| self.post_issue(repo, title, body))
            .await
            .map_err(|e| e.into_grade_error())?;
        info!(repo = %repo.key(), number = issue.number, "Created issue");
        Ok(issue)
    }

    /// Current core quota for the configured token.
    pub async fn rate_limit(&self) -> Result<RateLimitState, GradeError> {
        self.retry
            .execute(|| async {
                let response = self.send(self.request(Method::GET, "/rate_limit")).await?;
                Ok::<_, ApiError>(rate_limit_from_headers(response.headers()))
            })
            .await
            .map_err(|e| e.into_grade_error())
    }

    async fn post_issue(&self, repo: &RepoRef, title: &str, body: &str) -> Result<CreatedIssue, ApiError> {
        let path = format!("/repos/{}/{}/issues", repo.owner, repo.repo);
        let request = self
            .request(Method::POST, &path)
            .json(&json!({ "title": title, "body": body }));
        let response = self.send(request).await?;
        response
            .json::<CreatedIssue>()
            .await
            .map_err(|e| ApiError::new(format!("Invalid issue response: {}", e)))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.api_base, path);
        let mut request = self
            .http
            .request(method, url)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::new(format!("GitHub request failed: {}", e)))?;

        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "GitHub response");
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(error_from_parts(status.as_u16(), &headers, &body))
    }
}

fn rate_limit_from_headers(headers: &HeaderMap) -> RateLimitState {
    RateLimitState::from_headers(
        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
    )
}

/// Build an [`ApiError`] from a failed response's status, headers and body.
fn error_from_parts(status: u16, headers: &HeaderMap, body: &str) -> ApiError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| match body.trim() {
            "" => format!("HTTP {}", status),
            text => text.to_string(),
        });

    let mut err = ApiError::new(message)
        .with_status(status)
        .with_rate_limit(rate_limit_from_headers(headers));
    if let Some(after) = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
    {
        err = err.with_retry_after(after);
    }
    err
}
