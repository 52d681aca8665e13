//! GitHub pull-request implementation of the review-request port.
//!
//! Wraps the GitHub REST API v3 with a token-bucket rate limiter to
//! stay within the 5 000 req/hour authenticated limit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::ports::{ReviewRequest, ReviewService};

/// Base URL for the GitHub REST API v3.
const GITHUB_API_BASE: &str = "https://api.github.com";

/// Token-bucket rate limiter.
///
/// Allows up to `capacity` requests per `window`; when exhausted,
/// `acquire` sleeps until the window resets.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    tokens: u32,
    window: Duration,
    window_start: Instant,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            tokens: capacity,
            window,
            window_start: Instant::now(),
        }
    }

    pub async fn acquire(&mut self) {
        let elapsed = self.window_start.elapsed();
        if elapsed >= self.window {
            self.tokens = self.capacity;
            self.window_start = Instant::now();
        }

        if self.tokens > 0 {
            self.tokens -= 1;
        } else {
            let remaining = self.window.saturating_sub(elapsed);
            warn!(
                sleep_ms = remaining.as_millis() as u64,
                "GitHub rate limit reached, sleeping"
            );
            tokio::time::sleep(remaining).await;
            self.tokens = self.capacity - 1;
            self.window_start = Instant::now();
        }
    }
}

#[derive(Debug, Serialize)]
struct CreatePullRequest<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
    draft: bool,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    number: u64,
    html_url: String,
}

#[derive(Debug, Serialize)]
struct AddLabels<'a> {
    labels: &'a [String],
}

/// Review-request service backed by GitHub pull requests.
pub struct GithubReviewService {
    http: Client,
    token: String,
    /// `owner/repo` slug of the base repository.
    repo_slug: String,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl GithubReviewService {
    pub fn new(token: String, repo_slug: String) -> Self {
        // GitHub allows 5 000 authenticated requests per hour.
        let rate_limiter = RateLimiter::new(5_000, Duration::from_secs(3_600));
        Self {
            http: Client::new(),
            token,
            repo_slug,
            rate_limiter: Arc::new(Mutex::new(rate_limiter)),
        }
    }

    /// Read the token from `GITHUB_TOKEN`.
    pub fn from_env(repo_slug: String) -> OrchestratorResult<Self> {
        let token = std::env::var("GITHUB_TOKEN").map_err(|_| {
            OrchestratorError::ReviewRequest {
                branch: String::new(),
                message: "GITHUB_TOKEN environment variable is not set".to_string(),
            }
        })?;
        if token.is_empty() {
            return Err(OrchestratorError::ReviewRequest {
                branch: String::new(),
                message: "GITHUB_TOKEN environment variable is empty".to_string(),
            });
        }
        Ok(Self::new(token, repo_slug))
    }

    async fn authorized(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.rate_limiter.lock().await.acquire().await;
        self.http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "claudio")
    }

    fn request_error(branch: &str, message: impl Into<String>) -> OrchestratorError {
        OrchestratorError::ReviewRequest {
            branch: branch.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl ReviewService for GithubReviewService {
    async fn create_review_request(
        &self,
        request: &ReviewRequest,
    ) -> OrchestratorResult<String> {
        let url = format!("{GITHUB_API_BASE}/repos/{}/pulls", self.repo_slug);
        let payload = CreatePullRequest {
            title: &request.title,
            body: &request.body,
            head: &request.branch,
            base: &request.base,
            draft: request.draft,
        };

        let response = self
            .authorized(reqwest::Method::POST, &url)
            .await
            .json(&payload)
            .send()
            .await
            .map_err(|e| Self::request_error(&request.branch, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::request_error(
                &request.branch,
                format!("GitHub returned {status}: {body}"),
            ));
        }

        let pr: PullRequestResponse = response
            .json()
            .await
            .map_err(|e| Self::request_error(&request.branch, e.to_string()))?;

        // Labels go through the issues endpoint; a label failure does
        // not invalidate the created request.
        if !request.labels.is_empty() {
            let labels_url = format!(
                "{GITHUB_API_BASE}/repos/{}/issues/{}/labels",
                self.repo_slug, pr.number
            );
            let result = self
                .authorized(reqwest::Method::POST, &labels_url)
                .await
                .json(&AddLabels {
                    labels: &request.labels,
                })
                .send()
                .await;
            if let Err(e) = result {
                warn!(branch = %request.branch, error = %e, "Failed to add labels");
            }
        }

        info!(branch = %request.branch, url = %pr.html_url, "Review request created");
        Ok(pr.html_url)
    }
}
