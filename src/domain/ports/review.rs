//! Review-request port - interface for the code-review service.

use async_trait::async_trait;

use crate::domain::errors::OrchestratorResult;

/// A review request to be created against a base branch.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRequest {
    pub title: String,
    pub body: String,
    /// Head branch holding the changes.
    pub branch: String,
    /// Base branch the request targets.
    pub base: String,
    pub draft: bool,
    pub labels: Vec<String>,
}

/// Trait for review-request services (e.g. GitHub pull requests).
#[async_trait]
pub trait ReviewService: Send + Sync {
    /// Create a review request and return its URL.
    async fn create_review_request(&self, request: &ReviewRequest) -> OrchestratorResult<String>;
}
