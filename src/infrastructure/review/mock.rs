//! Recording review-request service for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::ports::{ReviewRequest, ReviewService};

/// Records every request and returns synthetic URLs.
#[derive(Debug, Default)]
pub struct MockReviewService {
    requests: Mutex<Vec<ReviewRequest>>,
    fail: AtomicBool,
}

impl MockReviewService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Requests in creation order.
    pub fn requests(&self) -> Vec<ReviewRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ReviewService for MockReviewService {
    async fn create_review_request(
        &self,
        request: &ReviewRequest,
    ) -> OrchestratorResult<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ReviewRequest {
                branch: request.branch.clone(),
                message: "review service unavailable".to_string(),
            });
        }
        let mut requests = self
            .requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        requests.push(request.clone());
        Ok(format!("https://example.com/pr/{}", requests.len()))
    }
}
