//! Review-request adapters: GitHub pull requests and a recording mock.

pub mod github;
pub mod mock;

pub use github::{GithubReviewService, RateLimiter};
pub use mock::MockReviewService;
