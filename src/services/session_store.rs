//! Session persistence.
//!
//! The session document lives at `{base_repo}/.claudio/session.json`
//! and is written atomically: serialize to a temp file in the same
//! directory, then rename over the target.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::Session;

pub const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store rooted at a base repository's `.claudio` directory.
    pub fn for_repo(base_repo: &Path) -> Self {
        Self {
            path: base_repo.join(".claudio").join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Atomically persist the session document.
    pub async fn save(&self, session: &Session) -> OrchestratorResult<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| OrchestratorError::Persistence("session path has no parent".to_string()))?;
        tokio::fs::create_dir_all(dir).await?;

        let json = serde_json::to_vec_pretty(session)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), bytes = json.len(), "Session persisted");
        Ok(())
    }

    /// Load the persisted session document.
    pub async fn load(&self) -> OrchestratorResult<Session> {
        if !self.exists().await {
            return Err(OrchestratorError::SessionMissing);
        }
        let bytes = tokio::fs::read(&self.path).await?;
        let session: Session = serde_json::from_slice(&bytes)?;
        Ok(session)
    }
}
