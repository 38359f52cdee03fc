use std::sync::Arc;
use tokio::sync::Mutex;

use crate::checkpoint::CheckpointStore;
use crate::error::MirrorResult;
use crate::types::ResumeToken;

/// In-memory checkpoint store for tests and development.
///
/// Clones share the same token, which lets a test restart a pipeline against the checkpoint
/// left behind by a previous one.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    token: Arc<Mutex<Option<ResumeToken>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `token`.
    pub fn with_token(token: ResumeToken) -> Self {
        Self {
            token: Arc::new(Mutex::new(Some(token))),
        }
    }

    pub async fn token(&self) -> Option<ResumeToken> {
        self.token.lock().await.clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> MirrorResult<Option<ResumeToken>> {
        Ok(self.token.lock().await.clone())
    }

    async fn save(&self, token: &ResumeToken) -> MirrorResult<()> {
        *self.token.lock().await = Some(token.clone());

        Ok(())
    }
}
