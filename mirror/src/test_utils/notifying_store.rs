use std::{fmt, sync::Arc};
use tokio::sync::{Notify, RwLock};

use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use crate::error::MirrorResult;
use crate::test_utils::notify::TimedNotify;
use crate::types::ResumeToken;

type SaveCondition = Box<dyn Fn(&[ResumeToken]) -> bool + Send + Sync>;

struct Inner {
    history: Vec<ResumeToken>,
    loads: u64,
    save_conditions: Vec<(SaveCondition, Arc<Notify>)>,
}

impl Inner {
    fn check_conditions(&mut self) {
        let history = &self.history;
        self.save_conditions.retain(|(condition, notify)| {
            let should_retain = !condition(history);
            if !should_retain {
                notify.notify_one();
            }
            should_retain
        });
    }
}

/// Checkpoint store recording every saved token.
///
/// Tokens are persisted in a wrapped [`MemoryCheckpointStore`], which can be handed to a new
/// pipeline to simulate a restart.
#[derive(Clone)]
pub struct NotifyingCheckpointStore {
    store: MemoryCheckpointStore,
    inner: Arc<RwLock<Inner>>,
}

impl NotifyingCheckpointStore {
    pub fn new() -> Self {
        Self::wrap(MemoryCheckpointStore::new())
    }

    pub fn wrap(store: MemoryCheckpointStore) -> Self {
        Self {
            store,
            inner: Arc::new(RwLock::new(Inner {
                history: Vec::new(),
                loads: 0,
                save_conditions: Vec::new(),
            })),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> MemoryCheckpointStore {
        self.store.clone()
    }

    /// Returns every saved token, in save order.
    pub async fn history(&self) -> Vec<ResumeToken> {
        self.inner.read().await.history.clone()
    }

    pub async fn loads(&self) -> u64 {
        self.inner.read().await.loads
    }

    /// Notifies once `condition` holds for the save history.
    pub async fn notify_on_saves<F>(&self, condition: F) -> TimedNotify
    where
        F: Fn(&[ResumeToken]) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.write().await;
        inner
            .save_conditions
            .push((Box::new(condition), notify.clone()));
        inner.check_conditions();

        TimedNotify::new(notify)
    }

    /// Notifies once `token` was saved.
    pub async fn notify_on_token(&self, token: ResumeToken) -> TimedNotify {
        self.notify_on_saves(move |history| history.contains(&token))
            .await
    }
}

impl Default for NotifyingCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NotifyingCheckpointStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyingCheckpointStore")
            .field("store", &self.store)
            .finish()
    }
}

impl CheckpointStore for NotifyingCheckpointStore {
    async fn load(&self) -> MirrorResult<Option<ResumeToken>> {
        self.inner.write().await.loads += 1;
        self.store.load().await
    }

    async fn save(&self, token: &ResumeToken) -> MirrorResult<()> {
        self.store.save(token).await?;

        let mut inner = self.inner.write().await;
        inner.history.push(token.clone());
        inner.check_conditions();

        Ok(())
    }
}
