use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::checkpoint::CheckpointStore;
use crate::error::{ErrorKind, MirrorResult};
use crate::mirror_error;
use crate::types::ResumeToken;

/// Checkpoint store keeping the token in a single ASCII file.
///
/// A save writes the token to a sibling temporary file, syncs it to disk and renames it over the
/// target, so the file always holds a complete token. The parent directory is synced afterwards
/// to persist the rename itself, when the platform allows it.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temporary_path(&self) -> PathBuf {
        let mut file_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        file_name.push(format!(".{}.tmp", uuid::Uuid::new_v4()));

        self.path.with_file_name(file_name)
    }

    async fn write_atomically(&self, token: &ResumeToken) -> io::Result<()> {
        let temporary_path = self.temporary_path();

        let result = async {
            let mut file = fs::File::create(&temporary_path).await?;
            file.write_all(token.as_str().as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);

            fs::rename(&temporary_path, &self.path).await
        }
        .await;

        if result.is_err() {
            // The temporary file may not exist, depending on where the write failed.
            let _ = fs::remove_file(&temporary_path).await;
        }

        result
    }

    async fn sync_parent_directory(&self) {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let result = async { fs::File::open(parent).await?.sync_all().await }.await;
        if let Err(err) = result {
            debug!(error = %err, "could not sync checkpoint directory");
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> MirrorResult<Option<ResumeToken>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no checkpoint found, starting from the feed tail");
                return Ok(None);
            }
            Err(err) => {
                return Err(mirror_error!(
                    ErrorKind::CheckpointLoadFailed,
                    "Failed to read the checkpoint file",
                    self.path.display(),
                    source: err
                ));
            }
        };

        let content = content.trim();
        if content.is_empty() {
            info!(path = %self.path.display(), "checkpoint file is empty, starting from the feed tail");
            return Ok(None);
        }

        let token = ResumeToken::new(content).map_err(|err| {
            mirror_error!(
                ErrorKind::CheckpointLoadFailed,
                "Checkpoint file holds an invalid token",
                self.path.display(),
                source: err
            )
        })?;

        info!(path = %self.path.display(), token = %token, "loaded checkpoint");

        Ok(Some(token))
    }

    async fn save(&self, token: &ResumeToken) -> MirrorResult<()> {
        self.write_atomically(token).await.map_err(|err| {
            mirror_error!(
                ErrorKind::CheckpointSaveFailed,
                "Failed to persist the checkpoint",
                self.path.display(),
                source: err
            )
        })?;

        self.sync_parent_directory().await;

        Ok(())
    }
}
