use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

static UPLOADS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid identifier {0:?}")]
    InvalidId(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("upload of {id} failed: {source}")]
    Body {
        id: String,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Files stored flat under one root directory, one file per identifier.
#[derive(Clone, Debug)]
pub struct Storage {
    root: Arc<PathBuf>,
}

impl Storage {
    /// Creates the root directory when missing.
    pub fn open_root(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;
        log::info!("storage root {}", root.display());
        Ok(Self {
            root: Arc::new(root),
        })
    }

    #[cfg(test)]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Identifiers are single path components. A leading dot is reserved for
    /// uploads in progress.
    fn path_for(&self, id: &str) -> Result<PathBuf, StorageError> {
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && !id.contains("..")
            && !id.contains(|c| matches!(c, '/' | '\\' | '\0'));
        if !valid {
            return Err(StorageError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(id))
    }

    /// Stores `body` under `id`, replacing any previous content, and returns
    /// the number of bytes written.
    ///
    /// The body is written to a hidden sibling and renamed over `id` once it
    /// is complete and synced, so a failed upload leaves the old content.
    pub async fn create<S, E>(&self, id: &str, body: S) -> Result<u64, StorageError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<BoxError>,
    {
        let path = self.path_for(id)?;
        let partial = self.root.join(format!(
            ".{}.{}.partial",
            id,
            UPLOADS.fetch_add(1, Ordering::Relaxed)
        ));

        let result = match write_body(&partial, id, body).await {
            Ok(written) => tokio::fs::rename(&partial, &path)
                .await
                .map(|_| written)
                .map_err(StorageError::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(written) => {
                log::debug!("stored {} ({} bytes)", id, written);
                Ok(written)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&partial).await {
                    log::warn!("leftover upload {}: {}", partial.display(), rm);
                }
                Err(e)
            }
        }
    }

    /// Opens `id` for blocking reads, e.g. by a parser thread.
    pub async fn open(&self, id: &str) -> Result<std::fs::File, StorageError> {
        let file = self.open_async(id).await?;
        Ok(file.into_std().await)
    }

    /// Streams the stored bytes of `id` and reports their length.
    pub async fn read_stream(&self, id: &str) -> Result<(u64, ReaderStream<File>), StorageError> {
        let file = self.open_async(id).await?;
        let len = file.metadata().await?.len();
        Ok((len, ReaderStream::new(file)))
    }

    async fn open_async(&self, id: &str) -> Result<File, StorageError> {
        let path = self.path_for(id)?;
        File::open(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(id.to_string()),
            _ => StorageError::Io(e),
        })
    }
}

async fn write_body<S, E>(path: &Path, id: &str, body: S) -> Result<u64, StorageError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    let mut file = File::create(path).await?;
    let mut body = std::pin::pin!(body);
    let mut written = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| StorageError::Body {
            id: id.to_string(),
            source: e.into(),
        })?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}
