use std::path::PathBuf;

use anyhow::Result;
use futures_util::future::BoxFuture;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use anteroom_core::error::{PortalError, PortalResult};
use anteroom_core::ports::ObjectStore;

/// On-disk object store for message attachments.
///
/// Each upload lands as a single flat file at `{dir}/{uuid}_{name}`; the
/// uuid prefix keeps colliding filenames apart. The returned handle is the
/// `file://` path of the stored object.
pub struct FileObjectStore {
    dir: PathBuf,
}

impl FileObjectStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Attachment storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// Delete a stored object by its file name. Missing files are not an
    /// error; the object may already have been cleaned up.
    pub async fn delete(&self, file_name: &str) -> Result<()> {
        let path = self.dir.join(file_name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Object {} already gone", file_name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Strip anything that could escape the storage directory or confuse a URL.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned
    }
}

impl ObjectStore for FileObjectStore {
    fn upload(&self, name: &str, bytes: Vec<u8>) -> BoxFuture<'_, PortalResult<String>> {
        let file_name = format!("{}_{}", Uuid::new_v4(), sanitize(name));
        Box::pin(async move {
            let path = self.dir.join(&file_name);
            fs::write(&path, &bytes)
                .await
                .map_err(|e| PortalError::Upload(e.into()))?;
            info!("Stored attachment {} ({} bytes)", file_name, bytes.len());
            Ok(format!("file://{}", path.display()))
        })
    }
}
