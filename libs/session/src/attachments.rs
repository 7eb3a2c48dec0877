//! The file attachment cache (C7, §4.7): downloads every `file_attachment`
//! block referenced by a message into a local cache directory, keyed by
//! `fileId`, and hands back a signed URL the model provider can fetch from.
//! Idempotent per `fileId` — a file already resolved (or already sitting on
//! disk from an earlier task) is never re-downloaded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock as StdRwLock;

use async_trait::async_trait;
use zypher_agent_core::AttachmentCache;
use zypher_llm::AttachmentResolver;
use zypher_types::ContentBlock;

/// Metadata the storage collaborator reports for a `fileId`. `None` from
/// [`AttachmentStorage::get_file_metadata`] means the id is unknown and the
/// cache skips it silently, per §4.7.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub mime_type: String,
    pub size_bytes: Option<u64>,
}

/// The storage collaborator (§6): only the three read-side operations the
/// core consumes. Upload variants belong to whatever outer surface lets a
/// user attach a file in the first place, not to this crate.
#[async_trait]
pub trait AttachmentStorage: Send + Sync {
    async fn get_file_metadata(&self, file_id: &str) -> Result<Option<FileMetadata>, String>;
    async fn download_file(&self, file_id: &str, local_path: &Path) -> Result<(), String>;
    async fn get_signed_url(&self, file_id: &str, expiry_sec: Option<u64>) -> Result<String, String>;
}

#[derive(Debug, Clone)]
struct Resolved {
    local_path: PathBuf,
    signed_url: String,
}

/// One entry of `cacheMessageAttachments`'s returned map (§4.7).
#[derive(Debug, Clone)]
pub struct CachedAttachment {
    pub local_path: PathBuf,
    pub signed_url: String,
}

/// Backed by a plain `std::sync::RwLock` rather than tokio's: the resolver
/// side (`AttachmentResolver::resolve`) is a synchronous trait method called
/// from inside the model provider's own async context, so the lock must be
/// acquirable without an executor.
pub struct FileAttachmentCache {
    storage: std::sync::Arc<dyn AttachmentStorage>,
    cache_dir: PathBuf,
    resolved: StdRwLock<HashMap<String, Resolved>>,
}

impl FileAttachmentCache {
    pub fn new(storage: std::sync::Arc<dyn AttachmentStorage>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            cache_dir: cache_dir.into(),
            resolved: StdRwLock::new(HashMap::new()),
        }
    }

    fn local_path(&self, file_id: &str) -> PathBuf {
        self.cache_dir.join(file_id)
    }

    fn remember(&self, file_id: &str, resolved: Resolved) {
        let mut guard = match self.resolved.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(file_id.to_string(), resolved);
    }

    /// Ensures one `fileId` is downloaded and signed, returning the cached
    /// entry whether this call did the work or a prior one already did.
    /// Returns `Ok(None)` when the storage collaborator reports the id
    /// unknown (§4.7's "skip silently").
    async fn ensure_cached(&self, file_id: &str) -> Result<Option<CachedAttachment>, String> {
        if let Some(resolved) = self.lookup(file_id) {
            return Ok(Some(CachedAttachment {
                local_path: resolved.local_path,
                signed_url: resolved.signed_url,
            }));
        }

        if self.storage.get_file_metadata(file_id).await?.is_none() {
            return Ok(None);
        }

        let local_path = self.local_path(file_id);
        if tokio::fs::metadata(&local_path).await.is_err() {
            tokio::fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(|error| error.to_string())?;
            self.storage.download_file(file_id, &local_path).await?;
        }

        let signed_url = self.storage.get_signed_url(file_id, None).await?;
        let resolved = Resolved { local_path: local_path.clone(), signed_url: signed_url.clone() };
        self.remember(file_id, resolved);

        Ok(Some(CachedAttachment { local_path, signed_url }))
    }

    fn lookup(&self, file_id: &str) -> Option<Resolved> {
        let guard = match self.resolved.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(file_id).cloned()
    }

    /// `cacheMessageAttachments(messages)` (§4.7), generalized to a single
    /// content slice since the runner calls this once per new message
    /// rather than over the whole history at once.
    pub async fn cache_message_attachments(
        &self,
        content: &[ContentBlock],
    ) -> Result<HashMap<String, CachedAttachment>, String> {
        let mut out = HashMap::new();
        for block in content {
            if let ContentBlock::FileAttachment { file_id, .. } = block
                && let Some(cached) = self.ensure_cached(file_id).await?
            {
                out.insert(file_id.clone(), cached);
            }
        }
        Ok(out)
    }
}

impl AttachmentResolver for FileAttachmentCache {
    fn resolve(&self, file_id: &str) -> Option<String> {
        self.lookup(file_id).map(|resolved| resolved.signed_url)
    }
}

#[async_trait]
impl AttachmentCache for FileAttachmentCache {
    async fn cache_message(&self, content: &[ContentBlock]) -> Result<(), String> {
        self.cache_message_attachments(content).await?;
        Ok(())
    }
}
