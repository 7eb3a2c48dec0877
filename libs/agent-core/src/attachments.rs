//! The runner's view of the file attachment cache (§4.5 step 6, §4.7). The
//! runner only needs to ask the cache to absorb whatever attachments a new
//! message carries and, later, to resolve a cached file into a fetchable
//! URL for the model provider — it has no opinion on storage or eviction,
//! which the session layer's cache (C7) owns.

use async_trait::async_trait;
use zypher_llm::AttachmentResolver;
use zypher_types::ContentBlock;

#[async_trait]
pub trait AttachmentCache: AttachmentResolver {
    async fn cache_message(&self, content: &[ContentBlock]) -> Result<(), String>;

    /// A view of this cache as a plain resolver, for handing to a model
    /// provider call that only needs lookups.
    fn resolver(&self) -> &dyn AttachmentResolver {
        self
    }
}

/// The default when no attachment cache is wired in: nothing is ever
/// resolvable, and caching is a no-op.
pub struct NoAttachmentCache;

impl AttachmentResolver for NoAttachmentCache {
    fn resolve(&self, _file_id: &str) -> Option<String> {
        None
    }
}

#[async_trait]
impl AttachmentCache for NoAttachmentCache {
    async fn cache_message(&self, _content: &[ContentBlock]) -> Result<(), String> {
        Ok(())
    }
}
