//! Object storage for profile images.

use std::collections::HashMap;

use accounts_core::RequestContext;
use async_trait::async_trait;
use parking_lot::Mutex;

/// Stores opaque blobs under `bucket/key`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads `data` and returns the object's public path.
    async fn put(
        &self,
        ctx: &RequestContext,
        bucket: &str,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> anyhow::Result<String>;

    async fn delete(&self, ctx: &RequestContext, bucket: &str, key: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// Process-local object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    fail: bool,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every upload fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<StoredObject> {
        self.objects.lock().get(path).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        ctx: &RequestContext,
        bucket: &str,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> anyhow::Result<String> {
        if self.fail || ctx.is_cancelled() {
            anyhow::bail!("object store unavailable");
        }
        let path = format!("{bucket}/{key}");
        self.objects.lock().insert(
            path.clone(),
            StoredObject {
                data: data.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(path)
    }

    async fn delete(&self, _ctx: &RequestContext, bucket: &str, key: &str) -> anyhow::Result<()> {
        self.objects.lock().remove(&format!("{bucket}/{key}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_delete() {
        let store = MemoryObjectStore::new();
        let ctx = RequestContext::default();
        let path = store.put(&ctx, "users", "u1/avatar.png", b"png", "image/png").await.unwrap();
        assert_eq!(path, "users/u1/avatar.png");
        assert_eq!(store.get(&path).unwrap().content_type, "image/png");

        store.delete(&ctx, "users", "u1/avatar.png").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn failing_store_rejects_uploads() {
        let store = MemoryObjectStore::failing();
        assert!(store
            .put(&RequestContext::default(), "b", "k", b"x", "image/png")
            .await
            .is_err());
    }
}
