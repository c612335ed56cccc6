//! Shared session state
//!
//! One [`SessionContext`] per page session holds everything the scheduler
//! and reconciler share: configuration, the tag cache, the backoff state and
//! the upstream collaborators. It is created once, wrapped in an `Arc`, and
//! handed to each component's constructor.

use crate::backoff::{BackoffPolicy, BackoffState};
use crate::cache::PersistentCache;
use crate::error::{EngineError, Result};
use crate::metadata::jellyfin::JellyfinClient;
use crate::metadata::{ItemId, MetadataSource, SessionProvider, UserSession};
use crate::storage::{FileStorage, StorageBackend};
use crate::tag::QualityTag;
use qtag_common::config::{default_data_dir, OverlayConfig};
use qtag_common::time::{Clock, SystemClock};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shared state for one overlay session
pub struct SessionContext {
    config: OverlayConfig,
    cache: Mutex<PersistentCache>,
    backoff_policy: BackoffPolicy,
    backoff: Mutex<BackoffState>,
    metadata: Arc<dyn MetadataSource>,
    users: Arc<dyn SessionProvider>,
}

impl SessionContext {
    /// Assemble a context from its collaborators
    ///
    /// The cache is loaded from `storage` immediately.
    pub fn new(
        config: OverlayConfig,
        storage: Arc<dyn StorageBackend>,
        metadata: Arc<dyn MetadataSource>,
        users: Arc<dyn SessionProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = PersistentCache::load(storage, clock, &config.cache.version, config.cache.ttl());
        let backoff_policy = BackoffPolicy::from_settings(&config.scheduler);
        let backoff = BackoffState::new(&backoff_policy);

        Self {
            config,
            cache: Mutex::new(cache),
            backoff_policy,
            backoff: Mutex::new(backoff),
            metadata,
            users,
        }
    }

    /// Wire the production stack: file storage, Jellyfin client, configured user
    pub fn with_jellyfin(config: OverlayConfig) -> Result<Self> {
        config.validate()?;

        let dir = config
            .cache
            .storage_dir
            .clone()
            .unwrap_or_else(default_data_dir);
        let storage = FileStorage::open(&dir)?;
        let client = JellyfinClient::from_settings(&config.server, Some(config.scheduler.request_timeout()))?;
        let users = UserSession::new(config.server.user_id.clone());

        info!(
            server = client.base_url(),
            storage = %dir.display(),
            cache_version = %config.cache.version,
            "Quality tag session configured"
        );

        Ok(Self::new(
            config,
            Arc::new(storage),
            Arc::new(client),
            Arc::new(users),
            Arc::new(SystemClock),
        ))
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn metadata(&self) -> &dyn MetadataSource {
        self.metadata.as_ref()
    }

    /// Signed-in user, if any
    pub fn current_user(&self) -> Option<String> {
        self.users.current_user_id()
    }

    fn cache(&self) -> MutexGuard<'_, PersistentCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn backoff(&self) -> MutexGuard<'_, BackoffState> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cached_tag(&self, id: &ItemId) -> Option<QualityTag> {
        self.cache().get(id)
    }

    /// Record a resolved tag, persisting it straight away if configured to
    ///
    /// The map is encoded under the cache lock; the storage write runs on the
    /// blocking pool after the lock is released.
    pub async fn store_tag(&self, id: ItemId, tag: QualityTag) {
        let (writer, snapshot) = {
            let mut cache = self.cache();
            debug!(item_id = %id, tag = %tag, "Caching resolved tag");
            cache.put(id, tag);
            if !self.config.cache.flush_on_write {
                return;
            }
            (cache.writer(), cache.snapshot().1)
        };
        let Some(snapshot) = snapshot else {
            return;
        };

        if let Err(e) = tokio::task::spawn_blocking(move || writer.write(&snapshot)).await {
            warn!(error = %e, "Cache write task failed");
        }
    }

    /// Evict expired entries and persist; returns the number evicted
    pub fn flush_cache(&self) -> usize {
        self.cache().flush()
    }

    pub fn cache_len(&self) -> usize {
        self.cache().len()
    }

    pub fn backoff_policy(&self) -> &BackoffPolicy {
        &self.backoff_policy
    }

    /// Delay a non-priority resolution waits before fetching
    pub fn current_delay(&self) -> Duration {
        self.backoff().current_delay()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.backoff().consecutive_errors()
    }

    /// Count a transient failure; returns the widened delay
    pub fn record_failure(&self) -> Duration {
        self.backoff().record_failure(&self.backoff_policy)
    }

    pub fn record_success(&self) {
        self.backoff().record_success(&self.backoff_policy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolveError;
    use crate::metadata::{ChildQuery, ItemMetadata};
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use qtag_common::time::ManualClock;
    use std::sync::mpsc;

    struct NoSource;

    #[async_trait]
    impl MetadataSource for NoSource {
        async fn get_item(&self, _: &str, _: &ItemId) -> std::result::Result<ItemMetadata, ResolveError> {
            Err(ResolveError::Network("offline".into()))
        }

        async fn first_child(
            &self,
            _: &str,
            _: &ItemId,
            _: &ChildQuery,
        ) -> std::result::Result<Option<ItemId>, ResolveError> {
            Ok(None)
        }
    }

    fn context(config: OverlayConfig, storage: Arc<MemoryStorage>) -> SessionContext {
        SessionContext::new(
            config,
            storage,
            Arc::new(NoSource),
            Arc::new(UserSession::new(Some("user".into()))),
            Arc::new(ManualClock::new(1_000)),
        )
    }

    #[tokio::test]
    async fn test_store_tag_flushes_on_write() {
        let storage = Arc::new(MemoryStorage::new());
        let ctx = context(OverlayConfig::default(), storage.clone());
        let id = ItemId::parse(&"a".repeat(32)).unwrap();

        ctx.store_tag(id.clone(), QualityTag::Hd1080).await;
        assert_eq!(ctx.cached_tag(&id), Some(QualityTag::Hd1080));
        assert_eq!(storage.keys(), vec!["qualityOverlayCache-v15"]);
    }

    #[tokio::test]
    async fn test_store_tag_without_flush_on_write() {
        let storage = Arc::new(MemoryStorage::new());
        let mut config = OverlayConfig::default();
        config.cache.flush_on_write = false;
        let ctx = context(config, storage.clone());
        let id = ItemId::parse(&"b".repeat(32)).unwrap();

        ctx.store_tag(id, QualityTag::Mp3).await;
        assert!(storage.keys().is_empty());
        ctx.flush_cache();
        assert_eq!(storage.keys().len(), 1);
        assert_eq!(ctx.cache_len(), 1);
    }

    /// Storage whose writes block until the test lets them through
    struct GatedStorage {
        inner: MemoryStorage,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl StorageBackend for GatedStorage {
        fn load(&self, key: &str) -> qtag_common::Result<Option<String>> {
            self.inner.load(key)
        }

        fn store(&self, key: &str, value: &str) -> qtag_common::Result<()> {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv_timeout(Duration::from_secs(5));
            self.inner.store(key, value)
        }

        fn remove(&self, key: &str) -> qtag_common::Result<()> {
            self.inner.remove(key)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cache_readable_while_write_in_progress() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let storage = Arc::new(GatedStorage {
            inner: MemoryStorage::new(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let ctx = Arc::new(SessionContext::new(
            OverlayConfig::default(),
            storage.clone(),
            Arc::new(NoSource),
            Arc::new(UserSession::new(Some("user".into()))),
            Arc::new(ManualClock::new(1_000)),
        ));
        let id = ItemId::parse(&"c".repeat(32)).unwrap();

        let write = tokio::spawn({
            let ctx = Arc::clone(&ctx);
            let id = id.clone();
            async move { ctx.store_tag(id, QualityTag::Uhd).await }
        });

        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(ctx.cache.try_lock().is_ok());
        assert_eq!(ctx.cached_tag(&id), Some(QualityTag::Uhd));

        release_tx.send(()).unwrap();
        write.await.unwrap();
        assert!(storage.inner.load("qualityOverlayCache-v15").unwrap().is_some());
    }

    #[test]
    fn test_backoff_bookkeeping() {
        let ctx = context(OverlayConfig::default(), Arc::new(MemoryStorage::new()));
        assert_eq!(ctx.current_delay(), Duration::from_millis(1000));

        let widened = ctx.record_failure();
        assert_eq!(ctx.consecutive_errors(), 1);
        assert_eq!(ctx.current_delay(), widened);

        ctx.record_success();
        assert_eq!(ctx.consecutive_errors(), 0);
        assert_eq!(ctx.current_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_with_jellyfin_requires_server() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = OverlayConfig::default();
        config.cache.storage_dir = Some(dir.path().to_path_buf());
        assert!(matches!(
            SessionContext::with_jellyfin(config.clone()),
            Err(EngineError::InvalidConfig(_))
        ));

        config.server.base_url = Some("http://127.0.0.1:8096".into());
        config.server.user_id = Some("user".into());
        let ctx = SessionContext::with_jellyfin(config).unwrap();
        assert_eq!(ctx.current_user().as_deref(), Some("user"));
    }
}
