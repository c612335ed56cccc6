//! Shared fixtures for qtag-engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use qtag_common::config::OverlayConfig;
use qtag_common::time::ManualClock;
use qtag_engine::cache::storage_key;
use qtag_engine::dom::{ElementHandle, ElementSpec, Rect, Viewport, VirtualDocument};
use qtag_engine::metadata::{
    ChildQuery, ItemKind, ItemMetadata, MediaStream, MetadataSource, StreamKind, UserSession,
};
use qtag_engine::storage::{MemoryStorage, StorageBackend};
use qtag_engine::{ItemId, ResolveError, SessionContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn item_id(n: u32) -> ItemId {
    ItemId::parse(&format!("{:032x}", n)).expect("valid id")
}

pub fn movie(id: &ItemId, height: u32) -> ItemMetadata {
    let mut item = ItemMetadata::new(id.clone(), ItemKind::Movie);
    item.push_stream(MediaStream {
        kind: StreamKind::Video,
        height: Some(height),
        codec: Some("hevc".into()),
        channel_layout: None,
    });
    item
}

/// In-memory metadata source that records every call
#[derive(Default)]
pub struct FakeMetadataSource {
    items: Mutex<HashMap<ItemId, ItemMetadata>>,
    children: Mutex<HashMap<ItemId, ItemId>>,
    get_calls: AtomicU32,
    child_calls: AtomicU32,
    failing: AtomicBool,
    latency: Mutex<Duration>,
    call_log: Mutex<Vec<ItemId>>,
}

impl FakeMetadataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(self, item: ItemMetadata) -> Self {
        self.items.lock().unwrap().insert(item.id.clone(), item);
        self
    }

    pub fn with_child(self, parent: &ItemId, child: &ItemId) -> Self {
        self.children.lock().unwrap().insert(parent.clone(), child.clone());
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = latency;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn child_calls(&self) -> u32 {
        self.child_calls.load(Ordering::SeqCst)
    }

    /// Item ids in the order `get_item` was called
    pub fn call_log(&self) -> Vec<ItemId> {
        self.call_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataSource for FakeMetadataSource {
    async fn get_item(&self, _user_id: &str, item_id: &ItemId) -> Result<ItemMetadata, ResolveError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.call_log.lock().unwrap().push(item_id.clone());

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ResolveError::Network("connection refused".into()));
        }

        self.items
            .lock()
            .unwrap()
            .get(item_id)
            .cloned()
            .ok_or_else(|| ResolveError::Api(404, "Item not found".into()))
    }

    async fn first_child(
        &self,
        _user_id: &str,
        parent_id: &ItemId,
        _query: &ChildQuery,
    ) -> Result<Option<ItemId>, ResolveError> {
        self.child_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ResolveError::Network("connection refused".into()));
        }
        Ok(self.children.lock().unwrap().get(parent_id).cloned())
    }
}

/// Defaults with the rate limiter off and jitter pinned to 1.0
pub fn test_config() -> OverlayConfig {
    let mut config = OverlayConfig::default();
    config.scheduler.max_requests_per_second = 0;
    config.scheduler.jitter_min = 1.0;
    config.scheduler.jitter_max = 1.0;
    config
}

pub struct Fixture {
    pub ctx: Arc<SessionContext>,
    pub source: Arc<FakeMetadataSource>,
    pub storage: Arc<MemoryStorage>,
    pub users: Arc<UserSession>,
    pub clock: Arc<ManualClock>,
}

impl Fixture {
    /// Raw cache payload currently in storage, or empty
    pub fn stored_payload(&self) -> String {
        self.storage
            .load(&storage_key(&self.ctx.config().cache.version))
            .unwrap()
            .unwrap_or_default()
    }
}

pub fn fixture(config: OverlayConfig, source: FakeMetadataSource) -> Fixture {
    fixture_with_storage(config, source, MemoryStorage::new())
}

pub fn fixture_with_storage(config: OverlayConfig, source: FakeMetadataSource, storage: MemoryStorage) -> Fixture {
    let source = Arc::new(source);
    let storage = Arc::new(storage);
    let users = Arc::new(UserSession::new(Some("user-1".into())));
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let ctx = Arc::new(SessionContext::new(
        config,
        storage.clone(),
        source.clone(),
        users.clone(),
        clock.clone(),
    ));
    Fixture {
        ctx,
        source,
        storage,
        users,
        clock,
    }
}

pub fn document() -> Arc<VirtualDocument> {
    Arc::new(VirtualDocument::new(Viewport::new(1280.0, 720.0)))
}

/// Library card linking to an item's detail page
pub fn card(doc: &VirtualDocument, parent: ElementHandle, id: &ItemId, top: f64) -> ElementHandle {
    doc.append(
        parent,
        ElementSpec::new("a")
            .class("cardImageContainer")
            .attr("href", &format!("#!/details?id={}&serverId=abc", id))
            .rect(Rect::new(10.0, top, 180.0, 270.0)),
    )
}
