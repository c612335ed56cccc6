//! Overlay session lifecycle

use crate::context::SessionContext;
use crate::dom::DomSurface;
use crate::reconciler::DomReconciler;
use qtag_common::events::NavigationSource;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running overlay: one reconciler loop bound to one document
pub struct OverlaySession {
    ctx: Arc<SessionContext>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl OverlaySession {
    /// Install styles and spawn the reconciler loop
    ///
    /// Must be called from within a tokio runtime. The event subscription
    /// is taken before returning, so events emitted afterwards are seen.
    pub fn start(ctx: Arc<SessionContext>, dom: Arc<dyn DomSurface>, source: &dyn NavigationSource) -> Self {
        let events = source.subscribe();
        let reconciler = DomReconciler::new(Arc::clone(&ctx), dom);
        reconciler.install_styles();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(reconciler.run(events, shutdown_rx));

        info!(
            cache_entries = ctx.cache_len(),
            has_user = ctx.current_user().is_some(),
            "Overlay session started"
        );

        Self { ctx, shutdown, handle }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the loop, abort outstanding resolutions and persist the cache
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Reconciler task ended abnormally");
        }
        let evicted = self.ctx.flush_cache();
        info!(evicted, "Overlay session stopped");
    }
}
