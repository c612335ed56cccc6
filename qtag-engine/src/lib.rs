//! # qtag engine
//!
//! Quality-tag overlay engine for media library pages:
//! - Persistent, versioned, TTL-bound tag cache
//! - Visibility-driven prioritisation of untagged cards
//! - Deduplicating fetch scheduler with adaptive backoff and rate limiting
//! - Reconciliation loop driven by page mutation and navigation events
//! - Badge rendering through an abstract document surface
//! - Jellyfin metadata client and tag derivation

pub mod backoff;
pub mod badge;
pub mod cache;
pub mod context;
pub mod derive;
pub mod dom;
pub mod error;
pub mod metadata;
pub mod reconciler;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod tag;
pub mod visibility;

pub use context::SessionContext;
pub use error::{EngineError, ResolveError, Result};
pub use metadata::ItemId;
pub use reconciler::{DomReconciler, TrackingState};
pub use scheduler::{FetchScheduler, ResolveOutcome, SkipReason};
pub use session::OverlaySession;
pub use tag::QualityTag;
