//! Incremental sync engine for the Satchel replica.
//!
//! Every group a user belongs to has an append-only log of event
//! batches on the server. The engine keeps the local cache consistent
//! with those logs:
//!
//! 1. **Catch-up**: on start, download and apply everything missed
//!    while offline, beginning one minute before the newest remembered
//!    batch so delivery stays at-least-once.
//! 2. **Realtime**: once steady, server-pushed batches apply directly.
//!    Pushes arriving during catch-up are buffered and replayed minus
//!    the batches catch-up already covered.
//!
//! A replica offline longer than the server retains its logs cannot be
//! repaired incrementally; the engine reports [`SyncError::OutOfSync`]
//! and the caller has to rebuild the cache from scratch.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use satchel_sync::{SyncConfig, SyncEngine};
//! # fn demo(
//! #     cache: Arc<satchel_cache::OfflineCache>,
//! #     pipeline: satchel_pipeline::InstancePipeline,
//! #     source: Arc<dyn satchel_sync::BatchLogSource>,
//! #     keys: Arc<dyn satchel_sync::SessionKeyProvider>,
//! # ) {
//! let config = SyncConfig::default();
//! let engine = SyncEngine::new(config, cache, pipeline, source, keys);
//! # }
//! ```

mod engine;
mod error;
mod protocol;
mod queue;
mod source;
mod state;

pub use engine::{SyncConfig, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use protocol::{BatchOperation, EntityUpdate, EventBatch, Membership};
pub use source::{AppliedUpdate, BatchLogSource, EventConsumer, SessionKeyProvider};
pub use state::GroupPhase;
