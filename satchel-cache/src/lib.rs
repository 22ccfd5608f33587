//! SQLCipher-backed offline entity cache.
//!
//! Entities are stored by persistence kind: singleton elements, list
//! elements keyed by (list id, element id), and blob elements keyed by
//! (archive id, element id). Payloads are the wire form of the instance,
//! serialized as JSON; the database file itself is encrypted, so payload
//! ciphertext fields plus SQLCipher give encryption at rest both for
//! field content and for structure.
//!
//! Alongside entities the cache tracks, per (type, list): the contiguous
//! id range known to be fully cached, and per group: the sync watermark
//! (recent batch ids, newest first). [`OfflineCache::clear_excluded_data`]
//! is the time-window eviction engine; cascades follow `dependent`
//! association metadata instead of per-type code.

mod entity;
mod error;
mod handler;
mod retention;
mod store;

pub use entity::StoredEntity;
pub use error::{CacheError, CacheResult};
pub use handler::{CacheHandler, CacheHandlerMap};
pub use retention::RetentionSpec;
pub use store::{CacheRange, OfflineCache};
