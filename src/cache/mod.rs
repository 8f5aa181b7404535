//! Layered key/value cache with TTL expiry, stale-while-revalidate refresh,
//! and failover to stale data when the authoritative fetch fails.
//!
//! Lookup order, first hit wins:
//!
//! ```text
//! memory (DashMap, process lifetime)
//!    ↓ miss/expired
//! durable (file-backed, survives restarts)
//!    ↓ miss/expired
//! fetch() (authoritative remote)
//! ```
//!
//! The cache has no knowledge of domain entities; values are stored as JSON
//! and typed at the call site.

pub mod durable;
pub mod store;

pub use durable::{DurableStore, FileStore};
pub use store::{CacheEntry, CacheError, CacheMetrics, CacheOptions, CacheSource, LayeredCache};
