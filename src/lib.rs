//! Postedor - reconciliation core for ledger-mirrored pole assets
//!
//! Keeps a dashboard's view of pole assets ("postes") consistent between a
//! blockchain ledger and a local mirrored dataset.
//!
//! ## Components
//!
//! - **Cache**: layered memory/durable cache with stale-while-revalidate
//! - **Ledger**: JSON-RPC contract reads, tag index, metadata snapshots
//! - **Dataset**: local mirrored records and event logs
//! - **Resolver**: ledger-first reconciliation with local fallback
//! - **Timeline**: event merge engine with optimistic client events
//! - **Inventory**: fleet-wide consistency report

pub mod cache;
pub mod config;
pub mod dataset;
pub mod hash;
pub mod inventory;
pub mod ledger;
pub mod resolver;
pub mod server;
pub mod timeline;
pub mod types;

pub use config::Args;
pub use resolver::{ResolveError, Resolver};
pub use types::{Poste, PosteEvent, PosteMetadata, PosteSource, PosteWithSource};
