//! Ledger access: the external system of record for minted postes.
//!
//! [`LedgerClient`] is the seam to the external ledger node. It must signal
//! "no record" (`Ok(None)`) distinctly from "call failed" (`Err`); absence is
//! an expected outcome that drives the fallback paths, never an error.
//!
//! [`ContractReader`] layers the domain logic on top: tuple decoding, hash
//! cross-checks, tag resolution, and historical snapshot reconstruction.

pub mod memory;
pub mod reader;
pub mod rpc;

pub use memory::MemoryLedger;
pub use reader::{ContractReader, Snapshot};
pub use rpc::RpcLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for ledger calls. `NotFound` is reserved for lookups where the
/// ledger answered authoritatively that no record exists; transport and node
/// failures are always `Rpc`.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Historical state for the requested block has been discarded by the
    /// node. Callers degrade to reading the latest state.
    #[error("historical state unavailable at block {0}")]
    Pruned(u64),

    /// Transport or node failure; recoverable via cache failover.
    #[error("ledger rpc failure: {0}")]
    Rpc(String),
}

/// Raw on-ledger state tuple for one poste, as the contract stores it.
/// Human-readable fields exist only as content hashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPoste {
    pub ubicacion_hash: String,
    #[serde(rename = "capacidadKW")]
    pub capacidad_kw: u32,
    pub consumo_entregado: u64,
    pub consumo_restante: u64,
    pub seguridad: i8,
    #[serde(rename = "lastAttestationUID")]
    pub last_attestation_uid: String,
    #[serde(rename = "imageURIHash")]
    pub image_uri_hash: String,
}

/// One metadata-changing ledger event for a poste.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub tx_hash: String,
    pub log_index: u32,
    pub block_number: u64,
    /// Transaction sender.
    pub actor: String,
}

/// Inclusive block range filter for event-log queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn contains(&self, block: u64) -> bool {
        block >= self.from && block <= self.to
    }
}

/// Read-only client for the external ledger node.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Owner of a token at the given block, or latest when unspecified.
    /// `Ok(None)` means the token has no record at that block.
    async fn owner_of(
        &self,
        token_id: u64,
        at_block: Option<u64>,
    ) -> Result<Option<String>, LedgerError>;

    /// Raw state tuple at the given block, or latest when unspecified.
    async fn poste_state(
        &self,
        token_id: u64,
        at_block: Option<u64>,
    ) -> Result<Option<RawPoste>, LedgerError>;

    /// Ledger-side tag index lookup by tag content hash.
    async fn token_id_by_tag_hash(&self, tag_hash: &str) -> Result<Option<u64>, LedgerError>;

    /// The contract's next-id counter; minted token ids are `1..next_id`.
    async fn next_token_id(&self) -> Result<u64, LedgerError>;

    /// Metadata-changing events for one poste, optionally range-filtered.
    async fn metadata_log(
        &self,
        token_id: u64,
        range: Option<BlockRange>,
    ) -> Result<Vec<LogRecord>, LedgerError>;

    /// Timestamp of a mined block.
    async fn block_timestamp(&self, block: u64) -> Result<DateTime<Utc>, LedgerError>;
}
