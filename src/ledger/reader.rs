//! Contract reader: decodes on-ledger poste state into domain records.
//!
//! Pure reads, no caching; callers wrap these behind the cache store. Hash
//! mismatches between supplied metadata hints and the on-ledger hash fields
//! are logged as warnings and never fail the read.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::{BlockRange, LedgerClient, LedgerError, RawPoste};
use crate::hash::{hash_asset_tag, hash_image_uri, hash_ubicacion, verify_hash};
use crate::types::{Poste, PosteMetadata};

/// Placeholder location when no cleartext hint is available.
const UBICACION_PLACEHOLDER: &str = "Ubicación desde blockchain";
/// Placeholder image when no cleartext hint is available.
const IMAGE_PLACEHOLDER: &str = "/placeholder.svg";

/// A poste's reconstructed state as of one historical ledger event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub poste: Poste,
    pub tx_hash: String,
    pub log_index: u32,
    pub block_number: u64,
    pub actor: String,
    pub ts: DateTime<Utc>,
}

/// Read-side view of the poste contract.
#[derive(Clone)]
pub struct ContractReader {
    client: Arc<dyn LedgerClient>,
}

impl ContractReader {
    pub fn new(client: Arc<dyn LedgerClient>) -> Self {
        Self { client }
    }

    /// Read one poste's state from the ledger.
    ///
    /// Absence of an owner at the requested block is NotFound (`Ok(None)`),
    /// not an error. Historical reads whose state has been pruned fall back
    /// to the latest state rather than failing.
    pub async fn read_poste(
        &self,
        token_id: &str,
        metadata: Option<&PosteMetadata>,
        at_block: Option<u64>,
    ) -> Result<Option<Poste>, LedgerError> {
        let Some(token) = parse_token_id(token_id) else {
            debug!(token_id = token_id, "Non-numeric token id, no ledger record");
            return Ok(None);
        };

        let owner = match self.client.owner_of(token, at_block).await {
            Ok(owner) => owner,
            Err(LedgerError::Pruned(block)) => {
                debug!(token_id = token_id, block = block, "Owner lookup pruned, using latest");
                self.client.owner_of(token, None).await?
            }
            Err(e) => return Err(e),
        };
        if owner.is_none() {
            debug!(token_id = token_id, "Token has no owner on ledger");
            return Ok(None);
        }

        let Some(raw) = self.state_with_prune_fallback(token, at_block).await? else {
            return Ok(None);
        };

        let poste = decode_poste(token_id, &raw, metadata);
        check_hashes(token_id, &raw, metadata);
        Ok(Some(poste))
    }

    /// Look up a token id by asset tag via the ledger-side tag index.
    /// `Ok(None)` when the index has no entry.
    pub async fn resolve_asset_tag(&self, asset_tag: &str) -> Result<Option<String>, LedgerError> {
        let tag_hash = hash_asset_tag(asset_tag);
        Ok(self
            .client
            .token_id_by_tag_hash(&tag_hash)
            .await?
            .map(|token| token.to_string()))
    }

    /// The contract's next-id counter; minted ids are `1..next_id`.
    pub async fn next_token_id(&self) -> Result<u64, LedgerError> {
        self.client.next_token_id().await
    }

    /// Every metadata-changing ledger event for this poste, each paired with
    /// the poste reconstructed as of that event's block.
    ///
    /// De-duplicated by `(txHash, logIndex)`; sorted newest-first with ties
    /// broken by descending log index within a block.
    pub async fn list_snapshots(
        &self,
        token_id: &str,
        metadata: Option<&PosteMetadata>,
        range: Option<BlockRange>,
    ) -> Result<Vec<Snapshot>, LedgerError> {
        let Some(token) = parse_token_id(token_id) else {
            return Ok(Vec::new());
        };

        let logs = self.client.metadata_log(token, range).await?;
        let mut seen: HashSet<(String, u32)> = HashSet::new();
        let mut snapshots = Vec::with_capacity(logs.len());

        for log in logs {
            if !seen.insert((log.tx_hash.clone(), log.log_index)) {
                continue;
            }

            let Some(raw) = self
                .state_with_prune_fallback(token, Some(log.block_number))
                .await?
            else {
                debug!(
                    token_id = token_id,
                    block = log.block_number,
                    "No state at event block, skipping snapshot"
                );
                continue;
            };

            let ts = self.client.block_timestamp(log.block_number).await?;
            snapshots.push(Snapshot {
                poste: decode_poste(token_id, &raw, metadata),
                tx_hash: log.tx_hash,
                log_index: log.log_index,
                block_number: log.block_number,
                actor: log.actor,
                ts,
            });
        }

        snapshots.sort_by(|a, b| {
            b.block_number
                .cmp(&a.block_number)
                .then(b.log_index.cmp(&a.log_index))
        });
        Ok(snapshots)
    }

    /// State read with the degrade-gracefully policy for pruned history.
    async fn state_with_prune_fallback(
        &self,
        token: u64,
        at_block: Option<u64>,
    ) -> Result<Option<RawPoste>, LedgerError> {
        match self.client.poste_state(token, at_block).await {
            Ok(state) => Ok(state),
            Err(LedgerError::Pruned(block)) if at_block.is_some() => {
                debug!(token = token, block = block, "Historical state pruned, reading latest");
                self.client.poste_state(token, None).await
            }
            Err(e) => Err(e),
        }
    }
}

fn parse_token_id(token_id: &str) -> Option<u64> {
    token_id.parse().ok()
}

/// Decode the raw state tuple into a poste, filling human-readable fields
/// from the metadata hints where the ledger only has hashes.
fn decode_poste(token_id: &str, raw: &RawPoste, metadata: Option<&PosteMetadata>) -> Poste {
    let asset_tag = metadata
        .and_then(|m| m.asset_tag.clone())
        .unwrap_or_else(|| format!("POSTE-{token_id}"));
    let ubicacion = metadata
        .and_then(|m| m.ubicacion.clone())
        .unwrap_or_else(|| UBICACION_PLACEHOLDER.to_string());
    let image_uri = metadata
        .and_then(|m| m.image_uri.clone())
        .unwrap_or_else(|| IMAGE_PLACEHOLDER.to_string());

    Poste {
        token_id: token_id.to_string(),
        asset_tag: Some(asset_tag),
        ubicacion,
        capacidad_kw: raw.capacidad_kw,
        consumo_entregado: raw.consumo_entregado,
        consumo_restante: raw.consumo_restante,
        seguridad: raw.seguridad,
        image_uri,
        last_attestation_uid: if raw.last_attestation_uid.is_empty() {
            None
        } else {
            Some(raw.last_attestation_uid.clone())
        },
        updated_at: Utc::now(),
    }
}

/// Cross-check supplied metadata hints against the on-ledger hash fields.
/// Mismatches are warnings only; the decoded poste is still returned.
fn check_hashes(token_id: &str, raw: &RawPoste, metadata: Option<&PosteMetadata>) {
    let Some(metadata) = metadata else { return };

    if let Some(ubicacion) = &metadata.ubicacion {
        if !verify_hash(ubicacion, &raw.ubicacion_hash) {
            warn!(
                token_id = token_id,
                expected = %hash_ubicacion(ubicacion),
                actual = %raw.ubicacion_hash,
                "Ubicacion hash mismatch"
            );
        }
    }

    if let Some(image_uri) = &metadata.image_uri {
        if !verify_hash(image_uri, &raw.image_uri_hash) {
            warn!(
                token_id = token_id,
                expected = %hash_image_uri(image_uri),
                actual = %raw.image_uri_hash,
                "Image hash mismatch"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;

    fn raw_for(ubicacion: &str, image: &str, delivered: u64) -> RawPoste {
        RawPoste {
            ubicacion_hash: hash_ubicacion(ubicacion),
            capacidad_kw: 60,
            consumo_entregado: delivered,
            consumo_restante: 3500,
            seguridad: 3,
            last_attestation_uid: "0xuid1".to_string(),
            image_uri_hash: hash_image_uri(image),
        }
    }

    fn metadata(tag: &str, ubicacion: &str, image: &str) -> PosteMetadata {
        PosteMetadata {
            asset_tag: Some(tag.to_string()),
            ubicacion: Some(ubicacion.to_string()),
            image_uri: Some(image.to_string()),
        }
    }

    fn reader_with(ledger: MemoryLedger) -> ContractReader {
        ContractReader::new(Arc::new(ledger))
    }

    #[tokio::test]
    async fn unminted_token_is_not_found() {
        let reader = reader_with(MemoryLedger::new());
        assert!(reader.read_poste("7", None, None).await.unwrap().is_none());
        assert!(reader.read_poste("abc", None, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn decodes_state_with_metadata_hints() {
        let ledger = MemoryLedger::new();
        let ubicacion = "Medellín - CLL 50 #80-12";
        ledger.record_update(1, raw_for(ubicacion, "/p.png", 12500), 10, "0xtxA", 0, "0xop");

        let reader = reader_with(ledger);
        let hints = metadata("POSTE-MDE-000134", ubicacion, "/p.png");
        let poste = reader
            .read_poste("1", Some(&hints), None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(poste.asset_tag.as_deref(), Some("POSTE-MDE-000134"));
        assert_eq!(poste.ubicacion, ubicacion);
        assert_eq!(poste.consumo_entregado, 12500);
        assert_eq!(poste.last_attestation_uid.as_deref(), Some("0xuid1"));
    }

    #[tokio::test]
    async fn missing_hints_fall_back_to_placeholders() {
        let ledger = MemoryLedger::new();
        ledger.record_update(1, raw_for("x", "y", 1), 10, "0xtxA", 0, "0xop");

        let reader = reader_with(ledger);
        let poste = reader.read_poste("1", None, None).await.unwrap().unwrap();
        assert_eq!(poste.asset_tag.as_deref(), Some("POSTE-1"));
        assert_eq!(poste.ubicacion, UBICACION_PLACEHOLDER);
        assert_eq!(poste.image_uri, IMAGE_PLACEHOLDER);
    }

    #[tokio::test]
    async fn hash_mismatch_still_returns_the_poste() {
        let ledger = MemoryLedger::new();
        ledger.record_update(1, raw_for("real location", "/p.png", 1), 10, "0xtxA", 0, "0xop");

        let reader = reader_with(ledger);
        let hints = metadata("POSTE-1", "tampered location", "/p.png");
        let poste = reader
            .read_poste("1", Some(&hints), None)
            .await
            .unwrap()
            .unwrap();
        // Log-only policy: the hinted cleartext is kept.
        assert_eq!(poste.ubicacion, "tampered location");
    }

    #[tokio::test]
    async fn pruned_historical_read_degrades_to_latest() {
        let ledger = MemoryLedger::new();
        ledger.record_update(1, raw_for("u", "i", 100), 10, "0xtxA", 0, "0xop");
        ledger.record_update(1, raw_for("u", "i", 200), 20, "0xtxB", 0, "0xop");
        ledger.prune_below(15);

        let reader = reader_with(ledger);
        let poste = reader
            .read_poste("1", None, Some(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(poste.consumo_entregado, 200);
    }

    #[tokio::test]
    async fn tag_resolution_round_trips_through_the_index() {
        let ledger = MemoryLedger::new();
        ledger.record_update(134, raw_for("u", "i", 1), 10, "0xtxA", 0, "0xop");
        ledger.register_tag("POSTE-MDE-000134", 134);

        let reader = reader_with(ledger);
        assert_eq!(
            reader.resolve_asset_tag("POSTE-MDE-000134").await.unwrap(),
            Some("134".to_string())
        );
        assert_eq!(reader.resolve_asset_tag("POSTE-NOPE").await.unwrap(), None);
    }

    #[tokio::test]
    async fn snapshots_are_deduped_and_newest_first() {
        let ledger = MemoryLedger::new();
        ledger.record_update(1, raw_for("u", "i", 100), 10, "0xtxA", 0, "0xop");
        ledger.record_update(1, raw_for("u", "i", 150), 20, "0xtxB", 0, "0xop");
        ledger.record_update(1, raw_for("u", "i", 180), 20, "0xtxB", 1, "0xop");
        // Duplicate emission of the same log entry.
        ledger.record_update(1, raw_for("u", "i", 180), 20, "0xtxB", 1, "0xop");

        let reader = reader_with(ledger);
        let snapshots = reader.list_snapshots("1", None, None).await.unwrap();

        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].block_number, 20);
        assert_eq!(snapshots[0].log_index, 1);
        assert_eq!(snapshots[1].block_number, 20);
        assert_eq!(snapshots[1].log_index, 0);
        assert_eq!(snapshots[2].block_number, 10);
        assert!(snapshots[0].ts >= snapshots[2].ts);
    }

    #[tokio::test]
    async fn snapshot_range_filter_applies() {
        let ledger = MemoryLedger::new();
        ledger.record_update(1, raw_for("u", "i", 100), 10, "0xtxA", 0, "0xop");
        ledger.record_update(1, raw_for("u", "i", 200), 20, "0xtxB", 0, "0xop");

        let reader = reader_with(ledger);
        let snapshots = reader
            .list_snapshots("1", None, Some(BlockRange { from: 15, to: 25 }))
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].block_number, 20);
    }
}
