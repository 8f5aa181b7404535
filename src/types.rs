//! Domain types shared across the reconciliation core.
//!
//! Field names serialize to the same camelCase shapes the persisted dataset
//! uses (`postes.json`, `events-{tokenId}.json`), so records round-trip
//! between the durable store, the HTTP API, and the local dataset without
//! translation layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked pole asset.
///
/// `token_id` is the stable numeric-string key assigned by the ledger and is
/// immutable once set. `asset_tag` is the human-assigned external key; when
/// present it must map to exactly one token id — a second poste claiming the
/// same tag is a discrepancy, never silently resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poste {
    pub token_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_tag: Option<String>,
    pub ubicacion: String,
    #[serde(rename = "capacidadKW")]
    pub capacidad_kw: u32,
    pub consumo_entregado: u64,
    pub consumo_restante: u64,
    /// Signed security score, -10..=+10.
    pub seguridad: i8,
    #[serde(rename = "imageURI")]
    pub image_uri: String,
    #[serde(
        default,
        rename = "lastAttestationUID",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_attestation_uid: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Which data source a resolved poste came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PosteSource {
    Ledger,
    Local,
}

/// A resolved poste tagged with its source.
///
/// The local `fallback` record is carried even when the ledger version wins,
/// so callers can always show what the local copy says or recover if a later
/// ledger read fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteWithSource {
    #[serde(flatten)]
    pub poste: Poste,
    pub source: PosteSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Poste>,
}

/// Human-readable metadata hints supplied alongside a ledger read.
///
/// The ledger only stores content hashes of these fields; the caller (or the
/// local dataset) supplies the cleartext so the reader can decode a complete
/// poste and cross-check the on-ledger hashes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosteMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ubicacion: Option<String>,
    #[serde(default, rename = "imageURI", skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
}

impl PosteMetadata {
    /// Build hints from a local fallback record.
    pub fn from_poste(poste: &Poste) -> Self {
        Self {
            asset_tag: poste.asset_tag.clone(),
            ubicacion: Some(poste.ubicacion.clone()),
            image_uri: Some(poste.image_uri.clone()),
        }
    }

    /// Merge two hint sets; fields from `self` win over `other` on conflict.
    pub fn merged_over(&self, other: &Self) -> Self {
        Self {
            asset_tag: self.asset_tag.clone().or_else(|| other.asset_tag.clone()),
            ubicacion: self.ubicacion.clone().or_else(|| other.ubicacion.clone()),
            image_uri: self.image_uri.clone().or_else(|| other.image_uri.clone()),
        }
    }
}

/// Enumerated maintenance kind recorded on-ledger as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MaintenanceKind {
    Preventive,
    Corrective,
    Inspection,
    Painting,
    Emergency,
}

impl TryFrom<u8> for MaintenanceKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Preventive),
            1 => Ok(Self::Corrective),
            2 => Ok(Self::Inspection),
            3 => Ok(Self::Painting),
            4 => Ok(Self::Emergency),
            other => Err(format!("maintenance kind out of range: {other}")),
        }
    }
}

impl From<MaintenanceKind> for u8 {
    fn from(kind: MaintenanceKind) -> u8 {
        match kind {
            MaintenanceKind::Preventive => 0,
            MaintenanceKind::Corrective => 1,
            MaintenanceKind::Inspection => 2,
            MaintenanceKind::Painting => 3,
            MaintenanceKind::Emergency => 4,
        }
    }
}

/// Fields common to every event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBase {
    /// Unique event id; ledger-derived events use `{txHash}-{logIndex}`.
    pub id: String,
    pub token_id: String,
    pub actor: String,
    #[serde(rename = "attestationUID")]
    pub attestation_uid: String,
    pub tx_hash: String,
    pub ts: DateTime<Utc>,
    /// True while the event is optimistic (client-predicted, unconfirmed).
    #[serde(default)]
    pub pending: bool,
}

/// An immutable append-only record belonging to one poste.
///
/// Confirmed events are never mutated or deleted; an optimistic event can
/// only be replaced by its confirmed counterpart (same id) or rolled back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PosteEvent {
    #[serde(rename = "READING", rename_all = "camelCase")]
    Reading {
        #[serde(flatten)]
        base: EventBase,
        #[serde(rename = "deliveredKWh")]
        delivered_kwh: u64,
        #[serde(rename = "remainingKWh")]
        remaining_kwh: u64,
    },
    #[serde(rename = "MAINTENANCE", rename_all = "camelCase")]
    Maintenance {
        #[serde(flatten)]
        base: EventBase,
        maintenance_kind: MaintenanceKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    #[serde(rename = "REPLACEMENT", rename_all = "camelCase")]
    Replacement {
        #[serde(flatten)]
        base: EventBase,
        old_serial: String,
        new_serial: String,
    },
}

impl PosteEvent {
    pub fn base(&self) -> &EventBase {
        match self {
            Self::Reading { base, .. }
            | Self::Maintenance { base, .. }
            | Self::Replacement { base, .. } => base,
        }
    }

    pub fn base_mut(&mut self) -> &mut EventBase {
        match self {
            Self::Reading { base, .. }
            | Self::Maintenance { base, .. }
            | Self::Replacement { base, .. } => base,
        }
    }

    pub fn id(&self) -> &str {
        &self.base().id
    }

    pub fn token_id(&self) -> &str {
        &self.base().token_id
    }

    pub fn ts(&self) -> DateTime<Utc> {
        self.base().ts
    }

    pub fn is_pending(&self) -> bool {
        self.base().pending
    }

    pub fn set_pending(&mut self, pending: bool) {
        self.base_mut().pending = pending;
    }
}

/// Detected inconsistency between local and ledger records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Discrepancy {
    /// Local record and ledger tag index disagree on the token id.
    TokenMismatch,
    /// More than one local record claims the same asset tag.
    DuplicateTag,
}

/// One row of the fleet-wide consistency report. Built fresh on each
/// aggregation call, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_token_id: Option<String>,
    pub resolved_token_id: String,
    /// True if a ledger record was found for this poste.
    pub minted: bool,
    pub source: PosteSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discrepancy: Option<Discrepancy>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(id: &str) -> EventBase {
        EventBase {
            id: id.to_string(),
            token_id: "1".to_string(),
            actor: "0xoperator".to_string(),
            attestation_uid: "0xuid1".to_string(),
            tx_hash: "0xtxA".to_string(),
            ts: "2025-09-20T12:42:00Z".parse().unwrap(),
            pending: false,
        }
    }

    #[test]
    fn poste_round_trips_dataset_field_names() {
        let json = serde_json::json!({
            "tokenId": "1",
            "assetTag": "POSTE-MDE-000134",
            "ubicacion": "Medellín - CLL 50 #80-12",
            "capacidadKW": 60,
            "consumoEntregado": 12500,
            "consumoRestante": 3500,
            "seguridad": 3,
            "imageURI": "/postedor400x400.png",
            "lastAttestationUID": "0xuid1",
            "updatedAt": "2025-09-20T12:42:00Z",
        });

        let poste: Poste = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(poste.token_id, "1");
        assert_eq!(poste.capacidad_kw, 60);

        let back = serde_json::to_value(&poste).unwrap();
        assert_eq!(back["capacidadKW"], 60);
        assert_eq!(back["lastAttestationUID"], "0xuid1");
        assert_eq!(back["imageURI"], "/postedor400x400.png");
    }

    #[test]
    fn event_kinds_are_tagged_by_type() {
        let event = PosteEvent::Maintenance {
            base: base("evt-1"),
            maintenance_kind: MaintenanceKind::Corrective,
            notes: Some("cambio de luminaria".to_string()),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "MAINTENANCE");
        assert_eq!(json["maintenanceKind"], 1);
        assert_eq!(json["attestationUID"], "0xuid1");

        let parsed: PosteEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn reading_event_uses_kwh_field_names() {
        let event = PosteEvent::Reading {
            base: base("txA-0"),
            delivered_kwh: 12500,
            remaining_kwh: 3500,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "READING");
        assert_eq!(json["deliveredKWh"], 12500);
        assert_eq!(json["remainingKWh"], 3500);
    }

    #[test]
    fn maintenance_kind_rejects_out_of_range() {
        let json = serde_json::json!({
            "type": "MAINTENANCE",
            "id": "evt-9",
            "tokenId": "1",
            "actor": "0xop",
            "attestationUID": "0xuid",
            "txHash": "0xtx",
            "ts": "2025-09-20T12:42:00Z",
            "maintenanceKind": 9,
        });
        assert!(serde_json::from_value::<PosteEvent>(json).is_err());
    }

    #[test]
    fn metadata_merge_prefers_caller_fields() {
        let caller = PosteMetadata {
            asset_tag: Some("POSTE-MDE-000134".to_string()),
            ubicacion: None,
            image_uri: None,
        };
        let fallback = PosteMetadata {
            asset_tag: Some("POSTE-OLD".to_string()),
            ubicacion: Some("Medellín - CLL 50 #80-12".to_string()),
            image_uri: Some("/postedor400x400.png".to_string()),
        };

        let merged = caller.merged_over(&fallback);
        assert_eq!(merged.asset_tag.as_deref(), Some("POSTE-MDE-000134"));
        assert_eq!(merged.ubicacion.as_deref(), Some("Medellín - CLL 50 #80-12"));
    }
}
