//! Local dataset reader: the mirrored copy of poste records and events
//! kept on disk next to the service.
//!
//! The dataset is authoritative for human-readable metadata and serves as
//! the fallback when the ledger is unreachable. A missing postes file falls
//! back to the built-in seed so a fresh deployment still renders something.

use std::path::{Path, PathBuf};

use chrono::TimeZone;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{Poste, PosteEvent};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dataset parse error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Reader over the on-disk dataset directory.
#[derive(Debug, Clone)]
pub struct LocalDataset {
    dir: PathBuf,
}

impl LocalDataset {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// All postes in the local dataset. Falls back to the built-in seed
    /// when the postes file does not exist yet.
    pub async fn read_all(&self) -> Result<Vec<Poste>, DatasetError> {
        let path = self.dir.join("postes.json");
        match tokio::fs::read(&path).await {
            Ok(bytes) => parse_json(&path, &bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No postes file, serving seed dataset");
                Ok(seed_postes())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Find a poste by token id.
    pub async fn find_by_token(&self, token_id: &str) -> Result<Option<Poste>, DatasetError> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .find(|p| p.token_id == token_id))
    }

    /// Find a poste by asset tag (exact match).
    pub async fn find_by_tag(&self, asset_tag: &str) -> Result<Option<Poste>, DatasetError> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .find(|p| p.asset_tag.as_deref() == Some(asset_tag)))
    }

    /// Locally recorded events for one poste, or an empty list when the
    /// poste has no event file yet.
    pub async fn read_events(&self, token_id: &str) -> Result<Vec<PosteEvent>, DatasetError> {
        let path = self.dir.join(format!("events-{token_id}.json"));
        match tokio::fs::read(&path).await {
            Ok(bytes) => parse_json(&path, &bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(path: &Path, bytes: &[u8]) -> Result<T, DatasetError> {
    serde_json::from_slice(bytes).map_err(|source| {
        warn!(path = %path.display(), error = %source, "Malformed dataset file");
        DatasetError::Json {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Built-in seed records for deployments with no dataset yet.
fn seed_postes() -> Vec<Poste> {
    let seeded_at = Utc
        .with_ymd_and_hms(2025, 1, 15, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    vec![
        Poste {
            token_id: "1".to_string(),
            asset_tag: Some("POSTE-MDE-000134".to_string()),
            ubicacion: "Medellín - Comuna 13, CLL 50 #80-12".to_string(),
            capacidad_kw: 60,
            consumo_entregado: 12500,
            consumo_restante: 3500,
            seguridad: 3,
            image_uri: "/postes/poste-134.jpg".to_string(),
            last_attestation_uid: None,
            updated_at: seeded_at,
        },
        Poste {
            token_id: "2".to_string(),
            asset_tag: Some("POSTE-MDE-000135".to_string()),
            ubicacion: "Medellín - El Poblado, CRA 43A #6-15".to_string(),
            capacidad_kw: 45,
            consumo_entregado: 8200,
            consumo_restante: 6800,
            seguridad: 4,
            image_uri: "/postes/poste-135.jpg".to_string(),
            last_attestation_uid: None,
            updated_at: seeded_at,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_postes_file_serves_seed() {
        let dir = tempdir().unwrap();
        let dataset = LocalDataset::new(dir.path());
        let postes = dataset.read_all().await.unwrap();
        assert_eq!(postes.len(), 2);
        assert_eq!(postes[0].asset_tag.as_deref(), Some("POSTE-MDE-000134"));
    }

    #[tokio::test]
    async fn reads_postes_file_when_present() {
        let dir = tempdir().unwrap();
        let postes = vec![Poste {
            token_id: "9".to_string(),
            asset_tag: Some("POSTE-BOG-000001".to_string()),
            ubicacion: "Bogotá - Chapinero".to_string(),
            capacidad_kw: 30,
            consumo_entregado: 100,
            consumo_restante: 900,
            seguridad: 5,
            image_uri: "/postes/p9.jpg".to_string(),
            last_attestation_uid: None,
            updated_at: Utc::now(),
        }];
        tokio::fs::write(
            dir.path().join("postes.json"),
            serde_json::to_vec(&postes).unwrap(),
        )
        .await
        .unwrap();

        let dataset = LocalDataset::new(dir.path());
        let read = dataset.read_all().await.unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(
            dataset
                .find_by_tag("POSTE-BOG-000001")
                .await
                .unwrap()
                .unwrap()
                .token_id,
            "9"
        );
        assert!(dataset.find_by_token("1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_postes_file_is_an_error() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("postes.json"), b"not json")
            .await
            .unwrap();

        let dataset = LocalDataset::new(dir.path());
        assert!(matches!(
            dataset.read_all().await,
            Err(DatasetError::Json { .. })
        ));
    }

    #[tokio::test]
    async fn missing_event_file_is_empty() {
        let dir = tempdir().unwrap();
        let dataset = LocalDataset::new(dir.path());
        assert!(dataset.read_events("1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reads_event_file_when_present() {
        let dir = tempdir().unwrap();
        let events = serde_json::json!([{
            "type": "READING",
            "id": "0xtxA-0",
            "tokenId": "1",
            "actor": "0xoperator",
            "attestationUID": "0xuid",
            "txHash": "0xtxA",
            "ts": "2025-02-01T10:00:00Z",
            "deliveredKWh": 12500,
            "remainingKWh": 3500
        }]);
        tokio::fs::write(
            dir.path().join("events-1.json"),
            serde_json::to_vec(&events).unwrap(),
        )
        .await
        .unwrap();

        let dataset = LocalDataset::new(dir.path());
        let read = dataset.read_events("1").await.unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].id(), "0xtxA-0");
        assert!(!read[0].is_pending());
    }
}
