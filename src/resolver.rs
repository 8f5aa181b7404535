//! Reconciliation resolver: unifies the ledger view and the local dataset
//! behind the cache store.
//!
//! Resolution is ledger-first. The local record is never discarded when the
//! ledger wins; it rides along as `fallback` so callers can always show what
//! the local copy says. Absence of a record everywhere is cached too, so
//! repeated lookups of unknown ids do not hammer the ledger.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheError, CacheOptions, LayeredCache};
use crate::dataset::{DatasetError, LocalDataset};
use crate::ledger::{ContractReader, LedgerError};
use crate::types::{PosteMetadata, PosteSource, PosteWithSource};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("poste {0} not found on ledger or in local dataset")]
    NotFound(String),
    #[error("asset tag {0} not found")]
    TagNotFound(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Composes the contract reader and the local dataset behind one cache.
#[derive(Clone)]
pub struct Resolver {
    reader: ContractReader,
    dataset: LocalDataset,
    cache: Arc<LayeredCache>,
    ttl: Duration,
    stale_while_revalidate: bool,
}

impl Resolver {
    pub fn new(
        reader: ContractReader,
        dataset: LocalDataset,
        cache: Arc<LayeredCache>,
        ttl: Duration,
        stale_while_revalidate: bool,
    ) -> Self {
        Self {
            reader,
            dataset,
            cache,
            ttl,
            stale_while_revalidate,
        }
    }

    pub fn cache(&self) -> &Arc<LayeredCache> {
        &self.cache
    }

    pub fn reader(&self) -> &ContractReader {
        &self.reader
    }

    pub fn dataset(&self) -> &LocalDataset {
        &self.dataset
    }

    pub(crate) fn cache_options(&self) -> CacheOptions {
        if self.stale_while_revalidate {
            CacheOptions::revalidating(self.ttl)
        } else {
            CacheOptions::with_ttl(self.ttl)
        }
    }

    /// Resolve one poste, ledger-first with local fallback.
    ///
    /// Caller-supplied metadata fields win over local-record fields when
    /// both are present. A transient ledger failure surfaces as an error
    /// unless the cache holds a stale value to fail over to.
    pub async fn resolve(
        &self,
        token_id: &str,
        metadata: Option<PosteMetadata>,
    ) -> Result<PosteWithSource, ResolveError> {
        let key = format!("poste:{token_id}");
        let reader = self.reader.clone();
        let dataset = self.dataset.clone();
        let id = token_id.to_string();

        let resolved: Option<PosteWithSource> = self
            .cache
            .get(
                &key,
                move || {
                    let reader = reader.clone();
                    let dataset = dataset.clone();
                    let id = id.clone();
                    let metadata = metadata.clone();
                    async move { resolve_uncached(&reader, &dataset, &id, metadata).await }
                },
                self.cache_options(),
            )
            .await?;

        resolved.ok_or_else(|| ResolveError::NotFound(token_id.to_string()))
    }

    /// Resolve an asset tag to a token id.
    ///
    /// Three-tier chain: ledger-side tag index, then a local scan for a
    /// matching tag, then a local scan treating the tag as a raw token id.
    pub async fn resolve_tag(&self, asset_tag: &str) -> Result<String, ResolveError> {
        let key = format!("tag:{asset_tag}");
        let reader = self.reader.clone();
        let dataset = self.dataset.clone();
        let tag = asset_tag.to_string();

        let resolved: Option<String> = self
            .cache
            .get(
                &key,
                move || {
                    let reader = reader.clone();
                    let dataset = dataset.clone();
                    let tag = tag.clone();
                    async move { resolve_tag_uncached(&reader, &dataset, &tag).await }
                },
                self.cache_options(),
            )
            .await?;

        resolved.ok_or_else(|| ResolveError::TagNotFound(asset_tag.to_string()))
    }

    /// Drop any cached resolution for this poste, forcing the next read
    /// to hit the ledger.
    pub async fn invalidate(&self, token_id: &str) {
        self.cache.invalidate(&format!("poste:{token_id}")).await;
    }
}

async fn resolve_uncached(
    reader: &ContractReader,
    dataset: &LocalDataset,
    token_id: &str,
    metadata: Option<PosteMetadata>,
) -> anyhow::Result<Option<PosteWithSource>> {
    let local = match dataset.find_by_token(token_id).await {
        Ok(local) => local,
        Err(e @ DatasetError::Json { .. }) => {
            warn!(token_id = token_id, error = %e, "Local dataset unreadable, resolving ledger-only");
            None
        }
        Err(e) => return Err(e.into()),
    };

    let hints = merge_hints(metadata, local.as_ref().map(PosteMetadata::from_poste));

    match reader.read_poste(token_id, hints.as_ref(), None).await {
        Ok(Some(poste)) => {
            debug!(token_id = token_id, "Resolved from ledger");
            Ok(Some(PosteWithSource {
                poste,
                source: PosteSource::Ledger,
                fallback: local,
            }))
        }
        Ok(None) => {
            if local.is_some() {
                debug!(token_id = token_id, "Not on ledger, resolved from local dataset");
            }
            Ok(local.map(|poste| PosteWithSource {
                poste,
                source: PosteSource::Local,
                fallback: None,
            }))
        }
        Err(e) => Err(e.into()),
    }
}

async fn resolve_tag_uncached(
    reader: &ContractReader,
    dataset: &LocalDataset,
    asset_tag: &str,
) -> anyhow::Result<Option<String>> {
    match reader.resolve_asset_tag(asset_tag).await {
        Ok(Some(token_id)) => {
            debug!(asset_tag = asset_tag, token_id = %token_id, "Tag resolved via ledger index");
            return Ok(Some(token_id));
        }
        Ok(None) => {}
        Err(e @ LedgerError::Rpc(_)) => {
            warn!(asset_tag = asset_tag, error = %e, "Ledger unreachable, scanning local dataset");
        }
        Err(e) => return Err(e.into()),
    }

    if let Some(poste) = dataset.find_by_tag(asset_tag).await? {
        debug!(asset_tag = asset_tag, token_id = %poste.token_id, "Tag resolved via local dataset");
        return Ok(Some(poste.token_id));
    }

    // Last resort: the tag may already be a raw token id.
    if let Some(poste) = dataset.find_by_token(asset_tag).await? {
        return Ok(Some(poste.token_id));
    }

    Ok(None)
}

fn merge_hints(
    caller: Option<PosteMetadata>,
    local: Option<PosteMetadata>,
) -> Option<PosteMetadata> {
    match (caller, local) {
        (Some(caller), Some(local)) => Some(caller.merged_over(&local)),
        (caller, local) => caller.or(local),
    }
}
