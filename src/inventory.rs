//! Inventory aggregator: fleet-wide consistency report across the local
//! dataset and the ledger.
//!
//! Thin caller of the resolver. Built fresh on every call and never
//! persisted; the admin screen is the only consumer.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::resolver::{ResolveError, Resolver};
use crate::types::{Discrepancy, InventoryEntry, PosteSource};

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Build the full inventory report.
///
/// Local records come first, each resolved through the tag chain and
/// checked for discrepancies. Ledger tokens with no local record are then
/// appended by scanning `1..next_id`. Tagged entries sort lexicographically
/// by tag; untagged entries follow, sorted numerically by token id.
pub async fn build_inventory(resolver: &Resolver) -> Result<Vec<InventoryEntry>, InventoryError> {
    let locals = match resolver.dataset().read_all().await {
        Ok(locals) => locals,
        Err(e) => {
            warn!(error = %e, "Local dataset unreadable, inventory covers ledger only");
            Vec::new()
        }
    };

    let mut entries: Vec<InventoryEntry> = Vec::new();
    let mut covered: Vec<String> = Vec::new();

    for local in &locals {
        let tag = local.asset_tag.as_deref();
        let duplicate_tag = tag.is_some_and(|t| {
            locals
                .iter()
                .filter(|other| other.asset_tag.as_deref() == Some(t))
                .count()
                > 1
        });

        let resolved_token = match tag {
            Some(tag) => match resolver.resolve_tag(tag).await {
                Ok(token_id) => token_id,
                Err(ResolveError::TagNotFound(_)) => local.token_id.clone(),
                Err(e) => return Err(e.into()),
            },
            None => local.token_id.clone(),
        };

        let (minted, source) = match resolver.resolve(&resolved_token, None).await {
            Ok(resolved) => (resolved.source == PosteSource::Ledger, resolved.source),
            Err(ResolveError::NotFound(_)) => (false, PosteSource::Local),
            Err(e) => return Err(e.into()),
        };

        let discrepancy = if duplicate_tag {
            Some(Discrepancy::DuplicateTag)
        } else if resolved_token != local.token_id {
            debug!(
                local_token = %local.token_id,
                ledger_token = %resolved_token,
                "Tag index disagrees with local record"
            );
            Some(Discrepancy::TokenMismatch)
        } else {
            None
        };

        covered.push(resolved_token.clone());
        covered.push(local.token_id.clone());
        entries.push(InventoryEntry {
            asset_tag: local.asset_tag.clone(),
            fallback_token_id: Some(local.token_id.clone()),
            resolved_token_id: resolved_token,
            minted,
            source,
            discrepancy,
        });
    }

    // Ledger tokens nobody local claims.
    match resolver.reader().next_token_id().await {
        Ok(next_id) => {
            for token in 1..next_id {
                let token_id = token.to_string();
                if covered.contains(&token_id) {
                    continue;
                }
                match resolver.resolve(&token_id, None).await {
                    Ok(resolved) => entries.push(InventoryEntry {
                        asset_tag: resolved.poste.asset_tag.clone(),
                        fallback_token_id: None,
                        resolved_token_id: token_id,
                        minted: resolved.source == PosteSource::Ledger,
                        source: resolved.source,
                        discrepancy: None,
                    }),
                    Err(ResolveError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "Ledger scan skipped, next-id counter unavailable");
        }
    }

    entries.sort_by(|a, b| match (&a.asset_tag, &b.asset_tag) {
        (Some(ta), Some(tb)) => ta.cmp(tb),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => numeric_token(&a.resolved_token_id).cmp(&numeric_token(&b.resolved_token_id)),
    });

    info!(entries = entries.len(), "Inventory built");
    Ok(entries)
}

fn numeric_token(token_id: &str) -> u64 {
    token_id.parse().unwrap_or(u64::MAX)
}
