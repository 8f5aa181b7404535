//! In-process ledger used for dev mode and tests.
//!
//! When no RPC endpoint is configured the service runs against this
//! implementation, so the dashboard stays usable from the local dataset
//! alone. Tests use the same type to script ledger scenarios, including
//! pruned history and node outages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use super::{BlockRange, LedgerClient, LedgerError, LogRecord, RawPoste};
use crate::hash::hash_asset_tag;

#[derive(Debug, Clone)]
struct TokenRecord {
    owner: String,
    /// State history as (block, state), ascending by block.
    history: Vec<(u64, RawPoste)>,
    logs: Vec<LogRecord>,
}

/// In-memory [`LedgerClient`].
#[derive(Default)]
pub struct MemoryLedger {
    tokens: RwLock<HashMap<u64, TokenRecord>>,
    tag_index: RwLock<HashMap<String, u64>>,
    block_times: RwLock<HashMap<u64, DateTime<Utc>>>,
    pruned_below: AtomicU64,
    offline: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a state change for a token, creating the token on first write.
    pub fn record_update(
        &self,
        token_id: u64,
        raw: RawPoste,
        block: u64,
        tx_hash: &str,
        log_index: u32,
        actor: &str,
    ) {
        let mut tokens = self.tokens.write().expect("ledger tokens poisoned");
        let record = tokens.entry(token_id).or_insert_with(|| TokenRecord {
            owner: actor.to_string(),
            history: Vec::new(),
            logs: Vec::new(),
        });
        record.history.push((block, raw));
        record.history.sort_by_key(|(b, _)| *b);
        record.logs.push(LogRecord {
            tx_hash: tx_hash.to_string(),
            log_index,
            block_number: block,
            actor: actor.to_string(),
        });
    }

    /// Register an asset tag in the tag index.
    pub fn register_tag(&self, asset_tag: &str, token_id: u64) {
        self.tag_index
            .write()
            .expect("tag index poisoned")
            .insert(hash_asset_tag(asset_tag), token_id);
    }

    pub fn set_owner(&self, token_id: u64, owner: &str) {
        if let Some(record) = self
            .tokens
            .write()
            .expect("ledger tokens poisoned")
            .get_mut(&token_id)
        {
            record.owner = owner.to_string();
        }
    }

    pub fn set_block_time(&self, block: u64, ts: DateTime<Utc>) {
        self.block_times
            .write()
            .expect("block times poisoned")
            .insert(block, ts);
    }

    /// Simulate state pruning: historical reads below this block fail with
    /// [`LedgerError::Pruned`].
    pub fn prune_below(&self, block: u64) {
        self.pruned_below.store(block, Ordering::Relaxed);
    }

    /// Simulate a node outage: every call fails with [`LedgerError::Rpc`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    fn check_online(&self) -> Result<(), LedgerError> {
        if self.offline.load(Ordering::Relaxed) {
            Err(LedgerError::Rpc("ledger offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn minted_at(record: &TokenRecord) -> u64 {
        record.history.first().map(|(block, _)| *block).unwrap_or(0)
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn owner_of(
        &self,
        token_id: u64,
        at_block: Option<u64>,
    ) -> Result<Option<String>, LedgerError> {
        self.check_online()?;
        let tokens = self.tokens.read().expect("ledger tokens poisoned");
        Ok(tokens.get(&token_id).and_then(|record| {
            match at_block {
                Some(block) if block < Self::minted_at(record) => None,
                _ => Some(record.owner.clone()),
            }
        }))
    }

    async fn poste_state(
        &self,
        token_id: u64,
        at_block: Option<u64>,
    ) -> Result<Option<RawPoste>, LedgerError> {
        self.check_online()?;
        if let Some(block) = at_block {
            if block < self.pruned_below.load(Ordering::Relaxed) {
                return Err(LedgerError::Pruned(block));
            }
        }

        let tokens = self.tokens.read().expect("ledger tokens poisoned");
        Ok(tokens.get(&token_id).and_then(|record| match at_block {
            Some(block) => record
                .history
                .iter()
                .rev()
                .find(|(b, _)| *b <= block)
                .map(|(_, raw)| raw.clone()),
            None => record.history.last().map(|(_, raw)| raw.clone()),
        }))
    }

    async fn token_id_by_tag_hash(&self, tag_hash: &str) -> Result<Option<u64>, LedgerError> {
        self.check_online()?;
        Ok(self
            .tag_index
            .read()
            .expect("tag index poisoned")
            .get(tag_hash)
            .copied())
    }

    async fn next_token_id(&self) -> Result<u64, LedgerError> {
        self.check_online()?;
        let tokens = self.tokens.read().expect("ledger tokens poisoned");
        Ok(tokens.keys().max().map(|max| max + 1).unwrap_or(1))
    }

    async fn metadata_log(
        &self,
        token_id: u64,
        range: Option<BlockRange>,
    ) -> Result<Vec<LogRecord>, LedgerError> {
        self.check_online()?;
        let tokens = self.tokens.read().expect("ledger tokens poisoned");
        Ok(tokens
            .get(&token_id)
            .map(|record| {
                record
                    .logs
                    .iter()
                    .filter(|log| range.is_none_or(|r| r.contains(log.block_number)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn block_timestamp(&self, block: u64) -> Result<DateTime<Utc>, LedgerError> {
        self.check_online()?;
        if let Some(ts) = self
            .block_times
            .read()
            .expect("block times poisoned")
            .get(&block)
        {
            return Ok(*ts);
        }
        // Deterministic synthetic timestamp: 12-second blocks from a fixed
        // genesis, so unscripted tests stay stable.
        let genesis = Utc
            .with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Ok(genesis + chrono::Duration::seconds(12 * block as i64))
    }
}
