//! JSON-RPC ledger client over HTTP.
//!
//! Talks to a ledger node exposing the `postedor_*` method family. "No
//! record" answers come back as JSON-RPC errors with well-known codes and are
//! mapped to `Ok(None)`; everything else is a transport failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{BlockRange, LedgerClient, LedgerError, LogRecord, RawPoste};

/// JSON-RPC error code the node uses for missing records.
const CODE_NOT_FOUND: i64 = -32001;
/// JSON-RPC error code for pruned historical state.
const CODE_PRUNED: i64 = -32002;

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

/// HTTP JSON-RPC implementation of [`LedgerClient`].
pub struct RpcLedger {
    client: reqwest::Client,
    url: String,
}

impl RpcLedger {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// One JSON-RPC call. `Ok(None)` when the node reports a missing record.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, LedgerError> {
        debug!(method = method, "Ledger rpc call");

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Rpc(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(LedgerError::Rpc(format!(
                "http {} from {}",
                response.status(),
                self.url
            )));
        }

        let parsed: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| LedgerError::Rpc(format!("invalid rpc response: {e}")))?;

        if let Some(error) = parsed.error {
            return match error.code {
                CODE_NOT_FOUND => Ok(None),
                CODE_PRUNED => {
                    let block = parsed_block_from_message(&error.message).unwrap_or_default();
                    Err(LedgerError::Pruned(block))
                }
                code => Err(LedgerError::Rpc(format!("{} (code {code})", error.message))),
            };
        }

        Ok(parsed.result)
    }
}

/// Best-effort block number extraction from a pruned-state error message.
fn parsed_block_from_message(message: &str) -> Option<u64> {
    message
        .split_whitespace()
        .filter_map(|token| token.trim_matches(|c: char| !c.is_ascii_digit()).parse().ok())
        .next_back()
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn owner_of(
        &self,
        token_id: u64,
        at_block: Option<u64>,
    ) -> Result<Option<String>, LedgerError> {
        self.call("postedor_ownerOf", json!([token_id, at_block])).await
    }

    async fn poste_state(
        &self,
        token_id: u64,
        at_block: Option<u64>,
    ) -> Result<Option<RawPoste>, LedgerError> {
        self.call("postedor_getPoste", json!([token_id, at_block])).await
    }

    async fn token_id_by_tag_hash(&self, tag_hash: &str) -> Result<Option<u64>, LedgerError> {
        self.call("postedor_tokenIdByTagHash", json!([tag_hash])).await
    }

    async fn next_token_id(&self) -> Result<u64, LedgerError> {
        self.call::<u64>("postedor_nextId", json!([]))
            .await?
            .ok_or_else(|| LedgerError::Rpc("node returned no next-id counter".to_string()))
    }

    async fn metadata_log(
        &self,
        token_id: u64,
        range: Option<BlockRange>,
    ) -> Result<Vec<LogRecord>, LedgerError> {
        Ok(self
            .call("postedor_metadataLog", json!([token_id, range]))
            .await?
            .unwrap_or_default())
    }

    async fn block_timestamp(&self, block: u64) -> Result<DateTime<Utc>, LedgerError> {
        self.call::<DateTime<Utc>>("postedor_blockTimestamp", json!([block]))
            .await?
            .ok_or_else(|| LedgerError::Rpc(format!("no timestamp for block {block}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pruned_message_block_extraction() {
        assert_eq!(
            parsed_block_from_message("state pruned below block 1204"),
            Some(1204)
        );
        assert_eq!(parsed_block_from_message("missing trie node"), None);
    }
}
