//! Event merge engine: unifies ledger snapshots, locally recorded events,
//! and client-side optimistic events into one timeline per poste.
//!
//! Per-event state machine: optimistic -> confirmed on success, or
//! optimistic -> removed on rollback. Ledger and local events arrive
//! confirmed and never pass through the optimistic state. The returned
//! timeline is sorted newest-first; consumption deltas between consecutive
//! readings depend on that order, so it is a correctness contract.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::CacheError;
use crate::ledger::Snapshot;
use crate::resolver::Resolver;
use crate::types::{PosteEvent, PosteMetadata};

const SIGNAL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Notification emitted when the optimistic set changes.
#[derive(Debug, Clone)]
pub enum TimelineSignal {
    Submitted { id: String, token_id: String },
    Confirmed { id: String, token_id: String },
    RolledBack { id: String, token_id: String, reason: String },
}

/// Consumption delta between two consecutive readings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionDelta {
    /// Id of the newer of the two readings.
    pub event_id: String,
    #[serde(rename = "deliveredKWh")]
    pub delivered_kwh: i64,
    pub ts: DateTime<Utc>,
}

/// Merges confirmed history with the per-client optimistic set.
pub struct TimelineEngine {
    resolver: Resolver,
    /// Optimistic events keyed by event id; per-client, never shared.
    optimistic: DashMap<String, PosteEvent>,
    /// Confirmed events not yet visible via ledger or local dataset.
    confirmed: DashMap<String, PosteEvent>,
    signals: broadcast::Sender<TimelineSignal>,
}

impl TimelineEngine {
    pub fn new(resolver: Resolver) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            resolver,
            optimistic: DashMap::new(),
            confirmed: DashMap::new(),
            signals,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimelineSignal> {
        self.signals.subscribe()
    }

    /// The merged timeline for one poste, newest-first.
    ///
    /// Precedence on id collision: ledger snapshot, then local dataset
    /// event, then confirmed overlay, then optimistic. A snapshot fetch
    /// failure degrades to the local events with a warning rather than
    /// failing the whole timeline.
    pub async fn timeline(
        &self,
        token_id: &str,
        metadata: Option<PosteMetadata>,
    ) -> Result<Vec<PosteEvent>, TimelineError> {
        let key = format!("timeline:{token_id}");
        let resolver = self.resolver.clone();
        let id = token_id.to_string();

        let mut events: Vec<PosteEvent> = self
            .resolver
            .cache()
            .get(
                &key,
                move || {
                    let resolver = resolver.clone();
                    let id = id.clone();
                    let metadata = metadata.clone();
                    async move { confirmed_events(&resolver, &id, metadata).await }
                },
                self.resolver.cache_options(),
            )
            .await?;

        // Once an event surfaces via ledger or local dataset its overlay
        // entry is redundant; drop it so the map stays bounded.
        for event in &events {
            self.confirmed.remove(event.id());
        }

        // Overlay confirmed-but-not-yet-indexed events, then optimistic.
        for entry in self.confirmed.iter() {
            if entry.token_id() == token_id && !contains_id(&events, entry.id()) {
                events.push(entry.clone());
            }
        }
        for entry in self.optimistic.iter() {
            if entry.token_id() == token_id && !contains_id(&events, entry.id()) {
                events.push(entry.clone());
            }
        }

        events.sort_by(|a, b| b.ts().cmp(&a.ts()).then_with(|| b.id().cmp(a.id())));
        Ok(events)
    }

    /// Make an event visible immediately, tagged pending.
    pub fn submit_optimistic(&self, mut event: PosteEvent) {
        event.set_pending(true);
        let signal = TimelineSignal::Submitted {
            id: event.id().to_string(),
            token_id: event.token_id().to_string(),
        };
        debug!(event_id = event.id(), token_id = event.token_id(), "Optimistic event submitted");
        self.optimistic.insert(event.id().to_string(), event);
        let _ = self.signals.send(signal);
    }

    /// Replace the optimistic entry with its confirmed counterpart. When no
    /// optimistic entry matches, the confirmed event is simply added.
    pub fn confirm(&self, mut event: PosteEvent) {
        event.set_pending(false);
        let id = event.id().to_string();
        let token_id = event.token_id().to_string();
        self.optimistic.remove(&id);
        self.confirmed.insert(id.clone(), event);
        info!(event_id = %id, token_id = %token_id, "Event confirmed");
        let _ = self.signals.send(TimelineSignal::Confirmed { id, token_id });
    }

    /// Remove an optimistic entry; no trace remains in the timeline.
    pub fn rollback(&self, id: &str, reason: &str) {
        let Some((_, event)) = self.optimistic.remove(id) else {
            debug!(event_id = id, "Rollback for unknown optimistic event, ignoring");
            return;
        };
        warn!(event_id = id, token_id = event.token_id(), reason = reason, "Optimistic event rolled back");
        let _ = self.signals.send(TimelineSignal::RolledBack {
            id: id.to_string(),
            token_id: event.token_id().to_string(),
            reason: reason.to_string(),
        });
    }

    /// Number of events currently pending confirmation.
    pub fn pending_count(&self) -> usize {
        self.optimistic.len()
    }
}

fn contains_id(events: &[PosteEvent], id: &str) -> bool {
    events.iter().any(|e| e.id() == id)
}

/// The confirmed portion of a timeline: ledger snapshots as Reading events
/// plus local dataset events not already represented by a snapshot.
async fn confirmed_events(
    resolver: &Resolver,
    token_id: &str,
    metadata: Option<PosteMetadata>,
) -> anyhow::Result<Vec<PosteEvent>> {
    let snapshots = match resolver
        .reader()
        .list_snapshots(token_id, metadata.as_ref(), None)
        .await
    {
        Ok(snapshots) => snapshots,
        Err(e) => {
            warn!(token_id = token_id, error = %e, "Snapshot fetch failed, serving local events only");
            Vec::new()
        }
    };

    let mut events: Vec<PosteEvent> = snapshots.into_iter().map(snapshot_to_event).collect();

    let local = resolver.dataset().read_events(token_id).await?;
    for mut event in local {
        event.set_pending(false);
        if !contains_id(&events, event.id()) {
            events.push(event);
        }
    }

    Ok(events)
}

fn snapshot_to_event(snapshot: Snapshot) -> PosteEvent {
    PosteEvent::Reading {
        base: crate::types::EventBase {
            id: format!("{}-{}", snapshot.tx_hash, snapshot.log_index),
            token_id: snapshot.poste.token_id.clone(),
            actor: snapshot.actor,
            attestation_uid: snapshot.poste.last_attestation_uid.clone().unwrap_or_default(),
            tx_hash: snapshot.tx_hash,
            ts: snapshot.ts,
            pending: false,
        },
        delivered_kwh: snapshot.poste.consumo_entregado,
        remaining_kwh: snapshot.poste.consumo_restante,
    }
}

/// Deltas between consecutive readings in a newest-first timeline.
pub fn consumption_deltas(events: &[PosteEvent]) -> Vec<ConsumptionDelta> {
    let readings: Vec<(&str, u64, DateTime<Utc>)> = events
        .iter()
        .filter_map(|e| match e {
            PosteEvent::Reading { base, delivered_kwh, .. } => {
                Some((base.id.as_str(), *delivered_kwh, base.ts))
            }
            _ => None,
        })
        .collect();

    readings
        .windows(2)
        .map(|pair| ConsumptionDelta {
            event_id: pair[0].0.to_string(),
            delivered_kwh: pair[0].1 as i64 - pair[1].1 as i64,
            ts: pair[0].2,
        })
        .collect()
}
