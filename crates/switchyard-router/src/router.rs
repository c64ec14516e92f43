//! Traffic router — weighted routing tables per endpoint.
//!
//! Each endpoint owns a table mapping revision → integer percent. A
//! non-empty table sums to exactly 100 after every mutation; rebalancing
//! uses largest-remainder rounding so no unit of weight is ever lost.
//! Mutations for an endpoint serialize behind the table lock, and every
//! mutation persists a snapshot to the state store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tracing::{debug, info};

use switchyard_state::{Endpoint, RevisionId, RoutingRecord, StateStore};

use crate::error::{RouterError, RouterResult};

/// Immutable copy of an endpoint's routing table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutingTable {
    weights: BTreeMap<RevisionId, u32>,
}

impl RoutingTable {
    /// Weight for a revision (0 if absent).
    pub fn weight_of(&self, revision: &str) -> u32 {
        self.weights.get(revision).copied().unwrap_or(0)
    }

    /// All revision → weight entries.
    pub fn weights(&self) -> &BTreeMap<RevisionId, u32> {
        &self.weights
    }

    /// Sum of all weights (100 for a non-empty table, 0 for an empty one).
    pub fn total(&self) -> u32 {
        self.weights.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Maintains weighted routing between revisions across logical endpoints.
pub struct TrafficRouter {
    state: StateStore,
    /// Per-endpoint tables. The write lock serializes mutations so the
    /// sum-to-100 invariant is never observable mid-update.
    tables: Arc<RwLock<HashMap<Endpoint, BTreeMap<RevisionId, u32>>>>,
}

impl TrafficRouter {
    /// Create a router, reloading any persisted routing snapshots.
    pub fn load(state: StateStore) -> RouterResult<Self> {
        let mut tables = HashMap::new();
        for endpoint in [Endpoint::Production, Endpoint::Test] {
            if let Some(record) = state.get_route(endpoint)? {
                debug!(%endpoint, revisions = record.weights.len(), "routing table reloaded");
                tables.insert(endpoint, record.weights);
            }
        }
        Ok(Self {
            state,
            tables: Arc::new(RwLock::new(tables)),
        })
    }

    /// Set a revision's weight on an endpoint, rebalancing all other
    /// revisions proportionally so the table still sums to 100.
    ///
    /// Inserts the revision if it is not yet routed. Rejects weights
    /// outside [0, 100], and rejects leaving a sole revision below 100.
    pub async fn set_weight(
        &self,
        endpoint: Endpoint,
        revision: &str,
        weight: u32,
    ) -> RouterResult<()> {
        if weight > 100 {
            return Err(RouterError::InvalidWeight {
                weight,
                revision: revision.to_string(),
                reason: "must be within [0, 100]".to_string(),
            });
        }

        let mut tables = self.tables.write().await;
        let table = tables.entry(endpoint).or_default();

        let others: Vec<RevisionId> = table
            .keys()
            .filter(|id| id.as_str() != revision)
            .cloned()
            .collect();

        if others.is_empty() && weight != 100 {
            return Err(RouterError::InvalidWeight {
                weight,
                revision: revision.to_string(),
                reason: "sole routed revision must hold 100".to_string(),
            });
        }

        let remainder = 100 - weight;
        let shares = rebalance(table, &others, remainder);

        table.insert(revision.to_string(), weight);
        for (id, share) in shares {
            table.insert(id, share);
        }

        debug_assert_eq!(table.values().sum::<u32>(), 100);
        self.persist(endpoint, table)?;
        debug!(%endpoint, %revision, weight, "weight set");
        Ok(())
    }

    /// Route all of an endpoint's traffic to one revision. Other revisions
    /// stay in the table at weight 0. Atomic from callers' perspective.
    pub async fn cutover(&self, endpoint: Endpoint, revision: &str) -> RouterResult<()> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(endpoint).or_default();
        for (_, w) in table.iter_mut() {
            *w = 0;
        }
        table.insert(revision.to_string(), 100);

        self.persist(endpoint, table)?;
        info!(%endpoint, %revision, "cutover");
        Ok(())
    }

    /// Empty an endpoint's routing table (drains the test endpoint after a
    /// deployment finishes).
    pub async fn clear(&self, endpoint: Endpoint) -> RouterResult<()> {
        let mut tables = self.tables.write().await;
        tables.remove(&endpoint);
        self.state.delete_route(endpoint)?;
        debug!(%endpoint, "routing table cleared");
        Ok(())
    }

    /// Immutable copy of an endpoint's routing table.
    pub async fn snapshot(&self, endpoint: Endpoint) -> RoutingTable {
        let tables = self.tables.read().await;
        RoutingTable {
            weights: tables.get(&endpoint).cloned().unwrap_or_default(),
        }
    }

    fn persist(&self, endpoint: Endpoint, table: &BTreeMap<RevisionId, u32>) -> RouterResult<()> {
        self.state.put_route(&RoutingRecord {
            endpoint,
            weights: table.clone(),
            updated_at: epoch_secs(),
        })?;
        Ok(())
    }
}

/// Scale `others` so they sum to `remainder`, preserving their current
/// proportions. Largest-remainder rounding: floor every share, then hand
/// the leftover units to the largest fractional parts (ties broken by
/// revision id, so the result is deterministic).
fn rebalance(
    table: &BTreeMap<RevisionId, u32>,
    others: &[RevisionId],
    remainder: u32,
) -> Vec<(RevisionId, u32)> {
    if others.is_empty() {
        return Vec::new();
    }

    let others_sum: u32 = others.iter().map(|id| table[id]).sum();

    if others_sum == 0 {
        // Nothing to preserve proportions of; split evenly.
        let n = others.len() as u32;
        let base = remainder / n;
        let extra = (remainder % n) as usize;
        return others
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), base + u32::from(i < extra)))
            .collect();
    }

    let mut shares: Vec<(RevisionId, u32, u32)> = others
        .iter()
        .map(|id| {
            let numer = table[id] * remainder;
            (id.clone(), numer / others_sum, numer % others_sum)
        })
        .collect();

    let assigned: u32 = shares.iter().map(|(_, floor, _)| floor).sum();
    let mut leftover = remainder - assigned;

    // Largest fractional part first; BTreeMap keys keep ties stable.
    shares.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
    for share in shares.iter_mut() {
        if leftover == 0 {
            break;
        }
        share.1 += 1;
        leftover -= 1;
    }

    shares.into_iter().map(|(id, w, _)| (id, w)).collect()
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
