//! The gossip-fed view of what every node currently observes for every key, together with the
//!  quorum decisions (watermarks) that were replicated through the log.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::consensus::status::Status;
use crate::gossip::{BroadcastMessage, GossipNode};
use crate::util::crdt::{Crdt, CrdtOrdering};

pub mod status;


/// One node's latest observation of a key. Observations are last-writer-wins registers
///  ordered by their (Lamport) timestamp.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Observation {
    pub status: Status,
    pub timestamp: i64,
}
impl Crdt for Observation {
    /// Equal timestamps keep the existing value: every node issues strictly increasing
    ///  timestamps, so two different observations with the same timestamp do not happen.
    fn merge_from(&mut self, other: &Observation) -> CrdtOrdering {
        if other.timestamp > self.timestamp {
            *self = other.clone();
            CrdtOrdering::OtherWasBigger
        }
        else if other.timestamp < self.timestamp || other.status != self.status {
            CrdtOrdering::SelfWasBigger
        }
        else {
            CrdtOrdering::Equal
        }
    }
}


#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConsensusEntry {
    /// the last status the cluster agreed on, `None` if there was no decision yet
    pub previous_consensus: Option<Status>,
    /// watermark of the last status decision in nanos since the epoch, 0 for never
    pub previous_event_time: i64,
    /// watermark of the last empty / empty-recover decision in nanos since the epoch
    pub previous_empty_time: i64,
    pub empty: bool,
    pub observations: FxHashMap<String, Observation>,
}


pub struct GossipConsensusStore {
    entries: RwLock<FxHashMap<String, ConsensusEntry>>,
    gossip: Arc<dyn GossipNode>,
}

impl GossipConsensusStore {
    pub fn new(gossip: Arc<dyn GossipNode>) -> GossipConsensusStore {
        GossipConsensusStore {
            entries: Default::default(),
            gossip,
        }
    }

    /// Stores an observation unless there is a newer (or equally new) observation of the same
    ///  node for the key. An accepted observation is queued for broadcasting to the gossip
    ///  peers, and the function returns `true`.
    pub async fn record_observation(&self, key: &str, node: &str, status: Status, timestamp: i64, raw_value: &str) -> bool {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(key.to_string()).or_default();

        let new_observation = Observation { status, timestamp };
        let accepted = match entry.observations.entry(node.to_string()) {
            Entry::Occupied(mut e) => e.get_mut().merge_from(&new_observation).self_was_modified(),
            Entry::Vacant(e) => {
                e.insert(new_observation.clone());
                true
            }
        };

        if accepted {
            self.gossip.queue_broadcast(BroadcastMessage {
                timestamp,
                node: node.to_string(),
                key: key.to_string(),
                value: raw_value.to_string(),
                status: new_observation.status,
            });
        }
        accepted
    }

    /// merges an observation relayed by a gossip peer
    pub async fn merge_inbound(&self, msg: &BroadcastMessage) -> bool {
        self.record_observation(&msg.key, &msg.node, msg.status.clone(), msg.timestamp, &msg.value).await
    }

    pub async fn record_previous_consensus(&self, key: &str, status: Status) {
        self.entries.write().await
            .entry(key.to_string())
            .or_default()
            .previous_consensus = Some(status);
    }

    pub async fn record_previous_event_time(&self, key: &str, nanos: i64) {
        self.entries.write().await
            .entry(key.to_string())
            .or_default()
            .previous_event_time = nanos;
    }

    pub async fn record_empty(&self, key: &str, empty: bool) {
        self.entries.write().await
            .entry(key.to_string())
            .or_default()
            .empty = empty;
    }

    pub async fn record_previous_empty_time(&self, key: &str, nanos: i64) {
        self.entries.write().await
            .entry(key.to_string())
            .or_default()
            .previous_empty_time = nanos;
    }

    /// point-in-time copy of the entire table, for scans that should not hold the lock
    pub async fn snapshot(&self) -> BTreeMap<String, ConsensusEntry> {
        self.entries.read().await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn entry(&self, key: &str) -> Option<ConsensusEntry> {
        self.entries.read().await
            .get(key)
            .cloned()
    }

    /// `None` if the key is unknown; `Some(None)` if it is known but there was no decision yet
    pub async fn previous_consensus(&self, key: &str) -> Option<Option<Status>> {
        self.entries.read().await
            .get(key)
            .map(|e| e.previous_consensus.clone())
    }

    pub async fn is_empty(&self, key: &str) -> Option<bool> {
        self.entries.read().await
            .get(key)
            .map(|e| e.empty)
    }

    pub async fn observation_status(&self, key: &str, node: &str) -> Status {
        self.entries.read().await
            .get(key)
            .and_then(|e| e.observations.get(node))
            .map(|o| o.status.clone())
            .unwrap_or(Status::KeyNodeNotExists)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await
            .keys()
            .cloned()
            .collect()
    }

    pub async fn remove_key(&self, key: &str) {
        if self.entries.write().await.remove(key).is_some() {
            debug!("removed consensus entry for {}", key);
        }
    }

    pub async fn remove_node(&self, key: &str, node: &str) {
        if let Some(entry) = self.entries.write().await.get_mut(key) {
            entry.observations.remove(node);
        }
    }
}
