//! Removes state that no longer corresponds to a tracked key or a live gossip member

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::consensus::GossipConsensusStore;
use crate::detector::FailureDetector;
use crate::gossip::GossipNode;
use crate::replication::kv_store::KeyValueStore;


pub struct Scavenger {
    kv: Arc<KeyValueStore>,
    consensus: Arc<GossipConsensusStore>,
    gossip: Arc<dyn GossipNode>,
    detector: Option<Arc<FailureDetector>>,
}

impl Scavenger {
    pub fn new(
        kv: Arc<KeyValueStore>,
        consensus: Arc<GossipConsensusStore>,
        gossip: Arc<dyn GossipNode>,
        detector: Option<Arc<FailureDetector>>,
    ) -> Scavenger {
        Scavenger { kv, consensus, gossip, detector }
    }

    /// Drops consensus entries and sample windows of keys that were deleted, and observations
    ///  of nodes that left the gossip cluster
    pub async fn scavenge(&self) {
        let tracked = self.kv.snapshot().await;
        let members = self.gossip.members().into_iter()
            .collect::<BTreeSet<_>>();

        for (key, entry) in self.consensus.snapshot().await {
            if !tracked.contains_key(&key) {
                info!("{} is not tracked any more, removing its consensus entry", key);
                self.consensus.remove_key(&key).await;
                continue;
            }
            for node in entry.observations.keys() {
                if !members.contains(node) {
                    debug!("{} left the gossip cluster, removing its observation of {}", node, key);
                    self.consensus.remove_node(&key, node).await;
                }
            }
        }

        if let Some(detector) = &self.detector {
            for key in detector.keys().await {
                if !tracked.contains_key(&key) {
                    debug!("removing sample window of {}", key);
                    detector.remove_key(&key).await;
                }
            }
        }
    }
}

pub async fn run_scavenger(scavenger: Arc<Scavenger>, interval: Duration, cancel: CancellationToken) {
    let mut ticks = time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticks.tick() => {
                scavenger.scavenge().await;
            }
        }
    }
}
