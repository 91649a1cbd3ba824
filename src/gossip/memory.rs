//! In-process gossip transport: all nodes of a [MemoryGossipNetwork] share one membership, and
//!  queued broadcasts are delivered to every other member when the network propagates.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gossip::{host_part, BroadcastMessage, BroadcastQueue, GossipNode};


#[derive(Debug, Default)]
pub struct MemoryGossipNetwork {
    state: Mutex<NetworkState>,
}

#[derive(Debug, Default)]
struct NetworkState {
    registered: BTreeSet<String>,
    members: BTreeSet<String>,
    outboxes: FxHashMap<String, BroadcastQueue>,
    inboxes: FxHashMap<String, Vec<Vec<u8>>>,
}

impl MemoryGossipNetwork {
    pub fn new() -> Arc<MemoryGossipNetwork> {
        Arc::new(MemoryGossipNetwork::default())
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a node with the given address. The node starts out as a member.
    pub fn node(self: &Arc<Self>, addr: &str) -> Arc<MemoryGossipNode> {
        let mut state = self.state();
        state.registered.insert(addr.to_string());
        state.members.insert(addr.to_string());

        Arc::new(MemoryGossipNode {
            addr: addr.to_string(),
            network: self.clone(),
        })
    }

    /// Sends every queued broadcast to all other members, returning the number of deliveries
    pub fn propagate(&self) -> usize {
        let mut state = self.state();
        let members = state.members.clone();

        let mut outgoing = Vec::new();
        for (sender, queue) in state.outboxes.iter_mut() {
            if !members.contains(sender) {
                continue;
            }
            for msg in queue.drain() {
                match msg.to_bytes() {
                    Ok(buf) => outgoing.push((sender.clone(), buf)),
                    Err(e) => warn!("dropping unserializable broadcast {:?}: {}", msg, e),
                }
            }
        }

        let mut num_deliveries = 0;
        for (sender, buf) in outgoing {
            for recipient in members.iter().filter(|m| **m != sender) {
                state.inboxes.entry(recipient.clone())
                    .or_default()
                    .push(buf.clone());
                num_deliveries += 1;
            }
        }
        debug!("propagated {} gossip messages", num_deliveries);
        num_deliveries
    }

    /// places a raw payload into a node's inbox, bypassing serialization
    pub fn inject(&self, recipient: &str, payload: Vec<u8>) {
        self.state().inboxes.entry(recipient.to_string())
            .or_default()
            .push(payload);
    }

    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticks = time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticks.tick() => {
                    self.propagate();
                }
            }
        }
    }
}


#[derive(Debug)]
pub struct MemoryGossipNode {
    addr: String,
    network: Arc<MemoryGossipNetwork>,
}

#[async_trait]
impl GossipNode for MemoryGossipNode {
    fn addr(&self) -> String {
        self.addr.clone()
    }

    fn members(&self) -> Vec<String> {
        let state = self.network.state();
        if state.members.contains(&self.addr) {
            state.members.iter().cloned().collect()
        }
        else {
            vec![self.addr.clone()]
        }
    }

    fn queue_broadcast(&self, msg: BroadcastMessage) {
        self.network.state().outboxes.entry(self.addr.clone())
            .or_default()
            .queue(msg);
    }

    fn drain_messages(&self) -> Vec<BroadcastMessage> {
        let raw = self.network.state().inboxes.remove(&self.addr)
            .unwrap_or_default();

        raw.into_iter()
            .filter_map(|buf| match BroadcastMessage::try_from_bytes(&buf) {
                Ok(msg) => Some(msg),
                Err(e) => {
                    warn!("ignoring unparseable gossip message: {}", e);
                    None
                }
            })
            .collect()
    }

    async fn join(&self, peers: &[String]) -> anyhow::Result<usize> {
        let mut state = self.network.state();

        let mut num_contacted = 0;
        for peer in peers {
            let matching = state.registered.iter()
                .filter(|addr| *addr == peer || host_part(addr) == Some(peer.as_str()))
                .cloned()
                .collect::<Vec<_>>();
            if matching.is_empty() {
                warn!("gossip peer {} is not reachable", peer);
                continue;
            }
            num_contacted += 1;
            state.members.extend(matching);
        }

        if num_contacted == 0 && !peers.is_empty() {
            return Err(anyhow!("failed to contact any of {:?}", peers));
        }
        state.members.insert(self.addr.clone());
        Ok(num_contacted)
    }

    async fn leave(&self, _timeout: Duration) -> anyhow::Result<()> {
        self.network.state().members.remove(&self.addr);
        Ok(())
    }
}
