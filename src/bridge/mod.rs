//! Connects the stores to the verification pipeline and the gossip transport: it feeds tracked
//!  keys to the verifiers, turns their results into timestamped observations, and merges the
//!  observations relayed by peers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::consensus::status::Status;
use crate::consensus::GossipConsensusStore;
use crate::detector::verifier::{VerifyRequest, VerifyResult};
use crate::gossip::GossipNode;
use crate::replication::kv_store::KeyValueStore;
use crate::util::clock::Clock;
use crate::util::interval::scaled_interval;
use crate::util::lamport::LamportClock;


pub struct Bridge {
    kv: Arc<KeyValueStore>,
    consensus: Arc<GossipConsensusStore>,
    gossip: Arc<dyn GossipNode>,
    requests: mpsc::Sender<VerifyRequest>,
    lamport: LamportClock,
}

impl Bridge {
    pub fn new(
        kv: Arc<KeyValueStore>,
        consensus: Arc<GossipConsensusStore>,
        gossip: Arc<dyn GossipNode>,
        requests: mpsc::Sender<VerifyRequest>,
        clock: Arc<dyn Clock>,
    ) -> Bridge {
        Bridge {
            kv,
            consensus,
            gossip,
            requests,
            lamport: LamportClock::new(clock),
        }
    }

    /// Queues a verification of every tracked key, returning the number of keys
    pub async fn fanout(&self) -> usize {
        let data = self.kv.snapshot().await;
        debug!("fanout of {} keys", data.len());

        for (key, value) in &data {
            let request = VerifyRequest {
                key: key.clone(),
                value: value.clone(),
            };
            if self.requests.send(request).await.is_err() {
                warn!("verification queue is closed, skipping the rest of the fanout");
                break;
            }
        }
        data.len()
    }

    /// Turns a verification result into this node's observation
    pub async fn absorb_one(&self, result: VerifyResult) {
        let node = self.gossip.addr();
        let timestamp = self.lamport.next_timestamp();

        if let Some(Some(previous)) = self.consensus.previous_consensus(&result.key).await {
            if matches!((&previous, &result.status), (Status::Down, Status::Up) | (Status::Up, Status::Down)) {
                info!("possible event for {} ({}): status changed from {} to {}", result.key, result.value, previous, result.status);
            }
        }
        if let Some(was_empty) = self.consensus.is_empty(&result.key).await {
            let now_empty = result.status == Status::Empty;
            if (was_empty && result.status.counts_as_recovery()) || (!was_empty && now_empty) {
                info!("possible empty change for {} ({}): empty was {}, status is {}", result.key, result.value, was_empty, result.status);
            }
        }

        self.consensus.record_observation(&result.key, &node, result.status, timestamp, &result.value).await;
    }

    /// Single consumer of verification results. Returns on cancellation or when all result
    ///  senders are gone.
    pub async fn absorb(&self, mut results: mpsc::Receiver<VerifyResult>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = results.recv() => match result {
                    Some(result) => self.absorb_one(result).await,
                    None => break,
                },
            }
        }
        info!("absorb loop stopped");
    }

    /// Merges all observations received from gossip peers, returning how many were accepted
    pub async fn consume_gossip(&self) -> usize {
        let mut num_accepted = 0;
        for msg in self.gossip.drain_messages() {
            if self.consensus.merge_inbound(&msg).await {
                num_accepted += 1;
            }
        }
        if num_accepted > 0 {
            debug!("merged {} observations from gossip", num_accepted);
        }
        num_accepted
    }
}


/// Runs a fanout, then pauses for an interval that grows with the number of tracked keys
pub async fn run_fanout(bridge: Arc<Bridge>, min_interval: Duration, max_interval: Duration, cancel: CancellationToken) {
    loop {
        let num_keys = tokio::select! {
            _ = cancel.cancelled() => break,
            n = bridge.fanout() => n,
        };
        let interval = scaled_interval(num_keys, min_interval, max_interval);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = time::sleep(interval) => {}
        }
    }
}

pub async fn run_gossip_consumer(bridge: Arc<Bridge>, interval: Duration, cancel: CancellationToken) {
    let mut ticks = time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticks.tick() => {
                bridge.consume_gossip().await;
            }
        }
    }
}
