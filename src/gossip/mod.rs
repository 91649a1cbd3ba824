//! The seam to the gossip transport. Observations are disseminated as [BroadcastMessage]s;
//!  discovery, transmission and failure detection of gossip members are the transport's
//!  business.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::consensus::status::Status;

pub mod memory;


/// One node's observation of a key, as it travels between gossip members
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub timestamp: i64,
    pub node: String,
    pub key: String,
    pub value: String,
    pub status: Status,
}
impl BroadcastMessage {
    /// A newer message for the same observing node and key makes an older one obsolete
    pub fn invalidates(&self, other: &BroadcastMessage) -> bool {
        self.node == other.node && self.key == other.key && self.timestamp > other.timestamp
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn try_from_bytes(buf: &[u8]) -> anyhow::Result<BroadcastMessage> {
        Ok(serde_json::from_slice(buf)?)
    }
}


#[cfg_attr(test, automock)]
#[async_trait]
pub trait GossipNode: Debug + Send + Sync + 'static {
    /// this node's gossip address, which is also its identity in observation tables
    fn addr(&self) -> String;

    /// addresses of all live gossip members, including this node
    fn members(&self) -> Vec<String>;

    fn queue_broadcast(&self, msg: BroadcastMessage);

    /// removes and returns all messages received from peers since the previous call
    fn drain_messages(&self) -> Vec<BroadcastMessage>;

    /// returns the number of peers that were contacted successfully
    async fn join(&self, peers: &[String]) -> anyhow::Result<usize>;

    async fn leave(&self, timeout: Duration) -> anyhow::Result<()>;
}


/// The host part of a `host:port` address. Log members and gossip members of the same machine
///  listen on different ports, so membership is compared by host.
pub fn host_part(addr: &str) -> Option<&str> {
    match addr.split_once(':') {
        Some((host, port)) if !host.is_empty() && !port.contains(':') => Some(host),
        _ => None,
    }
}


/// Outgoing messages waiting for transmission. Queueing a message drops queued messages it
///  invalidates.
#[derive(Debug, Default)]
pub struct BroadcastQueue {
    messages: Vec<BroadcastMessage>,
}
impl BroadcastQueue {
    pub fn queue(&mut self, msg: BroadcastMessage) {
        self.messages.retain(|queued| !msg.invalidates(queued));
        self.messages.push(msg);
    }

    pub fn drain(&mut self) -> Vec<BroadcastMessage> {
        std::mem::take(&mut self.messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    fn msg(timestamp: i64, node: &str, key: &str) -> BroadcastMessage {
        BroadcastMessage {
            timestamp,
            node: node.to_string(),
            key: key.to_string(),
            value: "10.1.1.1:11210".to_string(),
            status: Status::Up,
        }
    }

    #[test]
    fn test_wire_format() {
        let json = String::from_utf8(msg(17, "n1", "db").to_bytes().unwrap()).unwrap();
        assert_eq!(json, r#"{"timestamp":17,"node":"n1","key":"db","value":"10.1.1.1:11210","status":"UP"}"#);

        let parsed = BroadcastMessage::try_from_bytes(br#"{"timestamp":3,"node":"n2","key":"k","value":"v","status":"DOWN"}"#).unwrap();
        assert_eq!(parsed.status, Status::Down);
        assert_eq!(parsed.timestamp, 3);

        assert!(BroadcastMessage::try_from_bytes(b"not json").is_err());
    }

    #[rstest]
    #[case(msg(2, "n1", "a"), msg(1, "n1", "a"), true)]
    #[case(msg(1, "n1", "a"), msg(2, "n1", "a"), false)]
    #[case(msg(1, "n1", "a"), msg(1, "n1", "a"), false)]
    #[case(msg(2, "n2", "a"), msg(1, "n1", "a"), false)]
    #[case(msg(2, "n1", "b"), msg(1, "n1", "a"), false)]
    fn test_invalidates(#[case] newer: BroadcastMessage, #[case] older: BroadcastMessage, #[case] expected: bool) {
        assert_eq!(newer.invalidates(&older), expected);
    }

    #[rstest]
    #[case("10.0.0.1:8000", Some("10.0.0.1"))]
    #[case("db-host:7000", Some("db-host"))]
    #[case("10.0.0.1", None)]
    #[case(":7000", None)]
    #[case("::1:7000", None)]
    fn test_host_part(#[case] addr: &str, #[case] expected: Option<&str>) {
        assert_eq!(host_part(addr), expected);
    }

    #[test]
    fn test_queue_drops_invalidated() {
        let mut queue = BroadcastQueue::default();
        queue.queue(msg(1, "n1", "a"));
        queue.queue(msg(1, "n1", "b"));
        queue.queue(msg(1, "n2", "a"));
        queue.queue(msg(5, "n1", "a"));
        assert_eq!(queue.len(), 3);

        let drained = queue.drain();
        assert_eq!(drained, vec![msg(1, "n1", "b"), msg(1, "n2", "a"), msg(5, "n1", "a")]);
        assert!(queue.is_empty());
    }
}
