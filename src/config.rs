use std::path::PathBuf;
use std::time::Duration;
use anyhow::bail;

#[derive(Clone, Debug)]
pub struct HaConfig {
    pub node_name: String,
    pub data_dir: PathBuf,
    pub http_addr: String,

    pub log_bind_addr: String,
    /// address of an existing log member to ask for admission, `None` for a node that is
    ///  added by an administrator or bootstraps the cluster
    pub log_join_addr: Option<String>,
    pub bootstrap: bool,

    pub gossip_bind_addr: String,
    pub gossip_join_addr: Option<String>,

    /// number of agreeing node observations required to accept a status as cluster truth
    pub quorum: usize,
    pub verification_script: String,
    pub notification_script: String,
    /// minimum time between two decisions for the same key
    pub event_interval: Duration,

    pub window_size: usize,
    pub min_samples: usize,
    pub script_timeout: Duration,
    /// observations older than this are ignored by quorum decisions
    pub stale_info_interval: Duration,

    pub fanout_min_interval: Duration,
    pub fanout_max_interval: Duration,
    pub gossip_consume_interval: Duration,
    pub quorum_check_interval: Duration,
    pub scavenge_interval: Duration,
    pub membership_reconcile_interval: Duration,

    pub verification_pool_size: usize,
    pub notification_pool_size: usize,
    pub queue_capacity: usize,

    pub data_command_timeout: Duration,
    pub membership_command_timeout: Duration,
    pub barrier_timeout: Duration,
    pub gossip_leave_timeout: Duration,
}

impl HaConfig {
    pub fn new(gossip_bind_addr: impl Into<String>) -> HaConfig {
        HaConfig {
            node_name: "node1".to_string(),
            data_dir: PathBuf::from("./node1"),
            http_addr: "127.0.0.1:6000".to_string(),
            log_bind_addr: "127.0.0.1:7000".to_string(),
            log_join_addr: None,
            bootstrap: false,
            gossip_bind_addr: gossip_bind_addr.into(),
            gossip_join_addr: None,
            quorum: 3,
            verification_script: "./verification_script".to_string(),
            notification_script: "./notification_script".to_string(),
            event_interval: Duration::from_secs(60),
            window_size: 5,
            min_samples: 3,
            script_timeout: Duration::from_secs(60),
            stale_info_interval: Duration::from_secs(300),
            fanout_min_interval: Duration::from_secs(3),
            fanout_max_interval: Duration::from_secs(120),
            gossip_consume_interval: Duration::from_secs(10),
            quorum_check_interval: Duration::from_secs(10),
            scavenge_interval: Duration::from_secs(10),
            membership_reconcile_interval: Duration::from_secs(10),
            verification_pool_size: 100,
            notification_pool_size: 100,
            queue_capacity: 1024,
            data_command_timeout: Duration::from_secs(5),
            membership_command_timeout: Duration::from_secs(10),
            barrier_timeout: Duration::from_secs(30),
            gossip_leave_timeout: Duration::from_secs(3),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.quorum == 0 {
            bail!("quorum must be at least 1");
        }
        if self.min_samples == 0 || self.min_samples > self.window_size {
            bail!("min_samples must be between 1 and the window size {}, was {}", self.window_size, self.min_samples);
        }
        if self.verification_pool_size == 0 || self.notification_pool_size == 0 || self.queue_capacity == 0 {
            bail!("pool sizes and queue capacity must be positive");
        }
        if self.fanout_min_interval.is_zero() || self.fanout_min_interval > self.fanout_max_interval {
            bail!("invalid fanout interval range {:?}..{:?}", self.fanout_min_interval, self.fanout_max_interval);
        }
        if self.verification_script.trim().is_empty() || self.notification_script.trim().is_empty() {
            bail!("verification and notification scripts must be configured");
        }
        Ok(())
    }
}
