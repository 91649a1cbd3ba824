//! Decides by quorum when a key's status really changed, and makes sure every real change
//!  triggers exactly one notification. Decisions are recorded through the replicated log, so
//!  a new leader continues where the previous one stopped.
//!
//! Observations count towards a decision only if they are newer than the key's watermark (the
//!  time of the previous decision) and not stale. A decision advances the watermark, so the
//!  observations it was based on can not trigger it again.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::HaConfig;
use crate::consensus::status::Status;
use crate::consensus::{ConsensusEntry, GossipConsensusStore};
use crate::replication::kv_store::KeyValueStore;
use crate::replication::log_entry::LogEntry;
use crate::replication::{LogWriter, ReplicatedLog, WritePermission};
use crate::shell::{ShellOutput, ShellRunner};
use crate::util::clock::Clock;


#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NotificationRequest {
    pub key: String,
    pub status: Status,
    pub command: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NotificationResult {
    pub key: String,
    pub status: Status,
    pub output: ShellOutput,
}

/// Outcome of checking a key's observations for a status change
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EventCheck {
    /// a definite transition between UP and DOWN
    pub event: bool,
    /// the quorum agrees on UP or DOWN, but there is no previous decision to compare with
    pub pending: bool,
    /// the status reaching the quorum, if any
    pub status: Option<Status>,
}

/// Outcome of checking a key's observations for recovery from EMPTY
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EmptyCheck {
    pub recover: bool,
    pub status: Option<Status>,
}


pub struct QuorumChecker {
    quorum: usize,
    event_interval_nanos: i64,
    stale_nanos: i64,
    notification_script: String,
    data_command_timeout: Duration,
    barrier_timeout: Duration,
    kv: Arc<KeyValueStore>,
    consensus: Arc<GossipConsensusStore>,
    log: Arc<dyn ReplicatedLog>,
    writer: LogWriter,
    permission: WritePermission,
    clock: Arc<dyn Clock>,
    notifications: mpsc::Sender<NotificationRequest>,
}

fn as_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

impl QuorumChecker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &HaConfig,
        kv: Arc<KeyValueStore>,
        consensus: Arc<GossipConsensusStore>,
        log: Arc<dyn ReplicatedLog>,
        permission: WritePermission,
        clock: Arc<dyn Clock>,
        notifications: mpsc::Sender<NotificationRequest>,
    ) -> QuorumChecker {
        QuorumChecker {
            quorum: config.quorum,
            event_interval_nanos: as_nanos(config.event_interval),
            stale_nanos: as_nanos(config.stale_info_interval),
            notification_script: config.notification_script.clone(),
            data_command_timeout: config.data_command_timeout,
            barrier_timeout: config.barrier_timeout,
            kv,
            consensus,
            writer: LogWriter::new(log.clone(), permission.clone()),
            log,
            permission,
            clock,
            notifications,
        }
    }

    fn is_fresh(&self, timestamp: i64, watermark: i64, now: i64) -> bool {
        timestamp > watermark && now.saturating_sub(timestamp) <= self.stale_nanos
    }

    /// The status with the highest count that reaches the quorum. Equal counts are resolved by
    ///  the statuses' ordering.
    fn quorum_status(&self, counts: &BTreeMap<&Status, usize>) -> Option<Status> {
        counts.iter()
            .filter(|(_, count)| **count >= self.quorum)
            .max_by(|(s1, c1), (s2, c2)| c1.cmp(c2).then(s2.cmp(s1)))
            .map(|(status, _)| (*status).clone())
    }

    pub fn has_event(&self, entry: &ConsensusEntry, now: i64) -> EventCheck {
        let mut counts = BTreeMap::new();
        for observation in entry.observations.values() {
            if self.is_fresh(observation.timestamp, entry.previous_event_time, now) {
                *counts.entry(&observation.status).or_insert(0) += 1;
            }
        }
        let status = self.quorum_status(&counts);
        let previous = entry.previous_consensus.as_ref();

        let (event, pending) = match &status {
            Some(Status::Down) if previous == Some(&Status::Up) => (true, false),
            Some(Status::Down) if previous != Some(&Status::Down) => (false, true),
            Some(Status::Up) if previous == Some(&Status::Down) => (true, false),
            Some(Status::Up) if previous != Some(&Status::Up) => (false, true),
            _ => (false, false),
        };
        EventCheck { event, pending, status }
    }

    pub fn empty_recover(&self, entry: &ConsensusEntry, now: i64) -> EmptyCheck {
        let mut counts = BTreeMap::new();
        let mut num_recovered = 0;
        for observation in entry.observations.values() {
            if !self.is_fresh(observation.timestamp, entry.previous_empty_time, now) {
                continue;
            }
            if observation.status.counts_as_recovery() {
                num_recovered += 1;
            }
            *counts.entry(&observation.status).or_insert(0) += 1;
        }
        let status = self.quorum_status(&counts);

        let recover = status != Some(Status::Empty) && num_recovered >= self.quorum;
        EmptyCheck { recover, status }
    }

    async fn record(&self, entry: LogEntry) {
        if let Err(e) = self.writer.write(&entry, self.data_command_timeout).await {
            warn!("recording {:?} failed: {}", entry, e);
        }
    }

    async fn schedule_notification(&self, key: &str, status: Status) {
        let value = self.kv.get(key).await
            .unwrap_or_default();
        let command = format!("{} {} {} {}", self.notification_script, key, value, status);
        let request = NotificationRequest {
            key: key.to_string(),
            status,
            command,
        };
        if self.notifications.send(request).await.is_err() {
            warn!("notification queue is closed, dropping notification for {}", key);
        }
    }

    pub async fn check_event(&self, key: &str, entry: &ConsensusEntry) {
        let now = self.clock.now_nanos();
        if now.saturating_sub(entry.previous_event_time) < self.event_interval_nanos {
            return;
        }

        let check = self.has_event(entry, now);
        let Some(status) = check.status else {
            return;
        };
        if check.pending {
            info!("{} is {} by quorum without a previous decision, recording it", key, status);
            self.record(LogEntry::notify_time(key, now)).await;
            self.record(LogEntry::notify_status(key, &status)).await;
        }
        if check.event {
            info!("{} changed from {:?} to {} by quorum, notifying", key, entry.previous_consensus, status);
            // the decision is durable before the notification runs, so a slow script can not
            //  cause a second notification for the same change
            self.record(LogEntry::notify_time(key, now)).await;
            self.record(LogEntry::notify_status(key, &status)).await;
            self.schedule_notification(key, status).await;
        }
    }

    pub async fn check_empty(&self, key: &str, entry: &ConsensusEntry) {
        let now = self.clock.now_nanos();
        if now.saturating_sub(entry.previous_empty_time) < self.event_interval_nanos {
            return;
        }

        let check = self.empty_recover(entry, now);
        if check.status == Some(Status::Empty) && !entry.empty {
            info!("{} is EMPTY by quorum, notifying", key);
            self.record(LogEntry::notify_empty_time(key, now)).await;
            self.schedule_notification(key, Status::Empty).await;
        }
        if check.recover && entry.empty {
            info!("{} recovered from EMPTY by quorum, notifying", key);
            self.record(LogEntry::notify_empty_time(key, now)).await;
            self.schedule_notification(key, Status::EmptyRecover).await;
        }
    }

    /// Runs the event and empty checks for every key. Only the leader decides, and only after
    ///  all committed log entries were applied locally.
    pub async fn quorum_check1(&self) {
        if !self.permission.is_granted() {
            return;
        }
        if let Err(e) = self.log.barrier(self.barrier_timeout).await {
            warn!("log barrier failed, skipping quorum check: {}", e);
            return;
        }

        let snapshot = self.consensus.snapshot().await;
        debug!("quorum check of {} keys", snapshot.len());
        for (key, entry) in &snapshot {
            self.check_event(key, entry).await;
            self.check_empty(key, entry).await;
        }
    }

    /// Confirms the decision a finished notification was about
    pub async fn record_result(&self, result: NotificationResult) {
        info!("notification for {} {} finished: stdout {:?}, stderr {:?}, error {:?}",
            result.key, result.status,
            result.output.stdout.trim_end_matches('\n'),
            result.output.stderr.trim_end_matches('\n'),
            result.output.error,
        );

        let entry = match result.status {
            Status::Empty => LogEntry::notify_empty(&result.key, true),
            Status::EmptyRecover => LogEntry::notify_empty(&result.key, false),
            status => LogEntry::notify_status(&result.key, &status),
        };
        self.record(entry).await;
    }

    /// Single consumer of notification results
    pub async fn quorum_check2(&self, mut results: mpsc::Receiver<NotificationResult>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = results.recv() => match result {
                    Some(result) => self.record_result(result).await,
                    None => break,
                },
            }
        }
        info!("notification result loop stopped");
    }
}


pub async fn run_quorum_checks(checker: Arc<QuorumChecker>, interval: Duration, cancel: CancellationToken) {
    let mut ticks = time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticks.tick() => {
                checker.quorum_check1().await;
            }
        }
    }
}

/// Runs notification scripts with at most `pool_size` in flight. A notification is skipped if
///  this node lost leadership since it was scheduled.
#[allow(clippy::too_many_arguments)]
pub async fn run_notifications(
    shell: Arc<dyn ShellRunner>,
    mut requests: mpsc::Receiver<NotificationRequest>,
    results: mpsc::Sender<NotificationResult>,
    pool_size: usize,
    script_timeout: Duration,
    permission: WritePermission,
    cancel: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(pool_size));
    let tracker = TaskTracker::new();

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let shell = shell.clone();
        let results = results.clone();
        let permission = permission.clone();
        tracker.spawn(async move {
            if !permission.is_granted() {
                debug!("not leader any more, skipping notification {:?}", request.command);
                return;
            }
            info!("running notification {:?}", request.command);
            let output = shell.run(&request.command, script_timeout).await;
            let result = NotificationResult {
                key: request.key,
                status: request.status,
                output,
            };
            if results.send(result).await.is_err() {
                warn!("notification result is dropped because the consumer stopped");
            }
            drop(permit);
        });
    }

    tracker.close();
    tracker.wait().await;
    info!("notification workers stopped");
}
