use serde::{Deserialize, Serialize};
use crate::consensus::status::Status;

/// A command in the replicated log. The JSON layout is `{"Cmd": .., "Key": .., "Value": ..}`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "Cmd")]
    pub cmd: LogCommand,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogCommand {
    Set,
    Delete,
    NotifyStatus,
    NotifyTime,
    NotifyEmpty,
    NotifyEmptyTime,
    /// a command this version does not know, e.g. written by a newer version
    #[serde(other)]
    Unknown,
}

impl LogEntry {
    fn new(cmd: LogCommand, key: &str, value: String) -> LogEntry {
        LogEntry {
            cmd,
            key: key.to_string(),
            value,
        }
    }

    pub fn set(key: &str, value: &str) -> LogEntry {
        LogEntry::new(LogCommand::Set, key, value.to_string())
    }

    pub fn delete(key: &str) -> LogEntry {
        LogEntry::new(LogCommand::Delete, key, String::new())
    }

    pub fn notify_status(key: &str, status: &Status) -> LogEntry {
        LogEntry::new(LogCommand::NotifyStatus, key, status.to_string())
    }

    /// the value is nanos since the epoch in decimal
    pub fn notify_time(key: &str, nanos: i64) -> LogEntry {
        LogEntry::new(LogCommand::NotifyTime, key, nanos.to_string())
    }

    pub fn notify_empty(key: &str, empty: bool) -> LogEntry {
        LogEntry::new(LogCommand::NotifyEmpty, key, empty.to_string())
    }

    pub fn notify_empty_time(key: &str, nanos: i64) -> LogEntry {
        LogEntry::new(LogCommand::NotifyEmptyTime, key, nanos.to_string())
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn try_from_bytes(buf: &[u8]) -> anyhow::Result<LogEntry> {
        Ok(serde_json::from_slice(buf)?)
    }
}
