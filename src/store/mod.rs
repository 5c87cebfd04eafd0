//! Backing stores for per-queue counters.
//!
//! One [`CounterStore`] serves one partition (hardware namespace). A
//! [`NamespaceEnumerator`] supplies the partitions active at reinit time.

use std::{io, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};

pub mod json;
pub mod memory;

pub use json::{DirectoryNamespaces, JsonCountersStore};
pub use memory::{MemoryStore, StaticNamespaces};

/// How a physical queue carries traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    Unicast,
    Multicast,
    /// Queue carrying both; reported under the unicast statistics.
    All,
}

impl QueueType {
    pub fn is_multicast(self) -> bool {
        self == QueueType::Multicast
    }
}

/// A raw per-queue counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStat {
    Packets,
    Bytes,
    DroppedPackets,
    DroppedBytes,
}

impl QueueStat {
    pub const ALL: [QueueStat; 4] = [
        QueueStat::Packets,
        QueueStat::Bytes,
        QueueStat::DroppedPackets,
        QueueStat::DroppedBytes,
    ];
}

/// One queue of one port as enumerated by a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortQueue {
    pub if_index: u32,
    pub queue: u32,
    pub queue_type: QueueType,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid {stat:?} counter {value:?} for port {if_index} queue {queue}")]
    InvalidCounter {
        if_index: u32,
        queue: u32,
        stat: QueueStat,
        value: String,
    },
    #[error("Namespace {0} is unavailable")]
    Unavailable(String),
}

/// Counter access for one partition.
pub trait CounterStore: Send + Sync {
    fn namespace(&self) -> &str;

    /// Every (port, queue) this partition knows about, populated or not.
    fn port_queues(&self) -> Result<Vec<PortQueue>, StoreError>;

    /// The current raw value, or `None` when the partition never created
    /// that counter.
    fn queue_counter(
        &self,
        if_index: u32,
        queue: u32,
        stat: QueueStat,
    ) -> Result<Option<u128>, StoreError>;

    /// Called once at the start of every update round.
    fn refresh(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Supplies the partitions currently active.
pub trait NamespaceEnumerator: Send + Sync {
    fn namespaces(&self) -> Result<Vec<Arc<dyn CounterStore>>, StoreError>;
}
