//! csqIfQosGroupStatsTable: per-port, per-queue QoS counters.
//!
//! Instances live under `csqIfQosGroupStatsValue` and are indexed by
//! `{ifIndex}.{direction}.{queueIndex}.{statsType}`. Only egress counters
//! exist. A port's physical queues are split in halves, unicast first and
//! multicast second, and both halves share the same 1-based queue index.

use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::Arc,
};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};

use crate::{
    snmp::{
        encodings::ObjectIdentifier,
        mib::{EntryView, MibEntry, MibError, MibTable},
        oids::{self, QOS_GROUP_STATS_INDEX_LEN},
        value::VarBindValue,
    },
    store::{CounterStore, NamespaceEnumerator, QueueStat, StoreError},
    updater::{Refreshable, Snapshot, UpdateError},
};

pub const DIRECTION_INGRESS: u32 = 1;
pub const DIRECTION_EGRESS: u32 = 2;

const UPDATER_NAME: &str = "csqIfQosGroupStatsTable";

/// The `statsType` index component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum QosGroupStatsType {
    UcastSentPkts = 1,
    UcastSentBytes = 2,
    McastSentPkts = 3,
    McastSentBytes = 4,
    UcastDroppedPkts = 5,
    UcastDroppedBytes = 6,
    McastDroppedPkts = 7,
    McastDroppedBytes = 8,
}

impl QosGroupStatsType {
    /// Maps a raw queue counter to its statsType.
    pub fn for_queue(stat: QueueStat, multicast: bool) -> Self {
        use QosGroupStatsType::*;
        match (stat, multicast) {
            (QueueStat::Packets, false) => UcastSentPkts,
            (QueueStat::Bytes, false) => UcastSentBytes,
            (QueueStat::Packets, true) => McastSentPkts,
            (QueueStat::Bytes, true) => McastSentBytes,
            (QueueStat::DroppedPackets, false) => UcastDroppedPkts,
            (QueueStat::DroppedBytes, false) => UcastDroppedBytes,
            (QueueStat::DroppedPackets, true) => McastDroppedPkts,
            (QueueStat::DroppedBytes, true) => McastDroppedBytes,
        }
    }
}

/// Number of queue indices on a port whose highest queue number is `max_queue`.
pub fn pq_count(max_queue: u32) -> u32 {
    max_queue / 2 + 1
}

/// 1-based queue index of physical queue `queue`.
pub fn queue_index(queue: u32, pq_count: u32) -> u32 {
    queue % pq_count.max(1) + 1
}

/// A table index tuple. Field order matches OID order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueStatIndex {
    pub if_index: u32,
    pub direction: u32,
    pub queue_index: u32,
    pub stats_type: u32,
}

impl QueueStatIndex {
    pub fn egress(if_index: u32, queue_index: u32, stats_type: QosGroupStatsType) -> Self {
        QueueStatIndex {
            if_index,
            direction: DIRECTION_EGRESS,
            queue_index,
            stats_type: stats_type as u32,
        }
    }

    /// Parses an instance suffix; anything but exactly four sub-ids is not an instance.
    pub fn from_suffix(suffix: &[u32]) -> Option<Self> {
        match *suffix {
            [if_index, direction, queue_index, stats_type] => Some(QueueStatIndex {
                if_index,
                direction,
                queue_index,
                stats_type,
            }),
            _ => None,
        }
    }

    pub fn to_suffix(self) -> Vec<u32> {
        vec![
            self.if_index,
            self.direction,
            self.queue_index,
            self.stats_type,
        ]
    }

    /// Lower bound of the indices sorting strictly after an arbitrary suffix.
    ///
    /// A shorter suffix is a prefix of every index extending it, so those are
    /// included. A longer one sorts after its own first four sub-ids.
    pub fn successor_bound(suffix: &[u32]) -> Bound<QueueStatIndex> {
        let mut padded = [0u32; QOS_GROUP_STATS_INDEX_LEN];
        let n = suffix.len().min(QOS_GROUP_STATS_INDEX_LEN);
        padded[..n].copy_from_slice(&suffix[..n]);
        let index = QueueStatIndex {
            if_index: padded[0],
            direction: padded[1],
            queue_index: padded[2],
            stats_type: padded[3],
        };
        if suffix.len() < QOS_GROUP_STATS_INDEX_LEN {
            Bound::Included(index)
        } else {
            Bound::Excluded(index)
        }
    }
}

/// One published generation of raw counters.
///
/// Presence is absence-of-key: a tuple with no entry is NoSuchInstance.
#[derive(Debug, Default, Clone)]
pub struct QueueStatSnapshot {
    counters: BTreeMap<QueueStatIndex, u128>,
    taken_at: Option<DateTime<Utc>>,
}

impl QueueStatSnapshot {
    pub fn new(counters: BTreeMap<QueueStatIndex, u128>, taken_at: DateTime<Utc>) -> Self {
        QueueStatSnapshot {
            counters,
            taken_at: Some(taken_at),
        }
    }

    pub fn raw(&self, index: &QueueStatIndex) -> Option<u128> {
        self.counters.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// None until the first successful update.
    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        self.taken_at
    }
}

impl EntryView for QueueStatSnapshot {
    fn get(&self, suffix: &[u32]) -> Option<VarBindValue> {
        let index = QueueStatIndex::from_suffix(suffix)?;
        self.raw(&index).map(VarBindValue::counter64_wrapping)
    }

    fn get_next(&self, suffix: &[u32]) -> Option<(Vec<u32>, VarBindValue)> {
        self.counters
            .range((QueueStatIndex::successor_bound(suffix), Bound::Unbounded))
            .next()
            .map(|(index, &raw)| (index.to_suffix(), VarBindValue::counter64_wrapping(raw)))
    }
}

#[derive(Debug, Clone, Copy)]
struct QueueSlot {
    if_index: u32,
    queue: u32,
    multicast: bool,
    queue_index: u32,
}

struct PartitionLayout {
    store: Arc<dyn CounterStore>,
    slots: Vec<QueueSlot>,
}

/// The known (partition, port, queue) triples, rebuilt by `reinit_data`.
#[derive(Default)]
pub struct QueueLayout {
    partitions: Vec<PartitionLayout>,
}

impl QueueLayout {
    pub fn discover(namespaces: &dyn NamespaceEnumerator) -> Result<Self, StoreError> {
        let mut partitions = Vec::new();

        for store in namespaces.namespaces()? {
            let queues = store.port_queues()?;

            let mut max_queue: HashMap<u32, u32> = HashMap::new();
            for q in &queues {
                let max = max_queue.entry(q.if_index).or_insert(q.queue);
                *max = (*max).max(q.queue);
            }

            let slots = queues
                .iter()
                .map(|q| QueueSlot {
                    if_index: q.if_index,
                    queue: q.queue,
                    multicast: q.queue_type.is_multicast(),
                    queue_index: queue_index(q.queue, pq_count(max_queue[&q.if_index])),
                })
                .collect::<Vec<_>>();

            log::debug!(
                "Namespace {}: {} queues on {} ports",
                store.namespace(),
                slots.len(),
                max_queue.len()
            );
            partitions.push(PartitionLayout { store, slots });
        }

        Ok(QueueLayout { partitions })
    }

    pub fn namespace_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn queue_count(&self) -> usize {
        self.partitions.iter().map(|p| p.slots.len()).sum()
    }

    /// Reads every known counter. Tuples reported more than once are summed.
    pub fn collect(&self) -> Result<BTreeMap<QueueStatIndex, u128>, StoreError> {
        let mut counters = BTreeMap::new();

        for partition in &self.partitions {
            partition.store.refresh()?;
            for slot in &partition.slots {
                for stat in QueueStat::ALL {
                    let Some(raw) = partition.store.queue_counter(slot.if_index, slot.queue, stat)?
                    else {
                        continue;
                    };
                    let index = QueueStatIndex::egress(
                        slot.if_index,
                        slot.queue_index,
                        QosGroupStatsType::for_queue(stat, slot.multicast),
                    );
                    counters
                        .entry(index)
                        .and_modify(|sum: &mut u128| *sum = sum.wrapping_add(raw))
                        .or_insert(raw);
                }
            }
        }

        Ok(counters)
    }
}

/// Refreshes the queue counters snapshot from every namespace.
pub struct QueueStatUpdater {
    namespaces: Arc<dyn NamespaceEnumerator>,
    layout: ArcSwapOption<QueueLayout>,
    snapshot: Arc<Snapshot<QueueStatSnapshot>>,
}

impl QueueStatUpdater {
    pub fn new(
        namespaces: Arc<dyn NamespaceEnumerator>,
        snapshot: Arc<Snapshot<QueueStatSnapshot>>,
    ) -> Self {
        QueueStatUpdater {
            namespaces,
            layout: ArcSwapOption::empty(),
            snapshot,
        }
    }

    pub fn snapshot(&self) -> &Arc<Snapshot<QueueStatSnapshot>> {
        &self.snapshot
    }
}

impl Refreshable for QueueStatUpdater {
    fn name(&self) -> &str {
        UPDATER_NAME
    }

    fn reinit_data(&self) -> Result<(), UpdateError> {
        let layout = QueueLayout::discover(self.namespaces.as_ref())?;
        log::info!(
            "{}: {} queues across {} namespaces",
            UPDATER_NAME,
            layout.queue_count(),
            layout.namespace_count()
        );
        self.layout.store(Some(Arc::new(layout)));
        Ok(())
    }

    fn update_data(&self) -> Result<(), UpdateError> {
        let layout = self
            .layout
            .load_full()
            .ok_or_else(|| UpdateError::NotInitialized(UPDATER_NAME.to_string()))?;
        let counters = layout.collect()?;
        let count = counters.len();
        let generation = self
            .snapshot
            .publish(QueueStatSnapshot::new(counters, Utc::now()));
        log::debug!(
            "{}: published generation {} with {} counters",
            UPDATER_NAME,
            generation,
            count
        );
        Ok(())
    }
}

/// The MIB entry serving `csqIfQosGroupStatsValue`.
pub struct QosGroupStatsTable {
    subtree: ObjectIdentifier,
    snapshot: Arc<Snapshot<QueueStatSnapshot>>,
}

impl QosGroupStatsTable {
    pub fn new(snapshot: Arc<Snapshot<QueueStatSnapshot>>) -> Self {
        QosGroupStatsTable {
            subtree: oids::csq_if_qos_group_stats_value(),
            snapshot,
        }
    }
}

impl MibEntry for QosGroupStatsTable {
    fn subtree(&self) -> &ObjectIdentifier {
        &self.subtree
    }

    fn view(&self) -> Arc<dyn EntryView> {
        self.snapshot.load()
    }
}

/// Builds the entry and its updater sharing one snapshot cell.
pub fn csq_if_qos_group_stats(
    namespaces: Arc<dyn NamespaceEnumerator>,
) -> (Arc<QosGroupStatsTable>, Arc<QueueStatUpdater>) {
    let snapshot = Arc::new(Snapshot::default());
    (
        Arc::new(QosGroupStatsTable::new(snapshot.clone())),
        Arc::new(QueueStatUpdater::new(namespaces, snapshot)),
    )
}

/// The sub-agent's MIB table over the given namespaces.
pub fn mib_table(namespaces: Arc<dyn NamespaceEnumerator>) -> Result<MibTable, MibError> {
    let (entry, updater) = csq_if_qos_group_stats(namespaces);
    MibTable::builder().entry(entry).updater(updater).build()
}
