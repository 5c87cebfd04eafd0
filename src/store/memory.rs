//! In-memory counter store, used for injection in tests and tooling.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use super::{CounterStore, NamespaceEnumerator, PortQueue, QueueStat, QueueType, StoreError};

#[derive(Default)]
struct MemoryState {
    queues: Vec<PortQueue>,
    counters: HashMap<(u32, u32, QueueStat), u128>,
    unavailable: bool,
}

/// A partition whose queues and counters are set programmatically.
pub struct MemoryStore {
    namespace: String,
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new(namespace: impl Into<String>) -> Self {
        MemoryStore {
            namespace: namespace.into(),
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Adds `unicast + multicast` queues to a port: the first `unicast`
    /// queue numbers are unicast, the rest multicast.
    pub fn with_port(self, if_index: u32, unicast: u32, multicast: u32) -> Self {
        for queue in 0..unicast + multicast {
            let queue_type = if queue < unicast {
                QueueType::Unicast
            } else {
                QueueType::Multicast
            };
            self.add_queue(PortQueue {
                if_index,
                queue,
                queue_type,
            });
        }
        self
    }

    pub fn add_queue(&self, queue: PortQueue) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.queues.push(queue);
    }

    pub fn set_counter(&self, if_index: u32, queue: u32, stat: QueueStat, value: u128) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.counters.insert((if_index, queue, stat), value);
    }

    pub fn remove_counter(&self, if_index: u32, queue: u32, stat: QueueStat) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.counters.remove(&(if_index, queue, stat));
    }

    /// While set, every read fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.unavailable = unavailable;
    }

    fn check(&self, state: &MemoryState) -> Result<(), StoreError> {
        if state.unavailable {
            Err(StoreError::Unavailable(self.namespace.clone()))
        } else {
            Ok(())
        }
    }
}

impl CounterStore for MemoryStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn port_queues(&self) -> Result<Vec<PortQueue>, StoreError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        self.check(&state)?;
        Ok(state.queues.clone())
    }

    fn queue_counter(
        &self,
        if_index: u32,
        queue: u32,
        stat: QueueStat,
    ) -> Result<Option<u128>, StoreError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        self.check(&state)?;
        Ok(state.counters.get(&(if_index, queue, stat)).copied())
    }
}

/// A fixed list of partitions.
#[derive(Clone, Default)]
pub struct StaticNamespaces {
    stores: Vec<Arc<dyn CounterStore>>,
}

impl StaticNamespaces {
    pub fn new(stores: Vec<Arc<dyn CounterStore>>) -> Self {
        StaticNamespaces { stores }
    }
}

impl NamespaceEnumerator for StaticNamespaces {
    fn namespaces(&self) -> Result<Vec<Arc<dyn CounterStore>>, StoreError> {
        Ok(self.stores.clone())
    }
}
