//! File-backed counter stores: one JSON document per namespace.
//!
//! ```json
//! {
//!   "ports": [
//!     { "if_index": 1, "queues": [
//!         { "queue": 0, "type": "unicast",
//!           "counters": { "packets": "1", "bytes": "23492723984237432" } }
//!     ] }
//!   ]
//! }
//! ```
//!
//! Counters are decimal strings so values wider than 64 bits survive.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

use super::{CounterStore, NamespaceEnumerator, PortQueue, QueueStat, QueueType, StoreError};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CountersFile {
    #[serde(default)]
    pub ports: Vec<PortEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PortEntry {
    pub if_index: u32,
    #[serde(default)]
    pub queues: Vec<QueueEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue: u32,
    #[serde(rename = "type")]
    pub queue_type: QueueType,
    #[serde(default)]
    pub counters: BTreeMap<QueueStat, String>,
}

#[derive(Default)]
struct Loaded {
    queues: Vec<PortQueue>,
    counters: HashMap<(u32, u32, QueueStat), String>,
}

impl From<CountersFile> for Loaded {
    fn from(file: CountersFile) -> Self {
        let mut loaded = Loaded::default();
        for port in file.ports {
            for entry in port.queues {
                loaded.queues.push(PortQueue {
                    if_index: port.if_index,
                    queue: entry.queue,
                    queue_type: entry.queue_type,
                });
                for (stat, value) in entry.counters {
                    loaded
                        .counters
                        .insert((port.if_index, entry.queue, stat), value);
                }
            }
        }
        loaded
    }
}

/// A namespace whose counters live in one JSON file.
pub struct JsonCountersStore {
    namespace: String,
    path: PathBuf,
    data: RwLock<Loaded>,
}

impl JsonCountersStore {
    /// Loads `path` immediately.
    pub fn open(
        namespace: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let data = load(&path)?;
        Ok(JsonCountersStore {
            namespace: namespace.into(),
            path,
            data: RwLock::new(data),
        })
    }
}

fn load(path: &Path) -> Result<Loaded, StoreError> {
    let text = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: CountersFile = serde_json::from_str(&text).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(file.into())
}

impl CounterStore for JsonCountersStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn port_queues(&self) -> Result<Vec<PortQueue>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.queues.clone())
    }

    fn queue_counter(
        &self,
        if_index: u32,
        queue: u32,
        stat: QueueStat,
    ) -> Result<Option<u128>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let Some(raw) = data.counters.get(&(if_index, queue, stat)) else {
            return Ok(None);
        };
        raw.trim()
            .parse::<u128>()
            .map(Some)
            .map_err(|_| StoreError::InvalidCounter {
                if_index,
                queue,
                stat,
                value: raw.clone(),
            })
    }

    /// Re-reads the file. A failed reload leaves the previous contents.
    fn refresh(&self) -> Result<(), StoreError> {
        let fresh = load(&self.path)?;
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        Ok(())
    }
}

/// Every `*.json` file in a directory is a namespace named after its stem.
pub struct DirectoryNamespaces {
    dir: PathBuf,
}

impl DirectoryNamespaces {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectoryNamespaces { dir: dir.into() }
    }
}

impl NamespaceEnumerator for DirectoryNamespaces {
    fn namespaces(&self) -> Result<Vec<Arc<dyn CounterStore>>, StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();

        let mut stores: Vec<Arc<dyn CounterStore>> = Vec::with_capacity(files.len());
        for path in files {
            let namespace = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            log::debug!("Loading namespace {} from {}", namespace, path.display());
            stores.push(Arc::new(JsonCountersStore::open(namespace, path)?));
        }
        Ok(stores)
    }
}
