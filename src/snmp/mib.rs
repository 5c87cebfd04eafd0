//! MIB table: an ordered registry of subtree handlers resolving GET and
//! GET-NEXT against their currently published snapshots.

use std::{sync::Arc, time::Instant};

use super::{
    encodings::ObjectIdentifier,
    pdu::SearchRange,
    value::{VarBind, VarBindValue},
};
use crate::updater::{Refreshable, UpdateError};

/// Errors raised while building or refreshing a [`MibTable`].
#[derive(Debug, thiserror::Error)]
pub enum MibError {
    #[error("Subtree {0} overlaps subtree {1}")]
    OverlappingSubtrees(ObjectIdentifier, ObjectIdentifier),
    #[error("Refresh of {name} failed: {source}")]
    Refresh {
        name: String,
        #[source]
        source: UpdateError,
    },
}

/// A read-only view of one handler's data, addressed by the sub-identifiers
/// following the handler's subtree.
pub trait EntryView: Send + Sync {
    /// Value stored at exactly `suffix`, if any.
    fn get(&self, suffix: &[u32]) -> Option<VarBindValue>;

    /// First populated instance whose suffix sorts strictly after `suffix`.
    ///
    /// An empty `suffix` yields the first instance of the subtree.
    fn get_next(&self, suffix: &[u32]) -> Option<(Vec<u32>, VarBindValue)>;
}

/// A registered subtree and the source of its current view.
pub trait MibEntry: Send + Sync {
    fn subtree(&self) -> &ObjectIdentifier;

    /// The currently published data. Cheap: callers load it once per PDU.
    fn view(&self) -> Arc<dyn EntryView>;
}

/// Collects entries and their updaters before freezing them into a [`MibTable`].
#[derive(Default)]
pub struct MibTableBuilder {
    entries: Vec<Arc<dyn MibEntry>>,
    updaters: Vec<Arc<dyn Refreshable>>,
}

impl MibTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, entry: Arc<dyn MibEntry>) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn updater(mut self, updater: Arc<dyn Refreshable>) -> Self {
        self.updaters.push(updater);
        self
    }

    /// Sorts the entries by subtree and rejects any that nest or repeat.
    pub fn build(mut self) -> Result<MibTable, MibError> {
        self.entries.sort_by(|a, b| a.subtree().cmp(b.subtree()));

        for pair in self.entries.windows(2) {
            let (a, b) = (pair[0].subtree(), pair[1].subtree());
            if a.is_prefix_of(b) {
                return Err(MibError::OverlappingSubtrees(a.clone(), b.clone()));
            }
        }

        Ok(MibTable {
            entries: self.entries,
            updaters: self.updaters,
            started: Instant::now(),
        })
    }
}

/// The registry of MIB entries, immutable after [`MibTableBuilder::build`].
pub struct MibTable {
    entries: Vec<Arc<dyn MibEntry>>,
    updaters: Vec<Arc<dyn Refreshable>>,
    started: Instant,
}

impl MibTable {
    pub fn builder() -> MibTableBuilder {
        MibTableBuilder::new()
    }

    /// Loads one consistent snapshot of every entry.
    pub fn view(&self) -> MibView {
        MibView {
            subtrees: self
                .entries
                .iter()
                .map(|e| (e.subtree().clone(), e.view()))
                .collect(),
        }
    }

    /// Exact GET against a fresh view.
    pub fn lookup(&self, oid: &ObjectIdentifier) -> VarBind {
        self.view().lookup(oid)
    }

    /// Unbounded GET-NEXT against a fresh view.
    pub fn next(&self, oid: &ObjectIdentifier) -> VarBind {
        self.view().next(oid)
    }

    pub fn subtrees(&self) -> impl Iterator<Item = &ObjectIdentifier> {
        self.entries.iter().map(|e| e.subtree())
    }

    pub fn updaters(&self) -> &[Arc<dyn Refreshable>] {
        &self.updaters
    }

    /// Rebuilds every updater's layout and data synchronously.
    pub fn reinitialize(&self) -> Result<(), MibError> {
        for updater in &self.updaters {
            let wrap = |source| MibError::Refresh {
                name: updater.name().to_string(),
                source,
            };
            updater.reinit_data().map_err(wrap)?;
            updater.update_data().map_err(wrap)?;
        }
        Ok(())
    }

    /// Time since the table was built, in hundredths of a second.
    pub fn sys_up_time(&self) -> u32 {
        (self.started.elapsed().as_millis() / 10) as u32
    }
}

/// One generation of every entry's data, sorted by subtree.
pub struct MibView {
    subtrees: Vec<(ObjectIdentifier, Arc<dyn EntryView>)>,
}

impl MibView {
    /// Index of the first subtree sorting after `oid`.
    ///
    /// Subtrees never nest, so the only subtree that can contain `oid` is
    /// the one just before this index.
    fn upper(&self, oid: &ObjectIdentifier) -> usize {
        self.subtrees.partition_point(|(subtree, _)| subtree <= oid)
    }

    fn containing<'a>(&self, oid: &'a ObjectIdentifier) -> Option<(usize, &'a [u32])> {
        let idx = self.upper(oid).checked_sub(1)?;
        let (subtree, _) = &self.subtrees[idx];
        oid.suffix_after(subtree).map(|suffix| (idx, suffix))
    }

    /// GET: the value at exactly `oid`.
    ///
    /// NoSuchObject when no subtree contains `oid`, NoSuchInstance when the
    /// containing subtree has nothing at that index.
    pub fn lookup(&self, oid: &ObjectIdentifier) -> VarBind {
        let name = oid.clone().with_include(false);
        let value = match self.containing(oid) {
            None => VarBindValue::NoSuchObject,
            Some((idx, suffix)) => self.subtrees[idx]
                .1
                .get(suffix)
                .unwrap_or(VarBindValue::NoSuchInstance),
        };
        VarBind::new(name, value)
    }

    fn successor(&self, oid: &ObjectIdentifier) -> Option<VarBind> {
        let mut idx = self.upper(oid);

        if let Some((inner, suffix)) = self.containing(oid) {
            let (subtree, view) = &self.subtrees[inner];
            if let Some((next, value)) = view.get_next(suffix) {
                return Some(VarBind::new(subtree.child(&next), value));
            }
            idx = inner + 1;
        }

        // Every instance of a later subtree sorts after `oid`.
        self.subtrees[idx..].iter().find_map(|(subtree, view)| {
            view.get_next(&[])
                .map(|(next, value)| VarBind::new(subtree.child(&next), value))
        })
    }

    /// GET-NEXT: the first populated instance strictly after `oid`.
    ///
    /// Past the last instance the result is EndOfMibView bound to `oid`.
    pub fn next(&self, oid: &ObjectIdentifier) -> VarBind {
        self.successor(oid).unwrap_or_else(|| {
            VarBind::new(oid.clone().with_include(false), VarBindValue::EndOfMibView)
        })
    }

    /// GET-NEXT honouring the range's include flag and exclusive end.
    pub fn next_in_range(&self, range: &SearchRange) -> VarBind {
        let below_end = |vb: &VarBind| range.end.is_empty() || vb.oid < range.end;

        if range.start.include() {
            let exact = self.lookup(&range.start);
            if !exact.value.is_exception() && below_end(&exact) {
                return exact;
            }
        }

        match self.successor(&range.start) {
            Some(vb) if below_end(&vb) => vb,
            _ => VarBind::new(
                range.start.clone().with_include(false),
                VarBindValue::EndOfMibView,
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;
    use std::ops::Bound;

    use super::*;

    /// Fixed instances below one subtree.
    pub(crate) struct StaticEntry {
        subtree: ObjectIdentifier,
        values: Arc<BTreeMap<Vec<u32>, VarBindValue>>,
    }

    struct StaticView(Arc<BTreeMap<Vec<u32>, VarBindValue>>);

    impl StaticEntry {
        pub(crate) fn new(subtree: &[u32], values: &[(&[u32], VarBindValue)]) -> Self {
            StaticEntry {
                subtree: ObjectIdentifier::from_slice(subtree),
                values: Arc::new(
                    values
                        .iter()
                        .map(|(k, v)| (k.to_vec(), v.clone()))
                        .collect(),
                ),
            }
        }
    }

    impl EntryView for StaticView {
        fn get(&self, suffix: &[u32]) -> Option<VarBindValue> {
            self.0.get(suffix).cloned()
        }

        fn get_next(&self, suffix: &[u32]) -> Option<(Vec<u32>, VarBindValue)> {
            self.0
                .range::<[u32], _>((Bound::Excluded(suffix), Bound::Unbounded))
                .next()
                .map(|(k, v)| (k.clone(), v.clone()))
        }
    }

    impl MibEntry for StaticEntry {
        fn subtree(&self) -> &ObjectIdentifier {
            &self.subtree
        }

        fn view(&self) -> Arc<dyn EntryView> {
            Arc::new(StaticView(self.values.clone()))
        }
    }

    /// Two small subtrees: `.1.3.6.1.4.1.99998` and `.1.3.6.1.4.1.99999`.
    pub(crate) fn static_table() -> MibTable {
        MibTable::builder()
            .entry(Arc::new(StaticEntry::new(
                &[1, 3, 6, 1, 4, 1, 99999],
                &[
                    (&[1, 1], VarBindValue::Counter32(1)),
                    (&[1, 2], VarBindValue::Counter32(2)),
                    (&[1, 3], VarBindValue::Counter32(3)),
                ],
            )))
            .entry(Arc::new(StaticEntry::new(
                &[1, 3, 6, 1, 4, 1, 99998],
                &[(&[5], VarBindValue::Integer(5))],
            )))
            .build()
            .unwrap()
    }
}
