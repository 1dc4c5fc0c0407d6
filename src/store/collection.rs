use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, Transaction, TransactionBehavior};

use super::notify::{Notifier, Subscription};
use crate::db::{Table, open_connection};
use crate::error::StoreError;

/// Point-in-time view of a collection, keyed by title id.
pub type Snapshot<R> = Arc<BTreeMap<String, R>>;

/// A persisted collection with at most one record per key.
///
/// Writers are serialized by `writer`, which also owns the collection's
/// connection. Every write runs in an immediate transaction that checks
/// presence and capacity against the committed table, so other processes
/// sharing the file are accounted for. The in-memory snapshot is rebuilt
/// from the table before the commit and swapped in only once it succeeds:
/// readers see either the state before a write or after it. Notifications
/// are queued while the writer lock is held.
pub(crate) struct KeyedCollection<T: Table> {
    writer: Mutex<Connection>,
    records: RwLock<Snapshot<T::Record>>,
    capacity: Option<usize>,
    notifier: Notifier<Snapshot<T::Record>>,
}

impl<T: Table> KeyedCollection<T> {
    pub(crate) fn open(path: &Path, capacity: Option<usize>) -> Result<Self, StoreError> {
        let conn = open_connection(path)?;
        let records = index::<T>(T::load_all(&conn)?);
        tracing::debug!(collection = T::NAME, count = records.len(), "loaded collection");

        Ok(Self {
            writer: Mutex::new(conn),
            records: RwLock::new(Arc::new(records)),
            capacity,
            notifier: Notifier::spawn(T::NAME)?,
        })
    }

    pub(crate) fn snapshot(&self) -> Snapshot<T::Record> {
        Arc::clone(&self.records.read())
    }

    pub(crate) fn get(&self, key: &str) -> Option<T::Record> {
        self.records.read().get(key).cloned()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.records.read().contains_key(key)
    }

    /// Inserts `record` unless its key is already stored. Returns whether a
    /// record was added.
    pub(crate) fn insert_absent(&self, record: T::Record) -> Result<bool, StoreError> {
        self.write(|tx| self.insert_checked(tx, &record))
    }

    /// Removes `key` when stored, inserts `record` otherwise. Returns whether
    /// the key is present afterwards.
    pub(crate) fn toggle(&self, record: T::Record) -> Result<bool, StoreError> {
        self.write(|tx| {
            if T::delete(tx, T::key(&record))? > 0 {
                return Ok(false);
            }
            self.insert_checked(tx, &record)
        })
    }

    pub(crate) fn upsert(&self, record: T::Record) -> Result<(), StoreError> {
        self.write(|tx| Ok(T::write(tx, &record)?))
    }

    /// Deletes every listed key in one transaction with at most one
    /// notification. Returns how many stored records were removed.
    pub(crate) fn remove_many<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a str>,
    ) -> Result<usize, StoreError> {
        let keys: BTreeSet<&str> = keys.into_iter().collect();
        if keys.is_empty() {
            return Ok(0);
        }
        self.write(|tx| {
            let mut removed = 0;
            for key in &keys {
                removed += T::delete(tx, key)?;
            }
            Ok(removed)
        })
    }

    /// Picks up rows written through other connections to the same file.
    /// Returns whether the snapshot changed.
    pub(crate) fn reload(&self) -> Result<bool, StoreError> {
        let conn = self.writer.lock();
        let committed = T::load_all(&conn)?;
        Ok(self.replace_snapshot(index::<T>(committed)))
    }

    pub(crate) fn subscribe(
        &self,
        observer: impl Fn(&Snapshot<T::Record>) + Send + 'static,
    ) -> Subscription {
        // Holding the writer keeps the initial snapshot ordered with publishes.
        let _writer = self.writer.lock();
        self.notifier.register(self.snapshot(), observer)
    }

    /// Runs `op` in an immediate transaction and, once it commits, publishes
    /// the committed table if it differs from the current snapshot. Nothing
    /// changes in memory when `op` or the commit fails.
    fn write<R>(
        &self,
        op: impl FnOnce(&Transaction<'_>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = op(&tx)?;
        let committed = index::<T>(T::load_all(&tx)?);
        tx.commit()?;
        self.replace_snapshot(committed);
        Ok(outcome)
    }

    fn insert_checked(
        &self,
        tx: &Transaction<'_>,
        record: &T::Record,
    ) -> Result<bool, StoreError> {
        if T::contains(tx, T::key(record))? {
            return Ok(false);
        }
        if let Some(capacity) = self.capacity
            && T::count(tx)? >= capacity
        {
            return Err(StoreError::CapacityExceeded { capacity });
        }
        T::write(tx, record)?;
        Ok(true)
    }

    /// Swaps in `next` and notifies when it differs from the current snapshot.
    /// Must only run with the writer lock held.
    fn replace_snapshot(&self, next: BTreeMap<String, T::Record>) -> bool {
        if **self.records.read() == next {
            return false;
        }
        let next = Arc::new(next);
        *self.records.write() = Arc::clone(&next);
        tracing::trace!(collection = T::NAME, count = next.len(), "collection changed");
        self.notifier.publish(next);
        true
    }
}

fn index<T: Table>(records: Vec<T::Record>) -> BTreeMap<String, T::Record> {
    records
        .into_iter()
        .map(|record| (T::key(&record).to_string(), record))
        .collect()
}
