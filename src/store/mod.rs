//! Local watch state: bookmarked titles and per-title resume positions.

mod collection;
mod notify;

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::db::{
    BookmarkRecord, Bookmarks, WatchList, WatchProgressRecord, migrate, open_connection,
};
use crate::error::StoreError;

use self::collection::KeyedCollection;
pub use self::collection::Snapshot;
pub use self::notify::Subscription;

/// Most bookmarks the store holds at once.
pub const BOOKMARK_CAPACITY: usize = 100;

/// Persisted store owning the `bookmarks` and `watchList` collections.
///
/// Each collection has its own writer lock and connection, so the two can be
/// mutated concurrently while writes to the same collection are linearized.
/// Safe to share across threads behind an `Arc`. Several stores, in one
/// process or many, may open the same file: capacity and presence are checked
/// against the committed tables, and `reload` picks up writes made elsewhere.
pub struct LocalStateStore {
    bookmarks: KeyedCollection<Bookmarks>,
    watch_list: KeyedCollection<WatchList>,
}

impl LocalStateStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        {
            let mut conn = open_connection(path)?;
            migrate(&mut conn)?;
        }

        let store = Self {
            bookmarks: KeyedCollection::open(path, Some(BOOKMARK_CAPACITY))?,
            watch_list: KeyedCollection::open(path, None)?,
        };
        tracing::debug!(path = %path.display(), "opened local state store");
        Ok(store)
    }

    /// Bookmarks `id`. Already bookmarked ids succeed without a notification.
    pub fn add_bookmark(&self, id: &str) -> Result<(), StoreError> {
        validate_id(id)?;
        let added = self.bookmarks.insert_absent(BookmarkRecord { id: id.to_string() })?;
        if added {
            tracing::info!(id, "bookmark added");
        }
        Ok(())
    }

    /// Returns whether a bookmark was removed.
    pub fn remove_bookmark(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.bookmarks.remove_many([id])? > 0;
        if removed {
            tracing::info!(id, "bookmark removed");
        }
        Ok(removed)
    }

    /// Removes every listed bookmark that exists, with a single notification.
    /// Returns how many were removed.
    pub fn bulk_remove_bookmarks<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<usize, StoreError> {
        let removed = self.bookmarks.remove_many(ids)?;
        if removed > 0 {
            tracing::info!(removed, "bookmarks removed in bulk");
        }
        Ok(removed)
    }

    /// Flips the bookmark state of `id`. Returns whether it is bookmarked now.
    pub fn toggle_bookmark(&self, id: &str) -> Result<bool, StoreError> {
        validate_id(id)?;
        let bookmarked = self.bookmarks.toggle(BookmarkRecord { id: id.to_string() })?;
        tracing::info!(id, bookmarked, "bookmark toggled");
        Ok(bookmarked)
    }

    pub fn is_bookmarked(&self, id: &str) -> bool {
        self.bookmarks.contains(id)
    }

    /// Current bookmarks. Callers must not rely on the order.
    pub fn list_bookmarks(&self) -> Vec<BookmarkRecord> {
        self.bookmarks.snapshot().values().cloned().collect()
    }

    pub fn upsert_watch_progress(
        &self,
        id: &str,
        play_head_in_sec: f64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        validate_id(id)?;
        if !play_head_in_sec.is_finite() || play_head_in_sec < 0.0 {
            return Err(StoreError::InvalidArgument(format!(
                "play head must be a non-negative number of seconds, got {play_head_in_sec}"
            )));
        }

        self.watch_list.upsert(WatchProgressRecord {
            id: id.to_string(),
            play_head_in_sec,
            updated_at,
        })?;
        tracing::debug!(id, play_head_in_sec, "watch progress saved");
        Ok(())
    }

    pub fn get_watch_progress(&self, id: &str) -> Option<WatchProgressRecord> {
        self.watch_list.get(id)
    }

    /// All progress records, most recently updated first.
    pub fn list_watch_progress(&self) -> Vec<WatchProgressRecord> {
        let mut records: Vec<WatchProgressRecord> =
            self.watch_list.snapshot().values().cloned().collect();
        records.sort_by(|left, right| {
            right
                .updated_at
                .cmp(&left.updated_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        records
    }

    /// Re-reads both collections from the database and notifies observers of
    /// whichever changed. Returns whether anything changed.
    pub fn reload(&self) -> Result<bool, StoreError> {
        let bookmarks = self.bookmarks.reload()?;
        let progress = self.watch_list.reload()?;
        if bookmarks || progress {
            tracing::debug!(bookmarks, progress, "picked up external changes");
        }
        Ok(bookmarks || progress)
    }

    /// `observer` runs with the current bookmarks right away and again after
    /// every change, on the store's dispatcher thread.
    pub fn subscribe_bookmarks(
        &self,
        observer: impl Fn(&Snapshot<BookmarkRecord>) + Send + 'static,
    ) -> Subscription {
        self.bookmarks.subscribe(observer)
    }

    pub fn subscribe_watch_progress(
        &self,
        observer: impl Fn(&Snapshot<WatchProgressRecord>) + Send + 'static,
    ) -> Subscription {
        self.watch_list.subscribe(observer)
    }
}

fn validate_id(id: &str) -> Result<(), StoreError> {
    if id.trim().is_empty() {
        return Err(StoreError::InvalidArgument(
            "title id must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, mpsc};
    use std::thread;
    use std::time::Duration;

    use chrono::TimeZone;
    use rusqlite::Connection;
    use tempfile::TempDir;

    use super::*;
    use crate::error::StorageFault;

    const WAIT: Duration = Duration::from_secs(5);

    fn open_store() -> (TempDir, std::path::PathBuf, LocalStateStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state").join("reeltrack.db");
        let store = LocalStateStore::open(&path).expect("open store");
        (dir, path, store)
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    fn fill_bookmarks(store: &LocalStateStore, count: usize) {
        for n in 0..count {
            store.add_bookmark(&format!("title-{n}")).expect("add");
        }
    }

    #[test]
    fn add_bookmark_beyond_capacity_is_rejected() {
        let (_dir, _path, store) = open_store();
        fill_bookmarks(&store, BOOKMARK_CAPACITY);

        let err = store.add_bookmark("one-too-many").expect_err("capacity");
        assert!(matches!(err, StoreError::CapacityExceeded { capacity: 100 }));
        assert_eq!(store.list_bookmarks().len(), BOOKMARK_CAPACITY);
        assert!(!store.is_bookmarked("one-too-many"));
    }

    #[test]
    fn re_adding_existing_bookmark_at_capacity_succeeds() {
        let (_dir, _path, store) = open_store();
        fill_bookmarks(&store, BOOKMARK_CAPACITY);
        store.add_bookmark("title-7").expect("already present is a no-op");
        assert_eq!(store.list_bookmarks().len(), BOOKMARK_CAPACITY);
    }

    #[test]
    fn concurrent_adds_never_exceed_capacity() {
        let (_dir, _path, store) = open_store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut rejected = 0;
                    for n in 0..20 {
                        match store.add_bookmark(&format!("w{worker}-{n}")) {
                            Ok(()) => {}
                            Err(StoreError::CapacityExceeded { .. }) => rejected += 1,
                            Err(err) => panic!("unexpected error: {err}"),
                        }
                    }
                    rejected
                })
            })
            .collect();
        let rejected: usize = handles
            .into_iter()
            .map(|handle| handle.join().expect("worker"))
            .sum();

        assert_eq!(store.list_bookmarks().len(), BOOKMARK_CAPACITY);
        assert_eq!(rejected, 8 * 20 - BOOKMARK_CAPACITY);
    }

    #[test]
    fn duplicate_add_does_not_notify() {
        let (_dir, _path, store) = open_store();
        let (tx, rx) = mpsc::channel();
        let _sub = store.subscribe_bookmarks(move |snapshot| {
            let _ = tx.send(snapshot.len());
        });
        assert_eq!(rx.recv_timeout(WAIT).expect("initial"), 0);

        store.add_bookmark("t1").expect("add");
        store.add_bookmark("t1").expect("add again");
        store.add_bookmark("t2").expect("add other");

        assert_eq!(rx.recv_timeout(WAIT).expect("first add"), 1);
        assert_eq!(rx.recv_timeout(WAIT).expect("second distinct add"), 2);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn removing_absent_bookmark_is_silent_no_op() {
        let (_dir, _path, store) = open_store();
        store.add_bookmark("t1").expect("add");
        let (tx, rx) = mpsc::channel();
        let _sub = store.subscribe_bookmarks(move |snapshot| {
            let _ = tx.send(snapshot.len());
        });
        assert_eq!(rx.recv_timeout(WAIT).expect("initial"), 1);

        assert!(!store.remove_bookmark("missing").expect("no-op"));
        assert!(store.remove_bookmark("t1").expect("remove"));
        assert_eq!(rx.recv_timeout(WAIT).expect("after remove"), 0);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn bulk_remove_notifies_once() {
        let (_dir, _path, store) = open_store();
        fill_bookmarks(&store, 6);
        let (tx, rx) = mpsc::channel();
        let _sub = store.subscribe_bookmarks(move |snapshot| {
            let mut ids: Vec<String> = snapshot.keys().cloned().collect();
            ids.sort();
            let _ = tx.send(ids);
        });
        assert_eq!(rx.recv_timeout(WAIT).expect("initial").len(), 6);

        let selection: HashSet<&str> = ["title-1", "title-3", "title-5", "not-there"].into();
        let removed = store
            .bulk_remove_bookmarks(selection.iter().copied())
            .expect("bulk remove");
        assert_eq!(removed, 3);

        let after = rx.recv_timeout(WAIT).expect("single notification");
        assert_eq!(after, vec!["title-0", "title-2", "title-4"]);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn toggle_flips_state() {
        let (_dir, _path, store) = open_store();
        assert!(store.toggle_bookmark("t1").expect("on"));
        assert!(store.is_bookmarked("t1"));
        assert!(!store.toggle_bookmark("t1").expect("off"));
        assert!(!store.is_bookmarked("t1"));
    }

    #[test]
    fn toggle_on_at_capacity_is_rejected() {
        let (_dir, _path, store) = open_store();
        fill_bookmarks(&store, BOOKMARK_CAPACITY);
        let err = store.toggle_bookmark("extra").expect_err("full");
        assert!(matches!(err, StoreError::CapacityExceeded { .. }));
        assert!(!store.toggle_bookmark("title-0").expect("toggling off still works"));
    }

    #[test]
    fn upsert_keeps_single_record_per_title() {
        let (_dir, _path, store) = open_store();
        store.upsert_watch_progress("v1", 120.0, ts(1_000)).expect("first");
        store.upsert_watch_progress("v1", 340.0, ts(2_000)).expect("second");

        let records = store.list_watch_progress();
        assert_eq!(records.len(), 1);
        let record = store.get_watch_progress("v1").expect("record");
        assert_eq!(record.play_head_in_sec, 340.0);
        assert_eq!(record.updated_at, ts(2_000));
    }

    #[test]
    fn upsert_rejects_negative_play_head() {
        let (_dir, _path, store) = open_store();
        let err = store.upsert_watch_progress("v1", -1.0, ts(0)).expect_err("negative");
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        let err = store
            .upsert_watch_progress("v1", f64::INFINITY, ts(0))
            .expect_err("infinite");
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert!(store.get_watch_progress("v1").is_none());
    }

    #[test]
    fn empty_id_is_invalid() {
        let (_dir, _path, store) = open_store();
        assert!(matches!(
            store.add_bookmark("  "),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.upsert_watch_progress("", 1.0, ts(0)),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn progress_list_is_most_recent_first() {
        let (_dir, _path, store) = open_store();
        store.upsert_watch_progress("old", 10.0, ts(100)).expect("old");
        store.upsert_watch_progress("new", 20.0, ts(300)).expect("new");
        store.upsert_watch_progress("mid", 30.0, ts(200)).expect("mid");
        let ids: Vec<String> = store.list_watch_progress().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn progress_notifications_follow_mutation_order() {
        let (_dir, _path, store) = open_store();
        let (tx, rx) = mpsc::channel();
        let _sub = store.subscribe_watch_progress(move |snapshot| {
            let _ = tx.send(snapshot.get("v1").map(|r| r.play_head_in_sec));
        });
        assert_eq!(rx.recv_timeout(WAIT).expect("initial"), None);

        for secs in 1..=30 {
            store
                .upsert_watch_progress("v1", secs as f64, ts(secs))
                .expect("upsert");
        }
        let seen: Vec<f64> = (1..=30)
            .map(|_| rx.recv_timeout(WAIT).expect("update").expect("record"))
            .collect();
        assert_eq!(seen, (1..=30).map(|s| s as f64).collect::<Vec<_>>());
    }

    #[test]
    fn collections_notify_independently() {
        let (_dir, _path, store) = open_store();
        let (tx, rx) = mpsc::channel();
        let _sub = store.subscribe_bookmarks(move |snapshot| {
            let _ = tx.send(snapshot.len());
        });
        assert_eq!(rx.recv_timeout(WAIT).expect("initial"), 0);

        store.upsert_watch_progress("v1", 5.0, ts(5)).expect("upsert");
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn unsubscribe_twice_is_safe_and_stops_updates() {
        let (_dir, _path, store) = open_store();
        let (tx, rx) = mpsc::channel();
        let sub = store.subscribe_bookmarks(move |snapshot| {
            let _ = tx.send(snapshot.len());
        });
        assert_eq!(rx.recv_timeout(WAIT).expect("initial"), 0);

        sub.unsubscribe();
        sub.unsubscribe();
        store.add_bookmark("t1").expect("add");
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn state_survives_reopen() {
        let (_dir, path, store) = open_store();
        store.add_bookmark("t1").expect("add");
        store.upsert_watch_progress("t1", 42.5, ts(42)).expect("upsert");
        drop(store);

        let reopened = LocalStateStore::open(&path).expect("reopen");
        assert!(reopened.is_bookmarked("t1"));
        let record = reopened.get_watch_progress("t1").expect("record");
        assert_eq!(record.play_head_in_sec, 42.5);
        assert_eq!(record.updated_at, ts(42));
    }

    #[test]
    fn failed_write_leaves_state_untouched() {
        let (_dir, path, store) = open_store();
        store.add_bookmark("kept").expect("add");
        let (tx, rx) = mpsc::channel();
        let _sub = store.subscribe_bookmarks(move |snapshot| {
            let _ = tx.send(snapshot.len());
        });
        assert_eq!(rx.recv_timeout(WAIT).expect("initial"), 1);

        let saboteur = Connection::open(&path).expect("second connection");
        saboteur
            .execute_batch("DROP TABLE bookmarks;")
            .expect("drop table");

        let err = store.add_bookmark("lost").expect_err("write must fail");
        assert!(matches!(
            err,
            StoreError::StorageUnavailable(StorageFault::Sqlite(_))
        ));
        assert!(!store.is_bookmarked("lost"));
        assert_eq!(store.list_bookmarks(), vec![BookmarkRecord { id: "kept".to_string() }]);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn capacity_holds_across_stores_sharing_a_file() {
        let (_dir, path, first) = open_store();
        let second = LocalStateStore::open(&path).expect("second store");
        fill_bookmarks(&first, BOOKMARK_CAPACITY);

        let err = second.add_bookmark("extra").expect_err("limit spans both stores");
        assert!(matches!(err, StoreError::CapacityExceeded { capacity: 100 }));
        let err = second.toggle_bookmark("extra").expect_err("toggle too");
        assert!(matches!(err, StoreError::CapacityExceeded { .. }));
        drop((first, second));

        let reopened = LocalStateStore::open(&path).expect("reopen");
        assert_eq!(reopened.list_bookmarks().len(), BOOKMARK_CAPACITY);
    }

    #[test]
    fn writes_from_another_store_are_seen_by_the_next_write() {
        let (_dir, path, first) = open_store();
        let second = LocalStateStore::open(&path).expect("second store");
        first.add_bookmark("shared").expect("add");
        assert!(!second.is_bookmarked("shared"));

        let (tx, rx) = mpsc::channel();
        let _sub = second.subscribe_bookmarks(move |snapshot| {
            let _ = tx.send(snapshot.len());
        });
        assert_eq!(rx.recv_timeout(WAIT).expect("initial"), 0);

        second.add_bookmark("shared").expect("already stored is a no-op");
        assert!(second.is_bookmarked("shared"));
        assert_eq!(rx.recv_timeout(WAIT).expect("refreshed"), 1);

        first.add_bookmark("gone-soon").expect("add");
        assert!(second.remove_bookmark("gone-soon").expect("remove"));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(!LocalStateStore::open(&path).expect("reopen").is_bookmarked("gone-soon"));
    }

    #[test]
    fn reload_picks_up_external_progress() {
        let (_dir, path, first) = open_store();
        let second = LocalStateStore::open(&path).expect("second store");
        assert!(!second.reload().expect("nothing new"));

        first.upsert_watch_progress("v1", 75.0, ts(75)).expect("upsert");
        assert!(second.get_watch_progress("v1").is_none());
        assert!(second.reload().expect("reload"));
        assert_eq!(
            second.get_watch_progress("v1").map(|r| r.play_head_in_sec),
            Some(75.0)
        );
        assert!(!second.reload().expect("already current"));
    }

    #[test]
    fn failing_observer_does_not_stop_other_observers() {
        let (_dir, _path, store) = open_store();
        let (tx, rx) = mpsc::channel();
        let _good = store.subscribe_bookmarks(move |snapshot| {
            let _ = tx.send(snapshot.len());
        });
        let faulty = store.subscribe_bookmarks(|snapshot| {
            if !snapshot.is_empty() {
                panic!("observer failure");
            }
        });
        assert_eq!(rx.recv_timeout(WAIT).expect("initial"), 0);

        store.add_bookmark("a").expect("add a");
        store.add_bookmark("b").expect("add b");
        assert_eq!(rx.recv_timeout(WAIT).expect("after a"), 1);
        assert_eq!(rx.recv_timeout(WAIT).expect("after b"), 2);
        assert!(!faulty.is_active());
    }

    #[test]
    fn open_refuses_newer_schema() {
        let (_dir, path, store) = open_store();
        drop(store);
        let conn = Connection::open(&path).expect("raw connection");
        conn.pragma_update(None, "user_version", crate::db::SCHEMA_VERSION + 1)
            .expect("bump version");
        drop(conn);

        let err = LocalStateStore::open(&path).err().expect("newer schema refused");
        assert!(matches!(
            err,
            StoreError::StorageUnavailable(StorageFault::SchemaTooNew { .. })
        ));
    }
}
