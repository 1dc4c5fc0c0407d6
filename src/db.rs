use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::error::{StorageFault, StoreError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Ordered schema steps. `PRAGMA user_version` stores how many have been
/// applied; a new shape gets a new step that carries existing rows over by id.
/// Table names match the collection names (`Table::NAME`).
const MIGRATIONS: &[&str] = &[r#"
    CREATE TABLE IF NOT EXISTS bookmarks (
        id TEXT PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS watchList (
        id TEXT PRIMARY KEY,
        play_head_in_sec REAL NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_watchList_updated_at ON watchList(updated_at DESC);
"#];

pub(crate) const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookmarkRecord {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchProgressRecord {
    pub id: String,
    pub play_head_in_sec: f64,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

pub(crate) fn schema_version(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

pub(crate) fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    let current = schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(StoreError::StorageUnavailable(StorageFault::SchemaTooNew {
            found: current,
            supported: SCHEMA_VERSION,
        }));
    }

    for (idx, step) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = idx as i64 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(step)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        tracing::info!(version, "applied schema migration");
    }
    Ok(())
}

/// One persisted collection keyed by title id.
pub(crate) trait Table: Send + Sync + 'static {
    type Record: Clone + PartialEq + Send + Sync + 'static;

    /// Collection name, which is also the SQL table name.
    const NAME: &'static str;

    fn key(record: &Self::Record) -> &str;
    fn load_all(conn: &Connection) -> rusqlite::Result<Vec<Self::Record>>;
    fn write(conn: &Connection, record: &Self::Record) -> rusqlite::Result<()>;

    fn delete(conn: &Connection, key: &str) -> rusqlite::Result<usize> {
        conn.execute(&format!("DELETE FROM {} WHERE id = ?1", Self::NAME), params![key])
    }

    fn contains(conn: &Connection, key: &str) -> rusqlite::Result<bool> {
        conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", Self::NAME),
            params![key],
            |row| row.get(0),
        )
    }

    fn count(conn: &Connection) -> rusqlite::Result<usize> {
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", Self::NAME), [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }
}

#[derive(Debug)]
pub(crate) struct Bookmarks;

impl Table for Bookmarks {
    type Record = BookmarkRecord;

    const NAME: &'static str = "bookmarks";

    fn key(record: &BookmarkRecord) -> &str {
        &record.id
    }

    fn load_all(conn: &Connection) -> rusqlite::Result<Vec<BookmarkRecord>> {
        let mut stmt = conn.prepare("SELECT id FROM bookmarks")?;
        let rows = stmt.query_map([], |row| Ok(BookmarkRecord { id: row.get(0)? }))?;
        rows.collect()
    }

    fn write(conn: &Connection, record: &BookmarkRecord) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO bookmarks (id) VALUES (?1)",
            params![record.id],
        )?;
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct WatchList;

impl Table for WatchList {
    type Record = WatchProgressRecord;

    const NAME: &'static str = "watchList";

    fn key(record: &WatchProgressRecord) -> &str {
        &record.id
    }

    fn load_all(conn: &Connection) -> rusqlite::Result<Vec<WatchProgressRecord>> {
        let mut stmt = conn.prepare(
            "SELECT id, play_head_in_sec, updated_at FROM watchList ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(WatchProgressRecord {
                id: row.get(0)?,
                play_head_in_sec: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    fn write(conn: &Connection, record: &WatchProgressRecord) -> rusqlite::Result<()> {
        conn.execute(
            r#"
            INSERT INTO watchList (id, play_head_in_sec, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                play_head_in_sec = excluded.play_head_in_sec,
                updated_at = excluded.updated_at
            "#,
            params![record.id, record.play_head_in_sec, record.updated_at],
        )?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn read_watch_progress(
    conn: &Connection,
    id: &str,
) -> rusqlite::Result<Option<WatchProgressRecord>> {
    use rusqlite::OptionalExtension;

    conn.query_row(
        "SELECT id, play_head_in_sec, updated_at FROM watchList WHERE id = ?1",
        params![id],
        |row| {
            Ok(WatchProgressRecord {
                id: row.get(0)?,
                play_head_in_sec: row.get(1)?,
                updated_at: row.get(2)?,
            })
        },
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_sets_schema_version_and_is_repeatable() {
        let mut conn = Connection::open_in_memory().expect("open");
        migrate(&mut conn).expect("first migrate");
        migrate(&mut conn).expect("second migrate");
        assert_eq!(schema_version(&conn).expect("version"), SCHEMA_VERSION);
    }

    #[test]
    fn migrate_refuses_newer_schema() {
        let mut conn = Connection::open_in_memory().expect("open");
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .expect("bump version");
        let err = migrate(&mut conn).expect_err("newer schema must be refused");
        assert!(matches!(
            err,
            StoreError::StorageUnavailable(StorageFault::SchemaTooNew { .. })
        ));
    }

    #[test]
    fn watch_list_write_upserts_by_id() {
        let mut conn = Connection::open_in_memory().expect("open");
        migrate(&mut conn).expect("migrate");
        let first = WatchProgressRecord {
            id: "v1".to_string(),
            play_head_in_sec: 120.0,
            updated_at: Utc::now(),
        };
        let second = WatchProgressRecord {
            play_head_in_sec: 340.0,
            ..first.clone()
        };
        WatchList::write(&conn, &first).expect("first write");
        WatchList::write(&conn, &second).expect("second write");

        let rows = WatchList::load_all(&conn).expect("load");
        assert_eq!(rows.len(), 1);
        let stored = read_watch_progress(&conn, "v1").expect("query").expect("row");
        assert_eq!(stored.play_head_in_sec, 340.0);
    }

    #[test]
    fn tables_are_named_after_their_collections() {
        let mut conn = Connection::open_in_memory().expect("open");
        migrate(&mut conn).expect("migrate");
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .expect("prepare");
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .expect("query")
            .collect::<rusqlite::Result<_>>()
            .expect("names");
        assert_eq!(names, vec![Bookmarks::NAME, WatchList::NAME]);
    }

    #[test]
    fn bookmark_write_ignores_duplicates() {
        let mut conn = Connection::open_in_memory().expect("open");
        migrate(&mut conn).expect("migrate");
        let record = BookmarkRecord { id: "t1".to_string() };
        Bookmarks::write(&conn, &record).expect("write");
        Bookmarks::write(&conn, &record).expect("write again");
        assert_eq!(Bookmarks::load_all(&conn).expect("load"), vec![record]);
        assert!(Bookmarks::contains(&conn, "t1").expect("contains"));
        assert_eq!(Bookmarks::count(&conn).expect("count"), 1);
        assert_eq!(Bookmarks::delete(&conn, "t1").expect("delete"), 1);
        assert_eq!(Bookmarks::delete(&conn, "t1").expect("delete again"), 0);
        assert!(!Bookmarks::contains(&conn, "t1").expect("contains"));
    }
}
