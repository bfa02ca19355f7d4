//! SQLite cache of known networks and where they were last seen.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::WifiResult;

/// Latitude/longitude value meaning "unknown".
pub const LOCATION_UNKNOWN: f64 = -1000.0;

/// One row of the `networks` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub interface: String,
    pub ssid: String,
    /// Derived credential copied from the profile; absent for open networks.
    pub passkey: Option<String>,
    pub lat: f64,
    pub lng: f64,
}

/// Outcome of a bulk delete. `total` is what was there when iteration
/// started, `deleted` what was actually removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeleteSummary {
    pub total: usize,
    pub deleted: usize,
    /// `interface:ssid` of every entry that could not be removed.
    pub failed: Vec<String>,
}

impl DeleteSummary {
    pub fn is_complete(&self) -> bool {
        self.deleted == self.total
    }
}

pub trait RecordStore: Send + Sync {
    /// Inserts the record or updates the one with the same key.
    ///
    /// A missing coordinate keeps the stored one, or is [`LOCATION_UNKNOWN`]
    /// for a new record.
    fn upsert(
        &self,
        interface: &str,
        ssid: &str,
        passkey: Option<&str>,
        lat: Option<f64>,
        lng: Option<f64>,
    ) -> WifiResult<()>;

    fn delete(&self, interface: &str, ssid: &str) -> WifiResult<()>;

    fn all(&self) -> WifiResult<Vec<Record>>;

    /// Last known coordinates of `ssid` on any interface, or the
    /// [`LOCATION_UNKNOWN`] pair.
    fn last_location(&self, ssid: &str) -> WifiResult<(f64, f64)>;

    /// Deletes every record, carrying on past individual failures.
    fn delete_all(&self) -> WifiResult<DeleteSummary> {
        let records = self.all()?;
        let mut summary = DeleteSummary {
            total: records.len(),
            ..Default::default()
        };

        for record in records {
            match self.delete(&record.interface, &record.ssid) {
                Ok(()) => summary.deleted += 1,
                Err(e) => {
                    warn!(interface = %record.interface, ssid = %record.ssid, error = %e, "record not deleted");
                    summary
                        .failed
                        .push(format!("{}:{}", record.interface, record.ssid));
                }
            }
        }

        Ok(summary)
    }
}

/// Record store on a single SQLite connection. Every mutation is its own
/// transaction.
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    pub fn open<P: AsRef<Path>>(path: P) -> WifiResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> WifiResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> WifiResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS networks (
                interface TEXT NOT NULL,
                ssid TEXT NOT NULL,
                passkey TEXT,
                lat REAL,
                lng REAL,
                seen INTEGER NOT NULL DEFAULT 0,
                UNIQUE(interface, ssid)
            )",
            [],
        )?;
        Ok(())
    }
}

impl RecordStore for SqliteRecordStore {
    fn upsert(
        &self,
        interface: &str,
        ssid: &str,
        passkey: Option<&str>,
        lat: Option<f64>,
        lng: Option<f64>,
    ) -> WifiResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        // `seen` orders location updates; a write without coordinates keeps it.
        tx.execute(
            "INSERT INTO networks (interface, ssid, passkey, lat, lng, seen)
             VALUES (?1, ?2, ?3, COALESCE(?4, ?6), COALESCE(?5, ?6),
                     (SELECT IFNULL(MAX(seen), 0) + 1 FROM networks))
             ON CONFLICT(interface, ssid) DO UPDATE SET
                 passkey = excluded.passkey,
                 lat = COALESCE(?4, lat),
                 lng = COALESCE(?5, lng),
                 seen = CASE WHEN ?4 IS NULL AND ?5 IS NULL THEN seen ELSE excluded.seen END",
            params![interface, ssid, passkey, lat, lng, LOCATION_UNKNOWN],
        )?;
        tx.commit()?;

        debug!(interface, ssid, ?lat, ?lng, "record written");
        Ok(())
    }

    fn delete(&self, interface: &str, ssid: &str) -> WifiResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM networks WHERE interface = ?1 AND ssid = ?2",
            params![interface, ssid],
        )?;
        tx.commit()?;

        debug!(interface, ssid, "record deleted");
        Ok(())
    }

    fn all(&self) -> WifiResult<Vec<Record>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT interface, ssid, passkey, lat, lng FROM networks ORDER BY rowid",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Record {
                interface: row.get(0)?,
                ssid: row.get(1)?,
                passkey: row.get(2)?,
                lat: row.get::<_, Option<f64>>(3)?.unwrap_or(LOCATION_UNKNOWN),
                lng: row.get::<_, Option<f64>>(4)?.unwrap_or(LOCATION_UNKNOWN),
            })
        })?;

        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }

    fn last_location(&self, ssid: &str) -> WifiResult<(f64, f64)> {
        let conn = self.conn.lock();
        let location = conn
            .query_row(
                "SELECT lat, lng FROM networks WHERE ssid = ?1 ORDER BY seen DESC, rowid DESC LIMIT 1",
                params![ssid],
                |row| {
                    Ok((
                        row.get::<_, Option<f64>>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                    ))
                },
            )
            .optional()?;

        Ok(match location {
            Some((lat, lng)) => (
                lat.unwrap_or(LOCATION_UNKNOWN),
                lng.unwrap_or(LOCATION_UNKNOWN),
            ),
            None => (LOCATION_UNKNOWN, LOCATION_UNKNOWN),
        })
    }
}
