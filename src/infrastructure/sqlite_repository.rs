// SQLite repository implementation
use crate::application::reading_repository::{Eviction, ReadingRepository};
use crate::domain::error::StoreError;
use crate::domain::reading::{Reading, TimeRange};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{Connection, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = "SELECT timestamp_ms, voltage_mv, current_ma, power_w, percentage, \
     is_charging, temperature_tenths_c, cycle_count, design_capacity_mah, max_capacity_mah, \
     health_percent FROM readings";

/// Columns added after the first schema. Existing databases gain them on open.
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("cycle_count", "INTEGER"),
    ("design_capacity_mah", "INTEGER"),
    ("max_capacity_mah", "INTEGER"),
    ("health_percent", "REAL"),
];

/// How long readings live and how many are kept.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub max_readings: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::days(7),
            max_readings: 10_000,
        }
    }
}

/// Reading store backed by one SQLite table.
///
/// The connection sits behind a mutex: one writer or one batched read at a
/// time. All database work runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
    retention: RetentionPolicy,
}

impl SqliteRepository {
    /// Open or create the database file, creating its directory if needed.
    pub fn open<P: AsRef<Path>>(path: P, retention: RetentionPolicy) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        // WAL keeps readers from blocking the sampler's writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        initialize_schema(&conn).context("Failed to initialize reading schema")?;

        tracing::info!("Reading database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retention,
        })
    }

    /// A private database that disappears with the process.
    #[cfg(test)]
    pub fn open_in_memory(retention: RetentionPolicy) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retention,
        })
    }

    async fn with_conn<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::StorageUnavailable("connection lock poisoned".to_string()))?;
            work(&mut guard)
        })
        .await
        .map_err(|e| StoreError::StorageUnavailable(format!("storage task failed: {}", e)))?
    }
}

#[async_trait]
impl ReadingRepository for SqliteRepository {
    async fn append(&self, reading: &Reading) -> Result<(), StoreError> {
        let reading = reading.clone();
        let retention = self.retention;

        self.with_conn(move |conn| {
            insert_reading(conn, &reading)?;

            match evict_with(conn, retention, Utc::now()) {
                Ok(eviction) if eviction.total() > 0 => tracing::debug!(
                    "Evicted {} expired and {} excess readings",
                    eviction.expired,
                    eviction.over_capacity
                ),
                Ok(_) => {}
                Err(e) => tracing::warn!("Eviction after append failed: {}", e),
            }
            Ok(())
        })
        .await
    }

    async fn query_range(&self, range: TimeRange) -> Result<Vec<Reading>, StoreError> {
        let range = range.normalized();
        let start = range.start.timestamp_millis();
        let end = range.end.timestamp_millis();

        self.with_conn(move |conn| {
            let sql = format!(
                "{} WHERE timestamp_ms >= ?1 AND timestamp_ms <= ?2 ORDER BY timestamp_ms ASC, id ASC",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![start, end], reading_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn query_recent(&self, limit: usize) -> Result<Vec<Reading>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_conn(move |conn| {
            let sql = format!("{} ORDER BY timestamp_ms DESC, id DESC LIMIT ?1", SELECT_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![limit], reading_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn query_all(&self) -> Result<Vec<Reading>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!("{} ORDER BY timestamp_ms ASC, id ASC", SELECT_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], reading_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM readings", [])?;
            tracing::info!("Cleared {} readings", removed);
            Ok(())
        })
        .await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| Ok(count_readings(conn)?)).await
    }

    async fn evict(&self) -> Result<Eviction, StoreError> {
        let retention = self.retention;
        self.with_conn(move |conn| Ok(evict_with(conn, retention, Utc::now())?))
            .await
    }
}

fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp_ms INTEGER NOT NULL,
            voltage_mv REAL NOT NULL,
            current_ma REAL NOT NULL,
            power_w REAL NOT NULL,
            percentage INTEGER NOT NULL,
            is_charging INTEGER NOT NULL,
            temperature_tenths_c REAL
        );

        CREATE INDEX IF NOT EXISTS idx_readings_timestamp ON readings(timestamp_ms);
        CREATE INDEX IF NOT EXISTS idx_readings_percentage ON readings(percentage);
        "#,
    )?;

    for (column, sql_type) in ADDITIVE_COLUMNS {
        let statement = format!("ALTER TABLE readings ADD COLUMN {} {}", column, sql_type);
        match conn.execute(&statement, []) {
            Ok(_) => tracing::debug!("Added column readings.{}", column),
            Err(e) if e.to_string().contains("duplicate column name") => {}
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

fn insert_reading(conn: &Connection, reading: &Reading) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO readings (timestamp_ms, voltage_mv, current_ma, power_w, percentage, \
         is_charging, temperature_tenths_c, cycle_count, design_capacity_mah, max_capacity_mah, \
         health_percent) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            reading.timestamp.timestamp_millis(),
            reading.voltage_mv,
            reading.current_ma,
            reading.power_w,
            reading.percentage,
            reading.is_charging,
            reading.temperature_tenths_c,
            reading.cycle_count,
            reading.design_capacity_mah,
            reading.max_capacity_mah,
            reading.health_percent,
        ],
    )?;
    Ok(())
}

fn count_readings(conn: &Connection) -> rusqlite::Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
    Ok(count.max(0) as usize)
}

/// Age-based pass first, then the cap. Running it twice removes nothing new.
fn evict_with(conn: &mut Connection, retention: RetentionPolicy, now: DateTime<Utc>) -> rusqlite::Result<Eviction> {
    let cutoff = (now - retention.max_age).timestamp_millis();
    let tx = conn.transaction()?;

    let expired = tx.execute("DELETE FROM readings WHERE timestamp_ms < ?1", params![cutoff])?;

    let remaining = count_readings(&tx)?;
    let over_capacity = if remaining > retention.max_readings {
        let excess = (remaining - retention.max_readings) as i64;
        tx.execute(
            "DELETE FROM readings WHERE id IN \
             (SELECT id FROM readings ORDER BY timestamp_ms ASC, id ASC LIMIT ?1)",
            params![excess],
        )?
    } else {
        0
    };

    tx.commit()?;
    Ok(Eviction {
        expired,
        over_capacity,
    })
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<Reading> {
    let timestamp_ms: i64 = row.get(0)?;
    let timestamp = Utc
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(0, timestamp_ms))?;
    let percentage: i64 = row.get(4)?;

    Ok(Reading {
        timestamp,
        voltage_mv: row.get(1)?,
        current_ma: row.get(2)?,
        power_w: row.get(3)?,
        percentage: percentage.clamp(0, 100) as u8,
        is_charging: row.get(5)?,
        temperature_tenths_c: row.get(6)?,
        cycle_count: row.get(7)?,
        design_capacity_mah: row.get(8)?,
        max_capacity_mah: row.get(9)?,
        health_percent: row.get(10)?,
    })
}
