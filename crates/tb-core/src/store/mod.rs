//! SQLite persistence
//!
//! One store owns the connection; reads lock it briefly, mutations run
//! through [`BookingStore::with_tx`] so every mutating operation (and
//! its audit entry and idempotency record) commits atomically. Row-level
//! operations are free functions over a `Connection` so they compose
//! inside a caller-supplied transaction.

mod availability;
mod bookings;
mod records;

use std::sync::Mutex;

use chrono::{DateTime, NaiveTime, Utc};
use rusqlite::{Connection, Transaction};

use crate::error::Result;

pub use availability::{
    blocked_times_in_range, delete_block, get_settings, insert_block, list_rules, replace_rules,
    upsert_settings,
};
pub use bookings::{
    active_bookings_in_range, get_booking, insert_booking, update_booking, weekly_active_count,
};
pub use records::{
    insert_audit, insert_idempotency, list_audit_for_target, lookup_idempotency, purge_expired,
};

/// SQLite-backed store for the booking engine
pub struct BookingStore {
    conn: Mutex<Connection>,
}

impl BookingStore {
    /// Open (or create) a store at the given database path
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_tables()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_tables()?;
        Ok(store)
    }

    /// Initialize database tables
    fn init_tables(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS availability_rules (
                id TEXT PRIMARY KEY,
                provider_id TEXT NOT NULL,
                day_of_week INTEGER NOT NULL,
                start_local TEXT NOT NULL,
                end_local TEXT NOT NULL,
                is_available INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rules_provider
                ON availability_rules(provider_id, day_of_week);

            CREATE TABLE IF NOT EXISTS bookings (
                id TEXT PRIMARY KEY,
                provider_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                service_id TEXT,
                scheduled_at TEXT NOT NULL,
                duration_minutes INTEGER NOT NULL,
                status TEXT NOT NULL,
                payment_status TEXT NOT NULL,
                reschedule_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_bookings_provider_time
                ON bookings(provider_id, scheduled_at);

            CREATE TABLE IF NOT EXISTS blocked_times (
                id TEXT PRIMARY KEY,
                provider_id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                reason TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_blocked_provider
                ON blocked_times(provider_id, start_time);

            CREATE TABLE IF NOT EXISTS provider_settings (
                provider_id TEXT PRIMARY KEY,
                timezone TEXT NOT NULL,
                buffer_minutes INTEGER NOT NULL,
                min_notice_minutes INTEGER NOT NULL,
                max_advance_days INTEGER NOT NULL,
                max_reschedules INTEGER NOT NULL,
                max_bookings_per_week INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS processed_requests (
                idempotency_key TEXT PRIMARY KEY,
                request_hash TEXT NOT NULL,
                response_body TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                actor_id TEXT NOT NULL,
                action TEXT NOT NULL,
                target_id TEXT,
                before TEXT,
                after TEXT,
                outcome TEXT NOT NULL,
                trace_id TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_target
                ON audit_log(target_id, created_at);",
        )?;

        Ok(())
    }

    /// Run read-only work against the connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Run mutating work inside a transaction. The closure's error rolls
    /// the whole transaction back; success commits it.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// All timestamps are stored as RFC3339 TEXT with a fixed UTC offset so
/// lexicographic comparison in SQL matches chronological order.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidQuery)
}

pub(crate) fn fmt_time(t: NaiveTime) -> String {
    t.format("%H:%M:%S").to_string()
}

pub(crate) fn parse_time(s: &str) -> rusqlite::Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S").map_err(|_| rusqlite::Error::InvalidQuery)
}
