//! Idempotency-record and audit-log table access

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, params};

use super::{fmt_ts, parse_ts};
use crate::audit::{AuditAction, AuditEntry, AuditOutcome};
use crate::error::Result;
use crate::idempotency::IdempotencyRecord;

/// Look up a live idempotency record. Expired records are treated as
/// absent so a retried key after the TTL runs as a new request.
pub fn lookup_idempotency(
    conn: &Connection,
    key: &str,
    now: DateTime<Utc>,
    ttl_hours: u32,
) -> Result<Option<IdempotencyRecord>> {
    let mut stmt = conn.prepare(
        "SELECT idempotency_key, request_hash, response_body, created_at
         FROM processed_requests WHERE idempotency_key = ?1",
    )?;
    let result = stmt.query_row(params![key], |row| {
        let created_at: String = row.get(3)?;
        Ok(IdempotencyRecord {
            key: row.get(0)?,
            request_hash: row.get(1)?,
            response_body: row.get(2)?,
            created_at: parse_ts(&created_at)?,
        })
    });

    match result {
        Ok(record) => {
            if record.created_at + Duration::hours(i64::from(ttl_hours)) <= now {
                conn.execute(
                    "DELETE FROM processed_requests WHERE idempotency_key = ?1",
                    params![key],
                )?;
                Ok(None)
            } else {
                Ok(Some(record))
            }
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Store the outcome of a first execution under its key
pub fn insert_idempotency(conn: &Connection, record: &IdempotencyRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO processed_requests
             (idempotency_key, request_hash, response_body, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            record.key,
            record.request_hash,
            record.response_body,
            fmt_ts(record.created_at),
        ],
    )?;
    Ok(())
}

/// Drop all expired idempotency records; returns how many went away
pub fn purge_expired(conn: &Connection, now: DateTime<Utc>, ttl_hours: u32) -> Result<usize> {
    let cutoff = now - Duration::hours(i64::from(ttl_hours));
    let affected = conn.execute(
        "DELETE FROM processed_requests WHERE created_at <= ?1",
        params![fmt_ts(cutoff)],
    )?;
    Ok(affected)
}

/// Append an audit entry. The table is append-only; nothing updates or
/// deletes rows.
pub fn insert_audit(conn: &Connection, entry: &AuditEntry) -> Result<()> {
    let before = entry
        .before
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let after = entry.after.as_ref().map(serde_json::to_string).transpose()?;

    conn.execute(
        "INSERT INTO audit_log
             (id, actor_id, action, target_id, before, after, outcome, trace_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.id,
            entry.actor_id,
            entry.action.as_str(),
            entry.target_id,
            before,
            after,
            entry.outcome.as_str(),
            entry.trace_id,
            fmt_ts(entry.timestamp),
        ],
    )?;
    Ok(())
}

/// Audit entries for one target, oldest first
pub fn list_audit_for_target(conn: &Connection, target_id: &str) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, actor_id, action, target_id, before, after, outcome, trace_id, created_at
         FROM audit_log WHERE target_id = ?1 ORDER BY created_at",
    )?;
    let rows = stmt.query_map(params![target_id], |row| {
        let action: String = row.get(2)?;
        let before: Option<String> = row.get(4)?;
        let after: Option<String> = row.get(5)?;
        let outcome: String = row.get(6)?;
        let created_at: String = row.get(8)?;
        Ok(AuditEntry {
            id: row.get(0)?,
            actor_id: row.get(1)?,
            action: AuditAction::parse(&action).ok_or(rusqlite::Error::InvalidQuery)?,
            target_id: row.get(3)?,
            before: before
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(|_| rusqlite::Error::InvalidQuery)?,
            after: after
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(|_| rusqlite::Error::InvalidQuery)?,
            outcome: AuditOutcome::parse(&outcome).ok_or(rusqlite::Error::InvalidQuery)?,
            trace_id: row.get(7)?,
            timestamp: parse_ts(&created_at)?,
        })
    })?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BookingStore;

    #[test]
    fn test_idempotency_lookup_and_expiry() {
        let store = BookingStore::in_memory().unwrap();
        let now = Utc::now();
        let record = IdempotencyRecord {
            key: "key-1".to_string(),
            request_hash: "hash".to_string(),
            response_body: "{}".to_string(),
            created_at: now - Duration::hours(2),
        };
        store
            .with_tx(|tx| insert_idempotency(tx, &record))
            .unwrap();

        // Inside the TTL the record is live
        let live = store
            .with_conn(|conn| lookup_idempotency(conn, "key-1", now, 24))
            .unwrap();
        assert_eq!(live.unwrap().request_hash, "hash");

        // Past the TTL the key is treated as new and the row is gone
        let expired = store
            .with_conn(|conn| lookup_idempotency(conn, "key-1", now + Duration::hours(23), 24))
            .unwrap();
        assert!(expired.is_none());
        let again = store
            .with_conn(|conn| lookup_idempotency(conn, "key-1", now, 24))
            .unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn test_purge_expired() {
        let store = BookingStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .with_tx(|tx| {
                insert_idempotency(
                    tx,
                    &IdempotencyRecord {
                        key: "old".to_string(),
                        request_hash: "h".to_string(),
                        response_body: "{}".to_string(),
                        created_at: now - Duration::hours(48),
                    },
                )?;
                insert_idempotency(
                    tx,
                    &IdempotencyRecord {
                        key: "fresh".to_string(),
                        request_hash: "h".to_string(),
                        response_body: "{}".to_string(),
                        created_at: now,
                    },
                )
            })
            .unwrap();

        let purged = store
            .with_tx(|tx| purge_expired(tx, now, 24))
            .unwrap();
        assert_eq!(purged, 1);
    }

    #[test]
    fn test_audit_round_trip() {
        let store = BookingStore::in_memory().unwrap();
        let entry = AuditEntry::new(AuditAction::BookingCreated, "client-1", Utc::now())
            .with_target("booking-1")
            .with_after(serde_json::json!({"status": "pending"}))
            .with_trace_id("trace-1");
        store.with_tx(|tx| insert_audit(tx, &entry)).unwrap();

        let entries = store
            .with_conn(|conn| list_audit_for_target(conn, "booking-1"))
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::BookingCreated);
        assert_eq!(entries[0].after, entry.after);
        assert!(entries[0].before.is_none());
    }
}
