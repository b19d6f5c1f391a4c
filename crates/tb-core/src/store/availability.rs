//! Availability rule, blocked-time and provider-settings table access

use rusqlite::{Connection, Row, params};

use super::{fmt_time, fmt_ts, parse_time, parse_ts};
use crate::availability::{AvailabilityRule, BlockedTime};
use crate::error::Result;
use crate::provider::ProviderSettings;
use crate::time::TimeWindow;

fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<AvailabilityRule> {
    let start_local: String = row.get(3)?;
    let end_local: String = row.get(4)?;
    Ok(AvailabilityRule {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        day_of_week: row.get(2)?,
        start_local: parse_time(&start_local)?,
        end_local: parse_time(&end_local)?,
        is_available: row.get(5)?,
    })
}

/// All rules of a provider, ordered by day and start
pub fn list_rules(conn: &Connection, provider_id: &str) -> Result<Vec<AvailabilityRule>> {
    let mut stmt = conn.prepare(
        "SELECT id, provider_id, day_of_week, start_local, end_local, is_available
         FROM availability_rules WHERE provider_id = ?1
         ORDER BY day_of_week, start_local",
    )?;
    let rows = stmt.query_map(params![provider_id], row_to_rule)?;

    let mut rules = Vec::new();
    for row in rows {
        rules.push(row?);
    }
    Ok(rules)
}

/// Replace a provider's whole rule set. Rules are edited as a set in
/// the provider dashboard, so partial updates are not needed.
pub fn replace_rules(
    conn: &Connection,
    provider_id: &str,
    rules: &[AvailabilityRule],
) -> Result<()> {
    conn.execute(
        "DELETE FROM availability_rules WHERE provider_id = ?1",
        params![provider_id],
    )?;
    for rule in rules {
        conn.execute(
            "INSERT INTO availability_rules
                 (id, provider_id, day_of_week, start_local, end_local, is_available)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                rule.id,
                rule.provider_id,
                rule.day_of_week,
                fmt_time(rule.start_local),
                fmt_time(rule.end_local),
                rule.is_available,
            ],
        )?;
    }
    Ok(())
}

fn row_to_block(row: &Row<'_>) -> rusqlite::Result<BlockedTime> {
    let start_time: String = row.get(2)?;
    let end_time: String = row.get(3)?;
    Ok(BlockedTime {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        start_time: parse_ts(&start_time)?,
        end_time: parse_ts(&end_time)?,
        reason: row.get(4)?,
    })
}

pub fn insert_block(conn: &Connection, block: &BlockedTime) -> Result<()> {
    conn.execute(
        "INSERT INTO blocked_times (id, provider_id, start_time, end_time, reason)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            block.id,
            block.provider_id,
            fmt_ts(block.start_time),
            fmt_ts(block.end_time),
            block.reason,
        ],
    )?;
    Ok(())
}

/// Remove a block; returns whether a row existed
pub fn delete_block(conn: &Connection, provider_id: &str, block_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM blocked_times WHERE id = ?1 AND provider_id = ?2",
        params![block_id, provider_id],
    )?;
    Ok(affected > 0)
}

/// Blocked times of a provider overlapping the given range
pub fn blocked_times_in_range(
    conn: &Connection,
    provider_id: &str,
    range: &TimeWindow,
) -> Result<Vec<BlockedTime>> {
    let mut stmt = conn.prepare(
        "SELECT id, provider_id, start_time, end_time, reason
         FROM blocked_times
         WHERE provider_id = ?1 AND start_time < ?2 AND end_time > ?3
         ORDER BY start_time",
    )?;
    let rows = stmt.query_map(
        params![provider_id, fmt_ts(range.end), fmt_ts(range.start)],
        row_to_block,
    )?;

    let mut blocks = Vec::new();
    for row in rows {
        blocks.push(row?);
    }
    Ok(blocks)
}

/// Load provider settings, if the provider ever customized them
pub fn get_settings(conn: &Connection, provider_id: &str) -> Result<Option<ProviderSettings>> {
    let mut stmt = conn.prepare(
        "SELECT provider_id, timezone, buffer_minutes, min_notice_minutes,
                max_advance_days, max_reschedules, max_bookings_per_week
         FROM provider_settings WHERE provider_id = ?1",
    )?;
    let result = stmt.query_row(params![provider_id], |row| {
        Ok(ProviderSettings {
            provider_id: row.get(0)?,
            timezone: row.get(1)?,
            buffer_minutes: row.get(2)?,
            min_notice_minutes: row.get(3)?,
            max_advance_days: row.get(4)?,
            max_reschedules: row.get(5)?,
            max_bookings_per_week: row.get(6)?,
        })
    });
    match result {
        Ok(settings) => Ok(Some(settings)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn upsert_settings(conn: &Connection, settings: &ProviderSettings) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO provider_settings
             (provider_id, timezone, buffer_minutes, min_notice_minutes,
              max_advance_days, max_reschedules, max_bookings_per_week)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            settings.provider_id,
            settings.timezone,
            settings.buffer_minutes,
            settings.min_notice_minutes,
            settings.max_advance_days,
            settings.max_reschedules,
            settings.max_bookings_per_week,
        ],
    )?;
    Ok(())
}
