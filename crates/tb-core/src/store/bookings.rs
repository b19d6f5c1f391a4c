//! Booking table access

use chrono::Duration;
use rusqlite::{Connection, Row, params};

use super::{fmt_ts, parse_ts};
use crate::booking::{Booking, BookingStatus, PaymentStatus};
use crate::error::Result;
use crate::time::TimeWindow;

fn row_to_booking(row: &Row<'_>) -> rusqlite::Result<Booking> {
    let status: String = row.get(6)?;
    let payment_status: String = row.get(7)?;
    let scheduled_at: String = row.get(4)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    Ok(Booking {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        client_id: row.get(2)?,
        service_id: row.get(3)?,
        scheduled_at: parse_ts(&scheduled_at)?,
        duration_minutes: row.get(5)?,
        status: BookingStatus::parse(&status).ok_or(rusqlite::Error::InvalidQuery)?,
        payment_status: PaymentStatus::parse(&payment_status)
            .ok_or(rusqlite::Error::InvalidQuery)?,
        reschedule_count: row.get(8)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

const BOOKING_COLUMNS: &str = "id, provider_id, client_id, service_id, scheduled_at, \
     duration_minutes, status, payment_status, reschedule_count, created_at, updated_at";

/// Insert a new booking row
pub fn insert_booking(conn: &Connection, booking: &Booking) -> Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, provider_id, client_id, service_id, scheduled_at,
             duration_minutes, status, payment_status, reschedule_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            booking.id,
            booking.provider_id,
            booking.client_id,
            booking.service_id,
            fmt_ts(booking.scheduled_at),
            booking.duration_minutes,
            booking.status.as_str(),
            booking.payment_status.as_str(),
            booking.reschedule_count,
            fmt_ts(booking.created_at),
            fmt_ts(booking.updated_at),
        ],
    )?;
    Ok(())
}

/// Update the mutable fields of a booking row
pub fn update_booking(conn: &Connection, booking: &Booking) -> Result<()> {
    conn.execute(
        "UPDATE bookings SET scheduled_at = ?2, duration_minutes = ?3, status = ?4,
             payment_status = ?5, reschedule_count = ?6, updated_at = ?7
         WHERE id = ?1",
        params![
            booking.id,
            fmt_ts(booking.scheduled_at),
            booking.duration_minutes,
            booking.status.as_str(),
            booking.payment_status.as_str(),
            booking.reschedule_count,
            fmt_ts(booking.updated_at),
        ],
    )?;
    Ok(())
}

/// Load a booking by ID
pub fn get_booking(conn: &Connection, id: &str) -> Result<Option<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"
    ))?;
    match stmt.query_row(params![id], row_to_booking) {
        Ok(booking) => Ok(Some(booking)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Active (pending/confirmed) bookings of a provider whose windows
/// overlap the given range, excluding an optional booking id.
///
/// The SQL filter over-fetches by a day on the left edge (a booking
/// never spans more than 24 hours); exact half-open overlap is decided
/// in Rust against the parsed instants.
pub fn active_bookings_in_range(
    conn: &Connection,
    provider_id: &str,
    range: &TimeWindow,
    exclude_booking: Option<&str>,
) -> Result<Vec<Booking>> {
    let floor = fmt_ts(range.start - Duration::days(1));
    let ceiling = fmt_ts(range.end);

    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE provider_id = ?1
           AND status IN ('pending', 'confirmed')
           AND scheduled_at >= ?2
           AND scheduled_at < ?3
         ORDER BY scheduled_at"
    ))?;

    let rows = stmt.query_map(params![provider_id, floor, ceiling], row_to_booking)?;

    let mut bookings = Vec::new();
    for row in rows {
        let booking = row?;
        if exclude_booking == Some(booking.id.as_str()) {
            continue;
        }
        if booking.window().overlaps(range) {
            bookings.push(booking);
        }
    }
    Ok(bookings)
}

/// Count of active bookings starting inside the rolling week around a
/// proposed start, for the per-provider volume limit.
pub fn weekly_active_count(
    conn: &Connection,
    provider_id: &str,
    week: &TimeWindow,
) -> Result<u32> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bookings
         WHERE provider_id = ?1
           AND status IN ('pending', 'confirmed')
           AND scheduled_at >= ?2
           AND scheduled_at < ?3",
        params![provider_id, fmt_ts(week.start), fmt_ts(week.end)],
        |row| row.get(0),
    )?;
    Ok(count as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BookingStore;
    use chrono::{DateTime, Utc};

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn booking_at(provider: &str, start: &str, minutes: u32, status: BookingStatus) -> Booking {
        Booking::new(provider, "c1", None, utc(start), minutes, status, Utc::now())
    }

    #[test]
    fn test_insert_and_get() {
        let store = BookingStore::in_memory().unwrap();
        let booking = booking_at("p1", "2026-09-07T10:00:00Z", 30, BookingStatus::Pending);

        store
            .with_tx(|tx| insert_booking(tx, &booking))
            .unwrap();
        let loaded = store
            .with_conn(|conn| get_booking(conn, &booking.id))
            .unwrap()
            .unwrap();
        assert_eq!(loaded, booking);
    }

    #[test]
    fn test_active_in_range_skips_cancelled_and_outsiders() {
        let store = BookingStore::in_memory().unwrap();
        let inside = booking_at("p1", "2026-09-07T10:00:00Z", 30, BookingStatus::Confirmed);
        let later = booking_at("p1", "2026-09-07T12:00:00Z", 30, BookingStatus::Pending);
        let cancelled = booking_at("p1", "2026-09-07T11:00:00Z", 30, BookingStatus::Cancelled);
        let outside = booking_at("p1", "2026-09-09T10:00:00Z", 30, BookingStatus::Pending);
        let other_provider = booking_at("p2", "2026-09-07T10:00:00Z", 30, BookingStatus::Pending);

        store
            .with_tx(|tx| {
                for b in [&inside, &later, &cancelled, &outside, &other_provider] {
                    insert_booking(tx, b)?;
                }
                Ok(())
            })
            .unwrap();

        let range = TimeWindow::new(utc("2026-09-07T00:00:00Z"), utc("2026-09-08T00:00:00Z"));
        let found = store
            .with_conn(|conn| active_bookings_in_range(conn, "p1", &range, None))
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, inside.id);
        assert_eq!(found[1].id, later.id);

        let excluding = store
            .with_conn(|conn| active_bookings_in_range(conn, "p1", &range, Some(&inside.id)))
            .unwrap();
        assert_eq!(excluding.len(), 1);
        assert_eq!(excluding[0].id, later.id);
    }

    #[test]
    fn test_overlap_at_range_edge() {
        let store = BookingStore::in_memory().unwrap();
        // Starts before the range but spills into it
        let spill = booking_at("p1", "2026-09-06T23:45:00Z", 30, BookingStatus::Confirmed);
        store.with_tx(|tx| insert_booking(tx, &spill)).unwrap();

        let range = TimeWindow::new(utc("2026-09-07T00:00:00Z"), utc("2026-09-08T00:00:00Z"));
        let found = store
            .with_conn(|conn| active_bookings_in_range(conn, "p1", &range, None))
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_weekly_active_count() {
        let store = BookingStore::in_memory().unwrap();
        store
            .with_tx(|tx| {
                insert_booking(
                    tx,
                    &booking_at("p1", "2026-09-07T10:00:00Z", 30, BookingStatus::Pending),
                )?;
                insert_booking(
                    tx,
                    &booking_at("p1", "2026-09-08T10:00:00Z", 30, BookingStatus::Confirmed),
                )?;
                insert_booking(
                    tx,
                    &booking_at("p1", "2026-09-08T12:00:00Z", 30, BookingStatus::Cancelled),
                )
            })
            .unwrap();

        let week = TimeWindow::new(utc("2026-09-06T00:00:00Z"), utc("2026-09-13T00:00:00Z"));
        let count = store
            .with_conn(|conn| weekly_active_count(conn, "p1", &week))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_update_booking() {
        let store = BookingStore::in_memory().unwrap();
        let mut booking = booking_at("p1", "2026-09-07T10:00:00Z", 30, BookingStatus::Pending);
        store.with_tx(|tx| insert_booking(tx, &booking)).unwrap();

        booking.status = BookingStatus::Confirmed;
        booking.payment_status = PaymentStatus::Paid;
        booking.reschedule_count = 1;
        store.with_tx(|tx| update_booking(tx, &booking)).unwrap();

        let loaded = store
            .with_conn(|conn| get_booking(conn, &booking.id))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, BookingStatus::Confirmed);
        assert_eq!(loaded.payment_status, PaymentStatus::Paid);
        assert_eq!(loaded.reschedule_count, 1);
    }
}
