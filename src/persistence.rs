//! SQLite trip source and segment sink.
//!
//! Raw trip fixes live in one table per calendar day, named
//! `trip_points_YYYYMMDD`; iteration walks days forward and stops at the
//! first missing table. Finished segments land in a single segments table,
//! one day per bulk write, replacing any prior rows for that day so reruns
//! stay idempotent.

use std::path::Path;

use chrono::{Duration, NaiveDate};
use log::{debug, info};
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::pipeline::{RawTrip, SegmentSink};
use crate::{Segment, TripPoint};

fn day_table(day: NaiveDate) -> String {
    format!("trip_points_{}", day.format("%Y%m%d"))
}

// ============================================================================
// Trip source
// ============================================================================

/// Day-keyed store of raw trip points.
pub struct SqliteTripStore {
    conn: Connection,
}

impl SqliteTripStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All trips recorded on `day`, grouped by trip id with points in time
    /// order. `None` when the day has no table.
    pub fn day_trips(&self, day: NaiveDate) -> Result<Option<Vec<RawTrip>>> {
        let table = day_table(day);
        if !self.table_exists(&table)? {
            return Ok(None);
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT trip_id, device_id, longitude, latitude, timestamp
             FROM \"{}\" ORDER BY trip_id, timestamp",
            table
        ))?;

        let points = stmt.query_map([], |row| {
            Ok(TripPoint {
                trip_id: row.get(0)?,
                device_id: row.get(1)?,
                longitude: row.get(2)?,
                latitude: row.get(3)?,
                timestamp: row.get(4)?,
            })
        })?;

        let mut trips: Vec<RawTrip> = Vec::new();
        let mut row_count = 0usize;
        for point in points {
            let point = point?;
            row_count += 1;
            match trips.last_mut() {
                Some(trip) if trip.trip_id == point.trip_id => trip.points.push(point),
                _ => trips.push(RawTrip {
                    trip_id: point.trip_id,
                    device_id: point.device_id,
                    points: vec![point],
                }),
            }
        }

        info!("{} rows fetched from {}", row_count, table);
        Ok(Some(trips))
    }

    /// Iterate trips day by day from `start`, stopping at the first missing
    /// day table, or after the day before `end` when one is given.
    ///
    /// A day whose table holds fewer than `min_rows` rows in total is skipped
    /// wholesale; iteration continues with the next day.
    pub fn trips_from(
        &self,
        start: NaiveDate,
        end: Option<NaiveDate>,
        min_rows: usize,
    ) -> TripIter<'_> {
        TripIter {
            store: self,
            day: start,
            end,
            min_rows,
            pending: Vec::new().into_iter(),
            done: false,
        }
    }
}

/// Iterator over [`RawTrip`]s in day order. Yields `Err` once and stops if a
/// day's rows cannot be read.
pub struct TripIter<'a> {
    store: &'a SqliteTripStore,
    day: NaiveDate,
    end: Option<NaiveDate>,
    min_rows: usize,
    pending: std::vec::IntoIter<RawTrip>,
    done: bool,
}

impl Iterator for TripIter<'_> {
    type Item = Result<RawTrip>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(trip) = self.pending.next() {
                return Some(Ok(trip));
            }
            if self.done {
                return None;
            }
            if self.end.is_some_and(|end| self.day >= end) {
                self.done = true;
                return None;
            }

            match self.store.day_trips(self.day) {
                Ok(Some(trips)) => {
                    let row_count: usize = trips.iter().map(|t| t.points.len()).sum();
                    if row_count < self.min_rows {
                        debug!(
                            "{} has {} rows, below threshold {}, day skipped",
                            self.day, row_count, self.min_rows
                        );
                        self.day += Duration::days(1);
                        continue;
                    }
                    self.day += Duration::days(1);
                    self.pending = trips.into_iter();
                }
                Ok(None) => {
                    debug!("no table for {}, source exhausted", self.day);
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

// ============================================================================
// Segment sink
// ============================================================================

/// Bulk segment writer with per-day replace semantics.
pub struct SqliteSegmentSink {
    conn: Connection,
}

impl SqliteSegmentSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS segments (
                day TEXT NOT NULL,
                trip_id INTEGER NOT NULL,
                device_id INTEGER NOT NULL,
                match_id INTEGER NOT NULL,
                source INTEGER NOT NULL,
                destination INTEGER NOT NULL,
                travel_time REAL NOT NULL,
                start_time TEXT NOT NULL,
                distance REAL
            );
            CREATE INDEX IF NOT EXISTS idx_segments_day ON segments(day);",
        )?;
        Ok(Self { conn })
    }

    /// Rows currently stored for `day`.
    pub fn day_count(&self, day: NaiveDate) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM segments WHERE day = ?1",
            params![day.format("%Y-%m-%d").to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl SegmentSink for SqliteSegmentSink {
    fn store_day(&mut self, day: NaiveDate, segments: &[Segment]) -> Result<()> {
        let day_key = day.format("%Y-%m-%d").to_string();
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM segments WHERE day = ?1", params![day_key])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO segments (day, trip_id, device_id, match_id, source,
                                       destination, travel_time, start_time, distance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for segment in segments {
                stmt.execute(params![
                    day_key,
                    segment.trip_id,
                    segment.device_id,
                    segment.match_id,
                    segment.source,
                    segment.destination,
                    segment.travel_time,
                    segment.start.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
                    segment.distance,
                ])?;
            }
        }
        tx.commit()?;

        info!("stored {} segments for {}", segments.len(), day_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn memory_store() -> SqliteTripStore {
        SqliteTripStore::from_connection(Connection::open_in_memory().unwrap())
    }

    fn create_day_table(conn: &Connection, day: NaiveDate, rows: &[(i64, i64, i64)]) {
        let table = day_table(day);
        conn.execute_batch(&format!(
            "CREATE TABLE \"{}\" (
                trip_id INTEGER, device_id INTEGER,
                longitude REAL, latitude REAL, timestamp INTEGER
            );",
            table
        ))
        .unwrap();
        for (trip_id, device_id, timestamp) in rows {
            conn.execute(
                &format!(
                    "INSERT INTO \"{}\" VALUES (?1, ?2, 10.2, 56.1, ?3)",
                    table
                ),
                params![trip_id, device_id, timestamp],
            )
            .unwrap();
        }
    }

    fn segment(trip_id: i64, timestamp: i64) -> Segment {
        Segment {
            trip_id,
            device_id: 42,
            match_id: 0,
            source: 1,
            destination: 3,
            travel_time: 4.0,
            start: DateTime::from_timestamp(timestamp, 0).unwrap().naive_utc(),
            distance: Some(250.0),
        }
    }

    #[test]
    fn test_day_trips_groups_by_trip_id() {
        let store = memory_store();
        let day = NaiveDate::from_ymd_opt(2019, 10, 7).unwrap();
        create_day_table(
            &store.conn,
            day,
            &[(1, 42, 100), (1, 42, 105), (2, 43, 90), (2, 43, 95)],
        );

        let trips = store.day_trips(day).unwrap().unwrap();
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].trip_id, 1);
        assert_eq!(trips[0].device_id, 42);
        assert_eq!(trips[0].points.len(), 2);
        assert_eq!(trips[0].points[0].timestamp, 100);
        assert_eq!(trips[1].trip_id, 2);
    }

    #[test]
    fn test_missing_day_table() {
        let store = memory_store();
        let day = NaiveDate::from_ymd_opt(2019, 10, 7).unwrap();
        assert!(store.day_trips(day).unwrap().is_none());
    }

    #[test]
    fn test_iteration_stops_at_missing_day() {
        let store = memory_store();
        let d1 = NaiveDate::from_ymd_opt(2019, 10, 7).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2019, 10, 8).unwrap();
        // Day 3 table intentionally absent; day 4 must never be reached
        let d4 = NaiveDate::from_ymd_opt(2019, 10, 10).unwrap();
        create_day_table(&store.conn, d1, &[(1, 42, 100)]);
        create_day_table(&store.conn, d2, &[(2, 42, 200), (3, 44, 210)]);
        create_day_table(&store.conn, d4, &[(9, 42, 400)]);

        let trips: Vec<_> = store
            .trips_from(d1, None, 1)
            .collect::<Result<Vec<_>>>()
            .unwrap();

        assert_eq!(
            trips.iter().map(|t| t.trip_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_day_below_row_threshold_is_skipped() {
        let store = memory_store();
        let d1 = NaiveDate::from_ymd_opt(2019, 10, 7).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2019, 10, 8).unwrap();
        // Day 1 holds 10 rows in total, below the threshold of 32; day 2 is
        // large enough and must still be reached
        create_day_table(
            &store.conn,
            d1,
            &(0..10).map(|i| (1, 42, 100 + i)).collect::<Vec<_>>(),
        );
        create_day_table(
            &store.conn,
            d2,
            &(0..40).map(|i| (2, 42, 200 + i)).collect::<Vec<_>>(),
        );

        let trips: Vec<_> = store
            .trips_from(d1, None, 32)
            .collect::<Result<Vec<_>>>()
            .unwrap();

        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].trip_id, 2);
        assert_eq!(trips[0].points.len(), 40);
    }

    #[test]
    fn test_iteration_respects_end_date() {
        let store = memory_store();
        let d1 = NaiveDate::from_ymd_opt(2019, 10, 7).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2019, 10, 8).unwrap();
        create_day_table(&store.conn, d1, &[(1, 42, 100)]);
        create_day_table(&store.conn, d2, &[(2, 42, 200)]);

        let trips: Vec<_> = store
            .trips_from(d1, Some(d2), 1)
            .collect::<Result<Vec<_>>>()
            .unwrap();

        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].trip_id, 1);
    }

    #[test]
    fn test_sink_replaces_day() {
        let mut sink =
            SqliteSegmentSink::from_connection(Connection::open_in_memory().unwrap()).unwrap();
        let day = NaiveDate::from_ymd_opt(2019, 10, 7).unwrap();

        sink.store_day(day, &[segment(1, 1570406400), segment(2, 1570406500)])
            .unwrap();
        assert_eq!(sink.day_count(day).unwrap(), 2);

        // A rerun of the same day replaces, not appends
        sink.store_day(day, &[segment(3, 1570406600)]).unwrap();
        assert_eq!(sink.day_count(day).unwrap(), 1);

        let other = NaiveDate::from_ymd_opt(2019, 10, 8).unwrap();
        sink.store_day(other, &[segment(4, 1570492800)]).unwrap();
        assert_eq!(sink.day_count(day).unwrap(), 1);
        assert_eq!(sink.day_count(other).unwrap(), 1);
    }

    #[test]
    fn test_sink_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segments.db");
        let day = NaiveDate::from_ymd_opt(2019, 10, 7).unwrap();

        {
            let mut sink = SqliteSegmentSink::open(&path).unwrap();
            sink.store_day(day, &[segment(1, 1570406400)]).unwrap();
        }

        let sink = SqliteSegmentSink::open(&path).unwrap();
        assert_eq!(sink.day_count(day).unwrap(), 1);

        let (source, destination, distance): (i64, i64, Option<f64>) = sink
            .conn
            .query_row(
                "SELECT source, destination, distance FROM segments",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!((source, destination, distance), (1, 3, Some(250.0)));
    }
}
