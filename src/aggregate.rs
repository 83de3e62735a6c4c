//! Edge aggregation: per-matching leg output folded into time-stamped
//! atomic edge traversals.
//!
//! This module turns the map-matching service's leg/node output into an
//! ordered sequence of [`AtomicEdge`] records:
//! - Leg travel times come from the original trip timestamps, split evenly
//!   when a leg spans more than one network edge
//! - Repeated traversals of the same edge within one matching are merged by
//!   summing travel time, kept at first occurrence
//! - Each matching gets a running wall clock, started at its first trip
//!   point (plus the local-time offset) and advanced edge by edge

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDateTime};

use crate::{AtomicEdge, Matching, NodeId, TripPoint};

/// Fixed local-time offset applied to trip timestamps. Seeds the default
/// `PipelineConfig::local_offset_hours`; the pipeline always uses the config
/// value.
pub const LOCAL_OFFSET_HOURS: i64 = 2;

/// Cursor into the trip-point sequence, threaded across matchings.
///
/// Matchings are requested over possibly overlapping or gapped sub-ranges of
/// the full trip, so the position is shared state: each leg consumes one
/// point, and one extra point (the connecting leg) is consumed between
/// matchings without producing an edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct TripCursor {
    index: usize,
}

impl TripCursor {
    pub fn new() -> Self {
        Self { index: 0 }
    }

    /// Timestamp at the current position plus `ahead`.
    ///
    /// Panics if the position is past the end of the trip — the matchings do
    /// not correspond to the supplied points, which is a caller contract
    /// violation.
    fn timestamp(&self, points: &[TripPoint], ahead: usize) -> i64 {
        let at = self.index + ahead;
        assert!(
            at < points.len(),
            "aggregate_edges: matchings consumed point {} but the trip has only {} points",
            at,
            points.len()
        );
        points[at].timestamp
    }

    fn advance(&mut self) {
        self.index += 1;
    }
}

/// Merged edge row before the date-time pass.
struct EdgeRow {
    match_id: u32,
    from_node: NodeId,
    to_node: NodeId,
    travel_time: f64,
}

/// Fold matchings into ordered, merged, time-stamped atomic edges.
///
/// `points` is the full ordered trip-point sequence the matchings were
/// requested over; `matchings` must already be filtered to confident
/// candidates. Applies the fixed [`LOCAL_OFFSET_HOURS`] offset; use
/// [`aggregate_edges_with_offset`] to override it.
pub fn aggregate_edges(points: &[TripPoint], matchings: &[Matching]) -> Vec<AtomicEdge> {
    aggregate_edges_with_offset(points, matchings, LOCAL_OFFSET_HOURS)
}

/// [`aggregate_edges`] with an explicit local-time offset in hours.
pub fn aggregate_edges_with_offset(
    points: &[TripPoint],
    matchings: &[Matching],
    offset_hours: i64,
) -> Vec<AtomicEdge> {
    let mut cursor = TripCursor::new();
    let mut rows: Vec<EdgeRow> = Vec::new();
    // (match_id, edge) -> position of first occurrence in `rows`
    let mut seen: HashMap<(u32, NodeId, NodeId), usize> = HashMap::new();
    let mut start_times: Vec<i64> = Vec::with_capacity(matchings.len());

    for (match_index, matching) in matchings.iter().enumerate() {
        let match_id = match_index as u32;
        start_times.push(cursor.timestamp(points, 0));

        for leg in &matching.legs {
            let nodes = &leg.nodes;
            assert!(
                nodes.len() >= 2,
                "aggregate_edges: leg with {} nodes in matching {}, at least 2 required",
                nodes.len(),
                match_id
            );

            // One leg corresponds to exactly one hop between time-adjacent points
            let travel_time = (cursor.timestamp(points, 1) - cursor.timestamp(points, 0)) as f64;

            if nodes.len() > 2 {
                // Distribute evenly over the node pairs; round each share to
                // 3 decimals to keep the later date-time arithmetic exact
                let share = round3(travel_time / (nodes.len() - 1) as f64);
                for pair in nodes.windows(2) {
                    push_merged(&mut rows, &mut seen, match_id, pair[0], pair[1], share);
                }
            } else {
                push_merged(&mut rows, &mut seen, match_id, nodes[0], nodes[1], travel_time);
            }

            cursor.advance();
        }

        // Skip the connecting leg between matchings
        cursor.advance();
    }

    // Walk each matching's merged edges in order, advancing a running clock
    // from the matching's recorded start time
    let mut clocks: Vec<NaiveDateTime> = start_times
        .iter()
        .map(|&ts| local_datetime(ts, offset_hours))
        .collect();

    rows.iter()
        .map(|row| {
            let clock = &mut clocks[row.match_id as usize];
            let start = *clock;
            *clock += Duration::milliseconds((row.travel_time * 1000.0).round() as i64);
            AtomicEdge {
                match_id: row.match_id,
                from_node: row.from_node,
                to_node: row.to_node,
                travel_time: row.travel_time,
                start,
            }
        })
        .collect()
}

/// Append an edge, or fold its travel time into the first occurrence of the
/// same `(match_id, edge)` pair.
fn push_merged(
    rows: &mut Vec<EdgeRow>,
    seen: &mut HashMap<(u32, NodeId, NodeId), usize>,
    match_id: u32,
    from_node: NodeId,
    to_node: NodeId,
    travel_time: f64,
) {
    match seen.get(&(match_id, from_node, to_node)) {
        Some(&at) => rows[at].travel_time += travel_time,
        None => {
            seen.insert((match_id, from_node, to_node), rows.len());
            rows.push(EdgeRow {
                match_id,
                from_node,
                to_node,
                travel_time,
            });
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn local_datetime(timestamp: i64, offset_hours: i64) -> NaiveDateTime {
    DateTime::from_timestamp(timestamp, 0)
        .expect("aggregate_edges: trip timestamp out of representable range")
        .naive_utc()
        + Duration::hours(offset_hours)
}
