//! # Trip Segments
//!
//! Offline conversion of map-matched GPS trip logs into clean,
//! intersection-to-intersection travel-time segments for traffic analytics.
//!
//! This library provides:
//! - Edge aggregation: per-matching leg output folded into time-stamped
//!   atomic edge traversals with duplicates merged
//! - Segment building: a single-pass state machine that folds atomic edges
//!   into trunk segments bounded by true road intersections
//! - A batch driver that groups finished segments by calendar day and hands
//!   each day to a persistence sink in one bulk write
//!
//! ## Features
//!
//! - **`http`** - OSRM map-matching client (blocking)
//! - **`persistence`** - SQLite trip source and segment sink
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use trip_segments::{aggregate_edges, build_segments, IntersectionSet};
//! use trip_segments::{Leg, Matching, TripPoint};
//!
//! let t = 1570406400;
//! let points: Vec<TripPoint> = [t, t + 2, t + 3]
//!     .iter()
//!     .map(|&ts| TripPoint::new(7, 42, 10.2, 56.1, ts))
//!     .collect();
//!
//! let matchings = vec![Matching {
//!     confidence: 0.99,
//!     legs: vec![Leg::new(&[1, 2]), Leg::new(&[2, 3])],
//! }];
//!
//! let edges = aggregate_edges(&points, &matchings);
//! let intersections = IntersectionSet::from_nodes([1, 3]);
//! let segments = build_segments(&edges, &intersections, 7, 42);
//!
//! assert_eq!(segments.len(), 1);
//! assert_eq!((segments[0].source, segments[0].destination), (1, 3));
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{Result, SegmentError};

// Edge aggregation (matching legs -> atomic edge traversals)
pub mod aggregate;
pub use aggregate::aggregate_edges;

// Segment building (atomic edges -> intersection-bounded segments)
pub mod topology;
pub use topology::build_segments;

// Read-only road-network resources and distance annotation
pub mod network;
pub use network::{annotate_distances, IntersectionSet, RoadNetwork};

// Batch driver (day-keyed buffering and flush orchestration)
pub mod pipeline;
pub use pipeline::{BatchDriver, MatchingSource, RawTrip, SegmentSink, TripMatcher, TripSource};

// OSRM map-matching client
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::MatchClient;

// SQLite trip source and segment sink
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::{SqliteSegmentSink, SqliteTripStore};

// ============================================================================
// Core Types
// ============================================================================

/// Identifier of a node in the road-network graph (OSM node id).
pub type NodeId = i64;

/// One GPS fix within a trip.
///
/// Each trip is an ordered sequence of these, ordered by `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TripPoint {
    pub trip_id: i64,
    /// Identifier of the telemetry box that recorded the fix
    pub device_id: i64,
    pub longitude: f64,
    pub latitude: f64,
    /// Unix timestamp in seconds
    pub timestamp: i64,
}

impl TripPoint {
    pub fn new(trip_id: i64, device_id: i64, longitude: f64, latitude: f64, timestamp: i64) -> Self {
        Self {
            trip_id,
            device_id,
            longitude,
            latitude,
            timestamp,
        }
    }
}

/// The network path for one hop between two consecutive matched points.
///
/// Carries at least two node ids, in travel order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    pub nodes: Vec<NodeId>,
}

impl Leg {
    pub fn new(nodes: &[NodeId]) -> Self {
        Self {
            nodes: nodes.to_vec(),
        }
    }
}

/// One candidate route returned by the map-matching service.
///
/// Callers hand the aggregator only matchings already filtered to
/// `confidence` above the configured threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matching {
    /// Service-reported likelihood in [0, 1]
    pub confidence: f64,
    pub legs: Vec<Leg>,
}

/// One atomic road-network edge traversal, the aggregator's output unit.
///
/// Within one `match_id`, edges are unique by `(from_node, to_node)`;
/// repeated traversals are pre-merged by summing travel time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtomicEdge {
    /// 0-based index of the matching that produced this edge
    pub match_id: u32,
    pub from_node: NodeId,
    pub to_node: NodeId,
    /// Seconds, rounded to 3 decimal places
    pub travel_time: f64,
    /// Wall-clock start of this traversal (local time)
    pub start: NaiveDateTime,
}

/// Uninterrupted travel between two true road intersections within one
/// matching. `source != destination` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub trip_id: i64,
    pub device_id: i64,
    pub match_id: u32,
    pub source: NodeId,
    pub destination: NodeId,
    /// Seconds
    pub travel_time: f64,
    /// Wall-clock start of the segment (local time)
    pub start: NaiveDateTime,
    /// Physical length in meters, `None` until annotated or when the network
    /// has no direct edge between source and destination
    pub distance: Option<f64>,
}

/// One trip after map matching: the surviving points and the accepted
/// matchings, ready for the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedTrip {
    pub trip_id: i64,
    pub device_id: i64,
    pub points: Vec<TripPoint>,
    pub matchings: Vec<Matching>,
}

/// Configuration for the batch pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum matching confidence to accept a candidate route.
    /// Default: 0.85
    pub min_confidence: f64,

    /// Trips with fewer points than this never reach the matcher.
    /// Default: 32
    pub min_trip_points: usize,

    /// Fixed offset added to Unix timestamps to obtain local wall-clock time.
    /// Default: 2 hours
    pub local_offset_hours: i64,

    /// Stop the whole run immediately after the first day-boundary flush,
    /// reproducing the original single-day batch mode. Default: false
    pub stop_after_first_flush: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.85,
            min_trip_points: 32,
            local_offset_hours: aggregate::LOCAL_OFFSET_HOURS,
            stop_after_first_flush: false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leg_construction() {
        let leg = Leg::new(&[1, 2, 3]);
        assert_eq!(leg.nodes, vec![1, 2, 3]);
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.min_confidence, 0.85);
        assert_eq!(config.min_trip_points, 32);
        assert_eq!(config.local_offset_hours, aggregate::LOCAL_OFFSET_HOURS);
        assert_eq!(config.local_offset_hours, 2);
        assert!(!config.stop_after_first_flush);
    }

    #[test]
    fn test_segment_serializes() {
        let segment = Segment {
            trip_id: 1,
            device_id: 2,
            match_id: 0,
            source: 10,
            destination: 20,
            travel_time: 4.0,
            start: chrono::DateTime::from_timestamp(1570406400, 0)
                .unwrap()
                .naive_utc(),
            distance: None,
        };
        let json = serde_json::to_string(&segment).unwrap();
        assert!(json.contains("\"source\":10"));
        let back: Segment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, segment);
    }
}
