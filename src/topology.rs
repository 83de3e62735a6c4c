//! Segment building: atomic edges folded into intersection-bounded trunk
//! segments.
//!
//! A single pass over the aggregator's output collapses chains of
//! fine-grained network edges into the coarser unit analytics need, movement
//! between true road junctions. Runs that straddle two matchings are
//! discarded (their travel-time basis is inconsistent), as are runs that
//! return to their own starting node without reaching a different junction.

use log::debug;

use crate::network::IntersectionSet;
use crate::{AtomicEdge, Segment};

/// Fold ordered atomic edges into intersection-to-intersection segments.
///
/// A segment opens on the first edge whose `from_node` is an intersection and
/// closes on the first later edge (same matching) whose `to_node` is a
/// *different* intersection. An edge looping back through the opening node
/// keeps the segment open and accumulating. Crossing into another matching
/// before closing discards the open run; so does running out of edges.
pub fn build_segments(
    edges: &[AtomicEdge],
    intersections: &IntersectionSet,
    trip_id: i64,
    device_id: i64,
) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut open: Option<&AtomicEdge> = None;
    let mut travel_time = 0.0;

    for edge in edges {
        travel_time += edge.travel_time;

        if open.is_none() && intersections.contains(edge.from_node) {
            open = Some(edge);
            travel_time = edge.travel_time;
        }

        if let Some(source) = open {
            if !intersections.contains(edge.to_node) {
                continue;
            }

            if source.match_id != edge.match_id {
                // The run crossed a matching boundary without closing; its
                // travel-time basis is inconsistent, drop it
                open = None;
                continue;
            }

            if source.from_node != edge.to_node {
                segments.push(Segment {
                    trip_id,
                    device_id,
                    match_id: source.match_id,
                    source: source.from_node,
                    destination: edge.to_node,
                    travel_time,
                    start: source.start,
                    distance: None,
                });
                open = None;
            }
            // Otherwise the path looped back through its own starting node;
            // stay open and keep accumulating
        }
    }

    if open.is_some() {
        debug!(
            "build_segments: trip {} ended with an unterminated run, discarded",
            trip_id
        );
    }

    segments
}
