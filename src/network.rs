//! Read-only road-network resources and distance annotation.
//!
//! The road network and the intersection set are process-wide resources:
//! constructed once during startup, then passed by reference into the
//! components that need them and never mutated. The network is consulted
//! only for per-edge physical lengths; graph construction and caching happen
//! outside this crate.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::error::{Result, SegmentError};
use crate::{NodeId, Segment};

/// Node ids flagged as true road junctions (degree > 2).
#[derive(Debug, Clone, Default)]
pub struct IntersectionSet {
    nodes: HashSet<NodeId>,
}

impl IntersectionSet {
    pub fn from_nodes(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
        }
    }

    /// Load from the node-set text format: integers separated by braces,
    /// commas, or whitespace (e.g. `{286405317, 286405318}`).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| SegmentError::ResourceError {
            message: format!(
                "cannot read intersection set {}: {}",
                path.as_ref().display(),
                e
            ),
        })?;
        Self::from_text(&text)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        let mut nodes = HashSet::new();
        for token in text.split(|c: char| !(c.is_ascii_digit() || c == '-')) {
            if token.is_empty() {
                continue;
            }
            let node: NodeId = token.parse().map_err(|_| SegmentError::ResourceError {
                message: format!("invalid node id '{}' in intersection set", token),
            })?;
            nodes.insert(node);
        }
        Ok(Self { nodes })
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Directed edge-length table over the road network, in meters.
#[derive(Debug, Clone, Default)]
pub struct RoadNetwork {
    lengths: HashMap<(NodeId, NodeId), f64>,
}

impl RoadNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges(edges: impl IntoIterator<Item = (NodeId, NodeId, f64)>) -> Self {
        Self {
            lengths: edges
                .into_iter()
                .map(|(from, to, length)| ((from, to), length))
                .collect(),
        }
    }

    pub fn insert_edge(&mut self, from: NodeId, to: NodeId, length: f64) {
        self.lengths.insert((from, to), length);
    }

    /// Physical length of the directed edge, if the network has one.
    pub fn edge_length(&self, from: NodeId, to: NodeId) -> Option<f64> {
        self.lengths.get(&(from, to)).copied()
    }

    pub fn edge_count(&self) -> usize {
        self.lengths.len()
    }
}

/// Attach physical lengths to segments from the road network.
///
/// A segment whose `(source, destination)` is not a single direct network
/// edge keeps `distance: None`; that is expected, not an error.
pub fn annotate_distances(segments: &mut [Segment], network: &RoadNetwork) {
    for segment in segments.iter_mut() {
        segment.distance = network.edge_length(segment.source, segment.destination);
    }
}
