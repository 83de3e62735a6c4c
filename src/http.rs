//! OSRM map-matching client.
//!
//! Submits one trip's coordinates and timestamps to an OSRM `match` service
//! and post-processes the response for the aggregator:
//! - Matchings filtered to confident candidates
//! - Trip points narrowed to the tracepoints the service kept
//!
//! The client is blocking: the pipeline processes one trip at a time, and a
//! stalled request stalls the run by design. Retry policy belongs to the
//! caller.

use log::{debug, warn};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::error::{Result, SegmentError};
use crate::pipeline::{RawTrip, TripMatcher};
use crate::{Leg, MatchedTrip, Matching, NodeId, PipelineConfig};

/// Service codes that mean "no route found", a skippable condition.
const NO_MATCH_CODES: [&str; 2] = ["NoSegment", "NoMatch"];

#[derive(Debug, Deserialize)]
struct MatchResponse {
    matchings: Vec<ApiMatching>,
    tracepoints: Vec<Option<ApiTracepoint>>,
}

#[derive(Debug, Deserialize)]
struct ApiMatching {
    confidence: f64,
    legs: Vec<ApiLeg>,
}

#[derive(Debug, Deserialize)]
struct ApiLeg {
    annotation: ApiAnnotation,
}

#[derive(Debug, Deserialize)]
struct ApiAnnotation {
    nodes: Vec<NodeId>,
}

#[derive(Debug, Deserialize)]
struct ApiTracepoint {
    matchings_index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    code: String,
}

/// Blocking client for an OSRM `match/v1/driving` endpoint.
pub struct MatchClient {
    client: Client,
    base_url: String,
    min_confidence: f64,
}

impl MatchClient {
    /// `base_url` without a trailing slash, e.g. `http://127.0.0.1:5000`.
    pub fn new(base_url: &str, config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| SegmentError::HttpError {
                message: format!("failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            min_confidence: config.min_confidence,
        })
    }

    fn match_url(&self, points: &[crate::TripPoint]) -> String {
        let coordinates = points
            .iter()
            .map(|p| format!("{},{}", p.longitude, p.latitude))
            .collect::<Vec<_>>()
            .join(";");
        let timestamps = points
            .iter()
            .map(|p| p.timestamp.to_string())
            .collect::<Vec<_>>()
            .join(";");

        format!(
            "{}/match/v1/driving/{}?overview=full&annotations=true&geometries=geojson&timestamps={}",
            self.base_url, coordinates, timestamps
        )
    }

    /// Submit one trip. `Ok(None)` when the service reports no match.
    fn raw_match(&self, trip: &RawTrip) -> Result<Option<MatchResponse>> {
        let url = self.match_url(&trip.points);
        debug!("matching trip {} ({} points)", trip.trip_id, trip.points.len());

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| SegmentError::HttpError {
                message: format!("match request failed: {}", e),
                status_code: e.status().map(|s| s.as_u16()),
            })?;

        let status = response.status();
        if !status.is_success() {
            let first_timestamp = trip.points.first().map(|p| p.timestamp).unwrap_or(0);
            let error: ErrorResponse =
                response.json().map_err(|e| SegmentError::HttpError {
                    message: format!("unreadable error response: {}", e),
                    status_code: Some(status.as_u16()),
                })?;

            if NO_MATCH_CODES.contains(&error.code.as_str()) {
                debug!("trip {} not matchable ({})", trip.trip_id, error.code);
                return Ok(None);
            }

            warn!("match service rejected trip {}: {}", trip.trip_id, error.code);
            return Err(SegmentError::MatchServiceError {
                code: error.code,
                first_timestamp,
            });
        }

        let body: MatchResponse = response.json().map_err(|e| SegmentError::HttpError {
            message: format!("malformed match response: {}", e),
            status_code: Some(status.as_u16()),
        })?;
        Ok(Some(body))
    }
}

impl TripMatcher for MatchClient {
    fn match_trip(&self, trip: &RawTrip) -> Result<Option<MatchedTrip>> {
        match self.raw_match(trip)? {
            Some(response) => Ok(process_response(trip, response, self.min_confidence)),
            None => Ok(None),
        }
    }
}

/// Keep confident matchings, narrow the trip's points to the surviving
/// tracepoints. `None` when no matching clears the threshold.
fn process_response(
    trip: &RawTrip,
    response: MatchResponse,
    min_confidence: f64,
) -> Option<MatchedTrip> {
    assert!(
        response.tracepoints.len() == trip.points.len(),
        "process_response: {} tracepoints for {} submitted points",
        response.tracepoints.len(),
        trip.points.len()
    );

    // Indexes of matchings above the confidence threshold, original order
    let kept: Vec<usize> = response
        .matchings
        .iter()
        .enumerate()
        .filter(|(_, m)| m.confidence > min_confidence)
        .map(|(index, _)| index)
        .collect();

    if kept.is_empty() {
        return None;
    }

    let points: Vec<_> = trip
        .points
        .iter()
        .zip(&response.tracepoints)
        .filter(|(_, tracepoint)| {
            tracepoint
                .as_ref()
                .map_or(false, |t| kept.contains(&t.matchings_index))
        })
        .map(|(point, _)| *point)
        .collect();

    let matchings: Vec<Matching> = response
        .matchings
        .into_iter()
        .enumerate()
        .filter(|(index, _)| kept.contains(index))
        .map(|(_, m)| Matching {
            confidence: m.confidence,
            legs: m
                .legs
                .into_iter()
                .map(|leg| Leg {
                    nodes: leg.annotation.nodes,
                })
                .collect(),
        })
        .collect();

    Some(MatchedTrip {
        trip_id: trip.trip_id,
        device_id: trip.device_id,
        points,
        matchings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TripPoint;

    const T: i64 = 1570406400;

    fn raw_trip(point_count: usize) -> RawTrip {
        RawTrip {
            trip_id: 7,
            device_id: 42,
            points: (0..point_count)
                .map(|i| TripPoint::new(7, 42, 10.2 + i as f64 * 0.001, 56.1, T + i as i64))
                .collect(),
        }
    }

    fn response_fixture() -> MatchResponse {
        serde_json::from_str(
            r#"{
                "code": "Ok",
                "matchings": [
                    {
                        "confidence": 0.99,
                        "legs": [
                            {"annotation": {"nodes": [1, 2, 3]}},
                            {"annotation": {"nodes": [3, 4]}}
                        ]
                    },
                    {
                        "confidence": 0.2,
                        "legs": [
                            {"annotation": {"nodes": [10, 11]}}
                        ]
                    }
                ],
                "tracepoints": [
                    {"matchings_index": 0},
                    {"matchings_index": 0},
                    null,
                    {"matchings_index": 0},
                    {"matchings_index": 1}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_response_deserializes() {
        let response = response_fixture();
        assert_eq!(response.matchings.len(), 2);
        assert_eq!(response.matchings[0].legs[0].annotation.nodes, vec![1, 2, 3]);
        assert!(response.tracepoints[2].is_none());
    }

    #[test]
    fn test_process_filters_and_narrows() {
        let trip = raw_trip(5);
        let matched = process_response(&trip, response_fixture(), 0.85).unwrap();

        // The low-confidence matching is dropped, and with it the tracepoint
        // assigned to it and the unmatched point
        assert_eq!(matched.matchings.len(), 1);
        assert_eq!(matched.matchings[0].legs.len(), 2);
        assert_eq!(
            matched.points.iter().map(|p| p.timestamp).collect::<Vec<_>>(),
            vec![T, T + 1, T + 3]
        );
        assert_eq!(matched.trip_id, 7);
        assert_eq!(matched.device_id, 42);
    }

    #[test]
    fn test_process_rejects_all_low_confidence() {
        let trip = raw_trip(5);
        let mut response = response_fixture();
        response.matchings[0].confidence = 0.5;

        assert!(process_response(&trip, response, 0.85).is_none());
    }

    #[test]
    #[should_panic(expected = "tracepoints for")]
    fn test_tracepoint_count_mismatch_is_contract_violation() {
        let trip = raw_trip(3);
        process_response(&trip, response_fixture(), 0.85);
    }

    #[test]
    fn test_match_url_format() {
        let client = MatchClient::new("http://127.0.0.1:5000/", &PipelineConfig::default()).unwrap();
        let points = vec![
            TripPoint::new(7, 42, 10.25, 56.5, T),
            TripPoint::new(7, 42, 10.5, 56.75, T + 1),
        ];
        let url = client.match_url(&points);

        assert!(url.starts_with("http://127.0.0.1:5000/match/v1/driving/10.25,56.5;10.5,56.75?"));
        assert!(url.contains("overview=full"));
        assert!(url.contains("annotations=true"));
        assert!(url.contains("geometries=geojson"));
        assert!(url.ends_with(&format!("timestamps={};{}", T, T + 1)));
    }
}
