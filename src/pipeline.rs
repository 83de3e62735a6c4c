//! Batch driver: trips in, day-keyed bulk segment writes out.
//!
//! The pipeline is strictly sequential. One trip at a time flows through the
//! aggregator and the segment builder, and the finished segments accumulate
//! in a calendar-day buffer. When a trip lands on a new day the buffered day
//! is annotated with distances and handed to the sink as one bulk write.

use std::time::Instant;

use chrono::NaiveDate;
use log::{debug, info};

use crate::aggregate::aggregate_edges_with_offset;
use crate::error::Result;
use crate::network::{annotate_distances, IntersectionSet, RoadNetwork};
use crate::topology::build_segments;
use crate::{MatchedTrip, PipelineConfig, Segment, TripPoint};

/// Sequential source of matched trips.
pub trait TripSource {
    /// Next trip, or `None` when the source is exhausted.
    fn next_trip(&mut self) -> Result<Option<MatchedTrip>>;
}

/// Destination for one calendar day of annotated segments.
///
/// Each call hands over a complete day as one bulk operation; whether the
/// write replaces or appends to prior content for that destination is the
/// implementation's policy.
pub trait SegmentSink {
    fn store_day(&mut self, day: NaiveDate, segments: &[Segment]) -> Result<()>;
}

/// One trip's raw positional fixes, before map matching.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrip {
    pub trip_id: i64,
    pub device_id: i64,
    pub points: Vec<TripPoint>,
}

/// Map-matching collaborator: raw trip in, filtered matchings and surviving
/// points out. `Ok(None)` means the service found no match, a skippable
/// condition.
pub trait TripMatcher {
    fn match_trip(&self, trip: &RawTrip) -> Result<Option<MatchedTrip>>;
}

/// [`TripSource`] adapter that runs raw trips through a matcher, skipping
/// trips that are too short or that yield no confident matchings.
pub struct MatchingSource<I, M> {
    trips: I,
    matcher: M,
    min_trip_points: usize,
}

impl<I, M> MatchingSource<I, M> {
    pub fn new(trips: I, matcher: M, config: &PipelineConfig) -> Self {
        Self {
            trips,
            matcher,
            min_trip_points: config.min_trip_points,
        }
    }
}

impl<I, M> TripSource for MatchingSource<I, M>
where
    I: Iterator<Item = Result<RawTrip>>,
    M: TripMatcher,
{
    fn next_trip(&mut self) -> Result<Option<MatchedTrip>> {
        for raw in self.trips.by_ref() {
            let raw = raw?;

            if raw.points.len() < self.min_trip_points {
                debug!(
                    "trip {} has {} points, below threshold {}, skipped",
                    raw.trip_id,
                    raw.points.len(),
                    self.min_trip_points
                );
                continue;
            }

            match self.matcher.match_trip(&raw)? {
                Some(trip) if !trip.matchings.is_empty() => return Ok(Some(trip)),
                _ => {
                    debug!("trip {} produced no confident matching, skipped", raw.trip_id);
                    continue;
                }
            }
        }
        Ok(None)
    }
}

/// Transient accumulator for one calendar day of segments.
#[derive(Debug, Default)]
struct DayBuffer {
    segments: Vec<Segment>,
}

impl DayBuffer {
    fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Calendar day of the leading entry.
    fn day(&self) -> Option<NaiveDate> {
        self.segments.first().map(|s| s.start.date())
    }

    fn seed(&mut self, segments: Vec<Segment>) {
        self.segments = segments;
    }

    fn append(&mut self, segments: Vec<Segment>) {
        self.segments.extend(segments);
    }

    fn take(&mut self) -> Vec<Segment> {
        std::mem::take(&mut self.segments)
    }
}

/// Orchestrates aggregate -> build -> buffer -> flush for a stream of trips.
pub struct BatchDriver<'a> {
    intersections: &'a IntersectionSet,
    network: &'a RoadNetwork,
    sink: &'a mut dyn SegmentSink,
    config: PipelineConfig,
    buffer: DayBuffer,
}

impl<'a> BatchDriver<'a> {
    pub fn new(
        intersections: &'a IntersectionSet,
        network: &'a RoadNetwork,
        sink: &'a mut dyn SegmentSink,
        config: PipelineConfig,
    ) -> Self {
        Self {
            intersections,
            network,
            sink,
            config,
            buffer: DayBuffer::default(),
        }
    }

    /// Drain the source, then flush the trailing buffer.
    ///
    /// With `stop_after_first_flush` set, returns right after the first
    /// day-boundary flush instead, leaving later trips unread — the
    /// original batch job's single-day mode.
    pub fn run(&mut self, source: &mut dyn TripSource) -> Result<()> {
        while let Some(trip) = source.next_trip()? {
            let flushed = self.process_trip(trip)?;
            if flushed && self.config.stop_after_first_flush {
                info!("first day flushed, stopping");
                return Ok(());
            }
        }
        self.finish()
    }

    /// Run one trip through the transform pair and fold the result into the
    /// day buffer. Returns whether a day boundary forced a flush.
    pub fn process_trip(&mut self, trip: MatchedTrip) -> Result<bool> {
        let started = Instant::now();
        let edges = aggregate_edges_with_offset(
            &trip.points,
            &trip.matchings,
            self.config.local_offset_hours,
        );
        debug!("aggregate - {:?}", started.elapsed());

        let segments = build_segments(&edges, self.intersections, trip.trip_id, trip.device_id);
        debug!("topologize - {:?}", started.elapsed());

        if segments.is_empty() {
            debug!("trip {} yielded no segments, skipped", trip.trip_id);
            return Ok(false);
        }

        let day = segments[0].start.date();
        match self.buffer.day() {
            None => {
                debug!("buffer seeded for {}", day);
                self.buffer.seed(segments);
                Ok(false)
            }
            Some(buffered_day) if buffered_day != day => {
                self.flush(buffered_day)?;
                self.buffer.seed(segments);
                Ok(true)
            }
            Some(_) => {
                self.buffer.append(segments);
                Ok(false)
            }
        }
    }

    /// Flush whatever day is still buffered. Call after the source is
    /// exhausted; without it the trailing day is lost.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(day) = self.buffer.day() {
            self.flush(day)?;
        }
        Ok(())
    }

    fn flush(&mut self, day: NaiveDate) -> Result<()> {
        let mut segments = self.buffer.take();
        annotate_distances(&mut segments, self.network);
        info!("flushing {} segments for {}", segments.len(), day);
        self.sink.store_day(day, &segments)
    }
}
