//! Segment planner: turns the trim list into the ordered set of source
//! spans that survive into the output.

use crate::config::TrimRegion;

/// A retained span of the source timeline, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Clamp, drop degenerates, and sort the trim list into a canonical form.
fn normalized_trims(duration_ms: f64, trims: &[TrimRegion]) -> Vec<(f64, f64)> {
    let mut regions: Vec<(f64, f64)> = trims
        .iter()
        .map(|t| (t.start_ms.max(0.0), t.end_ms.min(duration_ms)))
        .filter(|(start, end)| end > start)
        .collect();
    regions.sort_by(|a, b| a.0.total_cmp(&b.0));
    regions
}

/// The retained complement of the trim list, as millisecond intervals.
///
/// Walks a cursor over the sorted trims, emitting an interval for every
/// gap before the next trim start. Overlapping trims collapse because
/// the cursor only ever moves forward.
fn retained_intervals_ms(duration_ms: f64, trims: &[TrimRegion]) -> Vec<(f64, f64)> {
    let mut intervals = Vec::new();
    let mut cursor = 0.0f64;
    for (start, end) in normalized_trims(duration_ms, trims) {
        if start > cursor {
            intervals.push((cursor, start));
        }
        cursor = cursor.max(end);
    }
    if cursor < duration_ms {
        intervals.push((cursor, duration_ms));
    }
    intervals
}

/// Plan the capture segments for a recording of `duration_ms` under the
/// given trim list. Output segments are non-overlapping, sorted, and
/// cover exactly the retained portion of the timeline.
pub fn plan_segments(duration_ms: f64, trims: &[TrimRegion]) -> Vec<Segment> {
    retained_intervals_ms(duration_ms, trims)
        .into_iter()
        .map(|(start, end)| Segment {
            start: start / 1000.0,
            end: end / 1000.0,
        })
        .collect()
}

/// The same retained complement expressed as sample-frame index ranges
/// `[start, end)` at `sample_rate`, for the audio splicer. Derived from
/// the identical interval walk so audio and video always agree on what
/// was cut.
pub fn retained_sample_ranges(
    duration_ms: f64,
    trims: &[TrimRegion],
    sample_rate: u32,
) -> Vec<(usize, usize)> {
    let rate = sample_rate as f64 / 1000.0;
    retained_intervals_ms(duration_ms, trims)
        .into_iter()
        .map(|(start, end)| ((start * rate).round() as usize, (end * rate).round() as usize))
        .filter(|(start, end)| end > start)
        .collect()
}
