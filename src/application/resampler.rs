// Chart resampler - Fixed-width time buckets for render-ready series
use crate::domain::reading::{Reading, TimeRange};
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Upper bound on buckets for windows longer than a week.
const MAX_LONG_WINDOW_BUCKETS: i64 = 800;

/// One slice of the window and the reading that represents it.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    pub width: Duration,
    pub reading: Reading,
}

/// Bucket width for a window of the given length.
pub fn bucket_width(window: Duration) -> Duration {
    if window <= Duration::hours(1) {
        Duration::seconds(30)
    } else if window <= Duration::hours(24) {
        Duration::seconds(120)
    } else if window <= Duration::days(7) {
        Duration::seconds(600)
    } else {
        let millis = window.num_milliseconds();
        Duration::milliseconds((millis + MAX_LONG_WINDOW_BUCKETS - 1) / MAX_LONG_WINDOW_BUCKETS)
    }
}

/// `ceil(duration / width)`; zero for an empty window.
pub fn bucket_count(window: TimeRange) -> usize {
    let duration = window.duration().num_milliseconds();
    if duration <= 0 {
        return 0;
    }
    let width = bucket_width(window.duration()).num_milliseconds();
    ((duration + width - 1) / width) as usize
}

/// One reading per bucket, strictly increasing in time.
pub fn resample(readings: &[Reading], window: TimeRange) -> Vec<Reading> {
    buckets(readings, window).into_iter().map(|b| b.reading).collect()
}

/// Partition `window` into equal buckets and aggregate `readings` into them.
///
/// Readings outside the window are clamped into the first or last bucket.
/// Empty buckets become idle zero-power readings that repeat the last known
/// percentage; buckets before the first sample repeat the first one.
pub fn buckets(readings: &[Reading], window: TimeRange) -> Vec<Bucket> {
    let window = window.normalized();
    let count = bucket_count(window);
    if count == 0 {
        return Vec::new();
    }

    let width = bucket_width(window.duration());
    let width_ms = width.num_milliseconds();
    let start_ms = window.start.timestamp_millis();
    let end_ms = window.end.timestamp_millis();

    let mut sorted: Vec<&Reading> = readings.iter().collect();
    sorted.sort_by_key(|r| r.timestamp);

    let mut members: Vec<Vec<&Reading>> = vec![Vec::new(); count];
    for reading in sorted {
        let offset = reading.timestamp.timestamp_millis() - start_ms;
        let index = if offset < 0 {
            0
        } else {
            ((offset / width_ms) as usize).min(count - 1)
        };
        members[index].push(reading);
    }

    let aggregated: Vec<Option<Reading>> = members
        .iter()
        .enumerate()
        .map(|(i, group)| {
            let bucket_start = start_ms + i as i64 * width_ms;
            let midpoint = midpoint(bucket_start, width_ms, end_ms);
            (!group.is_empty()).then(|| aggregate(group, midpoint))
        })
        .collect();

    let mut carried = aggregated
        .iter()
        .flatten()
        .next()
        .map(|r| r.percentage)
        .unwrap_or(0);

    aggregated
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            let bucket_start = start_ms + i as i64 * width_ms;
            let reading = match slot {
                Some(reading) => {
                    carried = reading.percentage;
                    reading
                }
                None => Reading::idle(midpoint(bucket_start, width_ms, end_ms), 0.0, carried),
            };
            Bucket {
                start: millis_to_datetime(bucket_start),
                width,
                reading,
            }
        })
        .collect()
}

/// Centre of the bucket, with the final bucket cut off at the window end.
fn midpoint(bucket_start: i64, width_ms: i64, end_ms: i64) -> DateTime<Utc> {
    let bucket_end = (bucket_start + width_ms).min(end_ms);
    millis_to_datetime(bucket_start + (bucket_end - bucket_start) / 2)
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn aggregate(members: &[&Reading], timestamp: DateTime<Utc>) -> Reading {
    let n = members.len() as f64;
    let power = members.iter().map(|r| r.power_w).sum::<f64>() / n;
    let voltage = members.iter().map(|r| r.voltage_mv).sum::<f64>() / n;
    let current = members.iter().map(|r| r.current_ma).sum::<f64>() / n;
    let percentage = (members.iter().map(|r| r.percentage as f64).sum::<f64>() / n).round() as u8;
    let is_charging = members.iter().any(|r| r.is_delivering_power());

    let reading = if is_charging {
        Reading::charging(timestamp, voltage, current, power, percentage)
    } else {
        Reading::idle(timestamp, voltage, percentage)
    };

    match members.last() {
        Some(last) => reading.with_details(last.details()),
        None => reading,
    }
}
