//! Dashboard-side shaping of the telemetry stream: a bounded window of the
//! most recent readings plus the pure normalize/filter/summarize pipeline
//! that turns it into display-ready values. No I/O happens here, so the
//! rendered view is the same whether it is recomputed eagerly or lazily.

use crate::dto::Reading;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use itertools::Itertools;
use std::collections::{BTreeMap, VecDeque};

/// Number of readings the dashboard keeps in memory.
pub const WINDOW_SIZE: usize = 50;

/// Bounded window of the most recent readings, stored newest-first.
/// Anything older than the capacity is discarded with no archival.
#[derive(Clone, Debug)]
pub struct WorkingSet {
    capacity: usize,
    rows: VecDeque<Reading>,
}

impl Default for WorkingSet {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::with_capacity(WINDOW_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            rows: VecDeque::with_capacity(capacity),
        }
    }

    /// Replace the window with an initial batch, newest first.
    pub fn load_initial<I: IntoIterator<Item = Reading>>(&mut self, newest_first: I) {
        self.rows.clear();
        self.rows
            .extend(newest_first.into_iter().take(self.capacity));
    }

    /// Append a live reading, evicting the oldest entry beyond capacity.
    pub fn push(&mut self, reading: Reading) {
        self.rows.push_front(reading);
        self.rows.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn normalized(&self) -> Vec<NormalizedReading> {
        normalize(self.rows.iter())
    }

    /// Distinct device ids present in the window, for the filter dropdown.
    pub fn device_ids(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|reading| reading.device_id)
            .sorted()
            .dedup()
            .map(|id| id.to_string())
            .collect()
    }
}

/// A reading with its derived numeric time, ready for chronological display.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedReading {
    pub reading: Reading,
    pub time_ms: i64,
}

/// Drop readings without a parsable time, attach epoch milliseconds and sort
/// ascending. The sort is stable over the derived key, so normalizing an
/// already-normalized sequence yields the same order.
pub fn normalize<'a, I>(rows: I) -> Vec<NormalizedReading>
where
    I: IntoIterator<Item = &'a Reading>,
{
    let mut normalized: Vec<NormalizedReading> = rows
        .into_iter()
        .filter_map(|reading| {
            let time_ms = reading.time.as_deref().and_then(parse_time_ms)?;
            Some(NormalizedReading {
                reading: reading.clone(),
                time_ms,
            })
        })
        .collect();

    normalized.sort_by_key(|row| row.time_ms);
    normalized
}

/// Epoch milliseconds for an ISO-8601 instant. Date-only strings count as
/// midnight UTC, since some feeds stamp readings with a bare date.
pub fn parse_time_ms(time: &str) -> Option<i64> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(time) {
        return Some(parsed.timestamp_millis());
    }

    if let Ok(parsed) = NaiveDateTime::parse_from_str(time, "%Y-%m-%dT%H:%M:%S") {
        return Some(parsed.and_utc().timestamp_millis());
    }

    NaiveDate::parse_from_str(time, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().timestamp_millis())
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum DeviceFilter {
    #[default]
    All,
    Id(String),
}

impl DeviceFilter {
    /// A blank or "all" selection matches every device.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some("all") => DeviceFilter::All,
            Some(id) => DeviceFilter::Id(id.to_string()),
        }
    }
}

/// The dashboard filter dimensions. A missing value means "match all" on
/// that dimension; the minimum power defaults to zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadingFilter {
    pub device: DeviceFilter,
    pub min_power: f64,
    pub date_prefix: Option<String>,
}

impl ReadingFilter {
    pub fn matches(&self, row: &NormalizedReading) -> bool {
        let device_ok = match &self.device {
            DeviceFilter::All => true,
            DeviceFilter::Id(id) => row.reading.device_id.to_string() == *id,
        };

        // Missing power counts as zero, so it only passes a zero minimum.
        let power_ok = row.reading.power.unwrap_or(0.0) >= self.min_power;

        let date_ok = match &self.date_prefix {
            None => true,
            Some(prefix) => row
                .reading
                .time
                .as_deref()
                .unwrap_or("")
                .starts_with(prefix.as_str()),
        };

        device_ok && power_ok && date_ok
    }

    pub fn apply(&self, rows: &[NormalizedReading]) -> Vec<NormalizedReading> {
        rows.iter().filter(|row| self.matches(row)).cloned().collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceAverage {
    pub device: String,
    pub avg_power: i64,
}

/// Scalar summaries over the filtered window. An empty window yields zeroes
/// and no latest reading; nothing here can panic on empty input.
#[derive(Clone, Debug, Default)]
pub struct Summary {
    pub latest: Option<NormalizedReading>,
    pub avg_power: i64,
    pub max_power: f64,
    pub power_by_device: Vec<DeviceAverage>,
}

pub fn summarize(rows: &[NormalizedReading]) -> Summary {
    let latest = rows.last().cloned();

    let power_of = |row: &NormalizedReading| row.reading.power.unwrap_or(0.0);

    let avg_power = if rows.is_empty() {
        0
    } else {
        let sum: f64 = rows.iter().map(power_of).sum();
        (sum / rows.len() as f64).round() as i64
    };

    let max_power = rows.iter().map(power_of).fold(0.0_f64, f64::max);

    let mut per_device: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
    for row in rows {
        let entry = per_device.entry(row.reading.device_id).or_insert((0.0, 0));
        entry.0 += power_of(row);
        entry.1 += 1;
    }

    let power_by_device = per_device
        .into_iter()
        .map(|(device, (sum, count))| DeviceAverage {
            device: device.to_string(),
            avg_power: (sum / count as f64).round() as i64,
        })
        .collect();

    Summary {
        latest,
        avg_power,
        max_power,
        power_by_device,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(device_id: i64, power: Option<f64>, time: Option<&str>) -> Reading {
        Reading {
            device_id,
            time: time.map(str::to_string),
            current: None,
            voltage: None,
            power,
        }
    }

    #[test]
    fn normalize_drops_unparsable_times_and_sorts_ascending() {
        let rows = vec![
            reading(1, Some(500.0), Some("2024-01-02T00:00:00Z")),
            reading(2, Some(100.0), Some("not a time")),
            reading(3, Some(300.0), None),
            reading(1, Some(1500.0), Some("2024-01-01T00:00:00Z")),
        ];

        let normalized = normalize(rows.iter());

        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].reading.power, Some(1500.0));
        assert_eq!(normalized[1].reading.power, Some(500.0));
        assert!(normalized[0].time_ms < normalized[1].time_ms);
    }

    #[test]
    fn normalize_is_idempotent() {
        let rows = vec![
            reading(1, Some(500.0), Some("2024-01-03T00:00:00Z")),
            reading(2, Some(100.0), Some("2024-01-01T00:00:00Z")),
            reading(3, Some(300.0), Some("2024-01-02T00:00:00Z")),
        ];

        let once = normalize(rows.iter());
        let readings_again: Vec<Reading> =
            once.iter().map(|row| row.reading.clone()).collect();
        let twice = normalize(readings_again.iter());

        assert_eq!(once, twice);
    }

    #[test]
    fn parse_time_ms_handles_common_shapes() {
        assert_eq!(parse_time_ms("1970-01-01T00:00:00Z"), Some(0));
        assert_eq!(parse_time_ms("1970-01-01T00:00:01"), Some(1000));
        assert_eq!(parse_time_ms("1970-01-02"), Some(86_400_000));
        assert_eq!(parse_time_ms("yesterday"), None);
        assert_eq!(parse_time_ms(""), None);
    }

    #[test]
    fn window_never_exceeds_capacity_and_keeps_the_newest() {
        let mut window = WorkingSet::new();

        for i in 0..60 {
            window.push(reading(i, Some(i as f64), Some("2024-01-01T00:00:00Z")));
        }

        assert_eq!(window.len(), WINDOW_SIZE);

        // The newest 50 by arrival are devices 10..=59.
        let ids = window.device_ids();
        assert!(ids.contains(&"59".to_string()));
        assert!(ids.contains(&"10".to_string()));
        assert!(!ids.contains(&"9".to_string()));
    }

    #[test]
    fn load_initial_truncates_to_capacity() {
        let mut window = WorkingSet::with_capacity(2);
        window.load_initial(vec![
            reading(1, Some(1.0), None),
            reading(2, Some(2.0), None),
            reading(3, Some(3.0), None),
        ]);

        assert_eq!(window.len(), 2);
    }

    #[test]
    fn device_filter_compares_by_string_equality() {
        let rows = normalize(
            [
                reading(1, Some(1500.0), Some("2024-01-01")),
                reading(10, Some(500.0), Some("2024-01-02")),
            ]
            .iter(),
        );

        let filter = ReadingFilter {
            device: DeviceFilter::parse(Some("1")),
            ..Default::default()
        };

        let filtered = filter.apply(&rows);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].reading.device_id, 1);
    }

    #[test]
    fn min_power_excludes_readings_below_it() {
        let rows = normalize(
            [
                reading(1, Some(499.9), Some("2024-01-01")),
                reading(1, Some(500.0), Some("2024-01-02")),
                reading(1, None, Some("2024-01-03")),
            ]
            .iter(),
        );

        let filter = ReadingFilter {
            min_power: 500.0,
            ..Default::default()
        };

        let filtered = filter.apply(&rows);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].reading.power, Some(500.0));
    }

    #[test]
    fn date_filter_is_a_prefix_match_on_the_raw_time() {
        let rows = normalize(
            [
                reading(1, Some(100.0), Some("2024-01-01T10:00:00Z")),
                reading(1, Some(200.0), Some("2024-01-02T10:00:00Z")),
            ]
            .iter(),
        );

        let filter = ReadingFilter {
            date_prefix: Some("2024-01-02".to_string()),
            ..Default::default()
        };

        let filtered = filter.apply(&rows);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].reading.power, Some(200.0));
    }

    #[test]
    fn summarize_matches_the_two_reading_scenario() {
        // Device "1", minPower 0: avg 1000, max 1500, latest is the later row.
        let rows = normalize(
            [
                reading(1, Some(1500.0), Some("2024-01-01")),
                reading(1, Some(500.0), Some("2024-01-02")),
            ]
            .iter(),
        );

        let filter = ReadingFilter {
            device: DeviceFilter::parse(Some("1")),
            ..Default::default()
        };

        let summary = summarize(&filter.apply(&rows));
        assert_eq!(summary.avg_power, 1000);
        assert_eq!(summary.max_power, 1500.0);
        assert_eq!(
            summary.latest.unwrap().reading.time.as_deref(),
            Some("2024-01-02")
        );
    }

    #[test]
    fn summarize_yields_zeroes_on_an_empty_window() {
        let summary = summarize(&[]);

        assert_eq!(summary.avg_power, 0);
        assert_eq!(summary.max_power, 0.0);
        assert!(summary.latest.is_none());
        assert!(summary.power_by_device.is_empty());
    }

    #[test]
    fn summarize_counts_missing_power_as_zero_in_the_mean() {
        let rows = normalize(
            [
                reading(1, Some(900.0), Some("2024-01-01")),
                reading(1, None, Some("2024-01-02")),
            ]
            .iter(),
        );

        let summary = summarize(&rows);
        assert_eq!(summary.avg_power, 450);
        assert_eq!(summary.max_power, 900.0);
    }

    #[test]
    fn per_device_averages_are_rounded_means() {
        let rows = normalize(
            [
                reading(1, Some(100.0), Some("2024-01-01")),
                reading(1, Some(201.0), Some("2024-01-02")),
                reading(2, Some(50.0), Some("2024-01-03")),
            ]
            .iter(),
        );

        let summary = summarize(&rows);
        assert_eq!(
            summary.power_by_device,
            vec![
                DeviceAverage {
                    device: "1".to_string(),
                    avg_power: 151
                },
                DeviceAverage {
                    device: "2".to_string(),
                    avg_power: 50
                },
            ]
        );
    }

    #[test]
    fn blank_device_selections_match_all() {
        assert_eq!(DeviceFilter::parse(None), DeviceFilter::All);
        assert_eq!(DeviceFilter::parse(Some("")), DeviceFilter::All);
        assert_eq!(DeviceFilter::parse(Some("all")), DeviceFilter::All);
        assert_eq!(
            DeviceFilter::parse(Some("2")),
            DeviceFilter::Id("2".to_string())
        );
    }
}
