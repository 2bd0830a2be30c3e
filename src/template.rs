use crate::aggregate::{DeviceAverage, NormalizedReading, Summary};
use askama::Template;
use chrono::{TimeZone, Utc};

#[derive(Template)]
#[template(path = "index.html")]
pub(crate) struct IndexTemplate {
    pub devices: Vec<DeviceOption>,
    pub min_power: String,
    pub date: String,
}

pub(crate) struct DeviceOption {
    pub id: String,
    pub selected: bool,
}

#[derive(Template)]
#[template(path = "_stats.html")]
pub(crate) struct StatsTemplate {
    pub latest: Option<LatestView>,
    pub avg_power: i64,
    pub max_power: String,
    pub power_by_device: Vec<DeviceAverage>,
}

pub(crate) struct LatestView {
    pub device: String,
    pub power: String,
    pub time: String,
}

impl From<&Summary> for StatsTemplate {
    fn from(summary: &Summary) -> Self {
        StatsTemplate {
            latest: summary.latest.as_ref().map(|latest| LatestView {
                device: latest.reading.device_id.to_string(),
                power: format_unit(latest.reading.power, "W"),
                time: format_time_ms(latest.time_ms),
            }),
            avg_power: summary.avg_power,
            max_power: format!("{} W", summary.max_power),
            power_by_device: summary.power_by_device.clone(),
        }
    }
}

#[derive(Template)]
#[template(path = "_reading.html")]
pub(crate) struct ReadingTemplate {
    pub device_id: i64,
    pub time: String,
    pub current: String,
    pub voltage: String,
    pub power: String,
}

impl From<&NormalizedReading> for ReadingTemplate {
    fn from(row: &NormalizedReading) -> Self {
        ReadingTemplate {
            device_id: row.reading.device_id,
            time: format_time_ms(row.time_ms),
            current: format_unit(row.reading.current, "A"),
            voltage: format_unit(row.reading.voltage, "V"),
            power: format_unit(row.reading.power, "W"),
        }
    }
}

fn format_time_ms(time_ms: i64) -> String {
    Utc.timestamp_millis_opt(time_ms)
        .single()
        .map(|instant| instant.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "—".to_string())
}

fn format_unit(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(value) => format!("{} {}", value, unit),
        None => "—".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::Reading;

    #[test]
    fn reading_rows_render_placeholders_for_missing_values() {
        let row = NormalizedReading {
            reading: Reading {
                device_id: 3,
                time: Some("2024-01-01T00:00:00Z".to_string()),
                current: None,
                voltage: None,
                power: Some(209.0),
            },
            time_ms: 1_704_067_200_000,
        };

        let template = ReadingTemplate::from(&row);
        assert_eq!(template.time, "2024-01-01 00:00:00");
        assert_eq!(template.current, "—");
        assert_eq!(template.power, "209 W");
    }

    #[test]
    fn empty_summary_renders_without_a_latest_reading() {
        let template = StatsTemplate::from(&Summary::default());

        assert!(template.latest.is_none());
        assert_eq!(template.avg_power, 0);
        assert_eq!(template.max_power, "0 W");
        assert!(template.render().unwrap().contains("—"));
    }
}
