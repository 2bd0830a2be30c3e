use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// One telemetry sample as published on the readings topic.
///
/// Some device firmware publishes the capture instant under `timestamp`
/// instead of `time`; `time` is canonical and the alias accepts both.
/// The electrical fields are deserialized leniently: a missing, null or
/// non-numeric value becomes `None` instead of a decode failure, because a
/// malformed sample must neither trigger an alert nor crash a consumer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: i64,
    #[serde(alias = "timestamp", skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
}

/// A stored reading as selected from the `readings` table.
#[derive(Clone, Debug, FromRow)]
pub struct ReadingRow {
    pub id: i64,
    pub device_id: i64,
    pub time: Option<String>,
    pub current: Option<f64>,
    pub voltage: Option<f64>,
    pub power: Option<f64>,
    pub created_at: i64,
}

impl From<ReadingRow> for Reading {
    fn from(row: ReadingRow) -> Self {
        Reading {
            device_id: row.device_id,
            time: row.time,
            current: row.current,
            voltage: row.voltage,
            power: row.power,
        }
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;

    Ok(value.and_then(|value| match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_timestamp_field_alias() {
        let reading: Reading = serde_json::from_str(
            r#"{"device_id":2,"timestamp":"2024-01-01T00:00:00Z","power":9999}"#,
        )
        .unwrap();

        assert_eq!(reading.time.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(reading.power, Some(9999.0));
    }

    #[test]
    fn missing_power_becomes_none() {
        let reading: Reading = serde_json::from_str(r#"{"device_id":3}"#).unwrap();

        assert_eq!(reading.power, None);
        assert_eq!(reading.time, None);
    }

    #[test]
    fn non_numeric_power_becomes_none() {
        let reading: Reading =
            serde_json::from_str(r#"{"device_id":3,"power":"broken","voltage":null}"#).unwrap();

        assert_eq!(reading.power, None);
        assert_eq!(reading.voltage, None);
    }

    #[test]
    fn numeric_strings_are_coerced() {
        let reading: Reading =
            serde_json::from_str(r#"{"device_id":3,"power":"209.0"}"#).unwrap();

        assert_eq!(reading.power, Some(209.0));
    }

    #[test]
    fn serializes_without_empty_fields() {
        let reading = Reading {
            device_id: 1,
            time: Some("2024-01-01T00:00:00Z".to_string()),
            current: None,
            voltage: None,
            power: Some(1500.0),
        };

        let json = serde_json::to_string(&reading).unwrap();
        assert_eq!(
            json,
            r#"{"device_id":1,"time":"2024-01-01T00:00:00Z","power":1500.0}"#
        );
    }
}
