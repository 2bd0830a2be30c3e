pub mod command;
pub mod reading;

pub use command::ShutdownCommand;
pub use reading::{Reading, ReadingRow};

use serde::Deserialize;

/// Everything that can appear on the shared telemetry topic. Commands are
/// tried first so a shutdown echo is never mistaken for a reading.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TopicMessage {
    Command(ShutdownCommand),
    Reading(Reading),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_payloads_are_not_readings() {
        let message: TopicMessage =
            serde_json::from_str(r#"{"device_id":2,"command":"shutdown"}"#).unwrap();

        match message {
            TopicMessage::Command(command) => {
                assert_eq!(command.device_id, 2);
                assert_eq!(command.command, "shutdown");
            }
            TopicMessage::Reading(_) => panic!("command parsed as reading"),
        }
    }

    #[test]
    fn reading_payloads_fall_through_to_readings() {
        let message: TopicMessage = serde_json::from_str(
            r#"{"device_id":1,"time":"2024-01-01T00:00:00Z","current":0.85,"voltage":220,"power":1500}"#,
        )
        .unwrap();

        match message {
            TopicMessage::Reading(reading) => {
                assert_eq!(reading.device_id, 1);
                assert_eq!(reading.power, Some(1500.0));
            }
            TopicMessage::Command(_) => panic!("reading parsed as command"),
        }
    }
}
