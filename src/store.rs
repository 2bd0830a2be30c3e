//! Thin relay between the broker and SQLite: every reading published on the
//! telemetry topic becomes one row the dashboard can query. No retention
//! logic lives here; the table simply grows and the dashboard only ever asks
//! for the most recent window.

use crate::dto::TopicMessage;
use crate::util::{config::get_config, connect_to_mqtt};
use chrono::Utc;
use rumqttc::{ConnAck, ConnectReturnCode, Event, Incoming, QoS, SubAck};
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub async fn start_server(pool: SqlitePool) -> anyhow::Result<()> {
    let readings_topic = get_config().get_string("readings_topic")?;
    info!("Starting telemetry store");

    let (client, mut eventloop) = connect_to_mqtt("store", Some(&readings_topic)).await?;

    loop {
        let event = eventloop.poll().await;
        match &event {
            Err(e) => {
                error!("MQTT error: {:?}", e);

                // Only retry every 5 seconds
                sleep(Duration::from_secs(5)).await;

                warn!("Retrying after MQTT error.");
            }
            Ok(Event::Incoming(Incoming::ConnAck(ConnAck {
                session_present,
                code: ConnectReturnCode::Success,
            }))) => {
                info!("Reconnected to broker!");

                if !session_present {
                    info!("Resubscribing to topic {}", readings_topic);
                    client.subscribe(&readings_topic, QoS::AtLeastOnce).await?;
                }
            }
            Ok(Event::Incoming(Incoming::SubAck(SubAck { .. }))) => {
                info!("MQTT subscribed to {}", readings_topic);
            }
            Ok(Event::Incoming(Incoming::Publish(p))) => {
                match serde_json::from_slice::<TopicMessage>(&p.payload) {
                    Ok(TopicMessage::Reading(reading)) => {
                        let created_at = Utc::now().timestamp_nanos_opt().unwrap_or_default();

                        let insert = sqlx::query(
                            "INSERT INTO readings (device_id, time, current, voltage, power, created_at)
                             VALUES (?, ?, ?, ?, ?, ?)",
                        )
                        .bind(reading.device_id)
                        .bind(reading.time.clone())
                        .bind(reading.current)
                        .bind(reading.voltage)
                        .bind(reading.power)
                        .bind(created_at)
                        .execute(&pool)
                        .await;

                        // One bad row must not take the relay down.
                        if let Err(err) = insert {
                            error!(
                                "Failed to store reading from device {}: {}",
                                reading.device_id, err
                            );
                        }
                    }
                    Ok(TopicMessage::Command(command)) => {
                        debug!("Skipping command for device {}", command.device_id);
                    }
                    Err(err) => {
                        warn!("Undecodable payload on {}: {}", p.topic, err);
                    }
                }
            }
            event => {
                debug!("MQTT event: {:?}", event);
            }
        }
    }
}
