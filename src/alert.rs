//! The threshold rule: one stateless evaluation per incoming reading,
//! issuing at most a shutdown command and an alert notification. The
//! decision is a pure function; the MQTT/webhook plumbing lives in
//! `start_server` and never fails an evaluation.

use crate::dto::{Reading, ShutdownCommand, TopicMessage};
use crate::notify::{AlertMessage, Notifier};
use crate::util::{config::get_config, connect_to_mqtt};
use rumqttc::{AsyncClient, ConnAck, ConnectReturnCode, Event, Incoming, QoS, SubAck};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Strictly above this (watts) triggers; exactly at it does not.
pub const POWER_LIMIT_WATTS: f64 = 1000.0;

pub const ALERT_SUBJECT: &str = "Energy Alert: High Power Usage";

/// What a single reading asks the adapters to do. Both side effects are
/// independent; neither is ordered before or gated on the other.
#[derive(Debug, Default, PartialEq)]
pub struct Evaluation {
    pub command: Option<ShutdownCommand>,
    pub notification: Option<AlertMessage>,
}

pub fn evaluate(reading: &Reading) -> Evaluation {
    // A missing or non-numeric power never exceeds the limit.
    let Some(power) = reading.power else {
        return Evaluation::default();
    };

    if !(power > POWER_LIMIT_WATTS) {
        return Evaluation::default();
    }

    let time = reading.time.as_deref().unwrap_or("unknown");

    Evaluation {
        command: Some(ShutdownCommand::for_device(reading.device_id)),
        notification: Some(AlertMessage {
            subject: ALERT_SUBJECT.to_string(),
            body: format!(
                "High Power Usage Detected!\nDevice: {}\nPower: {}W\nTime: {}",
                reading.device_id, power, time
            ),
        }),
    }
}

pub async fn start_server() -> anyhow::Result<()> {
    let readings_topic = get_config().get_string("readings_topic")?;
    let command_topic = get_config().get_string("command_topic")?;
    info!("Starting alert evaluator (limit {}W)", POWER_LIMIT_WATTS);

    let notifier = Notifier::from_config();
    let (client, mut eventloop) = connect_to_mqtt("alert", Some(&readings_topic)).await?;

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
                        info!(
                            "Device {} reported power {:?}",
                            reading.device_id, reading.power
                        );

                        dispatch(&client, &command_topic, &notifier, evaluate(&reading)).await;
                    }
                    // Our own shutdown echoes come back on the shared topic.
                    Ok(TopicMessage::Command(command)) => {
                        debug!("Ignoring command echo for device {}", command.device_id);
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

/// Issue both side effects best-effort. Errors are logged and swallowed:
/// a dropped command or notification is acceptable, a stalled evaluator is
/// not. Nothing is retried.
async fn dispatch(
    client: &AsyncClient,
    command_topic: &str,
    notifier: &Notifier,
    evaluation: Evaluation,
) {
    let publish_command = async {
        if let Some(command) = &evaluation.command {
            match serde_json::to_vec(command) {
                Ok(payload) => {
                    match client
                        .publish(command_topic, QoS::AtMostOnce, false, payload)
                        .await
                    {
                        Ok(()) => info!("Shutdown command sent to device {}", command.device_id),
                        Err(err) => error!("Command publish error: {:?}", err),
                    }
                }
                Err(err) => error!("Command encode error: {:?}", err),
            }
        }
    };

    let send_notification = async {
        if let Some(message) = &evaluation.notification {
            match notifier.send(message).await {
                Ok(()) => info!("Alert notification sent"),
                Err(err) => error!("Notification error: {:?}", err),
            }
        }
    };

    tokio::join!(publish_command, send_notification);
}
