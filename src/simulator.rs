//! Synthetic device fleet: publishes one reading per device on a fixed
//! cadence and watches the shared topic for shutdown commands. Devices only
//! observe commands; acting on them is left to real firmware.

use crate::dto::{Reading, TopicMessage};
use crate::util::{config::get_config, connect_to_mqtt};
use chrono::Utc;
use rand::Rng;
use rumqttc::{ConnAck, ConnectReturnCode, Event, Incoming, QoS, SubAck};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Broker link lifecycle as observed from the event loop. Rumqttc handles
/// the actual reconnects; this only names and logs what it sees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl LinkState {
    pub fn after_connack(self) -> LinkState {
        LinkState::Connected
    }

    pub fn after_error(self) -> LinkState {
        match self {
            LinkState::Connected | LinkState::Reconnecting => LinkState::Reconnecting,
            LinkState::Disconnected | LinkState::Connecting => LinkState::Connecting,
        }
    }

    fn transition(&mut self, next: LinkState) {
        if *self != next {
            info!("Broker link {:?} -> {:?}", self, next);
            *self = next;
        }
    }
}

struct SimulatedDevice {
    device_id: i64,
    voltage: f64,
    base_power: f64,
}

/// Baselines taken from the reference fleet: one device idling, one far
/// over the limit, one well under it.
const FLEET: [SimulatedDevice; 3] = [
    SimulatedDevice {
        device_id: 1,
        voltage: 220.0,
        base_power: 1500.0,
    },
    SimulatedDevice {
        device_id: 2,
        voltage: 220.0,
        base_power: 9999.0,
    },
    SimulatedDevice {
        device_id: 3,
        voltage: 220.0,
        base_power: 209.0,
    },
];

impl SimulatedDevice {
    fn sample(&self) -> Reading {
        self.sample_with(rand::thread_rng().gen_range(0.9..1.1))
    }

    /// Build a reading with power at `factor` times the baseline, current
    /// derived from it, and the capture time set to now.
    fn sample_with(&self, factor: f64) -> Reading {
        let power = (self.base_power * factor * 10.0).round() / 10.0;
        let current = (power / self.voltage * 100.0).round() / 100.0;

        Reading {
            device_id: self.device_id,
            time: Some(Utc::now().to_rfc3339()),
            current: Some(current),
            voltage: Some(self.voltage),
            power: Some(power),
        }
    }
}

pub async fn start_devices() -> anyhow::Result<()> {
    let readings_topic = get_config().get_string("readings_topic")?;
    let command_topic = get_config().get_string("command_topic")?;
    let interval_secs: u64 = get_config()
        .get_int("simulator_interval_secs")?
        .try_into()?;

    info!(
        "Starting device simulator ({} devices, one reading every {}s)",
        FLEET.len(),
        interval_secs
    );

    let mut link = LinkState::Disconnected;
    link.transition(LinkState::Connecting);

    let (client, mut eventloop) = connect_to_mqtt("sim", Some(&command_topic)).await?;
    link.transition(LinkState::Connected);

    let publisher = {
        let client = client.clone();
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));

            loop {
                ticker.tick().await;

                for device in FLEET.iter() {
                    let reading = device.sample();
                    debug!("Publishing reading: {:?}", reading);

                    let payload = match serde_json::to_vec(&reading) {
                        Ok(payload) => payload,
                        Err(err) => {
                            error!("Reading encode error: {:?}", err);
                            continue;
                        }
                    };

                    if let Err(err) = client
                        .publish(&readings_topic, QoS::AtMostOnce, false, payload)
                        .await
                    {
                        error!("Reading publish error: {:?}", err);
                    }
                }
            }
        }
    };
    tokio::spawn(publisher);

    loop {
        let event = eventloop.poll().await;
        match &event {
            Err(e) => {
                error!("MQTT error: {:?}", e);
                link.transition(link.after_error());

                // Only retry every 5 seconds
                sleep(Duration::from_secs(5)).await;

                warn!("Retrying after MQTT error.");
            }
            Ok(Event::Incoming(Incoming::ConnAck(ConnAck {
                session_present,
                code: ConnectReturnCode::Success,
            }))) => {
                link.transition(link.after_connack());

                if !session_present {
                    info!("Resubscribing to topic {}", command_topic);
                    client.subscribe(&command_topic, QoS::AtLeastOnce).await?;
                }
            }
            Ok(Event::Incoming(Incoming::SubAck(SubAck { .. }))) => {
                debug!("MQTT subscribed to {}", command_topic);
            }
            Ok(Event::Incoming(Incoming::Publish(p))) => {
                match serde_json::from_slice::<TopicMessage>(&p.payload) {
                    Ok(TopicMessage::Command(command)) => {
                        if FLEET.iter().any(|d| d.device_id == command.device_id) {
                            warn!(
                                "Device {} received {} command",
                                command.device_id, command.command
                            );
                        } else {
                            debug!("Command for unknown device {}", command.device_id);
                        }
                    }
                    // Our own readings echo back on the shared topic.
                    Ok(TopicMessage::Reading(reading)) => {
                        debug!("Reading echo from device {}", reading.device_id);
                    }
                    Err(err) => {
                        debug!("Undecodable payload on {}: {}", p.topic, err);
                    }
                }
            }
            event => {
                debug!("MQTT event: {:?}", event);
            }
        }
    }
}
