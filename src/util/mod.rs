use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, QoS, SubAck,
    TlsConfiguration, Transport,
};
use sqlx::{migrate::Migrator, Executor, Pool, SqlitePool};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::writer::MakeWriterExt, layer::SubscriberExt, util::SubscriberInitExt,
};

pub mod config;
pub mod database_error;
pub mod plot;
pub mod static_file;

pub use database_error::DatabaseError;

pub type DB = sqlx::Sqlite;

static MIGRATOR: Migrator = sqlx::migrate!(); // defaults to "./migrations"

pub async fn connect_to_db() -> anyhow::Result<SqlitePool> {
    let database_url = config::get_config().get_string("database_url")?;

    let sqlx_options = sqlx::pool::PoolOptions::<DB>::new().after_connect(|conn, _meta| {
        Box::pin(async move {
            let statements = vec![
                "PRAGMA foreign_keys=ON;",
                "PRAGMA journal_mode = WAL;",
                "PRAGMA synchronous = NORMAL;",
                "PRAGMA busy_timeout = 15000;",
            ];

            for statement in statements {
                conn.execute(statement).await?;
            }

            Ok(())
        })
    });

    let sqlx_pool: Pool<DB> = sqlx_options.connect(&database_url).await?;
    MIGRATOR.run(&sqlx_pool).await?;

    Ok(sqlx_pool)
}

pub fn setup_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::Layer::new()
                .with_writer(std::io::stdout.with_max_level(Level::INFO))
                .compact(),
        )
        .init();
}

/// Connect to the broker with a role-specific client id and optionally
/// subscribe before returning. When `mqtt_ca_path` is configured the
/// connection runs over TLS, with client certificate identity if a
/// cert/key pair is configured as well.
pub async fn connect_to_mqtt(
    role: &str,
    subscribe_topic: Option<&str>,
) -> anyhow::Result<(AsyncClient, EventLoop)> {
    let mqtt_host = config::get_config().get_string("mqtt_host")?;
    let mqtt_port = config::get_config().get_int("mqtt_port")?.try_into()?;
    let mqtt_keep_alive = config::get_config()
        .get_int("mqtt_keep_alive")?
        .try_into()?;
    let mqtt_auth = config::get_config().get_bool("mqtt_auth")?;
    let mqtt_client_id = config::get_config().get_string("mqtt_client_id")?;

    let client_id = format!("{}-{}", mqtt_client_id, role);
    let mut mqttoptions = MqttOptions::new(client_id, &mqtt_host, mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(mqtt_keep_alive));

    if mqtt_auth {
        let mqtt_username = config::get_config().get_string("mqtt_username")?;
        let mqtt_password = config::get_config().get_string("mqtt_password")?;
        mqttoptions.set_credentials(mqtt_username, mqtt_password);
    }

    if let Ok(ca_path) = config::get_config().get_string("mqtt_ca_path") {
        let ca = std::fs::read(ca_path)?;

        let client_auth = match (
            config::get_config().get_string("mqtt_cert_path"),
            config::get_config().get_string("mqtt_key_path"),
        ) {
            (Ok(cert_path), Ok(key_path)) => {
                Some((std::fs::read(cert_path)?, std::fs::read(key_path)?))
            }
            _ => None,
        };

        mqttoptions.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth,
        }));
    }

    let (client, eventloop) = AsyncClient::new(mqttoptions, 10);

    if let Some(topic) = subscribe_topic {
        client.subscribe(topic, QoS::AtLeastOnce).await?;
    }

    let mqtt_connect_timeout = Duration::from_millis(30000);
    let eventloop = timeout(
        mqtt_connect_timeout,
        wait_for_connection(eventloop, subscribe_topic.is_some()),
    )
    .await??;

    if let Some(topic) = subscribe_topic {
        info!("MQTT subscribed to {}", topic);
    }

    Ok((client, eventloop))
}

async fn wait_for_connection(
    mut eventloop: EventLoop,
    wait_for_suback: bool,
) -> anyhow::Result<EventLoop> {
    loop {
        let event = eventloop.poll().await?;

        if let Event::Incoming(Incoming::ConnAck(ConnAck {
            session_present: _,
            code: ConnectReturnCode::Success,
        })) = event
        {
            info!("MQTT connected");

            if !wait_for_suback {
                return Ok(eventloop);
            }
        }

        if let Event::Incoming(Incoming::SubAck(SubAck { .. })) = event {
            return Ok(eventloop);
        }
    }
}
