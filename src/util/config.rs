use anyhow::Result;
use std::sync::OnceLock;

use config::{Config, FileFormat};

pub fn get_config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();

    CONFIG.get_or_init(|| build_config().unwrap())
}

fn build_config() -> Result<Config> {
    Ok(Config::builder()
        .set_default("http_addr", "127.0.0.1:3000")?
        .set_default("database_url", "sqlite://gridwatch.db?mode=rwc")?
        .set_default("mqtt_host", "localhost")?
        .set_default("mqtt_port", 1883)?
        .set_default("mqtt_keep_alive", 15)?
        .set_default("mqtt_auth", false)?
        .set_default("mqtt_client_id", "gridwatch")?
        // Readings and shutdown commands share one topic, so every consumer
        // has to tolerate seeing the other payload shape.
        .set_default("readings_topic", "Energy_Usage")?
        .set_default("command_topic", "Energy_Usage")?
        .set_default("simulator_interval_secs", 3)?
        .add_source(config::Environment::with_prefix("GRIDWATCH"))
        .add_source(config::File::new("gridwatch.toml", FileFormat::Toml).required(false))
        .build()?)
}
