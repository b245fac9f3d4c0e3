use crate::application::broker::ConnectionOptions;
use crate::application::message_buffer::DEFAULT_CAPACITY;
use crate::application::view_controller::{MarkerStyle, ViewOptions, TELEMETRY_TOPIC};
use crate::domain::position::Position;
use crate::infrastructure::backoff::BackoffPolicy;
use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;

const CONFIG_FILE: &str = "config/livemap";
const ENV_PREFIX: &str = "LIVEMAP";

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub broker: BrokerSettings,
    #[serde(default)]
    pub view: ViewSettings,
    #[serde(default)]
    pub buffer: BufferSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub path: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    /// Whole seconds, the granularity the MQTT transport accepts.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ViewSettings {
    pub topic: String,
    pub camera_altitude_m: f64,
    pub fly_duration_secs: f64,
    pub initial_longitude: f64,
    pub initial_latitude: f64,
    pub initial_camera_altitude_m: f64,
    pub initial_marker_altitude_m: f64,
    pub marker_image: String,
    pub marker_scale: f64,
    pub reject_invalid_positions: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BufferSettings {
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

fn default_port() -> u16 {
    9001
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: None,
        }
    }
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            topic: TELEMETRY_TOPIC.to_string(),
            camera_altitude_m: 500.0,
            fly_duration_secs: 2.0,
            initial_longitude: 135.5023,
            initial_latitude: 34.6937,
            initial_camera_altitude_m: 1000.0,
            initial_marker_altitude_m: 10.0,
            marker_image: "/airplane.png".to_string(),
            marker_scale: 0.02,
            reject_invalid_positions: false,
        }
    }
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

impl BrokerSettings {
    /// Client id from config, or a random `mqtt_<hex>` one.
    pub fn connection_options(&self) -> ConnectionOptions {
        let client_id = self
            .client_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("mqtt_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]));

        ConnectionOptions {
            address: self.address.clone(),
            port: self.port,
            path: self.path.clone(),
            client_id,
            username: self.username.clone(),
            password: self.password.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }
}

impl ViewSettings {
    pub fn view_options(&self) -> ViewOptions {
        ViewOptions {
            topic: self.topic.clone(),
            camera_altitude_m: self.camera_altitude_m,
            fly_duration_secs: self.fly_duration_secs,
            initial_camera: Position::from_degrees(
                self.initial_longitude,
                self.initial_latitude,
                self.initial_camera_altitude_m,
            ),
            initial_marker: Position::from_degrees(
                self.initial_longitude,
                self.initial_latitude,
                self.initial_marker_altitude_m,
            ),
            marker: MarkerStyle {
                image: self.marker_image.clone(),
                scale: self.marker_scale,
            },
            reject_invalid_positions: self.reject_invalid_positions,
        }
    }
}

/// `config/livemap.{toml,yaml,json}` if present, then `LIVEMAP_*` environment
/// variables (`LIVEMAP_BROKER__ADDRESS`, `LIVEMAP_BROKER__PASSWORD`, ...).
pub fn load_settings() -> anyhow::Result<Settings> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(CONFIG_FILE).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    settings_from(builder)
}

fn settings_from(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> anyhow::Result<Settings> {
    let settings = builder.build().context("failed to read configuration")?;
    let settings: Settings = settings
        .try_deserialize()
        .context("invalid configuration (is LIVEMAP_BROKER__ADDRESS set?)")?;

    if settings.broker.address.trim().is_empty() {
        anyhow::bail!("broker.address must not be empty");
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, File, FileFormat};

    fn from_toml(toml: &str) -> anyhow::Result<Settings> {
        settings_from(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let settings = from_toml("[broker]\naddress = \"10.0.0.5\"\n").unwrap();

        assert_eq!(settings.broker.port, 9001);
        assert_eq!(settings.broker.keep_alive_secs, 60);
        assert_eq!(settings.broker.connect_timeout_secs, 10);
        assert_eq!(
            settings.broker.connection_options().connect_timeout,
            Duration::from_secs(10)
        );
        assert_eq!(settings.view.topic, "/v2.C/droneinfo");
        assert_eq!(settings.view.camera_altitude_m, 500.0);
        assert_eq!(settings.buffer.capacity, 1000);
        assert_eq!(settings.server.bind, "0.0.0.0:8080");
    }

    #[test]
    fn test_full_config() {
        let settings = from_toml(
            r#"
            [broker]
            address = "broker.example"
            port = 8083
            path = "/mqtt"
            username = "pilot"
            password = "hunter2"
            client_id = "ground-1"
            keep_alive_secs = 30
            connect_timeout_secs = 15

            [broker.reconnect]
            max_attempts = 5

            [view]
            topic = "/v2.C/other"
            reject_invalid_positions = true

            [buffer]
            capacity = 16
            "#,
        )
        .unwrap();

        let options = settings.broker.connection_options();
        assert_eq!(options.url(), "ws://broker.example:8083/mqtt");
        assert_eq!(options.client_id, "ground-1");
        assert_eq!(options.username.as_deref(), Some("pilot"));
        assert_eq!(options.password.as_deref(), Some("hunter2"));
        assert_eq!(options.keep_alive, Duration::from_secs(30));
        assert_eq!(options.connect_timeout, Duration::from_secs(15));

        let policy = settings.broker.backoff_policy();
        assert_eq!(policy.max_attempts, Some(5));
        assert_eq!(policy.initial_delay, Duration::from_millis(500));

        let view = settings.view.view_options();
        assert_eq!(view.topic, "/v2.C/other");
        assert!(view.reject_invalid_positions);
        assert_eq!(view.marker.image, "/airplane.png");
        assert_eq!(settings.buffer.capacity, 16);
    }

    #[test]
    fn test_generated_client_id() {
        let settings = from_toml("[broker]\naddress = \"10.0.0.5\"\n").unwrap();
        let a = settings.broker.connection_options();
        let b = settings.broker.connection_options();

        assert!(a.client_id.starts_with("mqtt_"));
        assert_eq!(a.client_id.len(), "mqtt_".len() + 12);
        assert_ne!(a.client_id, b.client_id);
    }

    #[test]
    fn test_missing_or_blank_address_is_an_error() {
        assert!(from_toml("[view]\ntopic = \"x\"\n").is_err());
        assert!(from_toml("[broker]\naddress = \"  \"\n").is_err());
    }
}
