// Infrastructure layer - External dependencies and adapters
pub mod backoff;
pub mod config;
pub mod mqtt_client;
