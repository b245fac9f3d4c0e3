// Broker client trait and connection types
use crate::domain::message::InboundMessage;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("MQTT client is not connected")]
    NotConnected,

    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("failed to subscribe to topic \"{topic}\": {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("failed to publish to topic \"{topic}\": {reason}")]
    Publish { topic: String, reason: String },

    #[error("failed to disconnect: {0}")]
    Disconnect(String),
}

/// Everything the transport reports back, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    Connected,
    Disconnected,
    Message(InboundMessage),
    Error(String),
}

/// Connection parameters. A change in any field means a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub address: String,
    pub port: u16,
    pub path: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
}

impl ConnectionOptions {
    pub fn url(&self) -> String {
        format!("ws://{}:{}{}", self.address, self.port, self.path)
    }
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Send a subscribe request for one topic
    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError>;

    /// Send one message; callers check connectivity first
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError>;

    /// Tear the session down and stop its event stream
    async fn disconnect(&self) -> Result<(), BrokerError>;
}

/// A live session: the client handle plus the stream of its events.
pub struct BrokerSession {
    pub client: Arc<dyn BrokerClient>,
    pub events: mpsc::Receiver<BrokerEvent>,
}

pub trait BrokerConnector: Send + Sync {
    fn connect(&self, options: &ConnectionOptions) -> Result<BrokerSession, BrokerError>;
}
