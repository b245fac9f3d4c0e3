// Connection manager - Owns the broker session, subscriptions and message buffer
use crate::application::broker::{
    BrokerClient, BrokerConnector, BrokerError, BrokerEvent, ConnectionOptions,
};
use crate::application::message_buffer::{BufferedMessage, MessageBuffer};
use crate::domain::message::InboundMessage;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    options: ConnectionOptions,
    client: Option<Arc<dyn BrokerClient>>,
    connected: bool,
    // set after the first ConnAck of the current session
    seen_connect: bool,
    subscribed: HashSet<String>,
    buffer: MessageBuffer,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        options: ConnectionOptions,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            connector,
            options,
            client: None,
            connected: false,
            seen_connect: false,
            subscribed: HashSet::new(),
            buffer: MessageBuffer::with_capacity(buffer_capacity),
        }
    }

    /// Start a session. An already open session is closed first.
    pub async fn open(&mut self) -> Result<mpsc::Receiver<BrokerEvent>, BrokerError> {
        if self.client.is_some() {
            self.close().await;
        }

        tracing::info!(url = %self.options.url(), client_id = %self.options.client_id, "Opening MQTT connection");
        let session = self.connector.connect(&self.options).map_err(|e| {
            tracing::error!("MQTT connection error: {}", e);
            e
        })?;

        self.client = Some(session.client);
        self.connected = false;
        self.seen_connect = false;
        Ok(session.events)
    }

    /// Tear down the session. Subscriptions belong to the session and are
    /// forgotten with it.
    pub async fn close(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        if let Err(e) = client.disconnect().await {
            tracing::error!("MQTT disconnect error: {}", e);
        }
        self.connected = false;
        self.seen_connect = false;
        self.subscribed.clear();
        tracing::info!("MQTT connection closed");
    }

    /// Swap in new options. Equal options leave the session untouched and
    /// return `None`; otherwise the session is rebuilt, previous topics are
    /// subscribed again and the new event receiver is returned.
    pub async fn reconfigure(
        &mut self,
        options: ConnectionOptions,
    ) -> Result<Option<mpsc::Receiver<BrokerEvent>>, BrokerError> {
        if options == self.options {
            tracing::debug!("Connection options unchanged, keeping current session");
            return Ok(None);
        }

        let mut topics: Vec<String> = self.subscribed.iter().cloned().collect();
        topics.sort();

        self.close().await;
        self.options = options;
        let events = self.open().await?;

        for topic in &topics {
            self.subscribe(topic).await;
        }
        Ok(Some(events))
    }

    /// Register interest in a topic. Only the first call per topic reaches the
    /// network; returns whether a request was sent.
    pub async fn subscribe(&mut self, topic: &str) -> bool {
        let Some(client) = self.client.clone() else {
            tracing::warn!("Cannot subscribe to \"{}\": no open MQTT connection", topic);
            return false;
        };
        if !self.subscribed.insert(topic.to_string()) {
            tracing::debug!("Already subscribed to topic: {}", topic);
            return false;
        }

        match client.subscribe(topic).await {
            Ok(()) => tracing::info!("Subscribed to topic: {}", topic),
            Err(e) => tracing::error!("{}", e),
        }
        true
    }

    /// Handle for sending while connected. The handle is detached from the
    /// manager so callers can release their lock before the network send.
    pub fn publisher(&self) -> Result<Publisher, BrokerError> {
        match (&self.client, self.connected) {
            (Some(client), true) => Ok(Publisher {
                client: client.clone(),
            }),
            _ => {
                tracing::error!("Failed to publish: MQTT client is not connected");
                Err(BrokerError::NotConnected)
            }
        }
    }

    /// Fold one transport event into the connection state. Messages are
    /// buffered and handed back for dispatch.
    pub async fn handle_event(&mut self, event: BrokerEvent) -> Option<InboundMessage> {
        match event {
            BrokerEvent::Connected => {
                tracing::info!("Connected to MQTT broker");
                self.connected = true;
                if self.seen_connect {
                    self.resubscribe().await;
                }
                self.seen_connect = true;
                None
            }
            BrokerEvent::Disconnected => {
                if self.connected {
                    tracing::info!("MQTT client disconnected");
                }
                self.connected = false;
                None
            }
            BrokerEvent::Error(e) => {
                tracing::error!("MQTT error: {}", e);
                None
            }
            BrokerEvent::Message(message) => {
                tracing::debug!(topic = %message.topic, "Inbound message");
                self.buffer.push(message.to_string());
                Some(message)
            }
        }
    }

    async fn resubscribe(&self) {
        let Some(client) = &self.client else {
            return;
        };
        for topic in &self.subscribed {
            if let Err(e) = client.subscribe(topic).await {
                tracing::error!("{}", e);
            }
        }
        tracing::debug!("Resubscribed {} topics after reconnect", self.subscribed.len());
    }

    pub fn is_open(&self) -> bool {
        self.client.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.subscribed.iter().cloned().collect();
        topics.sort();
        topics
    }

    /// The whole retained buffer as `<topic>: <payload>` lines.
    pub fn messages(&self) -> Vec<String> {
        self.buffer.lines()
    }

    pub fn buffered(&self) -> Vec<BufferedMessage> {
        self.buffer.entries()
    }

    pub fn buffered_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn last_received_at(&self) -> Option<DateTime<Utc>> {
        self.buffer.latest().map(|m| m.received_at)
    }

    pub fn total_received(&self) -> u64 {
        self.buffer.total_received()
    }
}

/// Sends on one session. Nothing is queued or retried.
pub struct Publisher {
    client: Arc<dyn BrokerClient>,
}

impl Publisher {
    pub async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        match self.client.publish(topic, payload).await {
            Ok(()) => {
                tracing::info!("Message published to {}: {}", topic, payload);
                Ok(())
            }
            Err(e) => {
                tracing::error!("{}", e);
                Err(e)
            }
        }
    }
}
