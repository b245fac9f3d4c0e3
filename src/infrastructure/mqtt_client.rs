// MQTT over WebSocket adapter built on rumqttc
use crate::application::broker::{
    BrokerClient, BrokerConnector, BrokerError, BrokerEvent, BrokerSession, ConnectionOptions,
};
use crate::domain::message::InboundMessage;
use crate::infrastructure::backoff::{Backoff, BackoffPolicy};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, NetworkOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode, Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

const REQUEST_CAPACITY: usize = 10;
const EVENT_CAPACITY: usize = 256;
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct MqttConnector {
    backoff: BackoffPolicy,
}

impl MqttConnector {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self { backoff }
    }

    fn mqtt_options(options: &ConnectionOptions) -> MqttOptions {
        let mut mqtt_options = MqttOptions::new(&options.client_id, options.url(), options.port);
        mqtt_options.set_transport(Transport::Ws);
        mqtt_options.set_keep_alive(options.keep_alive);
        if let Some(username) = &options.username {
            mqtt_options.set_credentials(username, options.password.clone().unwrap_or_default());
        }
        mqtt_options
    }
}

impl BrokerConnector for MqttConnector {
    fn connect(&self, options: &ConnectionOptions) -> Result<BrokerSession, BrokerError> {
        if options.address.is_empty() {
            return Err(BrokerError::Connect("broker address is empty".to_string()));
        }

        let (client, mut eventloop) =
            AsyncClient::new(Self::mqtt_options(options), REQUEST_CAPACITY);

        // whole seconds only, which is how the timeout is configured
        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(options.connect_timeout.as_secs().max(1));
        eventloop.set_network_options(network_options);

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let driver = tokio::spawn(drive_event_loop(eventloop, tx, self.backoff.clone()));

        Ok(BrokerSession {
            client: Arc::new(MqttBrokerClient {
                client,
                driver: Mutex::new(Some(driver)),
            }),
            events: rx,
        })
    }
}

pub struct MqttBrokerClient {
    client: AsyncClient,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl BrokerClient for MqttBrokerClient {
    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| BrokerError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.to_string())
            .await
            .map_err(|e| BrokerError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| BrokerError::Disconnect(e.to_string()));

        if let Some(mut driver) = self.driver.lock().await.take() {
            // let the Disconnect packet go out, then stop polling regardless
            if tokio::time::timeout(DISCONNECT_GRACE, &mut driver).await.is_err() {
                driver.abort();
            }
        }
        result
    }
}

/// What the driver does with one successfully polled event.
#[derive(Debug, PartialEq)]
enum Forward {
    Send(BrokerEvent),
    /// Forward, then stop polling: the session was closed from our side.
    Last(BrokerEvent),
    Skip,
}

/// Maps a rumqttc event to a broker event. A ConnAck clears the backoff so
/// the next outage starts from the initial delay again.
fn translate(event: Event, backoff: &mut Backoff) -> Forward {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => {
            backoff.reset();
            Forward::Send(BrokerEvent::Connected)
        }
        Event::Incoming(Packet::Publish(publish)) => {
            let payload = String::from_utf8_lossy(&publish.payload).into_owned();
            Forward::Send(BrokerEvent::Message(InboundMessage::new(publish.topic, payload)))
        }
        Event::Incoming(Packet::SubAck(ack)) => {
            if ack
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure))
            {
                tracing::warn!(pkid = ack.pkid, "Broker rejected a subscription");
            }
            Forward::Skip
        }
        Event::Incoming(Packet::Disconnect) => Forward::Send(BrokerEvent::Disconnected),
        Event::Outgoing(Outgoing::Disconnect) => Forward::Last(BrokerEvent::Disconnected),
        _ => Forward::Skip,
    }
}

/// Polls the rumqttc event loop and forwards what matters. rumqttc reconnects
/// on the next poll after an error; the backoff spaces those polls out.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    tx: mpsc::Sender<BrokerEvent>,
    policy: BackoffPolicy,
) {
    let mut backoff = policy.start();

    loop {
        match eventloop.poll().await {
            Ok(event) => match translate(event, &mut backoff) {
                Forward::Send(event) => {
                    if tx.send(event).await.is_err() {
                        tracing::debug!("Event receiver dropped, stopping MQTT event loop");
                        break;
                    }
                }
                Forward::Last(event) => {
                    let _ = tx.send(event).await;
                    break;
                }
                Forward::Skip => {}
            },
            Err(e) => {
                if tx.send(BrokerEvent::Error(e.to_string())).await.is_err()
                    || tx.send(BrokerEvent::Disconnected).await.is_err()
                {
                    break;
                }

                match backoff.next_delay() {
                    Some(delay) => {
                        tracing::debug!(
                            attempt = backoff.attempts(),
                            "Reconnecting in {:?}",
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(
                            "Giving up on MQTT broker after {} failed attempts",
                            backoff.attempts()
                        );
                        break;
                    }
                }
            }
        }
    }
}
