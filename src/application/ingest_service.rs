// Ingest service - Pumps broker events into connection state and the view
use crate::application::broker::{BrokerError, BrokerEvent, ConnectionOptions};
use crate::application::connection_manager::ConnectionManager;
use crate::application::view_controller::{ViewController, ViewUpdate};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

type EventReceiver = mpsc::Receiver<BrokerEvent>;

pub struct IngestService {
    connection: Arc<Mutex<ConnectionManager>>,
    view: Arc<RwLock<ViewController>>,
    sessions: mpsc::UnboundedReceiver<EventReceiver>,
}

/// Rebuilds the broker session and points the running pump at it.
#[derive(Clone)]
pub struct SessionControl {
    connection: Arc<Mutex<ConnectionManager>>,
    sessions: mpsc::UnboundedSender<EventReceiver>,
}

impl IngestService {
    pub fn new(
        connection: Arc<Mutex<ConnectionManager>>,
        view: Arc<RwLock<ViewController>>,
    ) -> (Self, SessionControl) {
        let (tx, rx) = mpsc::unbounded_channel();
        let control = SessionControl {
            connection: connection.clone(),
            sessions: tx,
        };
        let service = Self {
            connection,
            view,
            sessions: rx,
        };
        (service, control)
    }

    /// Runs until the connection is closed. Events are handled one at a time
    /// in arrival order; a reconfigured session replaces the current stream.
    pub async fn run(mut self, mut events: EventReceiver) {
        let mut applied: u64 = 0;

        loop {
            tokio::select! {
                biased;
                Some(next) = self.sessions.recv() => {
                    tracing::info!("Switching to new broker session");
                    events = next;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        if self.dispatch(event).await {
                            applied += 1;
                        }
                    }
                    None => match self.next_session().await {
                        Some(next) => events = next,
                        None => break,
                    },
                },
            }
        }

        tracing::info!("Broker event stream ended after {} telemetry updates", applied);
    }

    /// Called when the current stream ends. The connection lock is taken first
    /// so a reconfigure in flight has handed over its receiver before we look.
    async fn next_session(&mut self) -> Option<EventReceiver> {
        let still_open = self.connection.lock().await.is_open();
        if let Ok(next) = self.sessions.try_recv() {
            return Some(next);
        }
        if !still_open {
            return None;
        }

        tracing::warn!("Broker event stream ended, waiting for a new session");
        self.sessions.recv().await
    }

    async fn dispatch(&self, event: BrokerEvent) -> bool {
        let message = self.connection.lock().await.handle_event(event).await;
        let Some(message) = message else {
            return false;
        };

        match self.view.write().await.apply(&message) {
            ViewUpdate::Applied { entity, path_len, position } => {
                tracing::debug!(
                    "Track {} now has {} positions, latest ({}, {}, {})",
                    entity,
                    path_len,
                    position.longitude(),
                    position.latitude(),
                    position.elevation()
                );
                true
            }
            ViewUpdate::OtherTopic => {
                tracing::debug!("Ignoring message on topic {}", message.topic);
                false
            }
            ViewUpdate::Rejected => false,
        }
    }
}

impl SessionControl {
    /// Apply new connection options. Returns `false` when they match the
    /// current ones and the session is kept.
    pub async fn reconfigure(&self, options: ConnectionOptions) -> Result<bool, BrokerError> {
        let mut connection = self.connection.lock().await;
        let Some(events) = connection.reconfigure(options).await? else {
            return Ok(false);
        };

        if self.sessions.send(events).is_err() {
            tracing::warn!("Ingest pump is not running; new session events are dropped");
        }
        Ok(true)
    }

    pub async fn options(&self) -> ConnectionOptions {
        self.connection.lock().await.options().clone()
    }
}
