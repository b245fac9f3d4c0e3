// HTTP request handlers
use crate::application::broker::BrokerError;
use crate::application::message_buffer::BufferedMessage;
use crate::application::view_controller::ViewSnapshot;
use crate::domain::position::Position;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStatus {
    pub url: String,
    pub client_id: String,
    pub open: bool,
    pub connected: bool,
    pub topics: Vec<String>,
    pub buffered: usize,
    pub buffer_capacity: usize,
    pub total_received: u64,
    pub last_received_at: Option<DateTime<Utc>>,
}

/// Partial connection settings; omitted fields keep their current value.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectionUpdate {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub keep_alive_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ReconfigureResult {
    pub reconfigured: bool,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Current camera target and marker
pub async fn get_view(State(state): State<Arc<AppState>>) -> Json<ViewSnapshot> {
    Json(state.view.read().await.snapshot())
}

/// Server-sent events: the current view, then one event per update
pub async fn stream_view(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.view.read().await.watch();

    let stream = async_stream::stream! {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            match Event::default().event("view").json_data(&snapshot) {
                Ok(event) => yield Ok::<Event, Infallible>(event),
                Err(e) => tracing::warn!("Failed to encode view snapshot: {}", e),
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Every track, keyed by entity name
pub async fn list_tracks(
    State(state): State<Arc<AppState>>,
) -> Json<BTreeMap<String, Vec<Position>>> {
    let view = state.view.read().await;
    let tracks = view
        .tracks()
        .iter()
        .map(|(name, path)| (name.to_string(), path.to_vec()))
        .collect();
    Json(tracks)
}

/// One entity's path
pub async fn get_track(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Position>>, StatusCode> {
    let view = state.view.read().await;
    view.tracks()
        .path(&name)
        .map(|path| Json(path.to_vec()))
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn connection_status(State(state): State<Arc<AppState>>) -> Json<ConnectionStatus> {
    let connection = state.connection.lock().await;
    Json(ConnectionStatus {
        url: connection.options().url(),
        client_id: connection.options().client_id.clone(),
        open: connection.is_open(),
        connected: connection.is_connected(),
        topics: connection.subscribed_topics(),
        buffered: connection.buffered_count(),
        buffer_capacity: connection.buffer_capacity(),
        total_received: connection.total_received(),
        last_received_at: connection.last_received_at(),
    })
}

/// Point the broker session at new settings. A change tears the old session
/// down and the ingest pump follows the new one.
pub async fn update_connection(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ConnectionUpdate>,
) -> Result<Json<ReconfigureResult>, (StatusCode, String)> {
    let mut options = state.sessions.options().await;
    if let Some(address) = update.address {
        options.address = address;
    }
    if let Some(port) = update.port {
        options.port = port;
    }
    if let Some(path) = update.path {
        options.path = path;
    }
    if update.username.is_some() {
        options.username = update.username;
    }
    if update.password.is_some() {
        options.password = update.password;
    }
    if let Some(secs) = update.connect_timeout_secs {
        options.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = update.keep_alive_secs {
        options.keep_alive = Duration::from_secs(secs);
    }

    match state.sessions.reconfigure(options).await {
        Ok(reconfigured) => Ok(Json(ReconfigureResult { reconfigured })),
        Err(e) => {
            tracing::error!("Reconfigure failed: {}", e);
            Err((StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

/// Retained inbound message lines (`topic: payload`), oldest first
pub async fn list_messages(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.connection.lock().await.messages())
}

/// Retained inbound messages with their receive time
pub async fn list_message_detail(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<BufferedMessage>> {
    Json(state.connection.lock().await.buffered())
}

pub async fn publish(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PublishRequest>,
) -> impl IntoResponse {
    // the lock is released before the network round trip
    let publisher = state.connection.lock().await.publisher();
    let result = match publisher {
        Ok(publisher) => publisher.publish(&request.topic, &request.payload).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => (StatusCode::ACCEPTED, "published".to_string()),
        Err(BrokerError::NotConnected) => (
            StatusCode::SERVICE_UNAVAILABLE,
            BrokerError::NotConnected.to_string(),
        ),
        Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::broker::fake::{options, FakeConnector};
    use crate::application::broker::BrokerEvent;
    use crate::application::connection_manager::ConnectionManager;
    use crate::application::ingest_service::IngestService;
    use crate::application::view_controller::{ViewController, ViewOptions, TELEMETRY_TOPIC};
    use crate::domain::message::InboundMessage;
    use axum::body::BodyDataStream;
    use axum::http::header::CONTENT_TYPE;
    use futures::StreamExt;
    use tokio::sync::{Mutex, Notify, RwLock};

    async fn state(connector: Arc<FakeConnector>) -> Arc<AppState> {
        let mut manager = ConnectionManager::new(connector, options("broker.local"), 10);
        let _events = manager.open().await.unwrap();
        let connection = Arc::new(Mutex::new(manager));
        let view = Arc::new(RwLock::new(ViewController::new(ViewOptions::default())));
        let (_ingest, sessions) = IngestService::new(connection.clone(), view.clone());
        Arc::new(AppState {
            connection,
            view,
            sessions,
        })
    }

    async fn next_frame(body: &mut BodyDataStream) -> String {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        String::from_utf8(chunk.to_vec()).unwrap()
    }

    fn publish_request(payload: &str) -> Json<PublishRequest> {
        Json(PublishRequest {
            topic: "/v2.C/command".to_string(),
            payload: payload.to_string(),
        })
    }

    #[tokio::test]
    async fn test_publish_maps_connection_state_to_status() {
        let connector = Arc::new(FakeConnector::default());
        let state = state(connector.clone()).await;

        let response = publish(State(state.clone()), publish_request("GO"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(connector.client(0).publish_count(), 0);

        state
            .connection
            .lock()
            .await
            .handle_event(BrokerEvent::Connected)
            .await;
        let response = publish(State(state.clone()), publish_request("GO"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(connector.client(0).publish_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_bad_gateway() {
        let connector = Arc::new(FakeConnector {
            fail_publish: true,
            ..Default::default()
        });
        let state = state(connector).await;
        state
            .connection
            .lock()
            .await
            .handle_event(BrokerEvent::Connected)
            .await;

        let response = publish(State(state), publish_request("GO"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_tracks_and_view_reflect_telemetry() {
        let state = state(Arc::new(FakeConnector::default())).await;
        {
            let mut view = state.view.write().await;
            view.apply(&InboundMessage::new(TELEMETRY_TOPIC, "POS,1,drone1,base,34.0,135.0,100"));
            view.apply(&InboundMessage::new(TELEMETRY_TOPIC, "POS,2,drone1,base,34.1,135.1,110"));
        }

        let Json(tracks) = list_tracks(State(state.clone())).await;
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks["drone1"].len(), 2);

        let Json(path) = get_track(Path("drone1".to_string()), State(state.clone()))
            .await
            .unwrap();
        assert_eq!(path[1].elevation(), 110.0);

        let missing = get_track(Path("ghost".to_string()), State(state.clone())).await;
        assert_eq!(missing.unwrap_err(), StatusCode::NOT_FOUND);

        let Json(snapshot) = get_view(State(state)).await;
        assert_eq!(snapshot.sequence, 2);
        assert_eq!(snapshot.camera.elevation(), 500.0);
        assert_eq!(snapshot.marker.latitude(), 34.1);
    }

    #[tokio::test]
    async fn test_connection_status_and_messages() {
        let state = state(Arc::new(FakeConnector::default())).await;
        {
            let mut connection = state.connection.lock().await;
            connection.subscribe(TELEMETRY_TOPIC).await;
            connection.handle_event(BrokerEvent::Connected).await;
            connection
                .handle_event(BrokerEvent::Message(InboundMessage::new(TELEMETRY_TOPIC, "x")))
                .await;
        }

        let Json(status) = connection_status(State(state.clone())).await;
        assert!(status.open);
        assert!(status.connected);
        assert_eq!(status.url, "ws://broker.local:9001");
        assert_eq!(status.topics, vec![TELEMETRY_TOPIC]);
        assert_eq!(status.buffered, 1);
        assert_eq!(status.buffer_capacity, 10);
        assert!(status.last_received_at.is_some());

        let Json(messages) = list_messages(State(state.clone())).await;
        assert_eq!(messages, vec!["/v2.C/droneinfo: x"]);

        let Json(detail) = list_message_detail(State(state)).await;
        assert_eq!(detail.len(), 1);
        assert_eq!(detail[0].line, "/v2.C/droneinfo: x");
        assert_eq!(Some(detail[0].received_at), status.last_received_at);
    }

    #[tokio::test]
    async fn test_publish_does_not_hold_connection_lock() {
        let gate = Arc::new(Notify::new());
        let connector = Arc::new(FakeConnector {
            publish_gate: Some(gate.clone()),
            ..Default::default()
        });
        let state = state(connector.clone()).await;
        state
            .connection
            .lock()
            .await
            .handle_event(BrokerEvent::Connected)
            .await;

        let in_flight = tokio::spawn({
            let state = state.clone();
            async move {
                publish(State(state), publish_request("GO"))
                    .await
                    .into_response()
            }
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while connector.client(0).publish_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // the broker has not answered yet, status reads must still get through
        assert!(state.connection.try_lock().is_ok());
        let Json(status) = connection_status(State(state.clone())).await;
        assert!(status.connected);

        gate.notify_one();
        let response = in_flight.await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_update_connection_switches_broker() {
        let connector = Arc::new(FakeConnector::default());
        let state = state(connector.clone()).await;

        let update = ConnectionUpdate {
            address: Some("other.local".to_string()),
            keep_alive_secs: Some(30),
            ..Default::default()
        };
        let Json(result) = update_connection(State(state.clone()), Json(update))
            .await
            .unwrap();
        assert!(result.reconfigured);
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(*connector.client(0).disconnects.lock().unwrap(), 1);

        let Json(status) = connection_status(State(state.clone())).await;
        assert_eq!(status.url, "ws://other.local:9001");
        assert!(status.open);

        // nothing changed, nothing reconnects
        let Json(result) = update_connection(State(state), Json(ConnectionUpdate::default()))
            .await
            .unwrap();
        assert!(!result.reconfigured);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_view_stream_sends_current_then_updates() {
        let state = state(Arc::new(FakeConnector::default())).await;
        let response = stream_view(State(state.clone())).await.into_response();
        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");

        let mut body = response.into_body().into_data_stream();

        let first = next_frame(&mut body).await;
        assert!(first.starts_with("event: view\n"), "{first}");
        assert!(first.contains("\"sequence\":0"), "{first}");

        state
            .view
            .write()
            .await
            .apply(&InboundMessage::new(TELEMETRY_TOPIC, "POS,1,drone1,base,34.0,135.0,100"));

        let second = next_frame(&mut body).await;
        assert!(second.starts_with("event: view\n"), "{second}");
        assert!(second.contains("\"sequence\":1"), "{second}");
        assert!(second.contains("\"last_entity\":\"drone1\""), "{second}");
    }

    #[tokio::test]
    async fn test_snapshot_serializes_for_renderer() {
        let state = state(Arc::new(FakeConnector::default())).await;
        let Json(snapshot) = get_view(State(state)).await;
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["marker_style"]["image"], "/airplane.png");
        assert_eq!(json["camera"]["elevation"], 1000.0);
        assert!(json["marker"]["cartesian"]["x"].is_number());
        assert!(json["last_entity"].is_null());
    }
}
