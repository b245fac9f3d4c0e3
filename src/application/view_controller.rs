// View controller - Turns telemetry messages into tracks, camera and marker state
use crate::domain::message::InboundMessage;
use crate::domain::position::Position;
use crate::domain::telemetry::TelemetryRecord;
use crate::domain::track::TrackStore;
use serde::Serialize;
use tokio::sync::watch;

pub const TELEMETRY_TOPIC: &str = "/v2.C/droneinfo";

/// How the single moving marker is drawn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerStyle {
    pub image: String,
    pub scale: f64,
}

#[derive(Debug, Clone)]
pub struct ViewOptions {
    pub topic: String,
    pub camera_altitude_m: f64,
    pub fly_duration_secs: f64,
    pub initial_camera: Position,
    pub initial_marker: Position,
    pub marker: MarkerStyle,
    pub reject_invalid_positions: bool,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            topic: TELEMETRY_TOPIC.to_string(),
            camera_altitude_m: 500.0,
            fly_duration_secs: 2.0,
            initial_camera: Position::from_degrees(135.5023, 34.6937, 1000.0),
            initial_marker: Position::from_degrees(135.5023, 34.6937, 10.0),
            marker: MarkerStyle {
                image: "/airplane.png".to_string(),
                scale: 0.02,
            },
            reject_invalid_positions: false,
        }
    }
}

/// What the renderer needs to draw one frame of the scene.
#[derive(Debug, Clone, Serialize)]
pub struct ViewSnapshot {
    pub sequence: u64,
    pub camera: Position,
    pub fly_duration_secs: f64,
    pub marker: Position,
    pub marker_style: MarkerStyle,
    pub last_entity: Option<String>,
    pub tracked_entities: usize,
}

/// Outcome of offering one message to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    Applied {
        entity: String,
        path_len: usize,
        position: Position,
    },
    OtherTopic,
    Rejected,
}

pub struct ViewController {
    options: ViewOptions,
    tracks: TrackStore,
    camera: Position,
    marker: Position,
    last_entity: Option<String>,
    sequence: u64,
    snapshots: watch::Sender<ViewSnapshot>,
}

impl ViewController {
    pub fn new(options: ViewOptions) -> Self {
        let camera = options.initial_camera;
        let marker = options.initial_marker;
        let initial = ViewSnapshot {
            sequence: 0,
            camera,
            fly_duration_secs: options.fly_duration_secs,
            marker,
            marker_style: options.marker.clone(),
            last_entity: None,
            tracked_entities: 0,
        };
        let (snapshots, _) = watch::channel(initial);

        Self {
            options,
            tracks: TrackStore::new(),
            camera,
            marker,
            last_entity: None,
            sequence: 0,
            snapshots,
        }
    }

    pub fn topic(&self) -> &str {
        &self.options.topic
    }

    /// Apply one inbound message. Only the telemetry topic moves the view;
    /// every accepted record is appended, none are sampled away.
    pub fn apply(&mut self, message: &InboundMessage) -> ViewUpdate {
        if !message.is_on(&self.options.topic) {
            return ViewUpdate::OtherTopic;
        }

        let record = TelemetryRecord::decode(&message.payload);
        tracing::debug!(
            command = %record.command,
            timestamp = %record.timestamp,
            from = %record.from_name,
            to = %record.to_name,
            latitude = record.latitude,
            longitude = record.longitude,
            elevation = record.elevation,
            "Decoded telemetry"
        );

        let position = record.position();
        if self.options.reject_invalid_positions && !position.is_finite() {
            tracing::warn!("Dropping telemetry with invalid position: {}", message.payload);
            return ViewUpdate::Rejected;
        }

        let path_len = self.tracks.append(&record.from_name, position);

        self.camera = position.with_elevation(self.options.camera_altitude_m);
        self.marker = position;
        self.last_entity = Some(record.from_name.clone());
        self.sequence += 1;
        self.snapshots.send_replace(self.snapshot());

        ViewUpdate::Applied {
            entity: record.from_name,
            path_len,
            position,
        }
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            sequence: self.sequence,
            camera: self.camera,
            fly_duration_secs: self.options.fly_duration_secs,
            marker: self.marker,
            marker_style: self.options.marker.clone(),
            last_entity: self.last_entity.clone(),
            tracked_entities: self.tracks.len(),
        }
    }

    /// Live feed of snapshots, starting with the current one.
    pub fn watch(&self) -> watch::Receiver<ViewSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn tracks(&self) -> &TrackStore {
        &self.tracks
    }
}
