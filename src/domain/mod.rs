// Domain layer - Telemetry, positions and tracks
pub mod message;
pub mod position;
pub mod telemetry;
pub mod track;
