// Telemetry payload decoding
use super::position::Position;

/// One decoded position report:
/// `command,timestamp,from,to,latitude,longitude,elevation`.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub command: String,
    pub timestamp: String,
    pub from_name: String,
    pub to_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
}

impl TelemetryRecord {
    /// Positional decode. Field count and numeric ranges are not checked:
    /// missing numeric fields and unparseable text come out as NaN.
    pub fn decode(payload: &str) -> Self {
        let mut fields = payload.split(',');
        let mut text = || fields.next().map(str::to_string);

        let command = text().unwrap_or_default();
        let timestamp = text().unwrap_or_default();
        let from_name = text().unwrap_or_default();
        let to_name = text().unwrap_or_default();
        let latitude = text();
        let longitude = text();
        let elevation = text();

        Self {
            command,
            timestamp,
            from_name,
            to_name,
            latitude: coerce_number(latitude.as_deref()),
            longitude: coerce_number(longitude.as_deref()),
            elevation: coerce_number(elevation.as_deref()),
        }
    }

    pub fn position(&self) -> Position {
        Position::from_degrees(self.longitude, self.latitude, self.elevation)
    }
}

/// Loose numeric coercion: surrounding whitespace is ignored, blank text is
/// zero, anything else that fails to parse is NaN.
fn coerce_number(field: Option<&str>) -> f64 {
    match field.map(str::trim) {
        None => f64::NAN,
        Some("") => 0.0,
        Some(value) => value.parse().unwrap_or(f64::NAN),
    }
}
