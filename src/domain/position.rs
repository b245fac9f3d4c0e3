// Geodetic positions and their renderer-native Cartesian form
use serde::Serialize;

/// WGS84 semi-major axis in metres.
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 first eccentricity squared.
const WGS84_E2: f64 = 0.006_694_379_990_14;

/// Earth-centred, Earth-fixed coordinate in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Cartesian3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A point on the globe: longitude/latitude in degrees, elevation in metres
/// above the ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    longitude: f64,
    latitude: f64,
    elevation: f64,
    cartesian: Cartesian3,
}

impl Position {
    pub fn from_degrees(longitude: f64, latitude: f64, elevation: f64) -> Self {
        let cartesian = geodetic_to_ecef(longitude, latitude, elevation);
        Self {
            longitude,
            latitude,
            elevation,
            cartesian,
        }
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn elevation(&self) -> f64 {
        self.elevation
    }

    /// Same ground point at a different elevation.
    pub fn with_elevation(&self, elevation: f64) -> Self {
        Self::from_degrees(self.longitude, self.latitude, elevation)
    }

    pub fn is_finite(&self) -> bool {
        self.longitude.is_finite() && self.latitude.is_finite() && self.elevation.is_finite()
    }
}

fn geodetic_to_ecef(longitude: f64, latitude: f64, elevation: f64) -> Cartesian3 {
    let lat = latitude.to_radians();
    let lon = longitude.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();

    // prime vertical radius of curvature
    let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();

    Cartesian3 {
        x: (n + elevation) * cos_lat * cos_lon,
        y: (n + elevation) * cos_lat * sin_lon,
        z: (n * (1.0 - WGS84_E2) + elevation) * sin_lat,
    }
}
