use chrono::{DateTime, Duration, Utc};

use crate::models::drone::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Flight time for `distance_km` at a constant `speed_kmh`, rounded to the
/// millisecond. Non-positive speeds yield zero rather than infinity.
pub fn travel_time(distance_km: f64, speed_kmh: f64) -> Duration {
    if speed_kmh <= 0.0 || !distance_km.is_finite() {
        return Duration::zero();
    }
    let millis = (distance_km.max(0.0) / speed_kmh * 3_600_000.0).round();
    Duration::milliseconds(millis as i64)
}

pub fn eta_from(now: DateTime<Utc>, distance_km: f64, speed_kmh: f64) -> DateTime<Utc> {
    now + travel_time(distance_km, speed_kmh)
}

/// Total distance along a chain of waypoints.
pub fn path_km(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|leg| haversine_km(&leg[0], &leg[1]))
        .sum()
}

pub fn is_valid(point: &GeoPoint) -> bool {
    point.lat.is_finite()
        && point.lng.is_finite()
        && (-90.0..=90.0).contains(&point.lat)
        && (-180.0..=180.0).contains(&point.lng)
}
