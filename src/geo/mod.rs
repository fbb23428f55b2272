use validator::Validate;

use crate::error::AppError;
use crate::models::tracking::GeoPoint;

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

/// Rejects non-finite values as well as out-of-range ones.
pub fn check_coordinates(point: &GeoPoint) -> Result<(), AppError> {
    if !point.lat.is_finite() || !point.lng.is_finite() {
        return Err(AppError::field("coordinates", "coordinates must be finite numbers"));
    }
    point.validate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{check_coordinates, haversine_km};
    use crate::error::AppError;
    use crate::models::tracking::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 23.8103,
            lng: 90.4125,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn dhaka_to_chittagong_is_around_215_km() {
        let dhaka = GeoPoint {
            lat: 23.8103,
            lng: 90.4125,
        };
        let chittagong = GeoPoint {
            lat: 22.3569,
            lng: 91.7832,
        };
        let distance = haversine_km(&dhaka, &chittagong);
        assert!((distance - 215.0).abs() < 10.0);
    }

    #[test]
    fn rejects_out_of_range_and_nan() {
        let bad_lat = GeoPoint { lat: 91.0, lng: 0.0 };
        assert!(matches!(check_coordinates(&bad_lat), Err(AppError::Validation(_))));

        let bad_lng = GeoPoint {
            lat: 0.0,
            lng: -180.5,
        };
        assert!(matches!(check_coordinates(&bad_lng), Err(AppError::Validation(_))));

        let nan = GeoPoint {
            lat: f64::NAN,
            lng: 0.0,
        };
        assert!(check_coordinates(&nan).is_err());

        let edge = GeoPoint {
            lat: -90.0,
            lng: 180.0,
        };
        assert!(check_coordinates(&edge).is_ok());
    }
}
