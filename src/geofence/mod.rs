pub mod sampler;

use sqlx::SqlitePool;

use crate::error::AttendanceError;
use crate::model::geofence::{GeofenceConfig, GeofenceResult, LocationSample};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two (lat, lon) pairs in degrees.
pub fn haversine_distance_m(lat: f64, lon: f64, target_lat: f64, target_lon: f64) -> f64 {
    let d_lat = (target_lat - lat).to_radians();
    let d_lon = (target_lon - lon).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat.to_radians().cos() * target_lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Classifies a sample against the geofence. The radius boundary is inclusive.
pub fn validate(sample: &LocationSample, config: &GeofenceConfig) -> GeofenceResult {
    let distance_meters = haversine_distance_m(
        sample.latitude,
        sample.longitude,
        config.target_latitude,
        config.target_longitude,
    );

    GeofenceResult {
        distance_meters,
        is_valid: distance_meters <= config.radius_meters,
    }
}

/// Same as [`validate`], but "no fix at all" is reported as its own error
/// instead of being confused with an out-of-range position.
pub fn validate_optional(
    sample: Option<&LocationSample>,
    config: &GeofenceConfig,
) -> Result<GeofenceResult, AttendanceError> {
    sample
        .map(|s| validate(s, config))
        .ok_or(AttendanceError::LocationUnavailable)
}

pub async fn load_config(pool: &SqlitePool) -> Result<Option<GeofenceConfig>, sqlx::Error> {
    sqlx::query_as::<_, GeofenceConfig>(
        r#"
        SELECT target_latitude, target_longitude, radius_meters
        FROM geofence_config
        WHERE id = 1
        "#,
    )
    .fetch_optional(pool)
    .await
}

pub async fn save_config(pool: &SqlitePool, config: &GeofenceConfig) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO geofence_config (id, target_latitude, target_longitude, radius_meters)
        VALUES (1, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            target_latitude = excluded.target_latitude,
            target_longitude = excluded.target_longitude,
            radius_meters = excluded.radius_meters
        "#,
    )
    .bind(config.target_latitude)
    .bind(config.target_longitude)
    .bind(config.radius_meters)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;
    use chrono::Utc;

    fn sample_at(latitude: f64, longitude: f64) -> LocationSample {
        LocationSample {
            latitude,
            longitude,
            accuracy: 5.0,
            captured_at: Utc::now(),
        }
    }

    fn fence(radius_meters: f64) -> GeofenceConfig {
        GeofenceConfig {
            target_latitude: 40.0,
            target_longitude: -3.0,
            radius_meters,
        }
    }

    /// Latitude offset (degrees) that lands `meters` north of the fence centre.
    fn degrees_north(meters: f64) -> f64 {
        (meters / EARTH_RADIUS_M).to_degrees()
    }

    #[test]
    fn identical_points_are_zero_meters_apart() {
        assert_eq!(haversine_distance_m(40.0, -3.0, 40.0, -3.0), 0.0);
        assert_eq!(haversine_distance_m(-33.86, 151.2, -33.86, 151.2), 0.0);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = haversine_distance_m(10.0, 20.0, 11.0, 20.0);
        let expected = 111_320.0;
        assert!((d - expected).abs() / expected < 0.01, "got {d}");
    }

    #[test]
    fn distance_is_symmetric() {
        let a = haversine_distance_m(40.4168, -3.7038, 41.3874, 2.1686);
        let b = haversine_distance_m(41.3874, 2.1686, 40.4168, -3.7038);
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn radius_boundary_is_inclusive() {
        let config = fence(100.0);

        let at_edge = sample_at(40.0 + degrees_north(100.0), -3.0);
        let result = validate(&at_edge, &config);
        assert!((result.distance_meters - 100.0).abs() < 1e-6);
        // exact equality on the boundary is what the rule is about
        let exact = validate(
            &at_edge,
            &GeofenceConfig {
                radius_meters: result.distance_meters,
                ..config
            },
        );
        assert!(exact.is_valid);

        let just_outside = sample_at(40.0 + degrees_north(100.1), -3.0);
        let result = validate(&just_outside, &config);
        assert!(result.distance_meters > 100.0);
        assert!(!result.is_valid);
    }

    #[test]
    fn sample_at_target_is_valid() {
        let result = validate(&sample_at(40.0, -3.0), &fence(100.0));
        assert_eq!(result.distance_meters, 0.0);
        assert!(result.is_valid);
    }

    #[test]
    fn missing_sample_is_location_unavailable() {
        let err = validate_optional(None, &fence(100.0)).unwrap_err();
        assert!(matches!(err, AttendanceError::LocationUnavailable));

        let sample = sample_at(40.0, -3.0);
        assert!(validate_optional(Some(&sample), &fence(100.0)).unwrap().is_valid);
    }

    #[actix_web::test]
    async fn config_save_then_load_replaces_single_row() {
        let pool = memory_pool().await;
        assert_eq!(load_config(&pool).await.unwrap(), None);

        save_config(&pool, &fence(100.0)).await.unwrap();
        save_config(&pool, &fence(250.0)).await.unwrap();

        assert_eq!(load_config(&pool).await.unwrap(), Some(fence(250.0)));
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM geofence_config")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}
