use crate::{
    auth::auth::AuthUser,
    config::Config,
    geofence::{load_config, save_config, validate},
    model::geofence::{GeofenceConfig, GeofenceResult, LocationSample},
};
use actix_web::{HttpResponse, Responder, error::ErrorInternalServerError, web};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{error, info};

/// Stored geofence, or the configured default if no row exists yet.
pub async fn active_geofence(pool: &SqlitePool, config: &Config) -> actix_web::Result<GeofenceConfig> {
    match load_config(pool).await {
        Ok(Some(geofence)) => Ok(geofence),
        Ok(None) => Ok(config.default_geofence),
        Err(e) => {
            error!(error = %e, "Failed to load geofence configuration");
            Err(ErrorInternalServerError("Internal Server Error"))
        }
    }
}

fn check_bounds(geofence: &GeofenceConfig) -> Result<(), &'static str> {
    if !(-90.0..=90.0).contains(&geofence.target_latitude) {
        return Err("target_latitude must be between -90 and 90");
    }
    if !(-180.0..=180.0).contains(&geofence.target_longitude) {
        return Err("target_longitude must be between -180 and 180");
    }
    if !(geofence.radius_meters.is_finite() && geofence.radius_meters > 0.0) {
        return Err("radius_meters must be greater than 0");
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/api/geofence",
    responses(
        (status = 200, description = "Active geofence", body = GeofenceConfig),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Geofence"
)]
pub async fn get_geofence(
    _auth: AuthUser,
    pool: web::Data<SqlitePool>,
    config: web::Data<Config>,
) -> actix_web::Result<impl Responder> {
    let geofence = active_geofence(pool.get_ref(), config.get_ref()).await?;
    Ok(HttpResponse::Ok().json(geofence))
}

/// Replace the geofence (admin only). Applies to every punch made afterwards.
#[utoipa::path(
    put,
    path = "/api/geofence",
    request_body = GeofenceConfig,
    responses(
        (status = 200, description = "Geofence updated", body = GeofenceConfig),
        (status = 400, description = "Coordinates or radius out of range", body = Object, example = json!({
            "message": "radius_meters must be greater than 0"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Geofence"
)]
pub async fn update_geofence(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    payload: web::Json<GeofenceConfig>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;

    let geofence = payload.into_inner();
    if let Err(message) = check_bounds(&geofence) {
        return Ok(HttpResponse::BadRequest().json(json!({ "message": message })));
    }

    save_config(pool.get_ref(), &geofence).await.map_err(|e| {
        error!(error = %e, "Failed to save geofence configuration");
        ErrorInternalServerError("Internal Server Error")
    })?;

    info!(
        admin = %auth.username,
        latitude = geofence.target_latitude,
        longitude = geofence.target_longitude,
        radius_m = geofence.radius_meters,
        "Geofence updated"
    );
    Ok(HttpResponse::Ok().json(geofence))
}

/// Distance from a sample to the site and whether it lies inside the fence.
#[utoipa::path(
    post,
    path = "/api/location/validate",
    request_body = LocationSample,
    responses(
        (status = 200, description = "Validation result", body = GeofenceResult),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Geofence"
)]
pub async fn validate_location(
    _auth: AuthUser,
    pool: web::Data<SqlitePool>,
    config: web::Data<Config>,
    sample: web::Json<LocationSample>,
) -> actix_web::Result<impl Responder> {
    let geofence = active_geofence(pool.get_ref(), config.get_ref()).await?;
    Ok(HttpResponse::Ok().json(validate(&sample, &geofence)))
}

#[cfg(test)]
mod bounds_tests {
    use super::*;

    #[test]
    fn bounds_are_checked() {
        let ok = GeofenceConfig {
            target_latitude: 40.0,
            target_longitude: -3.0,
            radius_meters: 50.0,
        };
        assert!(check_bounds(&ok).is_ok());
        assert!(check_bounds(&GeofenceConfig { target_latitude: 91.0, ..ok }).is_err());
        assert!(check_bounds(&GeofenceConfig { target_longitude: -181.0, ..ok }).is_err());
        assert!(check_bounds(&GeofenceConfig { radius_meters: 0.0, ..ok }).is_err());
    }
}
