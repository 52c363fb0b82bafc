use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Circular work-site boundary, managed from the admin panel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct GeofenceConfig {
    #[schema(example = 40.4168)]
    pub target_latitude: f64,
    #[schema(example = -3.7038)]
    pub target_longitude: f64,
    #[schema(example = 100.0)]
    pub radius_meters: f64,
}

/// One fix from a device location provider. Never persisted as-is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LocationSample {
    #[schema(example = 40.4168)]
    pub latitude: f64,
    #[schema(example = -3.7038)]
    pub longitude: f64,
    #[schema(example = 12.5)]
    pub accuracy: f32,
    #[schema(example = "2026-01-01T09:00:00Z", format = "date-time", value_type = String)]
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeofenceResult {
    #[schema(example = 42.7)]
    pub distance_meters: f64,
    pub is_valid: bool,
}
