use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum AttendanceMethod {
    Gps,
    Manual,
    Qr,
}

impl AttendanceMethod {
    /// Only GPS punches are checked against the geofence.
    pub fn requires_location(self) -> bool {
        matches!(self, AttendanceMethod::Gps)
    }
}

/// Position stored with a punch, together with what the validator said about it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RecordedLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f32,
    /// Distance to the geofence centre at the time of the punch
    pub distance_meters: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AttendanceRecord {
    #[schema(example = 1)]
    pub id: i64,
    #[schema(example = 7)]
    pub user_id: i64,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub date: NaiveDate,
    #[schema(example = "2026-01-01T09:00:00Z", format = "date-time", value_type = String)]
    pub clock_in_time: DateTime<Utc>,
    #[schema(example = "2026-01-01T17:30:00Z", format = "date-time", value_type = String, nullable = true)]
    pub clock_out_time: Option<DateTime<Utc>>,
    pub clock_in_location: Option<RecordedLocation>,
    pub clock_out_location: Option<RecordedLocation>,
    pub location_valid_at_clock_in: bool,
    pub location_valid_at_clock_out: Option<bool>,
    pub method: AttendanceMethod,
    pub clock_out_method: Option<AttendanceMethod>,
    #[schema(example = 8.5, nullable = true)]
    pub hours_worked: Option<f64>,
}

impl AttendanceRecord {
    pub fn is_open(&self) -> bool {
        self.clock_out_time.is_none()
    }
}

/// Where a user stands today, derived from the most recent record of the day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "record", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceState {
    NoRecord,
    ClockedIn(AttendanceRecord),
    ClockedOut(AttendanceRecord),
}

/// Flat row as stored in the `attendance` table.
#[derive(Debug, sqlx::FromRow)]
pub struct AttendanceRow {
    pub id: i64,
    pub user_id: i64,
    pub date: NaiveDate,
    pub clock_in_time: DateTime<Utc>,
    pub clock_out_time: Option<DateTime<Utc>>,
    pub clock_in_latitude: Option<f64>,
    pub clock_in_longitude: Option<f64>,
    pub clock_in_accuracy: Option<f32>,
    pub clock_in_distance_m: Option<f64>,
    pub clock_out_latitude: Option<f64>,
    pub clock_out_longitude: Option<f64>,
    pub clock_out_accuracy: Option<f32>,
    pub clock_out_distance_m: Option<f64>,
    pub location_valid_at_clock_in: bool,
    pub location_valid_at_clock_out: Option<bool>,
    pub method: String,
    pub clock_out_method: Option<String>,
    pub hours_worked: Option<f64>,
}

fn location_from(
    latitude: Option<f64>,
    longitude: Option<f64>,
    accuracy: Option<f32>,
    distance: Option<f64>,
) -> Option<RecordedLocation> {
    Some(RecordedLocation {
        latitude: latitude?,
        longitude: longitude?,
        accuracy: accuracy.unwrap_or_default(),
        distance_meters: distance.unwrap_or_default(),
    })
}

impl TryFrom<AttendanceRow> for AttendanceRecord {
    type Error = sqlx::Error;

    fn try_from(row: AttendanceRow) -> Result<Self, Self::Error> {
        let method = row
            .method
            .parse::<AttendanceMethod>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let clock_out_method = row
            .clock_out_method
            .as_deref()
            .map(str::parse::<AttendanceMethod>)
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(AttendanceRecord {
            id: row.id,
            user_id: row.user_id,
            date: row.date,
            clock_in_time: row.clock_in_time,
            clock_out_time: row.clock_out_time,
            clock_in_location: location_from(
                row.clock_in_latitude,
                row.clock_in_longitude,
                row.clock_in_accuracy,
                row.clock_in_distance_m,
            ),
            clock_out_location: location_from(
                row.clock_out_latitude,
                row.clock_out_longitude,
                row.clock_out_accuracy,
                row.clock_out_distance_m,
            ),
            location_valid_at_clock_in: row.location_valid_at_clock_in,
            location_valid_at_clock_out: row.location_valid_at_clock_out,
            method,
            clock_out_method,
            hours_worked: row.hours_worked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips_through_storage_text() {
        assert_eq!(AttendanceMethod::Gps.as_ref(), "GPS");
        assert_eq!("MANUAL".parse::<AttendanceMethod>().unwrap(), AttendanceMethod::Manual);
        assert_eq!(
            serde_json::to_string(&AttendanceMethod::Qr).unwrap(),
            "\"QR\""
        );
        assert!("bluetooth".parse::<AttendanceMethod>().is_err());
    }

    #[test]
    fn row_with_unknown_method_fails_to_decode() {
        let row = AttendanceRow {
            id: 1,
            user_id: 1,
            date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            clock_in_time: Utc::now(),
            clock_out_time: None,
            clock_in_latitude: None,
            clock_in_longitude: None,
            clock_in_accuracy: None,
            clock_in_distance_m: None,
            clock_out_latitude: None,
            clock_out_longitude: None,
            clock_out_accuracy: None,
            clock_out_distance_m: None,
            location_valid_at_clock_in: true,
            location_valid_at_clock_out: None,
            method: "FINGERPRINT".into(),
            clock_out_method: None,
            hours_worked: None,
        };
        assert!(AttendanceRecord::try_from(row).is_err());
    }
}
