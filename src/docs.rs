use crate::api::attendance::{AttendanceListResponse, PunchRequest};
use crate::api::forms::{
    FormCreated, NewCookingControl, NewHandwashingLog, NewReceivingInspection, NewTemperatureLog,
};
use crate::api::reports::DailyAggregateListResponse;
use crate::api::users::{CreateUser, UserListResponse};
use crate::auth::handlers::LoginResponse;
use crate::model::attendance::{AttendanceMethod, AttendanceRecord, RecordedLocation};
use crate::model::daily_aggregate::DailyAggregate;
use crate::model::forms::{
    CookingControl, FormKind, HandwashingLog, ReceivingInspection, TemperatureLog,
};
use crate::model::geofence::{GeofenceConfig, GeofenceResult, LocationSample};
use crate::model::user::User;
use crate::models::LoginReqDto;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HACCP Attendance API",
        version = "1.0.0",
        description = r#"
## HACCP Attendance & Food-Safety Records

Back office for a food business: staff clock in and out against a geofenced
work site, record HACCP checklists, and a nightly job tallies the previous
day's entries into an audit log.

### Key Features
- **Attendance**: clock-in/out by GPS, manual or QR, with geofence validation
- **Geofence**: one circular work site, editable by admins
- **HACCP forms**: temperature, receiving, handwashing and cooking checks
- **Daily reports**: append-only per-day counts and non-conformities

### Security
Everything under `/api` needs a **JWT Bearer** access token from `/auth/login`.
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,

        crate::api::users::create_user,
        crate::api::users::list_users,

        crate::api::attendance::clock_in,
        crate::api::attendance::clock_out,
        crate::api::attendance::today,
        crate::api::attendance::status,
        crate::api::attendance::history,

        crate::api::geofence::get_geofence,
        crate::api::geofence::update_geofence,
        crate::api::geofence::validate_location,

        crate::api::forms::create_form,
        crate::api::forms::list_forms,

        crate::api::reports::list_daily,
        crate::api::reports::run_daily
    ),
    components(
        schemas(
            LoginReqDto,
            LoginResponse,
            CreateUser,
            User,
            UserListResponse,
            AttendanceMethod,
            AttendanceRecord,
            RecordedLocation,
            AttendanceListResponse,
            PunchRequest,
            GeofenceConfig,
            GeofenceResult,
            LocationSample,
            FormKind,
            FormCreated,
            NewTemperatureLog,
            NewReceivingInspection,
            NewHandwashingLog,
            NewCookingControl,
            TemperatureLog,
            ReceivingInspection,
            HandwashingLog,
            CookingControl,
            DailyAggregate,
            DailyAggregateListResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login and token rotation"),
        (name = "Users", description = "User administration"),
        (name = "Attendance", description = "Clock-in / clock-out"),
        (name = "Geofence", description = "Work-site boundary and location checks"),
        (name = "Forms", description = "HACCP checklist entries"),
        (name = "Reports", description = "Daily aggregation audit log"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/auth/login",
            "/api/attendance/clock-in",
            "/api/attendance/history",
            "/api/geofence",
            "/api/location/validate",
            "/api/forms/{kind}",
            "/api/reports/daily/run",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing");
        }
        assert!(
            doc.components
                .unwrap()
                .security_schemes
                .contains_key("bearer_auth")
        );
    }
}
