use crate::{
    api::geofence::active_geofence,
    auth::auth::AuthUser,
    config::Config,
    error::AttendanceError,
    model::{
        attendance::{AttendanceMethod, AttendanceRecord},
        geofence::LocationSample,
    },
    services::attendance_service::{AttendanceService, HistoryFilter},
};
use actix_web::{HttpResponse, Responder, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct PunchRequest {
    pub method: AttendanceMethod,
    /// Last fix from the device; expected for GPS punches
    pub location: Option<LocationSample>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub user_id: Option<i64>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Serialize, ToSchema)]
pub struct AttendanceListResponse {
    pub data: Vec<AttendanceRecord>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 42)]
    pub total: i64,
}

/// Clock-in endpoint
#[utoipa::path(
    post,
    path = "/api/attendance/clock-in",
    request_body = PunchRequest,
    responses(
        (status = 200, description = "Clocked in, record returned", body = AttendanceRecord),
        (status = 400, description = "Already clocked in today", body = Object, example = json!({
            "message": "Already clocked in today"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn clock_in(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    pool: web::Data<SqlitePool>,
    config: web::Data<Config>,
    payload: web::Json<PunchRequest>,
) -> actix_web::Result<impl Responder> {
    let geofence = active_geofence(pool.get_ref(), config.get_ref()).await?;
    let PunchRequest { method, location } = payload.into_inner();

    let record = service
        .clock_in(auth.user_id, method, location, &geofence)
        .await?;
    Ok(HttpResponse::Ok().json(record))
}

/// Clock-out endpoint
#[utoipa::path(
    post,
    path = "/api/attendance/clock-out",
    request_body = PunchRequest,
    responses(
        (status = 200, description = "Clocked out, closed record returned", body = AttendanceRecord),
        (status = 400, description = "No open record for today", body = Object, example = json!({
            "message": "No open attendance record for today"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn clock_out(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    pool: web::Data<SqlitePool>,
    config: web::Data<Config>,
    payload: web::Json<PunchRequest>,
) -> actix_web::Result<impl Responder> {
    let geofence = active_geofence(pool.get_ref(), config.get_ref()).await?;
    let PunchRequest { method, location } = payload.into_inner();

    let record = service
        .clock_out(auth.user_id, method, location, &geofence)
        .await?;
    Ok(HttpResponse::Ok().json(record))
}

#[utoipa::path(
    get,
    path = "/api/attendance/today",
    responses(
        (status = 200, description = "Caller's records for today, oldest first", body = [AttendanceRecord]),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn today(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
) -> Result<HttpResponse, AttendanceError> {
    let records = service.today_records(auth.user_id).await?;
    Ok(HttpResponse::Ok().json(records))
}

/// Current state of the caller: `NO_RECORD`, `CLOCKED_IN` or `CLOCKED_OUT`.
#[utoipa::path(
    get,
    path = "/api/attendance/status",
    responses(
        (status = 200, description = "Attendance state for today", body = Object, example = json!({
            "state": "CLOCKED_IN",
            "record": {"id": 1, "date": "2026-01-01", "clock_in_time": "2026-01-01T09:00:00Z"}
        })),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn status(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
) -> Result<HttpResponse, AttendanceError> {
    let state = service.status(auth.user_id).await?;
    Ok(HttpResponse::Ok().json(state))
}

#[utoipa::path(
    get,
    path = "/api/attendance/history",
    params(
        ("user_id", Query, description = "Filter by user (supervisors and admins only)"),
        ("from", Query, description = "First date, inclusive (YYYY-MM-DD)"),
        ("to", Query, description = "Last date, inclusive (YYYY-MM-DD)"),
        ("page", Query, description = "Page number"),
        ("per_page", Query, description = "Items per page")
    ),
    responses(
        (status = 200, description = "Paginated attendance history", body = AttendanceListResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn history(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AttendanceError> {
    // employees only ever see their own rows, whatever they ask for
    let user_id = if auth.can_review() {
        query.user_id
    } else {
        Some(auth.user_id)
    };

    let filter = HistoryFilter {
        user_id,
        from: query.from,
        to: query.to,
        page: query.page.unwrap_or(1).max(1),
        per_page: query.per_page.unwrap_or(20).clamp(1, 100),
    };
    debug!(?filter, "Attendance history query");

    let (data, total) = service.history(&filter).await?;
    Ok(HttpResponse::Ok().json(AttendanceListResponse {
        data,
        page: filter.page,
        per_page: filter.per_page,
        total,
    }))
}
