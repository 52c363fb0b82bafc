use crate::{
    auth::auth::AuthUser,
    model::daily_aggregate::DailyAggregate,
    services::{
        attendance_service::AttendanceService,
        daily_aggregation::{DailyAggregationJob, JobOutcome, list_aggregates},
    },
};
use actix_web::{HttpResponse, Responder, error::ErrorInternalServerError, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{error, info};
use utoipa::ToSchema;

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RunQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Serialize, ToSchema)]
pub struct DailyAggregateListResponse {
    pub data: Vec<DailyAggregate>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 30)]
    pub total: i64,
}

/// Daily aggregation audit log, newest run first.
#[utoipa::path(
    get,
    path = "/api/reports/daily",
    params(
        ("page", Query, description = "Page number"),
        ("per_page", Query, description = "Items per page")
    ),
    responses(
        (status = 200, description = "Paginated aggregate rows", body = DailyAggregateListResponse),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Reports"
)]
pub async fn list_daily(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    query: web::Query<ReportQuery>,
) -> actix_web::Result<impl Responder> {
    auth.require_supervisor_or_admin()?;

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);

    let (data, total) = list_aggregates(pool.get_ref(), page, per_page)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to list daily aggregates");
            ErrorInternalServerError("Internal Server Error")
        })?;

    Ok(HttpResponse::Ok().json(DailyAggregateListResponse {
        data,
        page,
        per_page,
        total,
    }))
}

/// Run the aggregation now (admin only). Defaults to yesterday.
#[utoipa::path(
    post,
    path = "/api/reports/daily/run",
    params(
        ("date", Query, description = "Date to aggregate (YYYY-MM-DD), defaults to yesterday")
    ),
    responses(
        (status = 200, description = "Aggregate written", body = DailyAggregate),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "A run is already in progress"),
        (status = 500, description = "Aggregate could not be written")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Reports"
)]
pub async fn run_daily(
    auth: AuthUser,
    job: web::Data<DailyAggregationJob>,
    service: web::Data<AttendanceService>,
    query: web::Query<RunQuery>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;

    let date = match query.date {
        Some(date) => date,
        None => {
            let today = service.today();
            today.pred_opt().unwrap_or(today)
        }
    };
    info!(admin = %auth.username, %date, "Manual daily aggregation requested");

    match job.run_for_date(date).await {
        Ok(JobOutcome::Completed(aggregate)) => Ok(HttpResponse::Ok().json(aggregate)),
        Ok(JobOutcome::Skipped) => Ok(HttpResponse::Conflict().json(json!({
            "message": "Daily aggregation already running"
        }))),
        Err(e) => {
            error!(error = %e, %date, "Manual daily aggregation failed");
            Err(ErrorInternalServerError("Internal Server Error"))
        }
    }
}
