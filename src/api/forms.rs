use crate::{
    auth::auth::AuthUser,
    model::forms::{CookingControl, FormKind, HandwashingLog, ReceivingInspection, TemperatureLog},
    services::attendance_service::AttendanceService,
};
use actix_web::{HttpResponse, Responder, error::ErrorInternalServerError, web};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use sqlx::{FromRow, SqlitePool, sqlite::SqliteRow};
use tracing::{error, info};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewTemperatureLog {
    #[schema(example = "2026-01-01", format = "date", value_type = Option<String>)]
    pub fecha: Option<NaiveDate>,
    #[schema(example = "Walk-in fridge 1")]
    pub equipment: String,
    #[schema(example = 3.5)]
    pub temperature_c: f64,
    #[schema(example = 0.0)]
    pub min_c: f64,
    #[schema(example = 5.0)]
    pub max_c: f64,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewReceivingInspection {
    #[schema(example = "2026-01-01", format = "date", value_type = Option<String>)]
    pub fecha: Option<NaiveDate>,
    pub supplier: String,
    pub product: String,
    pub temperature_c: Option<f64>,
    pub packaging_ok: bool,
    pub product_rejected: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewHandwashingLog {
    #[schema(example = "2026-01-01", format = "date", value_type = Option<String>)]
    pub fecha: Option<NaiveDate>,
    pub area: String,
    pub compliant: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewCookingControl {
    #[schema(example = "2026-01-01", format = "date", value_type = Option<String>)]
    pub fecha: Option<NaiveDate>,
    pub product: String,
    #[schema(example = 78.0)]
    pub core_temperature_c: f64,
    #[schema(example = 75.0)]
    pub target_c: f64,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FormCreated {
    #[schema(example = 12)]
    pub id: i64,
    pub form_type: FormKind,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub fecha: NaiveDate,
    /// True when the entry is a HACCP non-conformity
    pub non_conformity: bool,
}

#[derive(Debug, Deserialize)]
pub struct FormQuery {
    pub fecha: Option<NaiveDate>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

fn parse_body<T: DeserializeOwned>(body: Value) -> Result<T, HttpResponse> {
    serde_json::from_value(body).map_err(|e| {
        HttpResponse::BadRequest().json(json!({
            "message": format!("Invalid form payload: {e}")
        }))
    })
}

/// Record a HACCP checklist entry. The body shape depends on `kind`.
#[utoipa::path(
    post,
    path = "/api/forms/{kind}",
    params(
        ("kind", Path, description = "temperature, receiving, handwashing or cooking")
    ),
    request_body(content = Object, description = "NewTemperatureLog, NewReceivingInspection, NewHandwashingLog or NewCookingControl"),
    responses(
        (status = 201, description = "Entry stored", body = FormCreated),
        (status = 400, description = "Payload does not match the form kind or has inverted limits"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Forms"
)]
pub async fn create_form(
    auth: AuthUser,
    kind: web::Path<FormKind>,
    pool: web::Data<SqlitePool>,
    service: web::Data<AttendanceService>,
    body: web::Json<Value>,
) -> impl Responder {
    let kind = kind.into_inner();
    let today = service.today();
    let now = service.now();
    let pool = pool.get_ref();

    let inserted = match kind {
        FormKind::Temperature => match parse_body::<NewTemperatureLog>(body.into_inner()) {
            Ok(p) if p.min_c > p.max_c => {
                return HttpResponse::BadRequest().json(json!({
                    "message": "min_c must not be greater than max_c"
                }));
            }
            Ok(p) => insert_temperature(pool, auth.user_id, p, today, now).await,
            Err(resp) => return resp,
        },
        FormKind::Receiving => match parse_body::<NewReceivingInspection>(body.into_inner()) {
            Ok(p) => insert_receiving(pool, auth.user_id, p, today, now).await,
            Err(resp) => return resp,
        },
        FormKind::Handwashing => match parse_body::<NewHandwashingLog>(body.into_inner()) {
            Ok(p) => insert_handwashing(pool, auth.user_id, p, today, now).await,
            Err(resp) => return resp,
        },
        FormKind::Cooking => match parse_body::<NewCookingControl>(body.into_inner()) {
            Ok(p) => insert_cooking(pool, auth.user_id, p, today, now).await,
            Err(resp) => return resp,
        },
    };

    match inserted {
        Ok((id, fecha, non_conformity)) => {
            info!(
                user_id = auth.user_id,
                form_type = %kind,
                id,
                non_conformity,
                "Form entry recorded"
            );
            HttpResponse::Created().json(FormCreated {
                id,
                form_type: kind,
                fecha,
                non_conformity,
            })
        }
        Err(e) => {
            error!(error = %e, form_type = %kind, "Failed to store form entry");
            HttpResponse::InternalServerError().json(json!({
                "message": "Something went wrong, Contact with system admin"
            }))
        }
    }
}

type Inserted = Result<(i64, NaiveDate, bool), sqlx::Error>;

async fn insert_temperature(
    pool: &SqlitePool,
    user_id: i64,
    p: NewTemperatureLog,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Inserted {
    let fecha = p.fecha.unwrap_or(today);
    let conforme = (p.min_c..=p.max_c).contains(&p.temperature_c);

    let id = sqlx::query(
        r#"
        INSERT INTO temperature_logs
            (user_id, fecha, equipment, temperature_c, min_c, max_c, conforme, notes, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(fecha)
    .bind(&p.equipment)
    .bind(p.temperature_c)
    .bind(p.min_c)
    .bind(p.max_c)
    .bind(conforme)
    .bind(&p.notes)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok((id, fecha, !conforme))
}

async fn insert_receiving(
    pool: &SqlitePool,
    user_id: i64,
    p: NewReceivingInspection,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Inserted {
    let fecha = p.fecha.unwrap_or(today);

    let id = sqlx::query(
        r#"
        INSERT INTO receiving_inspections
            (user_id, fecha, supplier, product, temperature_c, packaging_ok, product_rejected, notes, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(fecha)
    .bind(&p.supplier)
    .bind(&p.product)
    .bind(p.temperature_c)
    .bind(p.packaging_ok)
    .bind(p.product_rejected)
    .bind(&p.notes)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok((id, fecha, p.product_rejected))
}

async fn insert_handwashing(
    pool: &SqlitePool,
    user_id: i64,
    p: NewHandwashingLog,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Inserted {
    let fecha = p.fecha.unwrap_or(today);

    let id = sqlx::query(
        r#"
        INSERT INTO handwashing_logs (user_id, fecha, area, compliant, notes, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(fecha)
    .bind(&p.area)
    .bind(p.compliant)
    .bind(&p.notes)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok((id, fecha, !p.compliant))
}

async fn insert_cooking(
    pool: &SqlitePool,
    user_id: i64,
    p: NewCookingControl,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Inserted {
    let fecha = p.fecha.unwrap_or(today);
    let conforme = p.core_temperature_c >= p.target_c;

    let id = sqlx::query(
        r#"
        INSERT INTO cooking_controls
            (user_id, fecha, product, core_temperature_c, target_c, conforme, notes, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(fecha)
    .bind(&p.product)
    .bind(p.core_temperature_c)
    .bind(p.target_c)
    .bind(conforme)
    .bind(&p.notes)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok((id, fecha, !conforme))
}

/// Rows of one form table, newest first, with the total matching count.
async fn list_rows<T>(
    pool: &SqlitePool,
    table: &str,
    user_id: Option<i64>,
    fecha: Option<NaiveDate>,
    page: u32,
    per_page: u32,
) -> Result<(Vec<T>, i64), sqlx::Error>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
    let offset = i64::from(page.saturating_sub(1)) * i64::from(per_page);

    let mut where_sql = String::from(" WHERE 1=1");
    if user_id.is_some() {
        where_sql.push_str(" AND user_id = ?");
    }
    if fecha.is_some() {
        where_sql.push_str(" AND fecha = ?");
    }

    let count_sql = format!("SELECT COUNT(*) FROM {table}{where_sql}");
    let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(user_id) = user_id {
        count_q = count_q.bind(user_id);
    }
    if let Some(fecha) = fecha {
        count_q = count_q.bind(fecha);
    }
    let total = count_q.fetch_one(pool).await?;

    let data_sql = format!("SELECT * FROM {table}{where_sql} ORDER BY id DESC LIMIT ? OFFSET ?");
    let mut data_q = sqlx::query_as::<_, T>(&data_sql);
    if let Some(user_id) = user_id {
        data_q = data_q.bind(user_id);
    }
    if let Some(fecha) = fecha {
        data_q = data_q.bind(fecha);
    }
    let data = data_q.bind(per_page).bind(offset).fetch_all(pool).await?;

    Ok((data, total))
}

fn page_json<T: Serialize>(data: Vec<T>, page: u32, per_page: u32, total: i64) -> Value {
    json!({
        "data": data,
        "page": page,
        "per_page": per_page,
        "total": total,
    })
}

/// List entries of one form kind. Employees only see what they recorded.
#[utoipa::path(
    get,
    path = "/api/forms/{kind}",
    params(
        ("kind", Path, description = "temperature, receiving, handwashing or cooking"),
        ("fecha", Query, description = "Only entries for this date (YYYY-MM-DD)"),
        ("page", Query, description = "Page number"),
        ("per_page", Query, description = "Items per page")
    ),
    responses(
        (status = 200, description = "Paginated form entries", body = Object, example = json!({
            "data": [], "page": 1, "per_page": 20, "total": 0
        })),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Forms"
)]
pub async fn list_forms(
    auth: AuthUser,
    kind: web::Path<FormKind>,
    pool: web::Data<SqlitePool>,
    query: web::Query<FormQuery>,
) -> actix_web::Result<impl Responder> {
    let kind = kind.into_inner();
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let owner = if auth.can_review() {
        None
    } else {
        Some(auth.user_id)
    };
    let pool = pool.get_ref();
    let table = kind.table();

    let listed = match kind {
        FormKind::Temperature => {
            list_rows::<TemperatureLog>(pool, table, owner, query.fecha, page, per_page)
                .await
                .map(|(d, t)| page_json(d, page, per_page, t))
        }
        FormKind::Receiving => {
            list_rows::<ReceivingInspection>(pool, table, owner, query.fecha, page, per_page)
                .await
                .map(|(d, t)| page_json(d, page, per_page, t))
        }
        FormKind::Handwashing => {
            list_rows::<HandwashingLog>(pool, table, owner, query.fecha, page, per_page)
                .await
                .map(|(d, t)| page_json(d, page, per_page, t))
        }
        FormKind::Cooking => {
            list_rows::<CookingControl>(pool, table, owner, query.fecha, page, per_page)
                .await
                .map(|(d, t)| page_json(d, page, per_page, t))
        }
    };

    let body = listed.map_err(|e| {
        error!(error = %e, form_type = %kind, "Failed to list form entries");
        ErrorInternalServerError("Internal Server Error")
    })?;
    Ok(HttpResponse::Ok().json(body))
}
