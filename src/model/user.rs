use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct User {
    #[schema(example = 7)]
    pub id: i64,
    #[schema(example = "maria.lopez")]
    pub username: String,
    #[schema(example = "María López")]
    pub full_name: String,
    #[schema(example = 3)]
    pub role_id: u8,
    pub is_active: bool,
    #[schema(example = "2026-01-01T08:55:00Z", format = "date-time", value_type = String, nullable = true)]
    pub last_login_at: Option<DateTime<Utc>>,
}
