use crate::{
    auth::{auth::AuthUser, password::hash_password},
    model::{role::Role, user::User},
};
use actix_web::{HttpResponse, Responder, error::ErrorInternalServerError, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{error, info};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUser {
    #[schema(example = "maria.lopez")]
    pub username: String,
    #[schema(example = "s3cret-pass")]
    pub password: String,
    #[schema(example = "María López")]
    pub full_name: String,
    /// 1 = admin, 2 = supervisor, 3 = employee
    #[schema(example = 3)]
    pub role_id: u8,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub active: Option<bool>,
}

#[derive(Serialize, ToSchema)]
pub struct UserListResponse {
    pub data: Vec<User>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 12)]
    pub total: i64,
}

/// Create a user account (admin only)
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = Object, example = json!({
            "id": 7, "message": "User created successfully"
        })),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Username already exists")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Users"
)]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    payload: web::Json<CreateUser>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;

    let username = payload.username.trim().to_lowercase();
    if username.is_empty() || payload.password.len() < 8 {
        return Ok(HttpResponse::BadRequest().json(json!({
            "message": "Username required and password must be at least 8 characters"
        })));
    }
    let Some(role) = Role::from_id(payload.role_id) else {
        return Ok(HttpResponse::BadRequest().json(json!({
            "message": "Unknown role_id"
        })));
    };

    let hashed = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "Password hashing failed");
        ErrorInternalServerError("Internal Server Error")
    })?;

    let result = sqlx::query(
        "INSERT INTO users (username, password, full_name, role_id) VALUES (?, ?, ?, ?)",
    )
    .bind(&username)
    .bind(hashed)
    .bind(payload.full_name.trim())
    .bind(role.id())
    .execute(pool.get_ref())
    .await;

    match result {
        Ok(done) => {
            let id = done.last_insert_rowid();
            info!(admin = %auth.username, id, %username, ?role, "User created");
            Ok(HttpResponse::Created().json(json!({
                "id": id,
                "message": "User created successfully"
            })))
        }
        Err(e) => {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return Ok(HttpResponse::Conflict().json(json!({
                        "message": "Username already exists"
                    })));
                }
            }
            error!(error = %e, "Failed to create user");
            Err(ErrorInternalServerError("Internal Server Error"))
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/users",
    params(
        ("page", Query, description = "Page number"),
        ("per_page", Query, description = "Items per page"),
        ("active", Query, description = "Filter by active flag")
    ),
    responses(
        (status = 200, description = "Paginated user list", body = UserListResponse),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Users"
)]
pub async fn list_users(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    query: web::Query<UserQuery>,
) -> actix_web::Result<impl Responder> {
    auth.require_supervisor_or_admin()?;

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = i64::from(page.saturating_sub(1)) * i64::from(per_page);

    let where_sql = if query.active.is_some() {
        " WHERE is_active = ?"
    } else {
        ""
    };

    let count_sql = format!("SELECT COUNT(*) FROM users{where_sql}");
    let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(active) = query.active {
        count_q = count_q.bind(active);
    }

    let data_sql = format!(
        "SELECT id, username, full_name, role_id, is_active, last_login_at FROM users{where_sql} ORDER BY username LIMIT ? OFFSET ?"
    );
    let mut data_q = sqlx::query_as::<_, User>(&data_sql);
    if let Some(active) = query.active {
        data_q = data_q.bind(active);
    }

    let fetched = async {
        let total = count_q.fetch_one(pool.get_ref()).await?;
        let data = data_q
            .bind(per_page)
            .bind(offset)
            .fetch_all(pool.get_ref())
            .await?;
        Ok::<_, sqlx::Error>((data, total))
    }
    .await;

    let (data, total) = fetched.map_err(|e| {
        error!(error = %e, "Failed to list users");
        ErrorInternalServerError("Internal Server Error")
    })?;

    Ok(HttpResponse::Ok().json(UserListResponse {
        data,
        page,
        per_page,
        total,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::bearer;
    use crate::db::test_support::memory_pool;
    use actix_web::{App, http::StatusCode, test};
    use serde_json::Value;

    macro_rules! users_app {
        ($pool:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($pool.clone()))
                    .app_data(web::Data::new(crate::config::test_config()))
                    .route("/users", web::post().to(create_user))
                    .route("/users", web::get().to(list_users)),
            )
            .await
        };
    }

    fn new_user(username: &str) -> Value {
        json!({
            "username": username,
            "password": "long-enough",
            "full_name": "Line Cook",
            "role_id": 3
        })
    }

    #[actix_web::test]
    async fn admin_creates_users_and_duplicates_conflict() {
        let pool = memory_pool().await;
        let app = users_app!(pool);
        let admin = bearer(1, "admin", Role::Admin);

        let req = test::TestRequest::post()
            .uri("/users")
            .insert_header(("Authorization", admin.clone()))
            .set_json(new_user("Cook.One"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        // usernames are case-insensitive
        let req = test::TestRequest::post()
            .uri("/users")
            .insert_header(("Authorization", admin.clone()))
            .set_json(new_user("cook.one"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::get()
            .uri("/users")
            .insert_header(("Authorization", bearer(2, "sup", Role::Supervisor)))
            .to_request();
        let page: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["data"][0]["username"], "cook.one");
        assert!(page["data"][0].get("password").is_none());
    }

    #[actix_web::test]
    async fn non_admins_cannot_create_and_employees_cannot_list() {
        let pool = memory_pool().await;
        let app = users_app!(pool);

        let req = test::TestRequest::post()
            .uri("/users")
            .insert_header(("Authorization", bearer(2, "sup", Role::Supervisor)))
            .set_json(new_user("someone"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::get()
            .uri("/users")
            .insert_header(("Authorization", bearer(3, "cook", Role::Employee)))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
    }
}
