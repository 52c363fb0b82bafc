use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};
use anyhow::Context;
use std::sync::Arc;

use haccp_attendance::config::Config;
use haccp_attendance::db::{bootstrap_admin, init_db, seed_geofence};
use haccp_attendance::docs::ApiDoc;
use haccp_attendance::routes;
use haccp_attendance::services::attendance_service::AttendanceService;
use haccp_attendance::services::clock::{Clock, SystemClock};
use haccp_attendance::services::daily_aggregation::{
    DailyAggregationJob, haccp_sources, spawn_daily,
};

use tracing::{info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi; // needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    "HACCP attendance service"
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!(timezone = %config.timezone, "Server starting...");

    let pool = init_db(&config.database_url).await?;
    seed_geofence(&pool, &config.default_geofence).await?;

    match &config.bootstrap_admin {
        Some((username, password)) => {
            bootstrap_admin(&pool, username, password).await?;
        }
        None => warn!("BOOTSTRAP_ADMIN_USERNAME/PASSWORD not set, no admin will be created"),
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let attendance = Data::new(AttendanceService::new(
        pool.clone(),
        clock.clone(),
        config.timezone,
    ));

    let job = Arc::new(DailyAggregationJob::new(pool.clone(), haccp_sources(), clock));
    spawn_daily(job.clone(), config.timezone, config.aggregation_time);
    let job = Data::from(job);

    let server_addr = config.server_addr.clone();
    let config_data = config.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // wildcard {_:.*} matches the JS/CSS assets
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(Data::new(pool.clone()))
            .app_data(Data::new(config.clone()))
            .app_data(attendance.clone())
            .app_data(job.clone())
            .service(index)
            // Configure auth + protected routes with rate limiting
            .configure(|cfg| routes::configure(cfg, config_data.clone()))
    })
    .bind(&server_addr)
    .with_context(|| format!("failed to bind {server_addr}"))?
    .run()
    .await?;

    info!("Server stopped");
    Ok(())
}
