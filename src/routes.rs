use crate::{
    api::{attendance, forms, geofence, reports, users},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);
    let cfg = GovernorConfigBuilder::default()
        .milliseconds_per_request(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        // period and burst are both clamped to at least 1
        .expect("valid rate limiter config");
    Governor::new(&cfg)
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let login_limiter = Arc::new(build_limiter(config.rate_login_per_min));
    let refresh_limiter = Arc::new(build_limiter(config.rate_refresh_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(refresh_limiter.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .service(
                web::resource("/users")
                    .route(web::post().to(users::create_user))
                    .route(web::get().to(users::list_users)),
            )
            .service(
                web::scope("/attendance")
                    .route("/clock-in", web::post().to(attendance::clock_in))
                    .route("/clock-out", web::post().to(attendance::clock_out))
                    .route("/today", web::get().to(attendance::today))
                    .route("/status", web::get().to(attendance::status))
                    .route("/history", web::get().to(attendance::history)),
            )
            .service(
                web::resource("/geofence")
                    .route(web::get().to(geofence::get_geofence))
                    .route(web::put().to(geofence::update_geofence)),
            )
            .service(
                web::resource("/location/validate")
                    .route(web::post().to(geofence::validate_location)),
            )
            .service(
                web::resource("/forms/{kind}")
                    .route(web::post().to(forms::create_form))
                    .route(web::get().to(forms::list_forms)),
            )
            .service(
                web::scope("/reports")
                    .route("/daily", web::get().to(reports::list_daily))
                    .route("/daily/run", web::post().to(reports::run_daily)),
            ),
    );
}

// LOGIN
//  ├─ access_token (15 min)
//  └─ refresh_token (7 days)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ returns a new pair, the old refresh token is revoked
