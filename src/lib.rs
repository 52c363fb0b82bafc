pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod geofence;
pub mod model;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
