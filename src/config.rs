use anyhow::{Context, Result, anyhow};
use chrono::NaiveTime;
use chrono_tz::Tz;
use std::env;
use std::fmt::Display;
use std::str::FromStr;

use crate::model::geofence::GeofenceConfig;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub access_token_ttl: usize,
    pub refresh_token_ttl: usize,

    // Rate limiting
    pub rate_login_per_min: u32,
    pub rate_refresh_per_min: u32,
    pub rate_protected_per_min: u32,

    pub api_prefix: String,

    /// Zone that defines the calendar day for attendance and the job schedule
    pub timezone: Tz,
    pub aggregation_time: NaiveTime,

    /// Seed for the geofence row, only used when the table is empty
    pub default_geofence: GeofenceConfig,

    pub log_dir: String,
    pub bootstrap_admin: Option<(String, String)>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).ok_or_else(|| anyhow!("{key} must be set"));

        let timezone: Tz = parse_or(&lookup, "APP_TIMEZONE", "UTC")?;
        let aggregation_time = {
            let raw = lookup("AGGREGATION_TIME").unwrap_or_else(|| "00:00".to_string());
            NaiveTime::parse_from_str(&raw, "%H:%M")
                .with_context(|| format!("AGGREGATION_TIME must be HH:MM, got {raw:?}"))?
        };

        let default_geofence = GeofenceConfig {
            target_latitude: parse_or(&lookup, "GEOFENCE_LATITUDE", "0")?,
            target_longitude: parse_or(&lookup, "GEOFENCE_LONGITUDE", "0")?,
            radius_meters: parse_or(&lookup, "GEOFENCE_RADIUS_METERS", "100")?,
        };

        let bootstrap_admin = match (
            lookup("BOOTSTRAP_ADMIN_USERNAME"),
            lookup("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Some(user), Some(pass)) if !user.trim().is_empty() && !pass.is_empty() => {
                Some((user, pass))
            }
            _ => None,
        };

        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            access_token_ttl: parse_or(&lookup, "ACCESS_TOKEN_TTL", "900")?, // 15 min
            refresh_token_ttl: parse_or(&lookup, "REFRESH_TOKEN_TTL", "604800")?, // 7 days

            rate_login_per_min: parse_or(&lookup, "RATE_LOGIN_PER_MIN", "60")?,
            rate_refresh_per_min: parse_or(&lookup, "RATE_REFRESH_PER_MIN", "30")?,
            rate_protected_per_min: parse_or(&lookup, "RATE_PROTECTED_PER_MIN", "1000")?,

            api_prefix: lookup("API_PREFIX").unwrap_or_else(|| "/api".to_string()),

            timezone,
            aggregation_time,
            default_geofence,

            log_dir: lookup("LOG_DIR").unwrap_or_else(|| "logs".to_string()),
            bootstrap_admin,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow!("invalid value {raw:?} for {key}: {e}"))
}

#[cfg(test)]
pub fn test_config() -> Config {
    Config::from_lookup(|key| match key {
        "SERVER_ADDR" => Some("127.0.0.1:0".to_string()),
        "DATABASE_URL" => Some("sqlite::memory:".to_string()),
        "JWT_SECRET" => Some("test-secret".to_string()),
        "GEOFENCE_LATITUDE" => Some("40.4168".to_string()),
        "GEOFENCE_LONGITUDE" => Some("-3.7038".to_string()),
        _ => None,
    })
    .expect("test config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("SERVER_ADDR", "127.0.0.1:8080"),
        ("DATABASE_URL", "sqlite::memory:"),
        ("JWT_SECRET", "secret"),
    ];

    #[test]
    fn defaults_apply_when_optional_vars_missing() {
        let config = Config::from_lookup(lookup_from(REQUIRED)).unwrap();

        assert_eq!(config.timezone, chrono_tz::UTC);
        assert_eq!(config.aggregation_time, NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        assert_eq!(config.default_geofence.radius_meters, 100.0);
        assert_eq!(config.access_token_ttl, 900);
        assert_eq!(config.api_prefix, "/api");
        assert!(config.bootstrap_admin.is_none());
    }

    #[test]
    fn parses_timezone_schedule_and_geofence() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("APP_TIMEZONE", "Europe/Madrid"),
            ("AGGREGATION_TIME", "01:30"),
            ("GEOFENCE_LATITUDE", "40.4168"),
            ("GEOFENCE_LONGITUDE", "-3.7038"),
            ("GEOFENCE_RADIUS_METERS", "150"),
        ]);
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();

        assert_eq!(config.timezone, chrono_tz::Europe::Madrid);
        assert_eq!(config.aggregation_time, NaiveTime::from_hms_opt(1, 30, 0).unwrap());
        assert_eq!(config.default_geofence.target_latitude, 40.4168);
        assert_eq!(config.default_geofence.target_longitude, -3.7038);
        assert_eq!(config.default_geofence.radius_meters, 150.0);
    }

    #[test]
    fn missing_required_var_is_reported_by_name() {
        let err = Config::from_lookup(lookup_from(&REQUIRED[..2])).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn bad_timezone_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("APP_TIMEZONE", "Mars/Olympus"));
        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("APP_TIMEZONE"));
    }
}
