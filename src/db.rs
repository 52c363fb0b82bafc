use anyhow::{Context, Result};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use std::str::FromStr;
use std::time::Duration;

use crate::auth::password::hash_password;
use crate::model::geofence::GeofenceConfig;
use crate::model::role::Role;

/// Idempotent schema, applied statement by statement on every start.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL,
        full_name TEXT NOT NULL DEFAULT '',
        role_id INTEGER NOT NULL DEFAULT 3,
        is_active INTEGER NOT NULL DEFAULT 1,
        last_login_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS refresh_tokens (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        jti TEXT NOT NULL UNIQUE,
        expires_at INTEGER NOT NULL,
        revoked INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS geofence_config (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        target_latitude REAL NOT NULL,
        target_longitude REAL NOT NULL,
        radius_meters REAL NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS attendance (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        date TEXT NOT NULL,
        clock_in_time TEXT NOT NULL,
        clock_out_time TEXT,
        clock_in_latitude REAL,
        clock_in_longitude REAL,
        clock_in_accuracy REAL,
        clock_in_distance_m REAL,
        clock_out_latitude REAL,
        clock_out_longitude REAL,
        clock_out_accuracy REAL,
        clock_out_distance_m REAL,
        location_valid_at_clock_in INTEGER NOT NULL,
        location_valid_at_clock_out INTEGER,
        method TEXT NOT NULL CHECK (method IN ('GPS', 'MANUAL', 'QR')),
        clock_out_method TEXT CHECK (clock_out_method IN ('GPS', 'MANUAL', 'QR')),
        hours_worked REAL
    )
    "#,
    // at most one open record per user and day
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_open
        ON attendance (user_id, date) WHERE clock_out_time IS NULL
    "#,
    "CREATE INDEX IF NOT EXISTS idx_attendance_user_date ON attendance (user_id, date)",
    r#"
    CREATE TABLE IF NOT EXISTS temperature_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        fecha TEXT NOT NULL,
        equipment TEXT NOT NULL,
        temperature_c REAL NOT NULL,
        min_c REAL NOT NULL,
        max_c REAL NOT NULL,
        conforme INTEGER NOT NULL,
        notes TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS receiving_inspections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        fecha TEXT NOT NULL,
        supplier TEXT NOT NULL,
        product TEXT NOT NULL,
        temperature_c REAL,
        packaging_ok INTEGER NOT NULL,
        product_rejected INTEGER NOT NULL,
        notes TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS handwashing_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        fecha TEXT NOT NULL,
        area TEXT NOT NULL,
        compliant INTEGER NOT NULL,
        notes TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cooking_controls (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        fecha TEXT NOT NULL,
        product TEXT NOT NULL,
        core_temperature_c REAL NOT NULL,
        target_c REAL NOT NULL,
        conforme INTEGER NOT NULL,
        notes TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_temperature_logs_fecha ON temperature_logs (fecha)",
    "CREATE INDEX IF NOT EXISTS idx_receiving_inspections_fecha ON receiving_inspections (fecha)",
    "CREATE INDEX IF NOT EXISTS idx_handwashing_logs_fecha ON handwashing_logs (fecha)",
    "CREATE INDEX IF NOT EXISTS idx_cooking_controls_fecha ON cooking_controls (fecha)",
    r#"
    CREATE TABLE IF NOT EXISTS daily_aggregates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date TEXT NOT NULL,
        per_form_type_counts TEXT NOT NULL,
        total_records INTEGER NOT NULL,
        non_conformities INTEGER NOT NULL,
        generated_at TEXT NOT NULL
    )
    "#,
];

pub async fn init_db(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid DATABASE_URL {database_url:?}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    apply_schema(&pool).await?;
    Ok(pool)
}

pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(*statement)
            .execute(pool)
            .await
            .with_context(|| format!("schema statement failed: {}", statement.trim()))?;
    }
    Ok(())
}

/// Write transaction opened with `BEGIN IMMEDIATE`.
///
/// The write lock is taken before the first read, so two writers never hold
/// read snapshots that they later fail to upgrade. Waiting writers go through
/// `busy_timeout` instead of failing with "database is locked".
///
/// Dropping it without [`WriteTx::commit`] or [`WriteTx::rollback`] detaches
/// the connection from the pool; closing it discards the open transaction.
pub struct WriteTx {
    conn: Option<PoolConnection<Sqlite>>,
}

impl WriteTx {
    pub async fn begin(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn: Some(conn) })
    }

    pub fn conn(&mut self) -> &mut SqliteConnection {
        match self.conn.as_deref_mut() {
            Some(conn) => conn,
            None => unreachable!("write transaction already finished"),
        }
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        self.end("COMMIT").await
    }

    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        self.end("ROLLBACK").await
    }

    /// Commits on `Ok`, rolls back on `Err`, and hands the outcome back.
    pub async fn finish<T, E>(self, outcome: Result<T, E>) -> Result<T, E>
    where
        E: From<sqlx::Error>,
    {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback failed, connection discarded");
                }
                Err(e)
            }
        }
    }

    async fn end(mut self, statement: &'static str) -> Result<(), sqlx::Error> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        match sqlx::query(statement).execute(&mut *conn).await {
            Ok(_) => Ok(()),
            Err(e) => {
                drop(conn.detach());
                Err(e)
            }
        }
    }
}

impl Drop for WriteTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
    }
}

/// Inserts the configured geofence unless an admin already stored one.
pub async fn seed_geofence(pool: &SqlitePool, defaults: &GeofenceConfig) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO geofence_config (id, target_latitude, target_longitude, radius_meters)
        VALUES (1, ?, ?, ?)
        "#,
    )
    .bind(defaults.target_latitude)
    .bind(defaults.target_longitude)
    .bind(defaults.radius_meters)
    .execute(pool)
    .await
    .context("Failed to seed geofence configuration")?;
    Ok(())
}

/// Creates the first admin account when the users table is empty.
pub async fn bootstrap_admin(pool: &SqlitePool, username: &str, password: &str) -> Result<bool> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;
    if existing > 0 {
        return Ok(false);
    }

    let hashed = hash_password(password).map_err(|e| anyhow::anyhow!("hash failed: {e}"))?;
    sqlx::query(
        "INSERT INTO users (username, password, full_name, role_id) VALUES (?, ?, ?, ?)",
    )
    .bind(username.trim().to_lowercase())
    .bind(hashed)
    .bind("Administrator")
    .bind(Role::Admin.id())
    .execute(pool)
    .await
    .context("Failed to create bootstrap admin")?;

    tracing::info!(username, "Bootstrap admin created");
    Ok(true)
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Single-connection in-memory database with the production schema.
    pub async fn memory_pool() -> SqlitePool {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        pool
    }

    pub async fn seed_user(pool: &SqlitePool, username: &str, role: Role) -> i64 {
        sqlx::query("INSERT INTO users (username, password, full_name, role_id) VALUES (?, 'x', ?, ?)")
            .bind(username)
            .bind(username)
            .bind(role.id())
            .execute(pool)
            .await
            .unwrap()
            .last_insert_rowid()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::memory_pool;
    use super::*;

    #[actix_web::test]
    async fn schema_is_idempotent() {
        let pool = memory_pool().await;
        apply_schema(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        for expected in [
            "attendance",
            "cooking_controls",
            "daily_aggregates",
            "geofence_config",
            "handwashing_logs",
            "receiving_inspections",
            "temperature_logs",
            "users",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[actix_web::test]
    async fn geofence_seed_does_not_overwrite_admin_value() {
        let pool = memory_pool().await;
        let first = GeofenceConfig {
            target_latitude: 1.0,
            target_longitude: 2.0,
            radius_meters: 50.0,
        };
        seed_geofence(&pool, &first).await.unwrap();
        seed_geofence(
            &pool,
            &GeofenceConfig {
                radius_meters: 500.0,
                ..first
            },
        )
        .await
        .unwrap();

        let radius: f64 = sqlx::query_scalar("SELECT radius_meters FROM geofence_config")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(radius, 50.0);
    }

    #[actix_web::test]
    async fn write_tx_commits_and_rolls_back() {
        let pool = memory_pool().await;
        let insert = "INSERT INTO users (username, password) VALUES (?, 'x')";

        let mut tx = WriteTx::begin(&pool).await.unwrap();
        sqlx::query(insert).bind("kept").execute(tx.conn()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = WriteTx::begin(&pool).await.unwrap();
        sqlx::query(insert).bind("discarded").execute(tx.conn()).await.unwrap();
        let outcome: Result<(), sqlx::Error> = Err(sqlx::Error::RowNotFound);
        assert!(tx.finish(outcome).await.is_err());

        let names: Vec<String> = sqlx::query_scalar("SELECT username FROM users")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(names, vec!["kept".to_string()]);
    }

    #[actix_web::test]
    async fn dropped_write_tx_discards_its_writes() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("tx.db").display());
        let pool = init_db(&url).await.unwrap();

        {
            let mut tx = WriteTx::begin(&pool).await.unwrap();
            sqlx::query("INSERT INTO users (username, password) VALUES ('ghost', 'x')")
                .execute(tx.conn())
                .await
                .unwrap();
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);

        // the write lock was released with the connection
        let mut tx = WriteTx::begin(&pool).await.unwrap();
        sqlx::query("INSERT INTO users (username, password) VALUES ('next', 'x')")
            .execute(tx.conn())
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[actix_web::test]
    async fn bootstrap_admin_only_runs_on_empty_table() {
        let pool = memory_pool().await;
        assert!(bootstrap_admin(&pool, "Admin", "changeme").await.unwrap());
        assert!(!bootstrap_admin(&pool, "other", "changeme").await.unwrap());

        let username: String = sqlx::query_scalar("SELECT username FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(username, "admin");
    }
}
