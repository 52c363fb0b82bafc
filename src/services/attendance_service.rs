use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::WriteTx;
use crate::error::AttendanceError;
use crate::geofence::{validate, validate_optional};
use crate::model::attendance::{
    AttendanceMethod, AttendanceRecord, AttendanceRow, AttendanceState, RecordedLocation,
};
use crate::model::geofence::{GeofenceConfig, LocationSample};
use crate::services::clock::Clock;
use crate::utils::user_locks::UserLocks;

const RECORD_COLUMNS: &str = r#"
    id, user_id, date, clock_in_time, clock_out_time,
    clock_in_latitude, clock_in_longitude, clock_in_accuracy, clock_in_distance_m,
    clock_out_latitude, clock_out_longitude, clock_out_accuracy, clock_out_distance_m,
    location_valid_at_clock_in, location_valid_at_clock_out,
    method, clock_out_method, hours_worked
"#;

#[derive(Debug, Default, Clone)]
pub struct HistoryFilter {
    pub user_id: Option<i64>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub page: u32,
    pub per_page: u32,
}

// Helper enum for typed SQLx binding
enum FilterValue {
    I64(i64),
    Date(NaiveDate),
}

/// What a single punch contributes to the record.
struct Punch {
    location: Option<RecordedLocation>,
    location_valid: bool,
}

/// Clock-in / clock-out state machine over the `attendance` table.
///
/// A user has at most one open record (clocked in, not yet out) per day.
/// All transitions for one user run under that user's lock and inside a
/// single transaction; the partial unique index on open records backs the
/// same rule in storage.
pub struct AttendanceService {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    locks: UserLocks,
}

impl AttendanceService {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, timezone: Tz) -> Self {
        Self {
            pool,
            clock,
            timezone,
            locks: UserLocks::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Calendar date of "now" in the configured timezone.
    pub fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.timezone).date_naive()
    }

    pub async fn clock_in(
        &self,
        user_id: i64,
        method: AttendanceMethod,
        location: Option<LocationSample>,
        geofence: &GeofenceConfig,
    ) -> Result<AttendanceRecord, AttendanceError> {
        let _guard = self.locks.acquire(user_id).await;
        let now = self.clock.now();
        let date = now.with_timezone(&self.timezone).date_naive();

        let mut tx = WriteTx::begin(&self.pool).await?;
        let outcome = insert_open(tx.conn(), user_id, date, now, method, location, geofence).await;
        let record = tx.finish(outcome).await?;

        info!(
            user_id,
            record_id = record.id,
            method = %method,
            location_valid = record.location_valid_at_clock_in,
            "Clocked in"
        );
        Ok(record)
    }

    pub async fn clock_out(
        &self,
        user_id: i64,
        method: AttendanceMethod,
        location: Option<LocationSample>,
        geofence: &GeofenceConfig,
    ) -> Result<AttendanceRecord, AttendanceError> {
        let _guard = self.locks.acquire(user_id).await;
        let now = self.clock.now();
        let date = now.with_timezone(&self.timezone).date_naive();

        let mut tx = WriteTx::begin(&self.pool).await?;
        let outcome = close_open(tx.conn(), user_id, date, now, method, location, geofence).await;
        let (record, hours) = tx.finish(outcome).await?;

        info!(user_id, record_id = record.id, hours_worked = hours, "Clocked out");
        Ok(record)
    }

    /// State of the user's most recent record today.
    pub async fn status(&self, user_id: i64) -> Result<AttendanceState, AttendanceError> {
        let latest = self.today_records(user_id).await?.pop();

        Ok(match latest {
            None => AttendanceState::NoRecord,
            Some(record) if record.is_open() => AttendanceState::ClockedIn(record),
            Some(record) => AttendanceState::ClockedOut(record),
        })
    }

    /// Today's records for the user, oldest first.
    pub async fn today_records(&self, user_id: i64) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM attendance WHERE user_id = ? AND date = ? ORDER BY clock_in_time, id"
        );
        let rows = sqlx::query_as::<_, AttendanceRow>(&sql)
            .bind(user_id)
            .bind(self.today())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| AttendanceRecord::try_from(row).map_err(AttendanceError::from))
            .collect()
    }

    /// Records from earlier days that were never clocked out, oldest first.
    pub async fn stale_open_records(
        &self,
        user_id: i64,
    ) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        let mut conn = self.pool.acquire().await?;
        Ok(find_stale_open(&mut *conn, user_id, self.today()).await?)
    }

    /// Paginated history, newest first. Returns the page and the total row count.
    pub async fn history(
        &self,
        filter: &HistoryFilter,
    ) -> Result<(Vec<AttendanceRecord>, i64), AttendanceError> {
        let per_page = filter.per_page.clamp(1, 100);
        let page = filter.page.max(1);
        let offset = i64::from(page.saturating_sub(1)) * i64::from(per_page);

        let mut where_sql = String::from(" WHERE 1=1");
        let mut args: Vec<FilterValue> = Vec::new();

        if let Some(user_id) = filter.user_id {
            where_sql.push_str(" AND user_id = ?");
            args.push(FilterValue::I64(user_id));
        }
        if let Some(from) = filter.from {
            where_sql.push_str(" AND date >= ?");
            args.push(FilterValue::Date(from));
        }
        if let Some(to) = filter.to {
            where_sql.push_str(" AND date <= ?");
            args.push(FilterValue::Date(to));
        }

        let count_sql = format!("SELECT COUNT(*) FROM attendance{where_sql}");
        let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql);
        for arg in &args {
            count_q = match arg {
                FilterValue::I64(v) => count_q.bind(*v),
                FilterValue::Date(d) => count_q.bind(*d),
            };
        }
        let total = count_q.fetch_one(&self.pool).await?;

        let data_sql = format!(
            "SELECT {RECORD_COLUMNS} FROM attendance{where_sql} ORDER BY clock_in_time DESC, id DESC LIMIT ? OFFSET ?"
        );
        let mut data_q = sqlx::query_as::<_, AttendanceRow>(&data_sql);
        for arg in args {
            data_q = match arg {
                FilterValue::I64(v) => data_q.bind(v),
                FilterValue::Date(d) => data_q.bind(d),
            };
        }
        let rows = data_q
            .bind(per_page)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let records = rows
            .into_iter()
            .map(AttendanceRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((records, total))
    }
}

/// GPS validity is advisory: it is stored with the record, never enforced here.
fn evaluate_punch(
    user_id: i64,
    method: AttendanceMethod,
    location: Option<&LocationSample>,
    geofence: &GeofenceConfig,
) -> Punch {
    let recorded = |sample: &LocationSample, distance_meters: f64| RecordedLocation {
        latitude: sample.latitude,
        longitude: sample.longitude,
        accuracy: sample.accuracy,
        distance_meters,
    };

    if !method.requires_location() {
        return Punch {
            location: location.map(|s| recorded(s, validate(s, geofence).distance_meters)),
            location_valid: true,
        };
    }

    match validate_optional(location, geofence) {
        Ok(result) => Punch {
            location: location.map(|s| recorded(s, result.distance_meters)),
            location_valid: result.is_valid,
        },
        Err(e) => {
            warn!(user_id, error = %e, "GPS punch without location, stored as unvalidated");
            Punch {
                location: None,
                location_valid: false,
            }
        }
    }
}

/// Elapsed hours rounded to two decimals.
pub fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let hours = (end - start).num_seconds() as f64 / 3600.0;
    (hours * 100.0).round() / 100.0
}

async fn insert_open(
    conn: &mut SqliteConnection,
    user_id: i64,
    date: NaiveDate,
    now: DateTime<Utc>,
    method: AttendanceMethod,
    location: Option<LocationSample>,
    geofence: &GeofenceConfig,
) -> Result<AttendanceRecord, AttendanceError> {
    if find_open(&mut *conn, user_id, date).await?.is_some() {
        info!(user_id, %date, "Clock-in rejected: record already open");
        return Err(AttendanceError::AlreadyClockedIn);
    }

    let stale = find_stale_open(&mut *conn, user_id, date).await?;
    if !stale.is_empty() {
        let dates: Vec<String> = stale.iter().map(|r| r.date.to_string()).collect();
        warn!(user_id, stale_dates = ?dates, "Clocking in while records from earlier days are still open");
    }

    let punch = evaluate_punch(user_id, method, location.as_ref(), geofence);
    let loc = punch.location;

    let inserted = sqlx::query(
        r#"
        INSERT INTO attendance (
            user_id, date, clock_in_time,
            clock_in_latitude, clock_in_longitude, clock_in_accuracy, clock_in_distance_m,
            location_valid_at_clock_in, method
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(date)
    .bind(now)
    .bind(loc.map(|l| l.latitude))
    .bind(loc.map(|l| l.longitude))
    .bind(loc.map(|l| l.accuracy))
    .bind(loc.map(|l| l.distance_meters))
    .bind(punch.location_valid)
    .bind(method.as_ref())
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        // lost a race against another writer for the same user and day
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.is_unique_violation() {
                return AttendanceError::AlreadyClockedIn;
            }
        }
        AttendanceError::Database(e)
    })?;

    Ok(fetch_by_id(conn, inserted.last_insert_rowid()).await?)
}

async fn close_open(
    conn: &mut SqliteConnection,
    user_id: i64,
    date: NaiveDate,
    now: DateTime<Utc>,
    method: AttendanceMethod,
    location: Option<LocationSample>,
    geofence: &GeofenceConfig,
) -> Result<(AttendanceRecord, f64), AttendanceError> {
    let Some(open) = find_open(&mut *conn, user_id, date).await? else {
        info!(user_id, %date, "Clock-out rejected: no open record");
        return Err(AttendanceError::NoOpenRecord);
    };

    let punch = evaluate_punch(user_id, method, location.as_ref(), geofence);
    let loc = punch.location;
    let hours = hours_between(open.clock_in_time, now);

    sqlx::query(
        r#"
        UPDATE attendance
        SET clock_out_time = ?,
            clock_out_latitude = ?, clock_out_longitude = ?,
            clock_out_accuracy = ?, clock_out_distance_m = ?,
            location_valid_at_clock_out = ?,
            clock_out_method = ?,
            hours_worked = ?
        WHERE id = ?
        AND clock_out_time IS NULL
        "#,
    )
    .bind(now)
    .bind(loc.map(|l| l.latitude))
    .bind(loc.map(|l| l.longitude))
    .bind(loc.map(|l| l.accuracy))
    .bind(loc.map(|l| l.distance_meters))
    .bind(punch.location_valid)
    .bind(method.as_ref())
    .bind(hours)
    .bind(open.id)
    .execute(&mut *conn)
    .await?;

    let record = fetch_by_id(conn, open.id).await?;
    Ok((record, hours))
}

async fn find_open(
    conn: &mut SqliteConnection,
    user_id: i64,
    date: NaiveDate,
) -> Result<Option<AttendanceRecord>, sqlx::Error> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM attendance WHERE user_id = ? AND date = ? AND clock_out_time IS NULL"
    );
    sqlx::query_as::<_, AttendanceRow>(&sql)
        .bind(user_id)
        .bind(date)
        .fetch_optional(conn)
        .await?
        .map(AttendanceRecord::try_from)
        .transpose()
}

/// Records from days before `date` that were never clocked out.
async fn find_stale_open(
    conn: &mut SqliteConnection,
    user_id: i64,
    date: NaiveDate,
) -> Result<Vec<AttendanceRecord>, sqlx::Error> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM attendance WHERE user_id = ? AND date < ? AND clock_out_time IS NULL ORDER BY date"
    );
    sqlx::query_as::<_, AttendanceRow>(&sql)
        .bind(user_id)
        .bind(date)
        .fetch_all(conn)
        .await?
        .into_iter()
        .map(AttendanceRecord::try_from)
        .collect()
}

async fn fetch_by_id(conn: &mut SqliteConnection, id: i64) -> Result<AttendanceRecord, sqlx::Error> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM attendance WHERE id = ?");
    let row = sqlx::query_as::<_, AttendanceRow>(&sql)
        .bind(id)
        .fetch_one(conn)
        .await?;
    AttendanceRecord::try_from(row)
}
