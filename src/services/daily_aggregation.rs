use chrono::{DateTime, Duration as ChronoDuration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;
use strum::IntoEnumIterator;
use tracing::{error, info, warn};

use crate::error::AggregationError;
use crate::model::daily_aggregate::{DailyAggregate, DailyAggregateRow};
use crate::model::forms::FormKind;
use crate::services::clock::Clock;

const MIN_SLEEP_SECS: u64 = 1;

/// One table counted by the job.
#[derive(Debug, Clone)]
pub struct FormSource {
    pub form_type: String,
    pub table: String,
    pub date_column: String,
    /// SQL predicate selecting non-conforming rows, if the form has one
    pub non_conformity: Option<String>,
}

impl From<FormKind> for FormSource {
    fn from(kind: FormKind) -> Self {
        Self {
            form_type: kind.to_string(),
            table: kind.table().to_string(),
            date_column: "fecha".to_string(),
            non_conformity: Some(kind.non_conformity_predicate().to_string()),
        }
    }
}

pub fn haccp_sources() -> Vec<FormSource> {
    FormKind::iter().map(FormSource::from).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(DailyAggregate),
    /// Another run was still in progress; nothing was written.
    Skipped,
}

/// Tallies the previous day's HACCP forms into an append-only audit row.
pub struct DailyAggregationJob {
    pool: SqlitePool,
    sources: Vec<FormSource>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl DailyAggregationJob {
    pub fn new(pool: SqlitePool, sources: Vec<FormSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            sources,
            clock,
            running: AtomicBool::new(false),
        }
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard(&self.running))
    }

    pub async fn run_for_date(&self, date: NaiveDate) -> Result<JobOutcome, AggregationError> {
        let Some(_guard) = self.try_begin() else {
            warn!(%date, "Daily aggregation already running, trigger ignored");
            return Ok(JobOutcome::Skipped);
        };

        let mut per_form_type_counts = BTreeMap::new();
        let mut total_records = 0;
        let mut non_conformities = 0;

        for source in &self.sources {
            let count = self.count_rows(source, date, None).await.unwrap_or_else(|e| {
                warn!(error = %e, table = %source.table, %date, "Counting rows failed, using 0");
                0
            });
            per_form_type_counts.insert(source.form_type.clone(), count);
            total_records += count;

            if let Some(predicate) = source.non_conformity.as_deref() {
                non_conformities += self
                    .count_rows(source, date, Some(predicate))
                    .await
                    .unwrap_or_else(|e| {
                        warn!(error = %e, table = %source.table, %date, "Counting non-conformities failed, using 0");
                        0
                    });
            }
        }

        let aggregate = DailyAggregate {
            date,
            per_form_type_counts,
            total_records,
            non_conformities,
            generated_at: self.clock.now(),
        };
        self.persist(&aggregate).await?;

        info!(
            %date,
            total_records,
            non_conformities,
            "Daily aggregate written"
        );
        Ok(JobOutcome::Completed(aggregate))
    }

    async fn count_rows(
        &self,
        source: &FormSource,
        date: NaiveDate,
        predicate: Option<&str>,
    ) -> Result<i64, AggregationError> {
        let mut sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?",
            source.table, source.date_column
        );
        if let Some(predicate) = predicate {
            sql.push_str(&format!(" AND ({predicate})"));
        }

        sqlx::query_scalar::<_, i64>(&sql)
            .bind(date)
            .fetch_one(&self.pool)
            .await
            .map_err(|source_err| AggregationError::TableUnavailable {
                table: source.table.clone(),
                source: source_err,
            })
    }

    async fn persist(&self, aggregate: &DailyAggregate) -> Result<(), AggregationError> {
        let counts = serde_json::to_string(&aggregate.per_form_type_counts)?;
        sqlx::query(
            r#"
            INSERT INTO daily_aggregates
                (date, per_form_type_counts, total_records, non_conformities, generated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(aggregate.date)
        .bind(counts)
        .bind(aggregate.total_records)
        .bind(aggregate.non_conformities)
        .bind(aggregate.generated_at)
        .execute(&self.pool)
        .await
        .map_err(AggregationError::AggregateWrite)?;
        Ok(())
    }
}

/// Paginated audit log, newest run first.
pub async fn list_aggregates(
    pool: &SqlitePool,
    page: u32,
    per_page: u32,
) -> Result<(Vec<DailyAggregate>, i64), sqlx::Error> {
    let per_page = per_page.clamp(1, 100);
    let page = page.max(1);
    let offset = i64::from(page.saturating_sub(1)) * i64::from(per_page);

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM daily_aggregates")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query_as::<_, DailyAggregateRow>(
        r#"
        SELECT date, per_form_type_counts, total_records, non_conformities, generated_at
        FROM daily_aggregates
        ORDER BY id DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(per_page)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let data = rows
        .into_iter()
        .map(DailyAggregate::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok((data, total))
}

/// Next instant strictly after `now` at which the local wall clock shows `at`.
/// A local time skipped by a DST jump resolves to the first instant after the gap.
pub fn next_run_after(now: DateTime<Utc>, tz: Tz, at: NaiveTime) -> DateTime<Utc> {
    let mut date = now.with_timezone(&tz).date_naive();
    loop {
        if let Some(candidate) = resolve_local(tz, date, at) {
            if candidate > now {
                return candidate;
            }
        }
        date = date.succ_opt().unwrap_or(date);
    }
}

fn resolve_local(tz: Tz, date: NaiveDate, at: NaiveTime) -> Option<DateTime<Utc>> {
    let naive = date.and_time(at);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            // inside a spring-forward gap; gaps are at most a couple of hours
            (1..=4).find_map(|h| {
                tz.from_local_datetime(&(naive + ChronoDuration::hours(h)))
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc))
            })
        }
    }
}

fn duration_until(target: DateTime<Utc>, now: DateTime<Utc>) -> StdDuration {
    (target - now)
        .to_std()
        .unwrap_or(StdDuration::ZERO)
        .max(StdDuration::from_secs(MIN_SLEEP_SECS))
}

/// Runs the job once a day at `at` local time, for the local date that just ended.
/// Failures are logged and never retried; the next day runs regardless.
pub fn spawn_daily(job: Arc<DailyAggregationJob>, tz: Tz, at: NaiveTime) {
    actix_web::rt::spawn(async move {
        loop {
            let now = job.clock.now();
            let next = next_run_after(now, tz, at);
            info!(next_run = %next, "Daily aggregation scheduled");
            tokio::time::sleep(duration_until(next, now)).await;

            let today = job.clock.now().with_timezone(&tz).date_naive();
            let target = today.pred_opt().unwrap_or(today);
            match job.run_for_date(target).await {
                Ok(JobOutcome::Completed(_)) => {}
                Ok(JobOutcome::Skipped) => {
                    warn!(date = %target, "Scheduled aggregation skipped, previous run still active")
                }
                Err(e) => error!(error = %e, date = %target, "Scheduled daily aggregation failed"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;
    use crate::services::clock::test_support::ManualClock;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    /// Minimal form tables so counts are easy to control.
    async fn make_table(pool: &SqlitePool, table: &str, rows_on_day: usize, bad: usize) {
        sqlx::query(&format!(
            "CREATE TABLE {table} (id INTEGER PRIMARY KEY, fecha TEXT NOT NULL, conforme INTEGER NOT NULL)"
        ))
        .execute(pool)
        .await
        .unwrap();
        for i in 0..rows_on_day {
            sqlx::query(&format!("INSERT INTO {table} (fecha, conforme) VALUES (?, ?)"))
                .bind(day())
                .bind(i >= bad)
                .execute(pool)
                .await
                .unwrap();
        }
        // noise on another date
        sqlx::query(&format!("INSERT INTO {table} (fecha, conforme) VALUES (?, 0)"))
            .bind(day().succ_opt().unwrap())
            .execute(pool)
            .await
            .unwrap();
    }

    fn source(table: &str) -> FormSource {
        FormSource {
            form_type: table.to_string(),
            table: table.to_string(),
            date_column: "fecha".to_string(),
            non_conformity: Some("conforme = 0".to_string()),
        }
    }

    fn job(pool: SqlitePool, sources: Vec<FormSource>) -> DailyAggregationJob {
        DailyAggregationJob::new(
            pool,
            sources,
            Arc::new(ManualClock::at("2026-03-02T00:00:01Z")),
        )
    }

    #[actix_web::test]
    async fn missing_table_counts_as_zero_and_job_completes() {
        let pool = memory_pool().await;
        make_table(&pool, "form_a", 5, 1).await;
        make_table(&pool, "form_b", 3, 0).await;
        make_table(&pool, "form_c", 7, 2).await;

        let job = job(
            pool.clone(),
            vec![
                source("form_missing"),
                source("form_a"),
                source("form_b"),
                source("form_c"),
            ],
        );

        let JobOutcome::Completed(aggregate) = job.run_for_date(day()).await.unwrap() else {
            panic!("job should not be skipped");
        };
        assert_eq!(aggregate.total_records, 15);
        assert_eq!(aggregate.non_conformities, 3);
        assert_eq!(aggregate.per_form_type_counts["form_missing"], 0);
        assert_eq!(aggregate.per_form_type_counts["form_c"], 7);

        let (stored, total) = list_aggregates(&pool, 1, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(stored[0], aggregate);
    }

    #[actix_web::test]
    async fn repeated_runs_append_rows_with_identical_counts() {
        let pool = memory_pool().await;
        make_table(&pool, "form_a", 4, 2).await;
        let job = job(pool.clone(), vec![source("form_a")]);

        job.run_for_date(day()).await.unwrap();
        job.run_for_date(day()).await.unwrap();

        let (stored, total) = list_aggregates(&pool, 1, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(stored[0].per_form_type_counts, stored[1].per_form_type_counts);
        assert_eq!(stored[0].total_records, 4);
        assert_eq!(stored[1].non_conformities, 2);

        let (beyond, total) = list_aggregates(&pool, u32::MAX, 100).await.unwrap();
        assert!(beyond.is_empty());
        assert_eq!(total, 2);
    }

    #[actix_web::test]
    async fn overlapping_trigger_is_skipped() {
        let pool = memory_pool().await;
        let job = job(pool.clone(), vec![]);

        let held = job.try_begin().unwrap();
        assert_eq!(job.run_for_date(day()).await.unwrap(), JobOutcome::Skipped);
        drop(held);

        assert!(matches!(
            job.run_for_date(day()).await.unwrap(),
            JobOutcome::Completed(_)
        ));
    }

    #[actix_web::test]
    async fn default_sources_cover_every_form_table() {
        let pool = memory_pool().await;
        sqlx::query(
            "INSERT INTO users (id, username, password) VALUES (1, 'chef', 'x')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"INSERT INTO receiving_inspections
               (user_id, fecha, supplier, product, packaging_ok, product_rejected, created_at)
               VALUES (1, ?, 'Lonja', 'Hake', 0, 1, ?)"#,
        )
        .bind(day())
        .bind(utc("2026-03-01T08:00:00Z"))
        .execute(&pool)
        .await
        .unwrap();

        let job = job(pool, haccp_sources());
        let JobOutcome::Completed(aggregate) = job.run_for_date(day()).await.unwrap() else {
            panic!("job should not be skipped");
        };
        assert_eq!(aggregate.per_form_type_counts.len(), 4);
        assert_eq!(aggregate.per_form_type_counts["receiving"], 1);
        assert_eq!(aggregate.total_records, 1);
        assert_eq!(aggregate.non_conformities, 1);
    }

    #[actix_web::test]
    async fn write_failure_is_reported() {
        let pool = memory_pool().await;
        sqlx::query("DROP TABLE daily_aggregates")
            .execute(&pool)
            .await
            .unwrap();
        let job = job(pool, vec![]);

        let err = job.run_for_date(day()).await.unwrap_err();
        assert!(matches!(err, AggregationError::AggregateWrite(_)));
        // the guard is released even though the run failed
        assert!(job.try_begin().is_some());
    }

    #[test]
    fn next_run_is_next_local_midnight() {
        let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap();

        let next = next_run_after(utc("2026-03-01T15:00:00Z"), chrono_tz::UTC, midnight);
        assert_eq!(next, utc("2026-03-02T00:00:00Z"));

        // exactly at the trigger moves to the following day
        let next = next_run_after(utc("2026-03-02T00:00:00Z"), chrono_tz::UTC, midnight);
        assert_eq!(next, utc("2026-03-03T00:00:00Z"));

        // Madrid is UTC+1 in winter
        let next = next_run_after(
            utc("2026-03-01T15:00:00Z"),
            chrono_tz::Europe::Madrid,
            midnight,
        );
        assert_eq!(next, utc("2026-03-01T23:00:00Z"));
    }

    #[test]
    fn time_inside_dst_gap_resolves_after_the_gap() {
        // Madrid jumps from 02:00 to 03:00 on 2026-03-29
        let at = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        let next = next_run_after(utc("2026-03-28T12:00:00Z"), chrono_tz::Europe::Madrid, at);
        assert_eq!(next, utc("2026-03-29T01:30:00Z"));
    }

    #[test]
    fn sleep_never_goes_below_minimum() {
        let now = utc("2026-03-01T00:00:00Z");
        assert_eq!(duration_until(now, now), StdDuration::from_secs(MIN_SLEEP_SECS));
        assert_eq!(
            duration_until(utc("2026-03-01T00:01:00Z"), now),
            StdDuration::from_secs(60)
        );
    }
}
