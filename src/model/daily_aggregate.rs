use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Audit row written once per run of the daily job. Never updated.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DailyAggregate {
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub date: NaiveDate,
    #[schema(example = json!({"temperature": 12, "receiving": 3, "handwashing": 20, "cooking": 6}))]
    pub per_form_type_counts: BTreeMap<String, i64>,
    #[schema(example = 41)]
    pub total_records: i64,
    #[schema(example = 2)]
    pub non_conformities: i64,
    #[schema(example = "2026-01-02T00:00:01Z", format = "date-time", value_type = String)]
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct DailyAggregateRow {
    pub date: NaiveDate,
    pub per_form_type_counts: String,
    pub total_records: i64,
    pub non_conformities: i64,
    pub generated_at: DateTime<Utc>,
}

impl TryFrom<DailyAggregateRow> for DailyAggregate {
    type Error = serde_json::Error;

    fn try_from(row: DailyAggregateRow) -> Result<Self, Self::Error> {
        Ok(DailyAggregate {
            date: row.date,
            per_form_type_counts: serde_json::from_str(&row.per_form_type_counts)?,
            total_records: row.total_records,
            non_conformities: row.non_conformities,
            generated_at: row.generated_at,
        })
    }
}
