use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

/// HACCP checklist kinds. Each one lives in its own table keyed by `fecha`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, AsRefStr, Display,
    EnumIter, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FormKind {
    Temperature,
    Receiving,
    Handwashing,
    Cooking,
}

impl FormKind {
    pub fn table(self) -> &'static str {
        match self {
            FormKind::Temperature => "temperature_logs",
            FormKind::Receiving => "receiving_inspections",
            FormKind::Handwashing => "handwashing_logs",
            FormKind::Cooking => "cooking_controls",
        }
    }

    /// SQL predicate selecting the non-conforming rows of this form's table.
    pub fn non_conformity_predicate(self) -> &'static str {
        match self {
            FormKind::Temperature => "conforme = 0",
            FormKind::Receiving => "product_rejected = 1",
            FormKind::Handwashing => "compliant = 0",
            FormKind::Cooking => "conforme = 0",
        }
    }
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct TemperatureLog {
    pub id: i64,
    pub user_id: i64,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub fecha: NaiveDate,
    #[schema(example = "Walk-in fridge 1")]
    pub equipment: String,
    #[schema(example = 3.5)]
    pub temperature_c: f64,
    #[schema(example = 0.0)]
    pub min_c: f64,
    #[schema(example = 5.0)]
    pub max_c: f64,
    pub conforme: bool,
    pub notes: Option<String>,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct ReceivingInspection {
    pub id: i64,
    pub user_id: i64,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub fecha: NaiveDate,
    #[schema(example = "Cárnicas del Norte")]
    pub supplier: String,
    #[schema(example = "Chicken breast")]
    pub product: String,
    #[schema(example = 2.8, nullable = true)]
    pub temperature_c: Option<f64>,
    pub packaging_ok: bool,
    pub product_rejected: bool,
    pub notes: Option<String>,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct HandwashingLog {
    pub id: i64,
    pub user_id: i64,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub fecha: NaiveDate,
    #[schema(example = "Hot kitchen")]
    pub area: String,
    pub compliant: bool,
    pub notes: Option<String>,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct CookingControl {
    pub id: i64,
    pub user_id: i64,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub fecha: NaiveDate,
    #[schema(example = "Roast chicken")]
    pub product: String,
    #[schema(example = 78.0)]
    pub core_temperature_c: f64,
    #[schema(example = 75.0)]
    pub target_c: f64,
    pub conforme: bool,
    pub notes: Option<String>,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_kind_has_a_distinct_table() {
        let mut tables: Vec<_> = FormKind::iter().map(FormKind::table).collect();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), 4);
    }

    #[test]
    fn kinds_parse_from_path_segment() {
        assert_eq!("cooking".parse::<FormKind>().unwrap(), FormKind::Cooking);
        assert_eq!(FormKind::Handwashing.as_ref(), "handwashing");
        assert!("allergens".parse::<FormKind>().is_err());
    }
}
