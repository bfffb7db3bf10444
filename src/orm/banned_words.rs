//! SeaORM Entity for the banned_words table.
//!
//! Rows are admin-authored and only ever change through the filter CRUD
//! endpoints. Inactive and expired rows are dropped when the rule snapshot
//! is compiled, so they never participate in evaluation.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(10))")]
#[serde(rename_all = "lowercase")]
pub enum FilterSeverity {
    // Ordered least to most severe so Ord can pick the worst match.
    #[sea_orm(string_value = "warning")]
    Warning,
    #[sea_orm(string_value = "moderate")]
    Moderate,
    #[sea_orm(string_value = "ban")]
    Ban,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(12))")]
#[serde(rename_all = "lowercase")]
pub enum FilterCategory {
    #[sea_orm(string_value = "profanity")]
    Profanity,
    #[sea_orm(string_value = "spam")]
    Spam,
    #[sea_orm(string_value = "harassment")]
    Harassment,
    #[sea_orm(string_value = "general")]
    General,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(10))")]
#[serde(rename_all = "lowercase")]
pub enum FilterMatchType {
    #[sea_orm(string_value = "exact")]
    Exact,
    #[sea_orm(string_value = "partial")]
    Partial,
    #[sea_orm(string_value = "regex")]
    Regex,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "banned_words")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub pattern: String,
    pub severity: FilterSeverity,
    pub category: FilterCategory,
    pub match_type: FilterMatchType,
    pub is_active: bool,
    pub expires_at: Option<DateTime>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub created_by: Option<i32>,
    pub created_at: DateTime,
    pub hit_count: i32,
    pub last_hit_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
