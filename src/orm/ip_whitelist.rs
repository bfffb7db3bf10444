//! SeaORM Entity for the ip_whitelist table.

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
pub enum BypassLevel {
    /// Exempt from the anonymous rate limiter only.
    #[sea_orm(string_value = "basic")]
    Basic,
    /// Also exempt from moderate-severity filter queueing.
    #[sea_orm(string_value = "moderate")]
    Moderate,
    /// Posting is allowed unconditionally, overriding any ban.
    #[sea_orm(string_value = "full")]
    Full,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "ip_whitelist")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub ip_address: String,
    pub description: String,
    pub bypass_level: BypassLevel,
    pub is_active: bool,
    pub created_by: Option<i32>,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
