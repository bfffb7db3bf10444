//! SeaORM Entity for the ip_bans table.
//!
//! `ip_address` holds either an exact address or a CIDR range. Temporary
//! bans expire lazily: a row past its `expires_at` is ignored at read time
//! and only removed by the periodic sweep.

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
pub enum IpBanType {
    // Ordered least to most restrictive; ties between overlapping records
    // are broken by this ordering.
    #[sea_orm(string_value = "shadowban")]
    Shadowban,
    #[sea_orm(string_value = "temporary")]
    Temporary,
    #[sea_orm(string_value = "permanent")]
    Permanent,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(10))")]
#[serde(rename_all = "lowercase")]
pub enum AppealStatus {
    #[sea_orm(string_value = "none")]
    None,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "denied")]
    Denied,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "ip_bans")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub ip_address: String,
    pub ban_type: IpBanType,
    pub reason: String,
    pub expires_at: Option<DateTime>,
    pub is_active: bool,
    #[sea_orm(column_type = "Text", nullable)]
    pub admin_notes: Option<String>,
    pub appeal_status: AppealStatus,
    pub created_by: Option<i32>,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
