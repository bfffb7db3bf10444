use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub mod anonymous_sessions;
pub mod appeals;
pub mod audit_log;
pub mod banned_words;
pub mod content_protections;
pub mod ip_bans;
pub mod ip_whitelist;
pub mod posts;
pub mod reports;
pub mod threads;

/// Review state shared by posts and threads.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(10))")]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}
