//! SeaORM Entity for the anonymous_sessions table.
//!
//! One row per (ip_address, session_id) pair, created on the first
//! anonymous post and bumped by the rate limiter afterwards. The explicit
//! block fields are independent of the rolling quota and win over it.

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "anonymous_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub ip_address: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_id: String,
    pub post_count: i32,
    pub window_start: DateTime,
    pub last_post_at: DateTime,
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    pub block_expires_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
