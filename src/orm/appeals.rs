//! SeaORM Entity for the appeals table.
//!
//! Appeals against protected content live here, never in the report
//! queue. Moderator notification is dispatched after the row commits and
//! its failure does not roll the row back.

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "appeals")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Opaque reference handed back to the appellant.
    pub reference: String,
    pub post_id: Option<i32>,
    pub thread_id: Option<i32>,
    #[sea_orm(column_type = "Text")]
    pub justification: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
