//! SeaORM Entity for the content_protections table.
//!
//! A row exists only after a human explicitly approves a post or thread.
//! Exactly one of post_id / thread_id is set, each unique, so a piece of
//! content can be protected at most once. Protection is sticky: nothing
//! ever deletes these rows while the content exists.

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "content_protections")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub post_id: Option<i32>,
    #[sea_orm(unique)]
    pub thread_id: Option<i32>,
    pub approved_by: i32,
    pub approved_at: DateTime,
    #[sea_orm(column_type = "Text", nullable)]
    pub reason: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::posts::Entity",
        from = "Column::PostId",
        to = "super::posts::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Posts,
    #[sea_orm(
        belongs_to = "super::threads::Entity",
        from = "Column::ThreadId",
        to = "super::threads::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Threads,
}

impl ActiveModelBehavior for ActiveModel {}
