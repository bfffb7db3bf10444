//! Admin CRUD for banned-word rules, plus the dry-run test endpoint.
//!
//! Every successful mutation drops the rule snapshot synchronously and
//! leaves an audit row behind.

use crate::error::ModerationError;
use crate::init::get_db_pool;
use crate::middleware::ClientCtx;
use crate::orm::banned_words::{self, FilterCategory, FilterMatchType, FilterSeverity};
use crate::{audit, cache, filter};
use actix_web::{get, post, web, Responder};
use chrono::{NaiveDateTime, Utc};
use sea_orm::{entity::*, query::*};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct FilterRuleForm {
    pub pattern: String,
    pub severity: FilterSeverity,
    pub category: FilterCategory,
    pub match_type: FilterMatchType,
    pub expires_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct FilterRuleUpdateForm {
    pub pattern: Option<String>,
    pub severity: Option<FilterSeverity>,
    pub category: Option<FilterCategory>,
    pub match_type: Option<FilterMatchType>,
    pub is_active: Option<bool>,
    pub expires_at: Option<Option<NaiveDateTime>>,
    pub notes: Option<Option<String>>,
}

#[get("/admin/filters")]
pub async fn view_filters(client: ClientCtx) -> Result<impl Responder, ModerationError> {
    client.require_admin()?;
    let rules = banned_words::Entity::find()
        .order_by_asc(banned_words::Column::Id)
        .all(get_db_pool())
        .await?;
    Ok(web::Json(rules))
}

#[post("/admin/filters")]
pub async fn create_filter(
    client: ClientCtx,
    form: web::Json<FilterRuleForm>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let form = form.into_inner();

    filter::validate_pattern(form.match_type, &form.pattern)
        .map_err(ModerationError::validation)?;

    let db = get_db_pool();
    let rule = banned_words::ActiveModel {
        pattern: Set(form.pattern),
        severity: Set(form.severity),
        category: Set(form.category),
        match_type: Set(form.match_type),
        is_active: Set(true),
        expires_at: Set(form.expires_at),
        notes: Set(form.notes),
        created_by: Set(Some(actor)),
        created_at: Set(Utc::now().naive_utc()),
        hit_count: Set(0),
        last_hit_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await?;

    cache::FILTER_RULES.invalidate();
    audit::record(
        db,
        Some(actor),
        "filter.create",
        &format!("banned_word:{}", rule.id),
        None,
        audit::snapshot(&rule),
    )
    .await;
    Ok(web::Json(rule))
}

#[post("/admin/filters/{id}")]
pub async fn update_filter(
    client: ClientCtx,
    path: web::Path<i32>,
    form: web::Json<FilterRuleUpdateForm>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let form = form.into_inner();
    let db = get_db_pool();

    let existing = banned_words::Entity::find_by_id(path.into_inner())
        .one(db)
        .await?
        .ok_or(ModerationError::NotFound("filter rule"))?;
    let before = audit::snapshot(&existing);

    let match_type = form.match_type.unwrap_or(existing.match_type);
    let pattern = form.pattern.clone().unwrap_or_else(|| existing.pattern.clone());
    filter::validate_pattern(match_type, &pattern).map_err(ModerationError::validation)?;

    let mut active: banned_words::ActiveModel = existing.into();
    if let Some(pattern) = form.pattern {
        active.pattern = Set(pattern);
    }
    if let Some(severity) = form.severity {
        active.severity = Set(severity);
    }
    if let Some(category) = form.category {
        active.category = Set(category);
    }
    if let Some(match_type) = form.match_type {
        active.match_type = Set(match_type);
    }
    if let Some(is_active) = form.is_active {
        active.is_active = Set(is_active);
    }
    if let Some(expires_at) = form.expires_at {
        active.expires_at = Set(expires_at);
    }
    if let Some(notes) = form.notes {
        active.notes = Set(notes);
    }
    let rule = active.update(db).await?;

    cache::FILTER_RULES.invalidate();
    audit::record(
        db,
        Some(actor),
        "filter.update",
        &format!("banned_word:{}", rule.id),
        before,
        audit::snapshot(&rule),
    )
    .await;
    Ok(web::Json(rule))
}

#[post("/admin/filters/{id}/delete")]
pub async fn delete_filter(
    client: ClientCtx,
    path: web::Path<i32>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let id = path.into_inner();
    let db = get_db_pool();

    let existing = banned_words::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or(ModerationError::NotFound("filter rule"))?;
    let before = audit::snapshot(&existing);

    banned_words::Entity::delete_many()
        .filter(banned_words::Column::Id.eq(id))
        .exec(db)
        .await?;

    cache::FILTER_RULES.invalidate();
    audit::record(
        db,
        Some(actor),
        "filter.delete",
        &format!("banned_word:{}", id),
        before,
        None,
    )
    .await;
    Ok(web::Json(serde_json::json!({ "deleted": id })))
}

#[derive(Deserialize)]
pub struct FilterTestForm {
    pub text: String,
}

/// Dry run of the live rule set over arbitrary text. Identical verdict
/// shape to the submission path, no side effects, no hit bookkeeping.
#[post("/admin/filters/test")]
pub async fn test_filters(
    client: ClientCtx,
    form: web::Json<FilterTestForm>,
) -> Result<impl Responder, ModerationError> {
    client.require_admin()?;
    let rules = filter::load_rules().await?;
    Ok(web::Json(filter::evaluate(&rules, &form.text)))
}
