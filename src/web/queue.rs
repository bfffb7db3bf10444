//! Moderation queue actions invoked from the review console.
//!
//! `approve` is the only path that writes a protection row; `override`
//! exists for the explicit admin re-open of an already-reviewed item and
//! deliberately does not protect.

use crate::error::ModerationError;
use crate::middleware::ClientCtx;
use crate::moderation::{self, ContentRef};
use crate::orm::ModerationStatus;
use actix_web::{post, web, Responder};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct QueueTargetForm {
    pub post_id: Option<i32>,
    pub thread_id: Option<i32>,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct OverrideForm {
    pub post_id: Option<i32>,
    pub thread_id: Option<i32>,
    pub moderation_status: ModerationStatus,
}

#[post("/admin/queue/approve")]
pub async fn approve_content(
    client: ClientCtx,
    form: web::Json<QueueTargetForm>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let form = form.into_inner();
    let target = ContentRef::from_parts(form.post_id, form.thread_id)?;

    moderation::approve(&target, actor, form.reason).await?;
    Ok(web::Json(serde_json::json!({
        "moderation_status": ModerationStatus::Approved,
        "protected": true,
    })))
}

#[post("/admin/queue/reject")]
pub async fn reject_content(
    client: ClientCtx,
    form: web::Json<QueueTargetForm>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let form = form.into_inner();
    let target = ContentRef::from_parts(form.post_id, form.thread_id)?;

    moderation::reject(&target, actor).await?;
    Ok(web::Json(serde_json::json!({
        "moderation_status": ModerationStatus::Rejected,
    })))
}

#[post("/admin/queue/override")]
pub async fn override_content(
    client: ClientCtx,
    form: web::Json<OverrideForm>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let form = form.into_inner();
    let target = ContentRef::from_parts(form.post_id, form.thread_id)?;

    moderation::override_status(&target, actor, form.moderation_status).await?;
    Ok(web::Json(serde_json::json!({
        "moderation_status": form.moderation_status,
    })))
}
