//! Report submission, the appeal channel, reviewer actions and the
//! periodic sweep task.

use crate::error::ModerationError;
use crate::middleware::ClientCtx;
use crate::moderation::ContentRef;
use crate::report::{self, NewAppeal, NewReport, ReporterId};
use crate::{rate_limit, reputation};
use actix_web::{get, post, web, HttpRequest, Responder};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct ReportForm {
    pub post_id: Option<i32>,
    pub thread_id: Option<i32>,
    pub reason: String,
    pub description: Option<String>,
}

fn reporter_from(client: &ClientCtx, req: &HttpRequest) -> Result<ReporterId, ModerationError> {
    let ip = super::submission::client_ip(req).ok().map(|ip| ip.to_string());
    ReporterId::from_parts(client.get_id(), ip)
}

#[post("/reports")]
pub async fn create_report(
    client: ClientCtx,
    req: HttpRequest,
    form: web::Json<ReportForm>,
) -> Result<impl Responder, ModerationError> {
    let form = form.into_inner();
    let target = ContentRef::from_parts(form.post_id, form.thread_id)?;
    let reporter = reporter_from(&client, &req)?;

    let report = report::submit(NewReport {
        target,
        reporter,
        reason: form.reason,
        description: form.description,
    })
    .await?;

    Ok(web::Json(serde_json::json!({
        "accepted": true,
        "report_id": report.id,
    })))
}

#[derive(Deserialize)]
pub struct AppealForm {
    pub post_id: Option<i32>,
    pub thread_id: Option<i32>,
    pub justification: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
}

#[post("/appeals")]
pub async fn create_appeal(
    form: web::Json<AppealForm>,
) -> Result<impl Responder, ModerationError> {
    let form = form.into_inner();
    let target = ContentRef::from_parts(form.post_id, form.thread_id)?;

    let appeal = report::submit_appeal(NewAppeal {
        target,
        justification: form.justification,
        contact_name: form.contact_name,
        contact_email: form.contact_email,
    })
    .await?;

    Ok(web::Json(serde_json::json!({
        "accepted": true,
        "reference": appeal.reference,
    })))
}

/// Console view: the report plus the reporter's behavior snapshot, whose
/// `is_problematic_reporter` renders as a warning badge.
#[get("/reports/{id}")]
pub async fn view_report(
    client: ClientCtx,
    path: web::Path<i32>,
) -> Result<impl Responder, ModerationError> {
    client.require_admin()?;

    use crate::init::get_db_pool;
    use crate::orm::reports;
    use sea_orm::entity::*;

    let report_row = reports::Entity::find_by_id(path.into_inner())
        .one(get_db_pool())
        .await?
        .ok_or(ModerationError::NotFound("report"))?;

    let reporter = ReporterId::from_parts(
        report_row.reporter_user_id,
        report_row.reporter_ip.clone(),
    )?;
    let behavior = report::snapshot_for(&reporter).await?;

    Ok(web::Json(serde_json::json!({
        "report": report_row,
        "reporter_behavior": behavior,
    })))
}

#[derive(Deserialize)]
pub struct ReviewForm {
    pub notes: Option<String>,
}

#[post("/reports/{id}/resolve")]
pub async fn resolve_report(
    client: ClientCtx,
    path: web::Path<i32>,
    form: web::Json<ReviewForm>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let report = report::resolve(path.into_inner(), actor, form.into_inner().notes).await?;
    Ok(web::Json(report))
}

#[post("/reports/{id}/dismiss")]
pub async fn dismiss_report(
    client: ClientCtx,
    path: web::Path<i32>,
    form: web::Json<ReviewForm>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let report = report::dismiss(path.into_inner(), actor, form.into_inner().notes).await?;
    Ok(web::Json(report))
}

#[post("/reports/{id}/close")]
pub async fn close_report(
    client: ClientCtx,
    path: web::Path<i32>,
    form: web::Json<ReviewForm>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let report = report::close(path.into_inner(), actor, form.into_inner().notes).await?;
    Ok(web::Json(report))
}

#[post("/reports/{id}/restore")]
pub async fn restore_content(
    client: ClientCtx,
    path: web::Path<i32>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let report = report::restore(path.into_inner(), actor).await?;
    Ok(web::Json(report))
}

#[post("/reports/{id}/delete")]
pub async fn delete_reported_content(
    client: ClientCtx,
    path: web::Path<i32>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let report = report::delete_content(path.into_inner(), actor).await?;
    Ok(web::Json(report))
}

#[post("/reports/{id}/auto-dismiss")]
pub async fn auto_dismiss_report(
    client: ClientCtx,
    path: web::Path<i32>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let report = report::auto_dismiss_repeat(path.into_inner(), actor).await?;
    Ok(web::Json(report))
}

/// Periodic storage sweep: stale anonymous-session rows and lapsed
/// temporary bans. Invoked by cron; correctness never depends on it.
#[get("/tasks/purge-anonymous-sessions")]
pub async fn view_task_purge() -> Result<impl Responder, ModerationError> {
    let purged_sessions = rate_limit::purge_stale().await?;
    let expired_bans = reputation::sweep_expired_bans().await?;
    Ok(web::Json(serde_json::json!({
        "purged_sessions": purged_sessions,
        "expired_bans": expired_bans,
    })))
}
