//! Admin CRUD for IP bans, the whitelist and anonymous-session blocks.
//!
//! Ban and whitelist mutations invalidate their snapshots synchronously
//! so a new record is live for the next request, and every mutation is
//! audited.

use crate::error::ModerationError;
use crate::init::get_db_pool;
use crate::middleware::ClientCtx;
use crate::orm::ip_bans::{self, AppealStatus, IpBanType};
use crate::orm::ip_whitelist::{self, BypassLevel};
use crate::{audit, cache, rate_limit};
use actix_web::{get, post, web, Responder};
use chrono::{NaiveDateTime, Utc};
use ipnet::IpNet;
use sea_orm::{entity::*, query::*};
use serde::Deserialize;
use std::net::IpAddr;

/// Ban and whitelist entries hold an exact address or a CIDR range.
fn validate_entry_address(raw: &str) -> Result<(), ModerationError> {
    if raw.parse::<IpAddr>().is_ok() || raw.parse::<IpNet>().is_ok() {
        Ok(())
    } else {
        Err(ModerationError::validation(
            "ip_address must be an address or CIDR range",
        ))
    }
}

/// expires_at is required for a temporary ban and meaningless otherwise.
fn validate_ban_expiry(
    ban_type: IpBanType,
    expires_at: Option<NaiveDateTime>,
) -> Result<(), ModerationError> {
    match (ban_type, expires_at) {
        (IpBanType::Temporary, None) => Err(ModerationError::validation(
            "a temporary ban needs expires_at",
        )),
        (IpBanType::Permanent | IpBanType::Shadowban, Some(_)) => Err(
            ModerationError::validation("only temporary bans carry expires_at"),
        ),
        _ => Ok(()),
    }
}

#[derive(Deserialize)]
pub struct IpBanForm {
    pub ip_address: String,
    pub ban_type: IpBanType,
    pub reason: String,
    pub expires_at: Option<NaiveDateTime>,
    pub admin_notes: Option<String>,
}

#[derive(Deserialize)]
pub struct IpBanUpdateForm {
    pub ban_type: Option<IpBanType>,
    pub reason: Option<String>,
    pub expires_at: Option<Option<NaiveDateTime>>,
    pub is_active: Option<bool>,
    pub admin_notes: Option<Option<String>>,
    pub appeal_status: Option<AppealStatus>,
}

#[get("/admin/ip-bans")]
pub async fn view_ip_bans(client: ClientCtx) -> Result<impl Responder, ModerationError> {
    client.require_admin()?;
    let bans = ip_bans::Entity::find()
        .order_by_asc(ip_bans::Column::Id)
        .all(get_db_pool())
        .await?;
    Ok(web::Json(bans))
}

#[post("/admin/ip-bans")]
pub async fn create_ip_ban(
    client: ClientCtx,
    form: web::Json<IpBanForm>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let form = form.into_inner();

    validate_entry_address(&form.ip_address)?;
    validate_ban_expiry(form.ban_type, form.expires_at)?;
    if form.reason.trim().is_empty() {
        return Err(ModerationError::validation("a ban needs a reason"));
    }

    let db = get_db_pool();
    let ban = ip_bans::ActiveModel {
        ip_address: Set(form.ip_address),
        ban_type: Set(form.ban_type),
        reason: Set(form.reason),
        expires_at: Set(form.expires_at),
        is_active: Set(true),
        admin_notes: Set(form.admin_notes),
        appeal_status: Set(AppealStatus::None),
        created_by: Set(Some(actor)),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    cache::IP_BANS.invalidate();
    audit::record(
        db,
        Some(actor),
        "ip_ban.create",
        &format!("ip_ban:{}", ban.id),
        None,
        audit::snapshot(&ban),
    )
    .await;
    Ok(web::Json(ban))
}

#[post("/admin/ip-bans/{id}")]
pub async fn update_ip_ban(
    client: ClientCtx,
    path: web::Path<i32>,
    form: web::Json<IpBanUpdateForm>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let form = form.into_inner();
    let db = get_db_pool();

    let existing = ip_bans::Entity::find_by_id(path.into_inner())
        .one(db)
        .await?
        .ok_or(ModerationError::NotFound("ip ban"))?;
    let before = audit::snapshot(&existing);

    let ban_type = form.ban_type.unwrap_or(existing.ban_type);
    let expires_at = form.expires_at.unwrap_or(existing.expires_at);
    validate_ban_expiry(ban_type, expires_at)?;

    let mut active: ip_bans::ActiveModel = existing.into();
    if let Some(ban_type) = form.ban_type {
        active.ban_type = Set(ban_type);
    }
    if let Some(reason) = form.reason {
        active.reason = Set(reason);
    }
    if let Some(expires_at) = form.expires_at {
        active.expires_at = Set(expires_at);
    }
    if let Some(is_active) = form.is_active {
        active.is_active = Set(is_active);
    }
    if let Some(admin_notes) = form.admin_notes {
        active.admin_notes = Set(admin_notes);
    }
    if let Some(appeal_status) = form.appeal_status {
        active.appeal_status = Set(appeal_status);
    }
    let ban = active.update(db).await?;

    cache::IP_BANS.invalidate();
    audit::record(
        db,
        Some(actor),
        "ip_ban.update",
        &format!("ip_ban:{}", ban.id),
        before,
        audit::snapshot(&ban),
    )
    .await;
    Ok(web::Json(ban))
}

#[post("/admin/ip-bans/{id}/delete")]
pub async fn delete_ip_ban(
    client: ClientCtx,
    path: web::Path<i32>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let id = path.into_inner();
    let db = get_db_pool();

    let existing = ip_bans::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or(ModerationError::NotFound("ip ban"))?;
    let before = audit::snapshot(&existing);

    ip_bans::Entity::delete_many()
        .filter(ip_bans::Column::Id.eq(id))
        .exec(db)
        .await?;

    cache::IP_BANS.invalidate();
    audit::record(db, Some(actor), "ip_ban.delete", &format!("ip_ban:{}", id), before, None)
        .await;
    Ok(web::Json(serde_json::json!({ "deleted": id })))
}

#[derive(Deserialize)]
pub struct WhitelistForm {
    pub ip_address: String,
    pub description: String,
    pub bypass_level: BypassLevel,
}

#[derive(Deserialize)]
pub struct WhitelistUpdateForm {
    pub description: Option<String>,
    pub bypass_level: Option<BypassLevel>,
    pub is_active: Option<bool>,
}

#[get("/admin/ip-whitelist")]
pub async fn view_whitelist(client: ClientCtx) -> Result<impl Responder, ModerationError> {
    client.require_admin()?;
    let entries = ip_whitelist::Entity::find()
        .order_by_asc(ip_whitelist::Column::Id)
        .all(get_db_pool())
        .await?;
    Ok(web::Json(entries))
}

#[post("/admin/ip-whitelist")]
pub async fn create_whitelist_entry(
    client: ClientCtx,
    form: web::Json<WhitelistForm>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let form = form.into_inner();

    validate_entry_address(&form.ip_address)?;

    let db = get_db_pool();
    let entry = ip_whitelist::ActiveModel {
        ip_address: Set(form.ip_address),
        description: Set(form.description),
        bypass_level: Set(form.bypass_level),
        is_active: Set(true),
        created_by: Set(Some(actor)),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    cache::IP_WHITELIST.invalidate();
    audit::record(
        db,
        Some(actor),
        "ip_whitelist.create",
        &format!("ip_whitelist:{}", entry.id),
        None,
        audit::snapshot(&entry),
    )
    .await;
    Ok(web::Json(entry))
}

#[post("/admin/ip-whitelist/{id}")]
pub async fn update_whitelist_entry(
    client: ClientCtx,
    path: web::Path<i32>,
    form: web::Json<WhitelistUpdateForm>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let form = form.into_inner();
    let db = get_db_pool();

    let existing = ip_whitelist::Entity::find_by_id(path.into_inner())
        .one(db)
        .await?
        .ok_or(ModerationError::NotFound("whitelist entry"))?;
    let before = audit::snapshot(&existing);

    let mut active: ip_whitelist::ActiveModel = existing.into();
    if let Some(description) = form.description {
        active.description = Set(description);
    }
    if let Some(bypass_level) = form.bypass_level {
        active.bypass_level = Set(bypass_level);
    }
    if let Some(is_active) = form.is_active {
        active.is_active = Set(is_active);
    }
    let entry = active.update(db).await?;

    cache::IP_WHITELIST.invalidate();
    audit::record(
        db,
        Some(actor),
        "ip_whitelist.update",
        &format!("ip_whitelist:{}", entry.id),
        before,
        audit::snapshot(&entry),
    )
    .await;
    Ok(web::Json(entry))
}

#[post("/admin/ip-whitelist/{id}/delete")]
pub async fn delete_whitelist_entry(
    client: ClientCtx,
    path: web::Path<i32>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let id = path.into_inner();
    let db = get_db_pool();

    let existing = ip_whitelist::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or(ModerationError::NotFound("whitelist entry"))?;
    let before = audit::snapshot(&existing);

    ip_whitelist::Entity::delete_many()
        .filter(ip_whitelist::Column::Id.eq(id))
        .exec(db)
        .await?;

    cache::IP_WHITELIST.invalidate();
    audit::record(
        db,
        Some(actor),
        "ip_whitelist.delete",
        &format!("ip_whitelist:{}", id),
        before,
        None,
    )
    .await;
    Ok(web::Json(serde_json::json!({ "deleted": id })))
}

#[derive(Deserialize)]
pub struct AnonBlockForm {
    pub ip_address: String,
    pub session_id: String,
    pub reason: String,
    pub expires_at: Option<NaiveDateTime>,
}

#[derive(Deserialize)]
pub struct AnonUnblockForm {
    pub ip_address: String,
    pub session_id: String,
}

/// Explicit block on one anonymous (ip, session) pair, independent of
/// the rolling quota.
#[post("/admin/anon-sessions/block")]
pub async fn block_anon_session(
    client: ClientCtx,
    form: web::Json<AnonBlockForm>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let form = form.into_inner();
    if form.reason.trim().is_empty() {
        return Err(ModerationError::validation("a block needs a reason"));
    }

    rate_limit::set_block(&form.ip_address, &form.session_id, &form.reason, form.expires_at)
        .await?;
    audit::record(
        get_db_pool(),
        Some(actor),
        "anon_session.block",
        &format!("anon_session:{}:{}", form.ip_address, form.session_id),
        None,
        Some(serde_json::json!({ "reason": form.reason, "expires_at": form.expires_at })),
    )
    .await;
    Ok(web::Json(serde_json::json!({ "blocked": true })))
}

#[post("/admin/anon-sessions/unblock")]
pub async fn unblock_anon_session(
    client: ClientCtx,
    form: web::Json<AnonUnblockForm>,
) -> Result<impl Responder, ModerationError> {
    let actor = client.require_admin()?;
    let form = form.into_inner();

    rate_limit::clear_block(&form.ip_address, &form.session_id).await?;
    audit::record(
        get_db_pool(),
        Some(actor),
        "anon_session.unblock",
        &format!("anon_session:{}:{}", form.ip_address, form.session_id),
        None,
        None,
    )
    .await;
    Ok(web::Json(serde_json::json!({ "blocked": false })))
}
