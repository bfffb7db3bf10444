//! Content submission screening.
//!
//! The creation flow hands the engine the text, the author identity and
//! the category's moderation-required flag; the engine answers with an
//! accept/reject/queue decision and, on accept, creates the row with the
//! decided status. Filter first, then (for anonymous authors) reputation
//! and the rate limiter.

use crate::error::ModerationError;
use crate::init::get_db_pool;
use crate::middleware::ClientCtx;
use crate::moderation::initial_status;
use crate::orm::{posts, threads, ModerationStatus};
use crate::{filter, rate_limit, reputation};
use actix_web::{get, post, web, HttpRequest, Responder};
use chrono::Utc;
use sea_orm::entity::*;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

#[derive(Deserialize)]
pub struct PostSubmissionForm {
    pub thread_id: i32,
    pub content: String,
    pub session_id: Option<String>,
    pub category_moderated: bool,
}

#[derive(Deserialize)]
pub struct ThreadSubmissionForm {
    pub title: String,
    pub content: String,
    pub session_id: Option<String>,
    pub category_moderated: bool,
}

#[derive(Serialize)]
pub struct SubmissionOutcome {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderation_status: Option<ModerationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

impl SubmissionOutcome {
    fn refused(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            id: None,
            moderation_status: None,
            block_reason: Some(reason.into()),
        }
    }

    fn accepted(id: i32, status: ModerationStatus) -> Self {
        Self {
            accepted: true,
            id: Some(id),
            moderation_status: Some(status),
            block_reason: None,
        }
    }
}

struct Screening {
    status: ModerationStatus,
    shadow: bool,
    ip: Option<IpAddr>,
}

enum ScreenResult {
    Accept(Screening),
    Refuse(String),
}

pub(crate) fn client_ip(req: &HttpRequest) -> Result<IpAddr, ModerationError> {
    {
        let info = req.connection_info();
        if let Some(raw) = info.realip_remote_addr() {
            if let Ok(ip) = raw.parse::<IpAddr>() {
                return Ok(ip);
            }
            if let Ok(sock) = raw.parse::<std::net::SocketAddr>() {
                return Ok(sock.ip());
            }
        }
    }
    req.peer_addr()
        .map(|addr| addr.ip())
        .ok_or_else(|| ModerationError::validation("client address unavailable"))
}

/// The decision pipeline shared by posts and threads.
async fn screen(
    client: &ClientCtx,
    req: &HttpRequest,
    text: &str,
    category_moderated: bool,
    session_id: Option<&str>,
) -> Result<ScreenResult, ModerationError> {
    if text.trim().is_empty() {
        return Err(ModerationError::validation("content must not be empty"));
    }

    let rules = filter::load_rules().await?;
    let verdict = filter::evaluate(&rules, text);
    filter::record_hits(&verdict);
    if verdict.blocked {
        return Ok(ScreenResult::Refuse(
            "content matches a banned pattern".to_owned(),
        ));
    }

    if client.is_user() {
        return Ok(ScreenResult::Accept(Screening {
            status: initial_status(category_moderated, false, verdict.should_queue(), false),
            shadow: false,
            ip: None,
        }));
    }

    let session_id = session_id.filter(|s| !s.trim().is_empty()).ok_or_else(|| {
        ModerationError::validation("anonymous submissions need a session id")
    })?;
    let ip = client_ip(req)?;
    let now = Utc::now().naive_utc();

    let rep = reputation::resolve_ip(ip, now).await?;
    if rep.denies() {
        return Ok(ScreenResult::Refuse(
            "posting from this address is disabled".to_owned(),
        ));
    }

    if !rep.exempts_rate_limit() {
        match rate_limit::record_post(&ip.to_string(), session_id).await {
            Ok(()) => {}
            Err(ModerationError::RateLimited(reason)) => {
                return Ok(ScreenResult::Refuse(reason))
            }
            Err(err) => return Err(err),
        }
    }

    Ok(ScreenResult::Accept(Screening {
        status: initial_status(category_moderated, true, verdict.should_queue(), rep.exempts_queue()),
        shadow: rep.shadows(),
        ip: Some(ip),
    }))
}

#[post("/submissions/posts")]
pub async fn submit_post(
    client: ClientCtx,
    req: HttpRequest,
    form: web::Json<PostSubmissionForm>,
) -> Result<impl Responder, ModerationError> {
    let form = form.into_inner();
    let screening = match screen(
        &client,
        &req,
        &form.content,
        form.category_moderated,
        form.session_id.as_deref(),
    )
    .await?
    {
        ScreenResult::Accept(screening) => screening,
        ScreenResult::Refuse(reason) => {
            return Ok(web::Json(SubmissionOutcome::refused(reason)))
        }
    };

    let post = posts::ActiveModel {
        thread_id: Set(form.thread_id),
        user_id: Set(client.get_id()),
        is_anonymous: Set(!client.is_user()),
        ip_address: Set(screening.ip.map(|ip| ip.to_string())),
        content: Set(form.content.trim().to_owned()),
        moderation_status: Set(screening.status),
        is_shadow_hidden: Set(screening.shadow),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(get_db_pool())
    .await?;

    Ok(web::Json(SubmissionOutcome::accepted(post.id, screening.status)))
}

#[post("/submissions/threads")]
pub async fn submit_thread(
    client: ClientCtx,
    req: HttpRequest,
    form: web::Json<ThreadSubmissionForm>,
) -> Result<impl Responder, ModerationError> {
    let form = form.into_inner();
    if form.title.trim().is_empty() {
        return Err(ModerationError::validation("a thread needs a title"));
    }

    // Title and body are screened as one text so a banned word in the
    // title cannot slip through.
    let combined = format!("{}\n{}", form.title, form.content);
    let screening = match screen(
        &client,
        &req,
        &combined,
        form.category_moderated,
        form.session_id.as_deref(),
    )
    .await?
    {
        ScreenResult::Accept(screening) => screening,
        ScreenResult::Refuse(reason) => {
            return Ok(web::Json(SubmissionOutcome::refused(reason)))
        }
    };

    let thread = threads::ActiveModel {
        user_id: Set(client.get_id()),
        is_anonymous: Set(!client.is_user()),
        ip_address: Set(screening.ip.map(|ip| ip.to_string())),
        title: Set(form.title.trim().to_owned()),
        content: Set(form.content.trim().to_owned()),
        moderation_status: Set(screening.status),
        is_shadow_hidden: Set(screening.shadow),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(get_db_pool())
    .await?;

    Ok(web::Json(SubmissionOutcome::accepted(thread.id, screening.status)))
}

#[derive(Deserialize)]
pub struct QuotaQuery {
    pub session_id: String,
}

/// Advisory pre-flight check; the authoritative gate stays inside
/// `record_post` where the check-and-increment is atomic.
#[get("/submissions/quota")]
pub async fn view_quota(
    req: HttpRequest,
    query: web::Query<QuotaQuery>,
) -> Result<impl Responder, ModerationError> {
    let ip = client_ip(&req)?;
    let status = rate_limit::can_post(&ip.to_string(), &query.session_id).await?;
    Ok(web::Json(status))
}
