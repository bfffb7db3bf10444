//! Anonymous Rate Limiter.
//!
//! Posting quota for anonymous authors, keyed by (ip_address, session_id)
//! over a rolling window. The check-and-increment is a single conditional
//! UPDATE judged by rows_affected, so two concurrent requests can never
//! both squeeze past the limit; callers must not blindly retry
//! [`record_post`] after an ambiguous failure.

use crate::error::{is_unique_violation, ModerationError};
use crate::global::{policy, Policy};
use crate::init::get_db_pool;
use crate::orm::anonymous_sessions::{self, Column, Entity};
use chrono::{NaiveDateTime, Utc};
use sea_orm::{entity::*, query::*, sea_query::Expr, DbErr};
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct QuotaStatus {
    pub allowed: bool,
    pub remaining: i32,
    /// Set when an explicit administrative block is in force; the block
    /// wins over any remaining quota.
    pub blocked_reason: Option<String>,
}

fn block_in_force(row: &anonymous_sessions::Model, now: NaiveDateTime) -> bool {
    row.is_blocked && row.block_expires_at.map_or(true, |at| at > now)
}

/// Pure quota decision over one session row. A missing row means a fresh
/// window with the full quota.
pub fn quota_status(
    row: Option<&anonymous_sessions::Model>,
    policy: &Policy,
    now: NaiveDateTime,
) -> QuotaStatus {
    let row = match row {
        Some(row) => row,
        None => {
            return QuotaStatus {
                allowed: true,
                remaining: policy.anon_post_max,
                blocked_reason: None,
            }
        }
    };

    if block_in_force(row, now) {
        return QuotaStatus {
            allowed: false,
            remaining: 0,
            blocked_reason: Some(
                row.block_reason
                    .clone()
                    .unwrap_or_else(|| "posting blocked by staff".to_owned()),
            ),
        };
    }

    if now - row.window_start >= policy.anon_window() {
        return QuotaStatus {
            allowed: true,
            remaining: policy.anon_post_max,
            blocked_reason: None,
        };
    }

    let remaining = (policy.anon_post_max - row.post_count).max(0);
    QuotaStatus {
        allowed: remaining > 0,
        remaining,
        blocked_reason: None,
    }
}

/// Read-only quota check for the pre-flight endpoint. The authoritative
/// decision is [`record_post`]; this may race and is advisory only.
pub async fn can_post(ip: &str, session_id: &str) -> Result<QuotaStatus, DbErr> {
    let row = Entity::find_by_id((ip.to_owned(), session_id.to_owned()))
        .one(get_db_pool())
        .await?;
    Ok(quota_status(row.as_ref(), policy(), Utc::now().naive_utc()))
}

/// Condition excluding rows under an explicit live block: either never
/// blocked, or the block has lapsed.
fn not_blocked(now: NaiveDateTime) -> Condition {
    Condition::any()
        .add(Column::IsBlocked.eq(false))
        .add(Column::BlockExpiresAt.lte(now))
}

/// Atomically consumes one post from the quota, resetting the window
/// first when it has elapsed. Errors with `RateLimited` when the quota is
/// exhausted or the pair is administratively blocked.
pub async fn record_post(ip: &str, session_id: &str) -> Result<(), ModerationError> {
    let db = get_db_pool();
    let policy = policy();
    let now = Utc::now().naive_utc();
    let cutoff = now - policy.anon_window();

    let key = Condition::all()
        .add(Column::IpAddress.eq(ip))
        .add(Column::SessionId.eq(session_id));

    // Live window: bump the counter while it is still under the cap.
    let res = Entity::update_many()
        .col_expr(Column::PostCount, Expr::cust("post_count + 1"))
        .col_expr(Column::LastPostAt, Expr::value(now))
        .filter(key.clone())
        .filter(Column::WindowStart.gt(cutoff))
        .filter(Column::PostCount.lt(policy.anon_post_max))
        .filter(not_blocked(now))
        .exec(db)
        .await?;
    if res.rows_affected > 0 {
        return Ok(());
    }

    // Elapsed window: reset before counting this post.
    let res = Entity::update_many()
        .col_expr(Column::PostCount, Expr::value(1))
        .col_expr(Column::WindowStart, Expr::value(now))
        .col_expr(Column::LastPostAt, Expr::value(now))
        .filter(key)
        .filter(Column::WindowStart.lte(cutoff))
        .filter(not_blocked(now))
        .exec(db)
        .await?;
    if res.rows_affected > 0 {
        return Ok(());
    }

    // First post from this pair: insert the row. Losing the insert race
    // means a concurrent request created it; that request also consumed
    // quota, so the insert is not retried as an increment here.
    let insert = anonymous_sessions::ActiveModel {
        ip_address: Set(ip.to_owned()),
        session_id: Set(session_id.to_owned()),
        post_count: Set(1),
        window_start: Set(now),
        last_post_at: Set(now),
        is_blocked: Set(false),
        block_reason: Set(None),
        block_expires_at: Set(None),
    };
    match Entity::insert(insert).exec(db).await {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => Err(quota_refusal(ip, session_id, now).await?),
        Err(err) => Err(err.into()),
    }
}

/// Both conditional updates missed and the row exists: the pair is either
/// blocked or out of quota. Fetch it once to say which.
async fn quota_refusal(
    ip: &str,
    session_id: &str,
    now: NaiveDateTime,
) -> Result<ModerationError, DbErr> {
    let row = Entity::find_by_id((ip.to_owned(), session_id.to_owned()))
        .one(get_db_pool())
        .await?;
    let status = quota_status(row.as_ref(), policy(), now);
    Ok(match status.blocked_reason {
        Some(reason) => ModerationError::RateLimited(reason),
        None => ModerationError::RateLimited(format!(
            "anonymous posting quota reached; try again within {} hours",
            policy().anon_window_hours
        )),
    })
}

/// Administrative block on one (ip, session) pair, independent of and
/// senior to the rolling quota.
pub async fn set_block(
    ip: &str,
    session_id: &str,
    reason: &str,
    expires_at: Option<NaiveDateTime>,
) -> Result<(), ModerationError> {
    let res = Entity::update_many()
        .col_expr(Column::IsBlocked, Expr::value(true))
        .col_expr(Column::BlockReason, Expr::value(Some(reason.to_owned())))
        .col_expr(Column::BlockExpiresAt, Expr::value(expires_at))
        .filter(Column::IpAddress.eq(ip))
        .filter(Column::SessionId.eq(session_id))
        .exec(get_db_pool())
        .await?;
    if res.rows_affected == 0 {
        return Err(ModerationError::NotFound("anonymous session"));
    }
    Ok(())
}

pub async fn clear_block(ip: &str, session_id: &str) -> Result<(), ModerationError> {
    let res = Entity::update_many()
        .col_expr(Column::IsBlocked, Expr::value(false))
        .col_expr(Column::BlockReason, Expr::value(Option::<String>::None))
        .col_expr(
            Column::BlockExpiresAt,
            Expr::value(Option::<NaiveDateTime>::None),
        )
        .filter(Column::IpAddress.eq(ip))
        .filter(Column::SessionId.eq(session_id))
        .exec(get_db_pool())
        .await?;
    if res.rows_affected == 0 {
        return Err(ModerationError::NotFound("anonymous session"));
    }
    Ok(())
}

/// Deletes rows whose window lapsed long ago and whose block, if any, has
/// expired. Storage hygiene only; lazy-expiry checks stay correct without
/// it.
pub async fn purge_stale() -> Result<u64, DbErr> {
    let now = Utc::now().naive_utc();
    let cutoff = now - policy().anon_window() * 2;
    let res = Entity::delete_many()
        .filter(Column::WindowStart.lte(cutoff))
        .filter(not_blocked(now))
        .exec(get_db_pool())
        .await?;
    Ok(res.rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(post_count: i32, window_age_hours: i64, now: NaiveDateTime) -> anonymous_sessions::Model {
        anonymous_sessions::Model {
            ip_address: "203.0.113.9".to_owned(),
            session_id: "abc123".to_owned(),
            post_count,
            window_start: now - Duration::hours(window_age_hours),
            last_post_at: now,
            is_blocked: false,
            block_reason: None,
            block_expires_at: None,
        }
    }

    #[test]
    fn quota_counts_down_across_a_window() {
        let policy = Policy::default(); // max 3 per 12h
        let now = Utc::now().naive_utc();

        // Fresh pair: full quota.
        let status = quota_status(None, &policy, now);
        assert!(status.allowed);
        assert_eq!(status.remaining, 3);

        // After each recorded post the remainder drops: 2, 1, 0.
        for (count, remaining) in [(1, 2), (2, 1)] {
            let status = quota_status(Some(&row(count, 1, now)), &policy, now);
            assert!(status.allowed);
            assert_eq!(status.remaining, remaining);
        }

        // Third post consumed the window; the fourth is refused.
        let status = quota_status(Some(&row(3, 1, now)), &policy, now);
        assert!(!status.allowed);
        assert_eq!(status.remaining, 0);
    }

    #[test]
    fn elapsed_window_resets_the_quota() {
        let policy = Policy::default();
        let now = Utc::now().naive_utc();

        let status = quota_status(Some(&row(3, 13, now)), &policy, now);
        assert!(status.allowed);
        assert_eq!(status.remaining, 3);
    }

    #[test]
    fn explicit_block_beats_remaining_quota() {
        let policy = Policy::default();
        let now = Utc::now().naive_utc();

        let mut blocked = row(0, 1, now);
        blocked.is_blocked = true;
        blocked.block_reason = Some("ban evasion".to_owned());
        blocked.block_expires_at = None;

        let status = quota_status(Some(&blocked), &policy, now);
        assert!(!status.allowed);
        assert_eq!(status.blocked_reason.as_deref(), Some("ban evasion"));
    }

    #[test]
    fn lapsed_block_no_longer_applies() {
        let policy = Policy::default();
        let now = Utc::now().naive_utc();

        let mut blocked = row(1, 1, now);
        blocked.is_blocked = true;
        blocked.block_expires_at = Some(now - Duration::minutes(5));

        let status = quota_status(Some(&blocked), &policy, now);
        assert!(status.allowed);
        assert_eq!(status.remaining, 2);
    }
}
