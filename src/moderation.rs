//! Moderation queue and protection state.
//!
//! Content enters pending or approved at submission time, then moves
//! through a once-only pending -> approved / rejected transition under a
//! reviewer's hand. Protection is a first-class row written only by an
//! explicit human approval, never inferred from report history, and it is
//! sticky once set.

use crate::audit;
use crate::error::{is_unique_violation, ModerationError};
use crate::init::get_db_pool;
use crate::orm::{content_protections, posts, threads, ModerationStatus};
use chrono::Utc;
use sea_orm::{entity::*, query::*, sea_query::Expr, DatabaseConnection};
use serde::Serialize;

/// A post or thread; the engine treats both identically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ContentRef {
    Post(i32),
    Thread(i32),
}

impl ContentRef {
    /// Builds a reference from the two optional ids of a form or row.
    /// Exactly one must be present.
    pub fn from_parts(post_id: Option<i32>, thread_id: Option<i32>) -> Result<Self, ModerationError> {
        match (post_id, thread_id) {
            (Some(id), None) => Ok(ContentRef::Post(id)),
            (None, Some(id)) => Ok(ContentRef::Thread(id)),
            (Some(_), Some(_)) => Err(ModerationError::validation(
                "a report may target a post or a thread, not both",
            )),
            (None, None) => Err(ModerationError::validation(
                "a report must target a post or a thread",
            )),
        }
    }

    pub fn post_id(&self) -> Option<i32> {
        match self {
            ContentRef::Post(id) => Some(*id),
            ContentRef::Thread(_) => None,
        }
    }

    pub fn thread_id(&self) -> Option<i32> {
        match self {
            ContentRef::Post(_) => None,
            ContentRef::Thread(id) => Some(*id),
        }
    }

    /// Audit-log target string, e.g. `post:17`.
    pub fn describe(&self) -> String {
        match self {
            ContentRef::Post(id) => format!("post:{}", id),
            ContentRef::Thread(id) => format!("thread:{}", id),
        }
    }
}

/// Routing decision for new content. Anonymous authorship and a
/// moderated category always queue; a moderate filter match queues
/// unless the author's address carries a moderate or full bypass.
pub fn initial_status(
    category_moderated: bool,
    is_anonymous: bool,
    filter_queues: bool,
    queue_exempt: bool,
) -> ModerationStatus {
    if category_moderated || is_anonymous || (filter_queues && !queue_exempt) {
        ModerationStatus::Pending
    } else {
        ModerationStatus::Approved
    }
}

pub async fn status_of(target: &ContentRef) -> Result<ModerationStatus, ModerationError> {
    let db = get_db_pool();
    let status = match target {
        ContentRef::Post(id) => posts::Entity::find_by_id(*id)
            .one(db)
            .await?
            .map(|post| post.moderation_status),
        ContentRef::Thread(id) => threads::Entity::find_by_id(*id)
            .one(db)
            .await?
            .map(|thread| thread.moderation_status),
    };
    status.ok_or(ModerationError::NotFound("content"))
}

pub async fn protection_of(
    target: &ContentRef,
) -> Result<Option<content_protections::Model>, ModerationError> {
    let query = match target {
        ContentRef::Post(id) => content_protections::Entity::find()
            .filter(content_protections::Column::PostId.eq(*id)),
        ContentRef::Thread(id) => content_protections::Entity::find()
            .filter(content_protections::Column::ThreadId.eq(*id)),
    };
    Ok(query.one(get_db_pool()).await?)
}

async fn write_status(
    db: &DatabaseConnection,
    target: &ContentRef,
    status: ModerationStatus,
) -> Result<(), ModerationError> {
    let rows = match target {
        ContentRef::Post(id) => {
            posts::Entity::update_many()
                .col_expr(posts::Column::ModerationStatus, Expr::value(status))
                .filter(posts::Column::Id.eq(*id))
                .exec(db)
                .await?
                .rows_affected
        }
        ContentRef::Thread(id) => {
            threads::Entity::update_many()
                .col_expr(threads::Column::ModerationStatus, Expr::value(status))
                .filter(threads::Column::Id.eq(*id))
                .exec(db)
                .await?
                .rows_affected
        }
    };
    if rows == 0 {
        return Err(ModerationError::NotFound("content"));
    }
    Ok(())
}

/// Moves content out of the queue iff it is still pending, judged by
/// `rows_affected` so two racing reviewers cannot both win.
async fn claim_pending(
    db: &DatabaseConnection,
    target: &ContentRef,
    to: ModerationStatus,
) -> Result<(), ModerationError> {
    let rows = match target {
        ContentRef::Post(id) => {
            posts::Entity::update_many()
                .col_expr(posts::Column::ModerationStatus, Expr::value(to))
                .filter(posts::Column::Id.eq(*id))
                .filter(posts::Column::ModerationStatus.eq(ModerationStatus::Pending))
                .exec(db)
                .await?
                .rows_affected
        }
        ContentRef::Thread(id) => {
            threads::Entity::update_many()
                .col_expr(threads::Column::ModerationStatus, Expr::value(to))
                .filter(threads::Column::Id.eq(*id))
                .filter(threads::Column::ModerationStatus.eq(ModerationStatus::Pending))
                .exec(db)
                .await?
                .rows_affected
        }
    };
    if rows == 0 {
        // Missing content and already-reviewed content both land here;
        // the status read tells them apart.
        status_of(target).await?;
        return Err(ModerationError::validation(
            "content is not awaiting review; use an override to re-open it",
        ));
    }
    Ok(())
}

/// Folds the protection-row insert outcome. Losing the unique-index race
/// means someone else protected the same content, which is the state we
/// wanted anyway.
fn protection_outcome(
    result: Result<content_protections::Model, sea_orm::DbErr>,
) -> Result<(), ModerationError> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Writes the protection row for a human approval. Protection is set at
/// most once; a concurrent duplicate is left in place.
async fn protect(
    db: &DatabaseConnection,
    target: &ContentRef,
    approved_by: i32,
    reason: Option<String>,
) -> Result<(), ModerationError> {
    let insert = content_protections::ActiveModel {
        post_id: Set(target.post_id()),
        thread_id: Set(target.thread_id()),
        approved_by: Set(approved_by),
        approved_at: Set(Utc::now().naive_utc()),
        reason: Set(reason),
        ..Default::default()
    }
    .insert(db)
    .await;
    protection_outcome(insert)
}

/// Human approval out of the queue: pending -> approved, plus the sticky
/// protection row. Distinct from auto-approval at submission time, which
/// writes no protection.
pub async fn approve(
    target: &ContentRef,
    actor: i32,
    reason: Option<String>,
) -> Result<(), ModerationError> {
    let db = get_db_pool();
    claim_pending(db, target, ModerationStatus::Approved).await?;
    protect(db, target, actor, reason).await?;
    audit::record(
        db,
        Some(actor),
        "content.approve",
        &target.describe(),
        Some(serde_json::json!({ "moderation_status": ModerationStatus::Pending })),
        Some(serde_json::json!({ "moderation_status": ModerationStatus::Approved, "protected": true })),
    )
    .await;
    Ok(())
}

/// Human rejection out of the queue: pending -> rejected, terminal under
/// normal operation.
pub async fn reject(target: &ContentRef, actor: i32) -> Result<(), ModerationError> {
    let db = get_db_pool();
    claim_pending(db, target, ModerationStatus::Rejected).await?;
    audit::record(
        db,
        Some(actor),
        "content.reject",
        &target.describe(),
        Some(serde_json::json!({ "moderation_status": ModerationStatus::Pending })),
        Some(serde_json::json!({ "moderation_status": ModerationStatus::Rejected })),
    )
    .await;
    Ok(())
}

/// Admin override: re-opens a reviewed item to any state, bypassing the
/// once-only transition rule. Writes no protection row.
pub async fn override_status(
    target: &ContentRef,
    actor: i32,
    status: ModerationStatus,
) -> Result<(), ModerationError> {
    let before = status_of(target).await?;
    let db = get_db_pool();
    write_status(db, target, status).await?;
    audit::record(
        db,
        Some(actor),
        "content.override",
        &target.describe(),
        Some(serde_json::json!({ "moderation_status": before })),
        Some(serde_json::json!({ "moderation_status": status })),
    )
    .await;
    Ok(())
}

/// Permanent removal, used by the report `delete` action. Protection and
/// report rows follow via FK cascade.
pub async fn remove_content(target: &ContentRef, actor: i32) -> Result<(), ModerationError> {
    let db = get_db_pool();
    let rows = match target {
        ContentRef::Post(id) => {
            posts::Entity::delete_many()
                .filter(posts::Column::Id.eq(*id))
                .exec(db)
                .await?
                .rows_affected
        }
        ContentRef::Thread(id) => {
            threads::Entity::delete_many()
                .filter(threads::Column::Id.eq(*id))
                .exec(db)
                .await?
                .rows_affected
        }
    };
    if rows == 0 {
        return Err(ModerationError::NotFound("content"));
    }
    audit::record(
        db,
        Some(actor),
        "content.delete",
        &target.describe(),
        None,
        None,
    )
    .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_reference_must_be_unambiguous() {
        assert_eq!(
            ContentRef::from_parts(Some(4), None).unwrap(),
            ContentRef::Post(4)
        );
        assert_eq!(
            ContentRef::from_parts(None, Some(9)).unwrap(),
            ContentRef::Thread(9)
        );
        assert!(ContentRef::from_parts(Some(4), Some(9)).is_err());
        assert!(ContentRef::from_parts(None, None).is_err());
    }

    #[test]
    fn anonymous_and_moderated_categories_always_queue() {
        assert_eq!(
            initial_status(true, false, false, false),
            ModerationStatus::Pending
        );
        assert_eq!(
            initial_status(false, true, false, false),
            ModerationStatus::Pending
        );
        // Bypass only waives the filter flag, not the other causes.
        assert_eq!(
            initial_status(false, true, false, true),
            ModerationStatus::Pending
        );
    }

    #[test]
    fn filter_flag_queues_unless_bypassed() {
        assert_eq!(
            initial_status(false, false, true, false),
            ModerationStatus::Pending
        );
        assert_eq!(
            initial_status(false, false, true, true),
            ModerationStatus::Approved
        );
    }

    #[test]
    fn clean_registered_submissions_auto_approve() {
        assert_eq!(
            initial_status(false, false, false, false),
            ModerationStatus::Approved
        );
    }

    #[test]
    fn losing_the_protection_race_is_benign() {
        // Two reviewers approving at once: the second insert hits the
        // unique index, and the content ends up protected either way.
        let lost_race = sea_orm::DbErr::Exec(
            "error returned from database: duplicate key value violates unique constraint \
             \"idx_content_protections_post_id\""
                .to_owned(),
        );
        assert!(protection_outcome(Err(lost_race)).is_ok());

        let unrelated = sea_orm::DbErr::Exec("connection reset by peer".to_owned());
        assert!(matches!(
            protection_outcome(Err(unrelated)).unwrap_err(),
            ModerationError::Database(_)
        ));
    }
}
