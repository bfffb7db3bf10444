//! Report lifecycle and reporter behavior.
//!
//! Reports are accepted against a post or thread, triaged through the
//! reviewer actions, and guarded by two layers aimed at the reporters
//! themselves: a behavior snapshot that throttles high-volume or
//! chronically-dismissed reporters, and the protected-content gate that
//! diverts re-reports of human-approved content into the appeal channel.

use crate::audit;
use crate::error::{is_unique_violation, ModerationError};
use crate::global::{policy, Policy};
use crate::init::get_db_pool;
use crate::moderation::{self, ContentRef};
use crate::orm::{appeals, reports, ModerationStatus};
use chrono::{NaiveDateTime, Utc};
use sea_orm::{entity::*, query::*};
use serde::Serialize;

/// Note appended when a repeat report on protected content is dismissed
/// automatically. Also the marker the behavior snapshot counts.
pub const REPEAT_REPORT_NOTE: &str =
    "Content was previously reviewed and approved by staff; repeat report dismissed automatically.";

/// Who is reporting: a signed-in user or an anonymous address. At least
/// one identity is always present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReporterId {
    User(i32),
    Ip(String),
}

impl ReporterId {
    pub fn from_parts(user_id: Option<i32>, ip: Option<String>) -> Result<Self, ModerationError> {
        match (user_id, ip) {
            (Some(id), _) => Ok(ReporterId::User(id)),
            (None, Some(ip)) => Ok(ReporterId::Ip(ip)),
            (None, None) => Err(ModerationError::validation(
                "a report needs a reporter: user id or address",
            )),
        }
    }

    fn user_id(&self) -> Option<i32> {
        match self {
            ReporterId::User(id) => Some(*id),
            ReporterId::Ip(_) => None,
        }
    }

    fn ip(&self) -> Option<String> {
        match self {
            ReporterId::User(_) => None,
            ReporterId::Ip(ip) => Some(ip.clone()),
        }
    }

    fn filter(&self) -> Condition {
        match self {
            ReporterId::User(id) => Condition::all().add(reports::Column::ReporterUserId.eq(*id)),
            ReporterId::Ip(ip) => {
                Condition::all().add(reports::Column::ReporterIp.eq(ip.as_str()))
            }
        }
    }
}

/// Derived trust signal over one reporter's history. Computed on demand,
/// never persisted.
#[derive(Clone, Debug, Serialize)]
pub struct BehaviorSnapshot {
    pub total_reports: usize,
    pub dismissed_reports: usize,
    pub reports_today: usize,
    pub reports_last_hour: usize,
    pub recent_repeat_reports_on_approved_content: usize,
    /// Non-blocking warning badge for reviewers.
    pub is_problematic_reporter: bool,
    /// Blocks further submissions outright.
    pub should_rate_limit: bool,
}

/// Classifies a reporter from their report rows. Pure; thresholds come
/// from operator policy, not code.
pub fn classify(history: &[reports::Model], policy: &Policy, now: NaiveDateTime) -> BehaviorSnapshot {
    let total_reports = history.len();
    let dismissed_reports = history
        .iter()
        .filter(|r| r.status == reports::ReportStatus::Dismissed)
        .count();
    let reports_today = history
        .iter()
        .filter(|r| now - r.created_at < chrono::Duration::hours(24))
        .count();
    let reports_last_hour = history
        .iter()
        .filter(|r| now - r.created_at < chrono::Duration::hours(1))
        .count();
    let recent_repeat_reports_on_approved_content = history
        .iter()
        .filter(|r| r.status == reports::ReportStatus::Dismissed)
        .filter(|r| now - r.created_at < chrono::Duration::days(policy.repeat_report_days))
        .filter(|r| {
            r.admin_notes
                .as_deref()
                .map_or(false, |notes| notes.contains(REPEAT_REPORT_NOTE))
        })
        .count();

    let is_problematic_reporter = total_reports >= policy.reporter_min_sample
        && dismissed_reports as f32 / total_reports as f32 >= policy.reporter_dismiss_ratio;

    let should_rate_limit = reports_last_hour >= policy.reporter_hour_limit
        || reports_today >= policy.reporter_day_limit
        || (is_problematic_reporter && reports_today >= policy.reporter_problematic_day_limit);

    BehaviorSnapshot {
        total_reports,
        dismissed_reports,
        reports_today,
        reports_last_hour,
        recent_repeat_reports_on_approved_content,
        is_problematic_reporter,
        should_rate_limit,
    }
}

pub async fn snapshot_for(reporter: &ReporterId) -> Result<BehaviorSnapshot, ModerationError> {
    let history = reports::Entity::find()
        .filter(reporter.filter())
        .all(get_db_pool())
        .await?;
    Ok(classify(&history, policy(), Utc::now().naive_utc()))
}

pub struct NewReport {
    pub target: ContentRef,
    pub reporter: ReporterId,
    pub reason: String,
    pub description: Option<String>,
}

fn target_filter(target: &ContentRef) -> Condition {
    match target {
        ContentRef::Post(id) => Condition::all().add(reports::Column::PostId.eq(*id)),
        ContentRef::Thread(id) => Condition::all().add(reports::Column::ThreadId.eq(*id)),
    }
}

/// Whether a new report may enter the queue, judged from the target's
/// state. Pure; `submit` gathers the inputs.
///
/// Protected content never takes a standard report; the appeal channel
/// is the only recourse. Content approved without a formal protection
/// row that has already survived a resolved report (the legacy path)
/// requires the reporter to say what is new.
pub fn admission_gate(
    status: ModerationStatus,
    protected: bool,
    previously_resolved: bool,
    description: Option<&str>,
) -> Result<(), ModerationError> {
    if protected {
        return Err(ModerationError::validation(
            "this content was reviewed and approved by staff; submit an appeal instead",
        ));
    }
    if status == ModerationStatus::Approved
        && previously_resolved
        && description.map_or(true, |d| d.trim().is_empty())
    {
        return Err(ModerationError::validation(
            "this content was already reviewed; a description of what changed is required",
        ));
    }
    Ok(())
}

/// Maps the insert outcome: losing the unique-index race on
/// (reporter, target) is the duplicate-report refusal, not a 500.
fn settle_insert(
    result: Result<reports::Model, sea_orm::DbErr>,
) -> Result<reports::Model, ModerationError> {
    match result {
        Ok(model) => Ok(model),
        Err(err) if is_unique_violation(&err) => Err(ModerationError::DuplicateReport),
        Err(err) => Err(err.into()),
    }
}

/// Report submission. Checks run in a fixed order: reporter throttle,
/// protection gate, legacy-description demand, then the insert whose
/// unique index settles duplicate races.
pub async fn submit(new: NewReport) -> Result<reports::Model, ModerationError> {
    let db = get_db_pool();

    if new.reason.trim().is_empty() {
        return Err(ModerationError::validation("a report needs a reason"));
    }

    let snapshot = snapshot_for(&new.reporter).await?;
    if snapshot.should_rate_limit {
        return Err(ModerationError::RateLimited(
            "too many recent reports from this reporter".to_owned(),
        ));
    }

    // Existence check doubles as the NotFound guard for bad targets.
    let status = moderation::status_of(&new.target).await?;
    let protected = moderation::protection_of(&new.target).await?.is_some();
    let previously_resolved = if status == ModerationStatus::Approved && !protected {
        reports::Entity::find()
            .filter(target_filter(&new.target))
            .filter(reports::Column::Status.eq(reports::ReportStatus::Resolved))
            .one(db)
            .await?
            .is_some()
    } else {
        false
    };
    admission_gate(status, protected, previously_resolved, new.description.as_deref())?;

    let row = reports::ActiveModel {
        post_id: Set(new.target.post_id()),
        thread_id: Set(new.target.thread_id()),
        reporter_user_id: Set(new.reporter.user_id()),
        reporter_ip: Set(new.reporter.ip()),
        reason: Set(new.reason),
        description: Set(new.description),
        status: Set(reports::ReportStatus::Pending),
        admin_notes: Set(None),
        created_at: Set(Utc::now().naive_utc()),
        reviewed_at: Set(None),
        reviewed_by: Set(None),
        ..Default::default()
    };

    settle_insert(row.insert(db).await)
}

pub struct NewAppeal {
    pub target: ContentRef,
    pub justification: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
}

/// The appeal channel for protected content. The appeal never enters the
/// report queue; moderators hear about it through the notification
/// collaborator, fired after the row commits so a delivery failure cannot
/// roll it back.
pub async fn submit_appeal(new: NewAppeal) -> Result<appeals::Model, ModerationError> {
    if new.justification.trim().is_empty() {
        return Err(ModerationError::validation(
            "an appeal needs a written justification",
        ));
    }

    // The target must exist; appeals against unprotected content are
    // accepted too, since a protection row may be the legacy kind that
    // was never written.
    moderation::status_of(&new.target).await?;

    let db = get_db_pool();
    let model = appeals::ActiveModel {
        reference: Set(uuid::Uuid::new_v4().to_string()),
        post_id: Set(new.target.post_id()),
        thread_id: Set(new.target.thread_id()),
        justification: Set(new.justification.trim().to_owned()),
        contact_name: Set(new.contact_name),
        contact_email: Set(new.contact_email),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    // Fire-and-forget dispatch to the moderator notification channel.
    let notified = model.clone();
    actix_web::rt::spawn(async move {
        notify_moderators(&notified);
    });

    Ok(model)
}

/// Stand-in for the external notification collaborator. Delivery failure
/// is the collaborator's problem, never the appellant's.
fn notify_moderators(appeal: &appeals::Model) {
    log::info!(
        "appeal {} filed against {}: {}",
        appeal.reference,
        match (appeal.post_id, appeal.thread_id) {
            (Some(id), _) => format!("post:{}", id),
            (_, Some(id)) => format!("thread:{}", id),
            _ => "unknown".to_owned(),
        },
        appeal.justification
    );
}

async fn pending_report(id: i32) -> Result<reports::Model, ModerationError> {
    let report = reports::Entity::find_by_id(id)
        .one(get_db_pool())
        .await?
        .ok_or(ModerationError::NotFound("report"))?;
    if report.status.is_terminal() {
        return Err(ModerationError::validation(
            "this report was already closed out",
        ));
    }
    Ok(report)
}

async fn finish(
    report: reports::Model,
    actor: i32,
    status: reports::ReportStatus,
    notes: Option<String>,
    action: &str,
) -> Result<reports::Model, ModerationError> {
    let db = get_db_pool();
    let before = audit::snapshot(&report);

    let mut active: reports::ActiveModel = report.into();
    active.status = Set(status);
    active.reviewed_at = Set(Some(Utc::now().naive_utc()));
    active.reviewed_by = Set(Some(actor));
    if notes.is_some() {
        active.admin_notes = Set(notes);
    }
    let model = active.update(db).await?;

    audit::record(
        db,
        Some(actor),
        action,
        &format!("report:{}", model.id),
        before,
        audit::snapshot(&model),
    )
    .await;
    Ok(model)
}

/// Reviewer judged the report valid; the content itself is untouched.
pub async fn resolve(
    id: i32,
    actor: i32,
    notes: Option<String>,
) -> Result<reports::Model, ModerationError> {
    let report = pending_report(id).await?;
    finish(report, actor, reports::ReportStatus::Resolved, notes, "report.resolve").await
}

/// Reviewer judged the report meritless; the content itself is untouched.
pub async fn dismiss(
    id: i32,
    actor: i32,
    notes: Option<String>,
) -> Result<reports::Model, ModerationError> {
    let report = pending_report(id).await?;
    finish(report, actor, reports::ReportStatus::Dismissed, notes, "report.dismiss").await
}

/// Administrative close with no judgment either way.
pub async fn close(
    id: i32,
    actor: i32,
    notes: Option<String>,
) -> Result<reports::Model, ModerationError> {
    let report = pending_report(id).await?;
    finish(report, actor, reports::ReportStatus::Closed, notes, "report.close").await
}

/// Restores the reported content to approved and resolves the report.
/// This is a human approval, so it writes protection like any other.
pub async fn restore(id: i32, actor: i32) -> Result<reports::Model, ModerationError> {
    let report = pending_report(id).await?;
    let target = ContentRef::from_parts(report.post_id, report.thread_id)?;

    moderation::override_status(&target, actor, ModerationStatus::Approved).await?;
    finish(
        report,
        actor,
        reports::ReportStatus::Resolved,
        Some("content restored".to_owned()),
        "report.restore",
    )
    .await
}

/// Note left on a report whose target was deleted. The target ids are
/// nulled to survive the cascade, so this is the only record of what
/// the report was about.
fn deletion_note(target: &ContentRef) -> String {
    format!("content deleted ({})", target.describe())
}

/// Permanently removes the reported content and resolves the report.
pub async fn delete_content(id: i32, actor: i32) -> Result<reports::Model, ModerationError> {
    let report = pending_report(id).await?;
    let target = ContentRef::from_parts(report.post_id, report.thread_id)?;

    // Resolve first: the content delete cascades over report rows, and
    // this report should survive as the record of why.
    let resolved = finish(
        report,
        actor,
        reports::ReportStatus::Resolved,
        Some(deletion_note(&target)),
        "report.delete_content",
    )
    .await?;

    // Detach the resolved report from the doomed row so the cascade
    // leaves it in place.
    let mut active: reports::ActiveModel = resolved.clone().into();
    active.post_id = Set(None);
    active.thread_id = Set(None);
    active.update(get_db_pool()).await?;

    moderation::remove_content(&target, actor).await?;
    Ok(resolved)
}

/// One-step helper for the detectable pattern of a pending report against
/// protected content: append the standard note and dismiss.
pub async fn auto_dismiss_repeat(id: i32, actor: i32) -> Result<reports::Model, ModerationError> {
    let report = pending_report(id).await?;
    let target = ContentRef::from_parts(report.post_id, report.thread_id)?;

    if moderation::protection_of(&target).await?.is_none() {
        return Err(ModerationError::validation(
            "target is not protected; review this report normally",
        ));
    }

    let notes = match &report.admin_notes {
        Some(existing) => format!("{}\n{}", existing, REPEAT_REPORT_NOTE),
        None => REPEAT_REPORT_NOTE.to_owned(),
    };
    finish(
        report,
        actor,
        reports::ReportStatus::Dismissed,
        Some(notes),
        "report.auto_dismiss",
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::reports::ReportStatus;
    use chrono::Duration;

    fn report(
        id: i32,
        status: ReportStatus,
        age: Duration,
        notes: Option<&str>,
        now: NaiveDateTime,
    ) -> reports::Model {
        reports::Model {
            id,
            post_id: Some(1),
            thread_id: None,
            reporter_user_id: Some(42),
            reporter_ip: None,
            reason: "spam".to_owned(),
            description: None,
            status,
            admin_notes: notes.map(str::to_owned),
            created_at: now - age,
            reviewed_at: None,
            reviewed_by: None,
        }
    }

    #[actix_rt::test]
    async fn empty_appeal_justification_is_rejected() {
        // Validation fires before any storage access.
        let err = submit_appeal(NewAppeal {
            target: ContentRef::Post(1),
            justification: "   ".to_owned(),
            contact_name: None,
            contact_email: None,
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ModerationError::Validation(_)));
    }

    #[test]
    fn protected_content_takes_no_standard_report() {
        // Once staff approval set protection, the report queue is closed
        // to this target regardless of what the reporter writes.
        let err = admission_gate(ModerationStatus::Approved, true, false, Some("fresh details"))
            .unwrap_err();
        assert!(matches!(err, ModerationError::Validation(_)));
    }

    #[test]
    fn legacy_approved_content_demands_a_description() {
        // Approved without protection and already reviewed once: a bare
        // re-report is refused, one saying what changed goes through.
        assert!(admission_gate(ModerationStatus::Approved, false, true, None).is_err());
        assert!(admission_gate(ModerationStatus::Approved, false, true, Some("  ")).is_err());
        assert!(
            admission_gate(ModerationStatus::Approved, false, true, Some("edited to add spam"))
                .is_ok()
        );
        // No prior resolved report: no description demanded.
        assert!(admission_gate(ModerationStatus::Approved, false, false, None).is_ok());
        assert!(admission_gate(ModerationStatus::Pending, false, false, None).is_ok());
    }

    #[test]
    fn duplicate_submission_maps_to_the_duplicate_refusal() {
        let lost_race = sea_orm::DbErr::Query(
            "error returned from database: duplicate key value violates unique constraint \
             \"idx_reports_reporter_target\""
                .to_owned(),
        );
        let err = settle_insert(Err(lost_race)).unwrap_err();
        assert!(matches!(err, ModerationError::DuplicateReport));

        let unrelated = sea_orm::DbErr::Query("connection reset by peer".to_owned());
        let err = settle_insert(Err(unrelated)).unwrap_err();
        assert!(matches!(err, ModerationError::Database(_)));
    }

    #[test]
    fn deletion_note_names_the_detached_target() {
        assert_eq!(deletion_note(&ContentRef::Post(17)), "content deleted (post:17)");
        assert_eq!(
            deletion_note(&ContentRef::Thread(4)),
            "content deleted (thread:4)"
        );
    }

    #[test]
    fn reporter_identity_must_be_present() {
        assert!(ReporterId::from_parts(Some(1), None).is_ok());
        assert!(ReporterId::from_parts(None, Some("203.0.113.1".to_owned())).is_ok());
        assert!(ReporterId::from_parts(None, None).is_err());
    }

    #[test]
    fn quiet_reporters_are_unflagged() {
        let now = Utc::now().naive_utc();
        let history = vec![
            report(1, ReportStatus::Resolved, Duration::days(3), None, now),
            report(2, ReportStatus::Pending, Duration::hours(2), None, now),
        ];
        let snapshot = classify(&history, &Policy::default(), now);
        assert!(!snapshot.is_problematic_reporter);
        assert!(!snapshot.should_rate_limit);
        assert_eq!(snapshot.total_reports, 2);
    }

    #[test]
    fn heavy_dismissal_ratio_with_daily_volume_throttles() {
        // Five reports today, four dismissed: ratio 0.8 over a full
        // sample, so both the badge and the throttle trip.
        let now = Utc::now().naive_utc();
        let mut history: Vec<_> = (0..4)
            .map(|i| {
                report(
                    i,
                    ReportStatus::Dismissed,
                    Duration::hours(3 + i as i64 * 2),
                    None,
                    now,
                )
            })
            .collect();
        history.push(report(9, ReportStatus::Pending, Duration::hours(13), None, now));

        let snapshot = classify(&history, &Policy::default(), now);
        assert_eq!(snapshot.reports_today, 5);
        assert_eq!(snapshot.dismissed_reports, 4);
        assert!(snapshot.is_problematic_reporter);
        assert!(snapshot.should_rate_limit);
    }

    #[test]
    fn hourly_burst_throttles_regardless_of_history() {
        let now = Utc::now().naive_utc();
        let history: Vec<_> = (0..5)
            .map(|i| {
                report(
                    i,
                    ReportStatus::Pending,
                    Duration::minutes(i as i64 * 7),
                    None,
                    now,
                )
            })
            .collect();

        let snapshot = classify(&history, &Policy::default(), now);
        assert_eq!(snapshot.reports_last_hour, 5);
        assert!(!snapshot.is_problematic_reporter);
        assert!(snapshot.should_rate_limit);
    }

    #[test]
    fn repeat_reports_on_protected_content_are_counted() {
        let now = Utc::now().naive_utc();
        let history = vec![
            report(
                1,
                ReportStatus::Dismissed,
                Duration::days(2),
                Some(REPEAT_REPORT_NOTE),
                now,
            ),
            // Too old for the lookback.
            report(
                2,
                ReportStatus::Dismissed,
                Duration::days(90),
                Some(REPEAT_REPORT_NOTE),
                now,
            ),
            // Dismissed for some other reason.
            report(
                3,
                ReportStatus::Dismissed,
                Duration::days(1),
                Some("not actionable"),
                now,
            ),
        ];
        let snapshot = classify(&history, &Policy::default(), now);
        assert_eq!(snapshot.recent_repeat_reports_on_approved_content, 1);
    }

    #[test]
    fn small_samples_never_trip_the_ratio() {
        // Two dismissals out of two reports is a 1.0 ratio but below the
        // minimum sample, so no badge.
        let now = Utc::now().naive_utc();
        let history = vec![
            report(1, ReportStatus::Dismissed, Duration::days(4), None, now),
            report(2, ReportStatus::Dismissed, Duration::days(5), None, now),
        ];
        let snapshot = classify(&history, &Policy::default(), now);
        assert!(!snapshot.is_problematic_reporter);
        assert!(!snapshot.should_rate_limit);
    }
}
