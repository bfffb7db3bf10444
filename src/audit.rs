//! Append-only audit log for state-changing admin actions.

use crate::orm::audit_log;
use chrono::Utc;
use sea_orm::{entity::*, DatabaseConnection};

/// Writes one audit row. A failed write must not abort the action being
/// audited, so this logs a degraded-mode warning instead of returning an
/// error.
pub async fn record(
    db: &DatabaseConnection,
    actor: Option<i32>,
    action: &str,
    target: &str,
    before: Option<serde_json::Value>,
    after: Option<serde_json::Value>,
) {
    let entry = audit_log::ActiveModel {
        actor: Set(actor),
        action: Set(action.to_owned()),
        target: Set(target.to_owned()),
        before: Set(before.map(|v| v.to_string())),
        after: Set(after.map(|v| v.to_string())),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    };

    if let Err(err) = audit_log::Entity::insert(entry).exec(db).await {
        log::warn!(
            "DEGRADED: audit write failed for {} on {}: {:?}",
            action,
            target,
            err
        );
    }
}

/// Serializes a model into the before/after columns, losing nothing a
/// reviewer would need. Serialization failure degrades to null.
pub fn snapshot<T: serde::Serialize>(model: &T) -> Option<serde_json::Value> {
    match serde_json::to_value(model) {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("DEGRADED: audit snapshot serialization failed: {:?}", err);
            None
        }
    }
}
