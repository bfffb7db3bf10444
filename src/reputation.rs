//! IP Reputation Registry.
//!
//! Resolves an address against the ban and whitelist tables. Entries hold
//! either an exact address or a CIDR range; the most specific covering
//! entry wins, with ties between overlapping bans broken by the more
//! restrictive ban type. Temporary bans expire lazily at read time.

use crate::cache;
use crate::global::policy;
use crate::init::get_db_pool;
use crate::orm::{ip_bans, ip_whitelist};
use chrono::NaiveDateTime;
use ipnet::IpNet;
use sea_orm::{entity::*, query::*, DbErr};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReputationAction {
    Allow,
    Deny,
    /// Submission is accepted but marked hidden from everyone but the
    /// author; rendering is the external collaborator that honors it.
    Shadow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bypass {
    None,
    Basic,
    Moderate,
    Full,
}

impl From<ip_whitelist::BypassLevel> for Bypass {
    fn from(level: ip_whitelist::BypassLevel) -> Self {
        match level {
            ip_whitelist::BypassLevel::Basic => Bypass::Basic,
            ip_whitelist::BypassLevel::Moderate => Bypass::Moderate,
            ip_whitelist::BypassLevel::Full => Bypass::Full,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ReputationVerdict {
    pub action: ReputationAction,
    pub bypass: Bypass,
}

impl ReputationVerdict {
    pub fn denies(&self) -> bool {
        self.action == ReputationAction::Deny
    }

    pub fn shadows(&self) -> bool {
        self.action == ReputationAction::Shadow
    }

    /// Moderate-severity filter queueing is waived for this address.
    pub fn exempts_queue(&self) -> bool {
        self.bypass >= Bypass::Moderate
    }

    pub fn exempts_rate_limit(&self) -> bool {
        self.bypass >= Bypass::Basic
    }
}

/// Parses a table entry into a network: bare addresses become host
/// networks (/32 or /128) so specificity comparison is uniform.
fn entry_net(entry: &str) -> Option<IpNet> {
    if let Ok(net) = entry.parse::<IpNet>() {
        return Some(net);
    }
    entry.parse::<IpAddr>().ok().map(IpNet::from)
}

/// Prefix length of `entry` if it covers `ip`.
fn covering_prefix(entry: &str, ip: IpAddr) -> Option<u8> {
    let net = entry_net(entry)?;
    net.contains(&ip).then(|| net.prefix_len())
}

fn ban_applies(ban: &ip_bans::Model, now: NaiveDateTime) -> bool {
    if !ban.is_active {
        return false;
    }
    // Lazy expiry: a lapsed temporary ban is dead at read time, no
    // unban write required.
    match (ban.ban_type, ban.expires_at) {
        (ip_bans::IpBanType::Temporary, Some(at)) => at > now,
        (ip_bans::IpBanType::Temporary, None) => false,
        _ => true,
    }
}

/// Resolves `ip` to a verdict over the given snapshots. Pure; the cached
/// table loads live in [`resolve_ip`].
pub fn resolve(
    bans: &[ip_bans::Model],
    whitelist: &[ip_whitelist::Model],
    ip: IpAddr,
    now: NaiveDateTime,
) -> ReputationVerdict {
    let ban = bans
        .iter()
        .filter(|ban| ban_applies(ban, now))
        .filter_map(|ban| covering_prefix(&ban.ip_address, ip).map(|plen| (plen, ban)))
        .max_by_key(|(plen, ban)| (*plen, ban.ban_type));

    let bypass = whitelist
        .iter()
        .filter(|entry| entry.is_active)
        .filter_map(|entry| covering_prefix(&entry.ip_address, ip).map(|plen| (plen, entry)))
        .max_by_key(|(plen, entry)| (*plen, entry.bypass_level))
        .map(|(_, entry)| Bypass::from(entry.bypass_level))
        .unwrap_or(Bypass::None);

    // A full bypass allows posting unconditionally, overriding any ban.
    // Lesser bypass levels never override one.
    if bypass == Bypass::Full {
        return ReputationVerdict {
            action: ReputationAction::Allow,
            bypass,
        };
    }

    let action = match ban.map(|(_, ban)| ban.ban_type) {
        Some(ip_bans::IpBanType::Shadowban) => ReputationAction::Shadow,
        Some(_) => ReputationAction::Deny,
        None => ReputationAction::Allow,
    };

    ReputationVerdict { action, bypass }
}

pub async fn load_bans() -> Result<Arc<Vec<ip_bans::Model>>, DbErr> {
    if let Some(bans) = cache::IP_BANS.get(policy().cache_ttl()) {
        return Ok(bans);
    }
    let bans = ip_bans::Entity::find()
        .filter(ip_bans::Column::IsActive.eq(true))
        .all(get_db_pool())
        .await?;
    Ok(cache::IP_BANS.put(bans))
}

pub async fn load_whitelist() -> Result<Arc<Vec<ip_whitelist::Model>>, DbErr> {
    if let Some(list) = cache::IP_WHITELIST.get(policy().cache_ttl()) {
        return Ok(list);
    }
    let list = ip_whitelist::Entity::find()
        .filter(ip_whitelist::Column::IsActive.eq(true))
        .all(get_db_pool())
        .await?;
    Ok(cache::IP_WHITELIST.put(list))
}

/// Cache-backed resolution for request handlers.
pub async fn resolve_ip(ip: IpAddr, now: NaiveDateTime) -> Result<ReputationVerdict, DbErr> {
    let bans = load_bans().await?;
    let whitelist = load_whitelist().await?;
    Ok(resolve(&bans, &whitelist, ip, now))
}

/// Marks lazily-expired temporary bans inactive. Bookkeeping for the
/// periodic sweep; resolution is already correct without it.
pub async fn sweep_expired_bans() -> Result<u64, DbErr> {
    use sea_orm::sea_query::Expr;
    let now = chrono::Utc::now().naive_utc();
    let res = ip_bans::Entity::update_many()
        .col_expr(ip_bans::Column::IsActive, Expr::value(false))
        .filter(ip_bans::Column::IsActive.eq(true))
        .filter(ip_bans::Column::BanType.eq(ip_bans::IpBanType::Temporary))
        .filter(ip_bans::Column::ExpiresAt.lte(now))
        .exec(get_db_pool())
        .await?;
    if res.rows_affected > 0 {
        cache::IP_BANS.invalidate();
    }
    Ok(res.rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::ip_bans::{AppealStatus, IpBanType};
    use crate::orm::ip_whitelist::BypassLevel;
    use chrono::Utc;

    fn ban(id: i32, addr: &str, ban_type: IpBanType, expires_at: Option<NaiveDateTime>) -> ip_bans::Model {
        ip_bans::Model {
            id,
            ip_address: addr.to_owned(),
            ban_type,
            reason: "test".to_owned(),
            expires_at,
            is_active: true,
            admin_notes: None,
            appeal_status: AppealStatus::None,
            created_by: None,
            created_at: Utc::now().naive_utc(),
        }
    }

    fn wl(id: i32, addr: &str, level: BypassLevel) -> ip_whitelist::Model {
        ip_whitelist::Model {
            id,
            ip_address: addr.to_owned(),
            description: "test".to_owned(),
            bypass_level: level,
            is_active: true,
            created_by: None,
            created_at: Utc::now().naive_utc(),
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn now() -> NaiveDateTime {
        Utc::now().naive_utc()
    }

    #[test]
    fn permanent_ban_denies_without_whitelist() {
        let bans = vec![ban(1, "198.51.100.7", IpBanType::Permanent, None)];
        let verdict = resolve(&bans, &[], ip("198.51.100.7"), now());
        assert_eq!(verdict.action, ReputationAction::Deny);
        assert_eq!(verdict.bypass, Bypass::None);
    }

    #[test]
    fn full_bypass_overrides_any_ban() {
        let bans = vec![ban(1, "198.51.100.7", IpBanType::Permanent, None)];
        let whitelist = vec![wl(1, "198.51.100.7", BypassLevel::Full)];
        let verdict = resolve(&bans, &whitelist, ip("198.51.100.7"), now());
        assert_eq!(verdict.action, ReputationAction::Allow);
        assert_eq!(verdict.bypass, Bypass::Full);
    }

    #[test]
    fn lesser_bypass_does_not_override_a_ban() {
        let bans = vec![ban(1, "198.51.100.7", IpBanType::Permanent, None)];
        let whitelist = vec![wl(1, "198.51.100.7", BypassLevel::Moderate)];
        let verdict = resolve(&bans, &whitelist, ip("198.51.100.7"), now());
        assert_eq!(verdict.action, ReputationAction::Deny);
        assert_eq!(verdict.bypass, Bypass::Moderate);
    }

    #[test]
    fn lapsed_temporary_ban_allows_lazily() {
        let past = now() - chrono::Duration::hours(2);
        let bans = vec![ban(1, "203.0.113.5", IpBanType::Temporary, Some(past))];
        let verdict = resolve(&bans, &[], ip("203.0.113.5"), now());
        assert_eq!(verdict.action, ReputationAction::Allow);
    }

    #[test]
    fn live_temporary_ban_denies() {
        let future = now() + chrono::Duration::hours(2);
        let bans = vec![ban(1, "203.0.113.5", IpBanType::Temporary, Some(future))];
        let verdict = resolve(&bans, &[], ip("203.0.113.5"), now());
        assert_eq!(verdict.action, ReputationAction::Deny);
    }

    #[test]
    fn shadowban_shadows_instead_of_denying() {
        let bans = vec![ban(1, "198.51.100.0/24", IpBanType::Shadowban, None)];
        let verdict = resolve(&bans, &[], ip("198.51.100.44"), now());
        assert_eq!(verdict.action, ReputationAction::Shadow);
    }

    #[test]
    fn exact_address_beats_covering_range() {
        // The /24 is a shadowban but the exact address is permanent;
        // the more specific record decides.
        let bans = vec![
            ban(1, "198.51.100.0/24", IpBanType::Shadowban, None),
            ban(2, "198.51.100.44", IpBanType::Permanent, None),
        ];
        let verdict = resolve(&bans, &[], ip("198.51.100.44"), now());
        assert_eq!(verdict.action, ReputationAction::Deny);

        // Other addresses in the range still get the range ban.
        let verdict = resolve(&bans, &[], ip("198.51.100.45"), now());
        assert_eq!(verdict.action, ReputationAction::Shadow);
    }

    #[test]
    fn equal_specificity_ties_go_to_the_more_restrictive_ban() {
        let bans = vec![
            ban(1, "198.51.100.0/24", IpBanType::Shadowban, None),
            ban(2, "198.51.100.0/24", IpBanType::Permanent, None),
        ];
        let verdict = resolve(&bans, &[], ip("198.51.100.9"), now());
        assert_eq!(verdict.action, ReputationAction::Deny);
    }

    #[test]
    fn inactive_records_are_ignored() {
        let mut dead = ban(1, "198.51.100.7", IpBanType::Permanent, None);
        dead.is_active = false;
        let verdict = resolve(&[dead], &[], ip("198.51.100.7"), now());
        assert_eq!(verdict.action, ReputationAction::Allow);
    }

    #[test]
    fn unlisted_address_defaults_to_allow() {
        let verdict = resolve(&[], &[], ip("192.0.2.1"), now());
        assert_eq!(verdict.action, ReputationAction::Allow);
        assert_eq!(verdict.bypass, Bypass::None);
        assert!(!verdict.exempts_rate_limit());
    }

    #[test]
    fn bypass_levels_gate_the_right_exemptions() {
        let whitelist = vec![wl(1, "192.0.2.0/24", BypassLevel::Basic)];
        let verdict = resolve(&[], &whitelist, ip("192.0.2.8"), now());
        assert!(verdict.exempts_rate_limit());
        assert!(!verdict.exempts_queue());

        let whitelist = vec![wl(1, "192.0.2.0/24", BypassLevel::Moderate)];
        let verdict = resolve(&[], &whitelist, ip("192.0.2.8"), now());
        assert!(verdict.exempts_rate_limit());
        assert!(verdict.exempts_queue());
    }
}
