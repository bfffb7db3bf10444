use once_cell::sync::OnceCell;
use std::str::FromStr;

static POLICY: OnceCell<Policy> = OnceCell::new();

/// Operator-tunable policy knobs, loaded once from the environment.
///
/// None of these are invariants; every threshold here is forum policy and
/// may be changed between deployments without touching code.
#[derive(Clone, Debug)]
pub struct Policy {
    /// Posts an anonymous (ip, session) pair may make per window.
    pub anon_post_max: i32,
    /// Rolling quota window, in hours.
    pub anon_window_hours: i64,
    /// Reports accepted from one reporter per hour before throttling.
    pub reporter_hour_limit: usize,
    /// Reports accepted from one reporter per day before throttling.
    pub reporter_day_limit: usize,
    /// Tighter daily allowance once a reporter is classified problematic.
    pub reporter_problematic_day_limit: usize,
    /// Dismissed-to-total ratio at which a reporter is flagged.
    pub reporter_dismiss_ratio: f32,
    /// Minimum report count before the dismiss ratio is considered.
    pub reporter_min_sample: usize,
    /// Lookback, in days, for repeat reports against approved content.
    pub repeat_report_days: i64,
    /// TTL for the rule/ban/whitelist snapshots, in seconds.
    pub cache_ttl_secs: u64,
    /// Compile-size cap for admin-authored regex rules, in bytes.
    pub regex_size_limit: usize,
    /// Lazy DFA cache cap for admin-authored regex rules, in bytes.
    pub regex_dfa_size_limit: usize,
}

impl Policy {
    pub fn from_env() -> Self {
        Self {
            anon_post_max: env_or("ANON_POST_MAX", 3),
            anon_window_hours: env_or("ANON_WINDOW_HOURS", 12),
            reporter_hour_limit: env_or("REPORTER_HOUR_LIMIT", 5),
            reporter_day_limit: env_or("REPORTER_DAY_LIMIT", 20),
            reporter_problematic_day_limit: env_or("REPORTER_PROBLEMATIC_DAY_LIMIT", 5),
            reporter_dismiss_ratio: env_or("REPORTER_DISMISS_RATIO", 0.6),
            reporter_min_sample: env_or("REPORTER_MIN_SAMPLE", 5),
            repeat_report_days: env_or("REPEAT_REPORT_DAYS", 30),
            cache_ttl_secs: env_or("CACHE_TTL_SECS", 30),
            regex_size_limit: env_or("REGEX_SIZE_LIMIT", 1 << 20),
            regex_dfa_size_limit: env_or("REGEX_DFA_SIZE_LIMIT", 1 << 20),
        }
    }

    pub fn anon_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.anon_window_hours)
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            anon_post_max: 3,
            anon_window_hours: 12,
            reporter_hour_limit: 5,
            reporter_day_limit: 20,
            reporter_problematic_day_limit: 5,
            reporter_dismiss_ratio: 0.6,
            reporter_min_sample: 5,
            repeat_report_days: 30,
            cache_ttl_secs: 30,
            regex_size_limit: 1 << 20,
            regex_dfa_size_limit: 1 << 20,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(val) => match val.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => panic!("{} cannot be parsed", key),
        },
        Err(_) => default,
    }
}

#[inline(always)]
pub fn policy() -> &'static Policy {
    POLICY.get_or_init(Policy::from_env)
}
