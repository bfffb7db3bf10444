//! Content Filter Engine.
//!
//! Evaluates free text against the admin-authored banned-word rules.
//! Evaluation is pure and deterministic over a compiled rule snapshot:
//! the same text and rules always produce the same verdict and match set,
//! which also makes `evaluate` the dry-run entry point for the admin test
//! endpoint.

use crate::cache;
use crate::global::{policy, Policy};
use crate::init::get_db_pool;
use crate::orm::banned_words::{self, FilterCategory, FilterMatchType, FilterSeverity};
use chrono::{NaiveDateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use sea_orm::{entity::*, query::*, sea_query::Expr, DbErr};
use serde::Serialize;
use std::sync::Arc;

/// Compiled regexes survive snapshot reloads so a TTL refresh does not
/// recompile every pattern. Keyed by rule id, holding the pattern it was
/// compiled from so edits are picked up.
static REGEX_CACHE: Lazy<DashMap<i32, (String, Arc<Regex>)>> = Lazy::new(DashMap::new);

enum Matcher {
    /// Case-insensitive whole-word match (alphanumeric boundaries).
    Exact(String),
    /// Case-insensitive substring match.
    Partial(String),
    Regex(Arc<Regex>),
}

pub struct CompiledRule {
    pub id: i32,
    pub pattern: String,
    pub severity: FilterSeverity,
    pub category: FilterCategory,
    pub match_type: FilterMatchType,
    matcher: Matcher,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FilterMatch {
    pub rule_id: i32,
    /// The text that matched. The pattern itself for exact/partial rules,
    /// the actual matched slice for regex rules.
    pub word: String,
    pub severity: FilterSeverity,
    pub category: FilterCategory,
}

#[derive(Clone, Debug, Serialize)]
pub struct FilterVerdict {
    pub blocked: bool,
    pub matches: Vec<FilterMatch>,
}

impl FilterVerdict {
    pub fn max_severity(&self) -> Option<FilterSeverity> {
        self.matches.iter().map(|m| m.severity).max()
    }

    /// True when the item should enter the moderation queue: a moderate
    /// match with no ban match present.
    pub fn should_queue(&self) -> bool {
        !self.blocked && self.max_severity() == Some(FilterSeverity::Moderate)
    }
}

/// Compiles the active, non-expired subset of `rules`. A regex rule whose
/// pattern fails to compile under the size caps is skipped and logged; it
/// must not take requests down with it.
pub fn compile_rules(
    rules: Vec<banned_words::Model>,
    policy: &Policy,
    now: NaiveDateTime,
) -> Vec<CompiledRule> {
    rules
        .into_iter()
        .filter(|rule| rule.is_active)
        .filter(|rule| rule.expires_at.map_or(true, |at| at > now))
        .filter_map(|rule| {
            let matcher = match rule.match_type {
                FilterMatchType::Exact => Matcher::Exact(rule.pattern.to_lowercase()),
                FilterMatchType::Partial => Matcher::Partial(rule.pattern.to_lowercase()),
                FilterMatchType::Regex => match compile_regex(rule.id, &rule.pattern, policy) {
                    Some(re) => Matcher::Regex(re),
                    None => return None,
                },
            };
            Some(CompiledRule {
                id: rule.id,
                pattern: rule.pattern,
                severity: rule.severity,
                category: rule.category,
                match_type: rule.match_type,
                matcher,
            })
        })
        .collect()
}

fn compile_regex(rule_id: i32, pattern: &str, policy: &Policy) -> Option<Arc<Regex>> {
    if let Some(entry) = REGEX_CACHE.get(&rule_id) {
        if entry.0 == pattern {
            return Some(entry.1.clone());
        }
    }
    match RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(policy.regex_size_limit)
        .dfa_size_limit(policy.regex_dfa_size_limit)
        .build()
    {
        Ok(re) => {
            let re = Arc::new(re);
            REGEX_CACHE.insert(rule_id, (pattern.to_owned(), re.clone()));
            Some(re)
        }
        Err(err) => {
            log::warn!("skipping filter rule {}: {}", rule_id, err);
            REGEX_CACHE.remove(&rule_id);
            None
        }
    }
}

/// Checks a pattern against the same compilation caps used at evaluation
/// time, so the admin CRUD can refuse a rule that would silently be
/// skipped later.
pub fn validate_pattern(match_type: FilterMatchType, pattern: &str) -> Result<(), String> {
    if pattern.trim().is_empty() {
        return Err("pattern must not be empty".to_owned());
    }
    if match_type == FilterMatchType::Regex {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .size_limit(policy().regex_size_limit)
            .dfa_size_limit(policy().regex_dfa_size_limit)
            .build()
            .map_err(|err| format!("invalid regex: {}", err))?;
    }
    Ok(())
}

/// Evaluates `text` against a rule snapshot. No side effects.
///
/// Matches come back in rule-evaluation order, but the verdict depends
/// only on the maximum severity present: any ban match blocks outright,
/// a moderate match routes to the queue, warnings are recorded only.
pub fn evaluate(rules: &[CompiledRule], text: &str) -> FilterVerdict {
    let lowered = text.to_lowercase();
    let mut matches = Vec::new();

    for rule in rules {
        let word = match &rule.matcher {
            Matcher::Exact(needle) => whole_word_match(&lowered, needle)
                .then(|| rule.pattern.clone()),
            Matcher::Partial(needle) => lowered.contains(needle.as_str())
                .then(|| rule.pattern.clone()),
            Matcher::Regex(re) => re.find(text).map(|m| m.as_str().to_owned()),
        };
        if let Some(word) = word {
            matches.push(FilterMatch {
                rule_id: rule.id,
                word,
                severity: rule.severity,
                category: rule.category,
            });
        }
    }

    let blocked = matches.iter().any(|m| m.severity == FilterSeverity::Ban);
    FilterVerdict { blocked, matches }
}

/// Substring search with alphanumeric boundary checks on both sides.
/// Both arguments must already be lowercased.
fn whole_word_match(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let start = from + pos;
        let end = start + needle.len();
        let clear_before = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let clear_after = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if clear_before && clear_after {
            return true;
        }
        from = end;
    }
    false
}

/// Returns the current rule snapshot, reloading it from the database when
/// the TTL has lapsed or an admin write invalidated it.
pub async fn load_rules() -> Result<Arc<Vec<CompiledRule>>, DbErr> {
    let policy = policy();
    if let Some(rules) = cache::FILTER_RULES.get(policy.cache_ttl()) {
        return Ok(rules);
    }

    let models = banned_words::Entity::find()
        .filter(banned_words::Column::IsActive.eq(true))
        .order_by_asc(banned_words::Column::Id)
        .all(get_db_pool())
        .await?;
    let compiled = compile_rules(models, policy, Utc::now().naive_utc());
    Ok(cache::FILTER_RULES.put(compiled))
}

/// Best-effort hit bookkeeping for operator visibility. Never blocks or
/// fails the request that produced the verdict.
pub fn record_hits(verdict: &FilterVerdict) {
    let rule_ids: Vec<i32> = verdict.matches.iter().map(|m| m.rule_id).collect();
    if rule_ids.is_empty() {
        return;
    }
    actix_web::rt::spawn(async move {
        let res = banned_words::Entity::update_many()
            .col_expr(banned_words::Column::HitCount, Expr::cust("hit_count + 1"))
            .col_expr(
                banned_words::Column::LastHitAt,
                Expr::value(Utc::now().naive_utc()),
            )
            .filter(banned_words::Column::Id.is_in(rule_ids))
            .exec(get_db_pool())
            .await;
        if let Err(err) = res {
            log::warn!("filter hit bookkeeping failed: {:?}", err);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rule(
        id: i32,
        pattern: &str,
        severity: FilterSeverity,
        match_type: FilterMatchType,
    ) -> banned_words::Model {
        banned_words::Model {
            id,
            pattern: pattern.to_owned(),
            severity,
            category: FilterCategory::General,
            match_type,
            is_active: true,
            expires_at: None,
            notes: None,
            created_by: None,
            created_at: Utc::now().naive_utc(),
            hit_count: 0,
            last_hit_at: None,
        }
    }

    fn compile(rules: Vec<banned_words::Model>) -> Vec<CompiledRule> {
        compile_rules(rules, &Policy::default(), Utc::now().naive_utc())
    }

    #[test]
    fn exact_match_respects_word_boundaries() {
        let rules = compile(vec![rule(
            1,
            "spam123",
            FilterSeverity::Ban,
            FilterMatchType::Exact,
        )]);

        assert!(evaluate(&rules, "this is spam123 test").blocked);
        assert!(evaluate(&rules, "SPAM123!").blocked);
        assert!(!evaluate(&rules, "spamalot123junk").blocked);
        assert!(!evaluate(&rules, "spam123x").blocked);
    }

    #[test]
    fn partial_match_hits_substrings() {
        let rules = compile(vec![rule(
            1,
            "spam123",
            FilterSeverity::Ban,
            FilterMatchType::Partial,
        )]);

        assert!(evaluate(&rules, "this is spam123 test").blocked);
        assert!(evaluate(&rules, "spamalot is fine").matches.is_empty());
        assert!(evaluate(&rules, "xxspam123yy").blocked);
    }

    #[test]
    fn regex_rules_match_case_insensitively() {
        let rules = compile(vec![rule(
            1,
            r"buy \d+ pills",
            FilterSeverity::Ban,
            FilterMatchType::Regex,
        )]);

        let verdict = evaluate(&rules, "BUY 500 PILLS now");
        assert!(verdict.blocked);
        assert_eq!(verdict.matches[0].word, "BUY 500 PILLS");
    }

    #[test]
    fn pathological_regex_is_skipped_at_compile() {
        // Oversized bounded repetition trips the compile size cap.
        let mut policy = Policy::default();
        policy.regex_size_limit = 64;
        let rules = compile_rules(
            vec![rule(
                9,
                "a{1000}{1000}{1000}",
                FilterSeverity::Ban,
                FilterMatchType::Regex,
            )],
            &policy,
            Utc::now().naive_utc(),
        );
        assert!(rules.is_empty());
    }

    #[test]
    fn inactive_and_expired_rules_never_participate() {
        let mut inactive = rule(1, "foo", FilterSeverity::Ban, FilterMatchType::Partial);
        inactive.is_active = false;
        let mut expired = rule(2, "bar", FilterSeverity::Ban, FilterMatchType::Partial);
        expired.expires_at = Some(Utc::now().naive_utc() - chrono::Duration::hours(1));

        let rules = compile(vec![inactive, expired]);
        let verdict = evaluate(&rules, "foo bar");
        assert!(!verdict.blocked);
        assert!(verdict.matches.is_empty());
    }

    #[test]
    fn verdict_depends_only_on_max_severity() {
        let rules = compile(vec![
            rule(1, "mild", FilterSeverity::Warning, FilterMatchType::Partial),
            rule(2, "iffy", FilterSeverity::Moderate, FilterMatchType::Partial),
            rule(3, "awful", FilterSeverity::Ban, FilterMatchType::Partial),
        ]);

        // Warning only: recorded, no block, no queue.
        let verdict = evaluate(&rules, "a mild remark");
        assert!(!verdict.blocked);
        assert!(!verdict.should_queue());
        assert_eq!(verdict.matches.len(), 1);

        // Moderate present: queued but not blocked.
        let verdict = evaluate(&rules, "a mild but iffy remark");
        assert!(!verdict.blocked);
        assert!(verdict.should_queue());

        // Ban present: blocked outright, queue flag irrelevant.
        let verdict = evaluate(&rules, "a mild, iffy, awful remark");
        assert!(verdict.blocked);
        assert!(!verdict.should_queue());
        assert_eq!(verdict.matches.len(), 3);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let rules = compile(vec![
            rule(1, "alpha", FilterSeverity::Warning, FilterMatchType::Exact),
            rule(2, r"beta\d*", FilterSeverity::Moderate, FilterMatchType::Regex),
        ]);

        let first = evaluate(&rules, "alpha beta77 gamma");
        for _ in 0..10 {
            let again = evaluate(&rules, "alpha beta77 gamma");
            assert_eq!(first.blocked, again.blocked);
            assert_eq!(first.matches, again.matches);
        }
    }

    #[test]
    fn matches_come_back_in_rule_order() {
        let rules = compile(vec![
            rule(5, "zzz", FilterSeverity::Warning, FilterMatchType::Partial),
            rule(2, "aaa", FilterSeverity::Warning, FilterMatchType::Partial),
        ]);

        let verdict = evaluate(&rules, "aaa zzz");
        let ids: Vec<i32> = verdict.matches.iter().map(|m| m.rule_id).collect();
        assert_eq!(ids, vec![5, 2]);
    }

    #[test]
    fn pattern_validation_rejects_bad_regex() {
        assert!(validate_pattern(FilterMatchType::Regex, "(unclosed").is_err());
        assert!(validate_pattern(FilterMatchType::Regex, r"ok\d+").is_ok());
        assert!(validate_pattern(FilterMatchType::Exact, "  ").is_err());
        assert!(validate_pattern(FilterMatchType::Partial, "fine").is_ok());
    }
}
