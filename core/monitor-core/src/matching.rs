//! Completion matching strategies.
//!
//! A completion event carries no reliable link to the record it closes, so the
//! registry tries an ordered list of pure matchers and stops at the first hit:
//!
//! 1. **Correlation id**: the id handed out when the begin was seen.
//! 2. **Exact description**: byte-for-byte equal descriptions.
//! 3. **Fuzzy description**: enough of the completion's significant words appear in
//!    the candidate's description. Ties go to the most recently started candidate.
//! 4. **Timestamp proximity**: the most recently started candidate that declared the
//!    same tool, if it started less than the proximity window before the completion.
//!
//! Candidates are always restricted to active records of the completion's session, so
//! no strategy can attach across sessions.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::MatchingConfig;
use crate::types::ActivityRecord;

/// The parts of a completion event the matchers look at.
#[derive(Debug, Clone, Copy)]
pub struct CompletionProbe<'a> {
    pub session_id: &'a str,
    pub tool_name: Option<&'a str>,
    pub description: Option<&'a str>,
    pub correlation_id: Option<&'a str>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    CorrelationId,
    ExactDescription,
    FuzzyDescription,
    TimestampProximity,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::CorrelationId => "correlation_id",
            MatchStrategy::ExactDescription => "exact_description",
            MatchStrategy::FuzzyDescription => "fuzzy_description",
            MatchStrategy::TimestampProximity => "timestamp_proximity",
        }
    }
}

/// Returns the position of the matched record within `candidates`.
pub type Matcher = fn(&CompletionProbe<'_>, &[&ActivityRecord], &MatchingConfig) -> Option<usize>;

/// Evaluation order of the strategies.
pub const MATCHERS: &[(MatchStrategy, Matcher)] = &[
    (MatchStrategy::CorrelationId, match_correlation_id),
    (MatchStrategy::ExactDescription, match_exact_description),
    (MatchStrategy::FuzzyDescription, match_fuzzy_description),
    (MatchStrategy::TimestampProximity, match_timestamp_proximity),
];

/// Runs the matchers against `records` and returns the index into `records` of the
/// record the completion closes.
pub fn find_match(
    probe: &CompletionProbe<'_>,
    records: &[ActivityRecord],
    config: &MatchingConfig,
) -> Option<(usize, MatchStrategy)> {
    let (indices, candidates): (Vec<usize>, Vec<&ActivityRecord>) = records
        .iter()
        .enumerate()
        .filter(|(_, record)| record.is_active() && record.session_id == probe.session_id)
        .unzip();

    if candidates.is_empty() {
        return None;
    }

    MATCHERS.iter().find_map(|(strategy, matcher)| {
        matcher(probe, &candidates, config).map(|position| (indices[position], *strategy))
    })
}

pub fn match_correlation_id(
    probe: &CompletionProbe<'_>,
    candidates: &[&ActivityRecord],
    _config: &MatchingConfig,
) -> Option<usize> {
    let correlation_id = probe.correlation_id?;
    candidates
        .iter()
        .position(|record| record.correlation_id.as_deref() == Some(correlation_id))
}

pub fn match_exact_description(
    probe: &CompletionProbe<'_>,
    candidates: &[&ActivityRecord],
    _config: &MatchingConfig,
) -> Option<usize> {
    let description = probe.description.filter(|d| !d.is_empty())?;
    candidates
        .iter()
        .position(|record| record.description == description)
}

pub fn match_fuzzy_description(
    probe: &CompletionProbe<'_>,
    candidates: &[&ActivityRecord],
    config: &MatchingConfig,
) -> Option<usize> {
    let description = probe.description?;
    let significant = significant_tokens(description, config.significant_token_len);
    if significant.is_empty() {
        return None;
    }

    candidates
        .iter()
        .enumerate()
        .filter(|(_, record)| {
            let candidate_tokens: HashSet<String> = tokenize(&record.description).collect();
            let present = significant
                .iter()
                .filter(|token| candidate_tokens.contains(*token))
                .count();
            present as f64 / significant.len() as f64 >= config.fuzzy_threshold
        })
        .max_by_key(|(_, record)| record.start_time)
        .map(|(position, _)| position)
}

pub fn match_timestamp_proximity(
    probe: &CompletionProbe<'_>,
    candidates: &[&ActivityRecord],
    config: &MatchingConfig,
) -> Option<usize> {
    let tool_name = probe.tool_name?;
    let (position, record) = candidates
        .iter()
        .enumerate()
        .filter(|(_, record)| record.declared_tool() == Some(tool_name))
        .max_by_key(|(_, record)| record.start_time)?;

    let elapsed = probe.at.signed_duration_since(record.start_time);
    if elapsed >= chrono::Duration::zero() && elapsed < config.proximity_window() {
        Some(position)
    } else {
        None
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().map(str::to_lowercase)
}

fn significant_tokens(text: &str, min_len: usize) -> Vec<String> {
    tokenize(text)
        .filter(|token| token.chars().count() > min_len)
        .collect()
}
