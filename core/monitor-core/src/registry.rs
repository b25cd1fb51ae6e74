//! In-memory activity registry.
//!
//! Holds the most recent activity records in insertion order. Records are appended on
//! begin events, merged in place on completion, and marked failed by the staleness
//! reaper. Nothing is removed individually: the oldest records fall off once the
//! capacity is exceeded, and `clear` empties the whole log.
//!
//! Persistence is not handled here; the service snapshots the registry into the write
//! queue after every mutation.

use chrono::{DateTime, Duration, Utc};

use crate::config::MatchingConfig;
use crate::matching::{find_match, CompletionProbe, MatchStrategy};
use crate::types::{new_id, ActivityRecord, ActivityStatus, Metrics};

/// Fields needed to open a new record.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub session_id: String,
    pub parent_prompt_id: Option<String>,
    pub correlation_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub description: String,
    pub tool_name: String,
    pub transcript_ref: Option<String>,
}

/// Data carried by a completion event, merged into the matched record.
#[derive(Debug, Clone, Default)]
pub struct CompletionData {
    pub metrics: Metrics,
    pub output: Option<String>,
    pub transcript_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutcome {
    pub record: ActivityRecord,
    pub strategy: MatchStrategy,
}

#[derive(Debug, Clone)]
pub struct ActivityRegistry {
    records: Vec<ActivityRecord>,
    capacity: usize,
}

impl ActivityRegistry {
    /// Restores a registry from persisted records, keeping only the newest `capacity`.
    pub fn from_records(records: Vec<ActivityRecord>, capacity: usize) -> Self {
        let mut registry = Self {
            records,
            capacity: capacity.max(1),
        };
        registry.evict_overflow();
        registry
    }

    pub fn records(&self) -> &[ActivityRecord] {
        &self.records
    }

    /// Newest-first listing, optionally restricted to one session.
    pub fn list(&self, session_id: Option<&str>, limit: usize) -> Vec<ActivityRecord> {
        self.records
            .iter()
            .rev()
            .filter(|record| session_id.map_or(true, |id| record.session_id == id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Appends a new active record. Always creates; begin events never merge.
    pub fn begin(&mut self, activity: NewActivity) -> ActivityRecord {
        let record = ActivityRecord {
            id: new_id(),
            session_id: activity.session_id,
            parent_prompt_id: activity.parent_prompt_id,
            correlation_id: activity.correlation_id,
            start_time: activity.start_time,
            end_time: None,
            status: ActivityStatus::Active,
            description: activity.description,
            tools_used: vec![activity.tool_name],
            metrics: Metrics::default(),
            output: None,
            transcript_ref: activity.transcript_ref,
        };
        self.records.push(record.clone());
        self.evict_overflow();
        record
    }

    /// Locates the active record a completion closes and merges the completion into it.
    /// Returns `None` when no strategy matches; the completion is then dropped.
    pub fn complete(
        &mut self,
        probe: &CompletionProbe<'_>,
        data: CompletionData,
        config: &MatchingConfig,
    ) -> Option<CompletionOutcome> {
        let (index, strategy) = find_match(probe, &self.records, config)?;
        let record = &mut self.records[index];

        record.end_time = Some(probe.at);
        record.status = ActivityStatus::Completed;
        record.metrics = record.metrics.merged_with(data.metrics);
        if data.output.is_some() {
            record.output = data.output;
        }
        if data.transcript_ref.is_some() {
            record.transcript_ref = data.transcript_ref;
        }
        if record.correlation_id.is_none() {
            record.correlation_id = probe.correlation_id.map(str::to_string);
        }

        Some(CompletionOutcome {
            record: record.clone(),
            strategy,
        })
    }

    /// Credits a tool use to the session's most recently started active record.
    pub fn attribute_tool(&mut self, session_id: &str, tool_name: &str) -> Option<ActivityRecord> {
        let record = self
            .records
            .iter_mut()
            .filter(|record| record.is_active() && record.session_id == session_id)
            .max_by_key(|record| record.start_time)?;

        if !record.tools_used.iter().any(|tool| tool == tool_name) {
            record.tools_used.push(tool_name.to_string());
        }
        record.metrics.tool_use_count = Some(record.metrics.tool_use_count.unwrap_or(0) + 1);
        Some(record.clone())
    }

    /// Marks active records older than `stale_after` as failed. Returns the reaped records.
    pub fn reap_stale(&mut self, now: DateTime<Utc>, stale_after: Duration) -> Vec<ActivityRecord> {
        let marker = format!(" (abandoned after {}m)", stale_after.num_minutes());
        let mut reaped = Vec::new();

        for record in self.records.iter_mut() {
            if !record.is_active() {
                continue;
            }
            if now.signed_duration_since(record.start_time) <= stale_after {
                continue;
            }
            record.status = ActivityStatus::Failed;
            record.end_time = Some(now);
            record.description.push_str(&marker);
            reaped.push(record.clone());
        }

        reaped
    }

    /// Removes every record. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.records.len();
        self.records.clear();
        count
    }

    fn evict_overflow(&mut self) {
        if self.records.len() > self.capacity {
            let overflow = self.records.len() - self.capacity;
            self.records.drain(..overflow);
            tracing::debug!(evicted = overflow, "Evicted oldest activity records");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl ActivityRegistry {
        fn len(&self) -> usize {
            self.records.len()
        }
    }

    fn find<'a>(registry: &'a ActivityRegistry, id: &str) -> Option<&'a ActivityRecord> {
        registry.records().iter().find(|record| record.id == id)
    }

    fn base_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-31T00:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn activity(session: &str, description: &str, start: DateTime<Utc>) -> NewActivity {
        NewActivity {
            session_id: session.to_string(),
            parent_prompt_id: None,
            correlation_id: None,
            start_time: start,
            description: description.to_string(),
            tool_name: "Task".to_string(),
            transcript_ref: None,
        }
    }

    fn completion_probe<'a>(description: &'a str, at: DateTime<Utc>) -> CompletionProbe<'a> {
        CompletionProbe {
            session_id: "s1",
            tool_name: Some("Task"),
            description: Some(description),
            correlation_id: None,
            at,
        }
    }

    #[test]
    fn eviction_keeps_most_recent_records() {
        let mut registry = ActivityRegistry::from_records(Vec::new(), 100);
        let mut ids = Vec::new();
        for i in 0..105 {
            let record = registry.begin(activity(
                "s1",
                &format!("task {}", i),
                base_time() + Duration::seconds(i),
            ));
            ids.push(record.id);
        }

        assert_eq!(registry.records().len(), 100);
        for evicted in &ids[..5] {
            assert!(find(&registry, evicted).is_none());
        }
        assert_eq!(registry.records()[0].id, ids[5]);
        assert_eq!(registry.records()[99].id, ids[104]);
    }

    #[test]
    fn completion_merges_metrics_last_non_empty_wins() {
        let mut registry = ActivityRegistry::from_records(Vec::new(), 100);
        let begun = registry.begin(activity("s1", "Explore the repo", base_time()));
        registry.records[0].metrics = Metrics {
            tokens: Some(5),
            duration_ms: None,
            tool_use_count: Some(2),
        };

        let outcome = registry
            .complete(
                &completion_probe("Explore the repo", base_time() + Duration::seconds(20)),
                CompletionData {
                    metrics: Metrics {
                        tokens: Some(900),
                        duration_ms: Some(20_000),
                        tool_use_count: None,
                    },
                    output: Some("done".to_string()),
                    transcript_ref: None,
                },
                &MatchingConfig::default(),
            )
            .expect("completion");

        assert_eq!(outcome.record.id, begun.id);
        assert_eq!(outcome.record.status, ActivityStatus::Completed);
        assert_eq!(
            outcome.record.end_time,
            Some(base_time() + Duration::seconds(20))
        );
        assert_eq!(
            outcome.record.metrics,
            Metrics {
                tokens: Some(900),
                duration_ms: Some(20_000),
                tool_use_count: Some(2),
            }
        );
        assert_eq!(outcome.record.output.as_deref(), Some("done"));
        assert_eq!(registry.records().len(), 1);
    }

    #[test]
    fn unmatched_completion_creates_nothing() {
        let mut registry = ActivityRegistry::from_records(Vec::new(), 100);
        let outcome = registry.complete(
            &completion_probe("Nothing started this", base_time()),
            CompletionData::default(),
            &MatchingConfig::default(),
        );
        assert!(outcome.is_none());
        assert!(registry.records().is_empty());
    }

    #[test]
    fn replayed_completion_does_not_match_finished_record() {
        let mut registry = ActivityRegistry::from_records(Vec::new(), 100);
        registry.begin(activity("s1", "Explore the repo", base_time()));
        let probe = completion_probe("Explore the repo", base_time() + Duration::seconds(3));

        assert!(registry
            .complete(&probe, CompletionData::default(), &MatchingConfig::default())
            .is_some());
        assert!(registry
            .complete(&probe, CompletionData::default(), &MatchingConfig::default())
            .is_none());
        assert_eq!(registry.records().len(), 1);
    }

    #[test]
    fn reaper_fails_only_records_past_threshold() {
        let now = base_time() + Duration::minutes(60);
        let mut registry = ActivityRegistry::from_records(Vec::new(), 100);
        let stale = registry.begin(activity("s1", "Long task", now - Duration::minutes(31)));
        let fresh = registry.begin(activity("s1", "Recent task", now - Duration::minutes(29)));

        let reaped = registry.reap_stale(now, Duration::minutes(30));

        assert_eq!(reaped.len(), 1);
        let stale = find(&registry, &stale.id).expect("stale record");
        assert_eq!(stale.status, ActivityStatus::Failed);
        assert_eq!(stale.description, "Long task (abandoned after 30m)");
        assert_eq!(stale.end_time, Some(now));

        let fresh = find(&registry, &fresh.id).expect("fresh record");
        assert_eq!(fresh.status, ActivityStatus::Active);
        assert_eq!(fresh.description, "Recent task");
    }

    #[test]
    fn reaper_skips_finished_records() {
        let now = base_time() + Duration::minutes(60);
        let mut registry = ActivityRegistry::from_records(Vec::new(), 100);
        registry.begin(activity("s1", "Old task", base_time()));
        registry
            .complete(
                &completion_probe("Old task", base_time() + Duration::seconds(1)),
                CompletionData::default(),
                &MatchingConfig::default(),
            )
            .expect("completion");

        assert!(registry.reap_stale(now, Duration::minutes(30)).is_empty());
    }

    #[test]
    fn attribute_tool_credits_latest_active_record_in_session() {
        let mut registry = ActivityRegistry::from_records(Vec::new(), 100);
        registry.begin(activity("s1", "First", base_time()));
        let latest = registry.begin(activity("s1", "Second", base_time() + Duration::seconds(1)));
        registry.begin(activity("s2", "Other session", base_time() + Duration::seconds(2)));

        let credited = registry.attribute_tool("s1", "Read").expect("credited");
        assert_eq!(credited.id, latest.id);
        assert_eq!(credited.tools_used, vec!["Task".to_string(), "Read".to_string()]);
        assert_eq!(credited.metrics.tool_use_count, Some(1));

        let credited = registry.attribute_tool("s1", "Read").expect("credited");
        assert_eq!(credited.tools_used.len(), 2);
        assert_eq!(credited.metrics.tool_use_count, Some(2));
    }

    #[test]
    fn list_is_newest_first_and_filtered() {
        let mut registry = ActivityRegistry::from_records(Vec::new(), 100);
        registry.begin(activity("s1", "a", base_time()));
        registry.begin(activity("s2", "b", base_time()));
        registry.begin(activity("s1", "c", base_time()));

        let listed: Vec<_> = registry
            .list(Some("s1"), 10)
            .into_iter()
            .map(|record| record.description)
            .collect();
        assert_eq!(listed, vec!["c".to_string(), "a".to_string()]);
        assert_eq!(registry.list(None, 1).len(), 1);
    }

    #[test]
    fn from_records_trims_to_capacity() {
        let mut source = ActivityRegistry::from_records(Vec::new(), 10);
        for i in 0..10 {
            source.begin(activity("s1", &format!("task {}", i), base_time()));
        }
        let restored = ActivityRegistry::from_records(source.records().to_vec(), 4);
        assert_eq!(restored.len(), 4);
        assert_eq!(restored.records()[0].description, "task 6");
    }
}
