//! Prompt hierarchy tracker.
//!
//! ```text
//! none ──submit──▶ active ──stop──▶ completed
//!                    │
//!                    └──submit──▶ interrupted   (silent interruption)
//! ```
//!
//! Upstream has no cancel signal: a prompt counts as interrupted when another prompt
//! is submitted in the same session before a stop arrives. Each session holds its
//! latest prompt until it is superseded or cleared, so at most one prompt per session
//! can be active.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{new_id, PromptRecord, PromptStatus};

/// Result of a prompt submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptStarted {
    pub prompt: PromptRecord,
    /// The previously active prompt, closed by silent interruption.
    pub interrupted: Option<PromptRecord>,
}

#[derive(Debug, Default)]
pub struct PromptTracker {
    latest: HashMap<String, PromptRecord>,
}

impl PromptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new active prompt, interrupting the session's current one if any.
    pub fn submit(&mut self, session_id: &str, text: &str, at: DateTime<Utc>) -> PromptStarted {
        let interrupted = self.interrupt_active(session_id, at);
        let prompt = PromptRecord {
            prompt_id: new_id(),
            session_id: session_id.to_string(),
            text: text.to_string(),
            start_time: at,
            end_time: None,
            status: PromptStatus::Active,
            duration: None,
        };
        self.latest.insert(session_id.to_string(), prompt.clone());
        PromptStarted {
            prompt,
            interrupted,
        }
    }

    /// Silent interruption: closes the session's active prompt as `interrupted`.
    pub fn interrupt_active(&mut self, session_id: &str, at: DateTime<Utc>) -> Option<PromptRecord> {
        let interrupted = self.finish_active(session_id, at, PromptStatus::Interrupted)?;
        tracing::info!(
            session_id = %session_id,
            prompt_id = %interrupted.prompt_id,
            duration_ms = ?interrupted.duration,
            "Prompt interrupted by a newer submission"
        );
        Some(interrupted)
    }

    /// Closes the session's active prompt as `completed`. No-op when none is active.
    pub fn complete_active(&mut self, session_id: &str, at: DateTime<Utc>) -> Option<PromptRecord> {
        self.finish_active(session_id, at, PromptStatus::Completed)
    }

    pub fn active_prompt_id(&self, session_id: &str) -> Option<&str> {
        self.latest
            .get(session_id)
            .filter(|prompt| prompt.is_active())
            .map(|prompt| prompt.prompt_id.as_str())
    }

    pub fn latest(&self, session_id: &str) -> Option<&PromptRecord> {
        self.latest.get(session_id)
    }

    /// Latest prompt of every session, ordered by start time.
    pub fn list(&self) -> Vec<PromptRecord> {
        let mut prompts: Vec<_> = self.latest.values().cloned().collect();
        prompts.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        prompts
    }

    pub fn clear(&mut self) {
        self.latest.clear();
    }

    fn finish_active(
        &mut self,
        session_id: &str,
        at: DateTime<Utc>,
        status: PromptStatus,
    ) -> Option<PromptRecord> {
        let prompt = self
            .latest
            .get_mut(session_id)
            .filter(|prompt| prompt.is_active())?;
        prompt.status = status;
        prompt.end_time = Some(at);
        prompt.duration = Some(
            at.signed_duration_since(prompt.start_time)
                .num_milliseconds()
                .max(0),
        );
        Some(prompt.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-31T00:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn active_count(tracker: &PromptTracker, session_id: &str) -> usize {
        tracker
            .latest
            .values()
            .filter(|prompt| prompt.session_id == session_id && prompt.is_active())
            .count()
    }

    #[test]
    fn submit_makes_prompt_active() {
        let mut tracker = PromptTracker::new();
        let started = tracker.submit("s1", "Fix the build", base_time());

        assert!(started.interrupted.is_none());
        assert_eq!(started.prompt.status, PromptStatus::Active);
        assert_eq!(
            tracker.active_prompt_id("s1"),
            Some(started.prompt.prompt_id.as_str())
        );
    }

    #[test]
    fn second_submit_interrupts_first() {
        let mut tracker = PromptTracker::new();
        let first = tracker.submit("s1", "First", base_time());
        let second = tracker.submit("s1", "Second", base_time() + Duration::seconds(4));

        let interrupted = second.interrupted.expect("interrupted prompt");
        assert_eq!(interrupted.prompt_id, first.prompt.prompt_id);
        assert_eq!(interrupted.status, PromptStatus::Interrupted);
        assert_eq!(interrupted.duration, Some(4_000));
        assert_eq!(
            tracker.active_prompt_id("s1"),
            Some(second.prompt.prompt_id.as_str())
        );
        assert_eq!(active_count(&tracker, "s1"), 1);
    }

    #[test]
    fn stop_completes_active_prompt() {
        let mut tracker = PromptTracker::new();
        tracker.submit("s1", "Task", base_time());
        let completed = tracker
            .complete_active("s1", base_time() + Duration::seconds(9))
            .expect("completed");

        assert_eq!(completed.status, PromptStatus::Completed);
        assert_eq!(completed.end_time, Some(base_time() + Duration::seconds(9)));
        assert_eq!(completed.duration, Some(9_000));
        assert!(tracker.active_prompt_id("s1").is_none());
    }

    #[test]
    fn stop_without_active_prompt_is_noop() {
        let mut tracker = PromptTracker::new();
        assert!(tracker.complete_active("s1", base_time()).is_none());

        tracker.submit("s1", "Task", base_time());
        tracker.complete_active("s1", base_time());
        assert!(tracker.complete_active("s1", base_time()).is_none());
        assert_eq!(
            tracker.latest("s1").map(|prompt| prompt.status),
            Some(PromptStatus::Completed)
        );
    }

    #[test]
    fn sessions_are_independent() {
        let mut tracker = PromptTracker::new();
        let a = tracker.submit("a", "A", base_time());
        let b = tracker.submit("b", "B", base_time());

        assert!(b.interrupted.is_none());
        tracker.complete_active("b", base_time());
        assert_eq!(tracker.active_prompt_id("a"), Some(a.prompt.prompt_id.as_str()));
        assert!(tracker.active_prompt_id("b").is_none());
    }

    #[test]
    fn at_most_one_active_prompt_under_any_sequence() {
        let mut tracker = PromptTracker::new();
        let steps = [true, true, false, true, false, false, true, true, true, false];
        for (i, submit) in steps.iter().enumerate() {
            let at = base_time() + Duration::seconds(i as i64);
            if *submit {
                tracker.submit("s1", "prompt", at);
            } else {
                tracker.complete_active("s1", at);
            }
            assert!(active_count(&tracker, "s1") <= 1);
        }
    }
}
