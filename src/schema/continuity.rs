use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structured state inferred from one scene's prose.
///
/// Per-character attributes are keyed by character name so that a later
/// scene's note replaces an earlier one for the same character only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuitySummary {
    /// Character → how they are travelling ("driving the red pickup").
    pub transportation: BTreeMap<String, String>,
    pub location: Option<String>,
    pub destination: Option<String>,
    /// Character → items they carry.
    pub possessions: BTreeMap<String, Vec<String>>,
    pub physical_states: BTreeMap<String, String>,
    pub emotional_states: BTreeMap<String, String>,
    pub unresolved_threads: Vec<String>,
    /// Threads this scene closes; they are dropped from accumulated notes.
    pub resolved_threads: Vec<String>,
    pub time_of_day: Option<String>,
}

impl ContinuitySummary {
    pub fn is_empty(&self) -> bool {
        self == &ContinuitySummary::default()
    }

    /// Fold a later scene's summary into this accumulated one.
    ///
    /// Later values win per attribute and per character. Threads keep their
    /// first-seen order; resolved threads are removed.
    pub fn merge(&mut self, later: &ContinuitySummary) {
        for (who, how) in &later.transportation {
            self.transportation.insert(who.clone(), how.clone());
        }
        if later.location.is_some() {
            self.location = later.location.clone();
        }
        if later.destination.is_some() {
            self.destination = later.destination.clone();
        }
        for (who, items) in &later.possessions {
            self.possessions.insert(who.clone(), items.clone());
        }
        for (who, state) in &later.physical_states {
            self.physical_states.insert(who.clone(), state.clone());
        }
        for (who, state) in &later.emotional_states {
            self.emotional_states.insert(who.clone(), state.clone());
        }
        for thread in &later.unresolved_threads {
            if !self.unresolved_threads.iter().any(|t| same_thread(t, thread)) {
                self.unresolved_threads.push(thread.clone());
            }
        }
        self.unresolved_threads
            .retain(|t| !later.resolved_threads.iter().any(|r| same_thread(t, r)));
        if later.time_of_day.is_some() {
            self.time_of_day = later.time_of_day.clone();
        }
    }

    /// Render as bullet notes for a generation prompt.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        if let Some(location) = &self.location {
            lines.push(format!("- Current location: {}", location));
        }
        if let Some(destination) = &self.destination {
            lines.push(format!("- Heading to: {}", destination));
        }
        if let Some(time) = &self.time_of_day {
            lines.push(format!("- Time of day: {}", time));
        }
        for (who, how) in &self.transportation {
            lines.push(format!("- {} transportation: {}", who, how));
        }
        for (who, items) in &self.possessions {
            if !items.is_empty() {
                lines.push(format!("- {} carries: {}", who, items.join(", ")));
            }
        }
        for (who, state) in &self.physical_states {
            lines.push(format!("- {} physically: {}", who, state));
        }
        for (who, state) in &self.emotional_states {
            lines.push(format!("- {} emotionally: {}", who, state));
        }
        for thread in &self.unresolved_threads {
            lines.push(format!("- Unresolved: {}", thread));
        }
        lines.join("\n")
    }
}

fn same_thread(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
