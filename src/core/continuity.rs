/// Continuity extractor: per-scene state notes derived once from prose,
/// cached, and folded together for the scenes that follow.
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::memo::MemoStore;
use crate::core::retry::RetryPolicy;
use crate::schema::continuity::ContinuitySummary;
use crate::schema::scene::SceneRecord;

/// Failure reported by an external generation or analysis collaborator.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("collaborator request failed: {0}")]
    Failed(String),
}

/// The external text model that reads a scene and reports its state.
///
/// Implementations are expected to be stateless; the extractor supplies
/// the full instruction in `prompt` and expects JSON back.
#[async_trait]
pub trait ContinuityAnalyst: Send + Sync {
    async fn analyze(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

/// Analyst used when none is configured: only persisted notes are available.
///
/// Its error is permanent so the retry policy gives up at once.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineAnalyst;

#[async_trait]
impl ContinuityAnalyst for OfflineAnalyst {
    async fn analyze(&self, _prompt: &str) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Failed(
            "no continuity analyst configured".to_string(),
        ))
    }
}

/// Outcome of extracting continuity for one scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuityEntry {
    Available(ContinuitySummary),
    /// Nothing trustworthy could be derived; never cached.
    Unavailable { reason: String },
}

impl ContinuityEntry {
    pub fn summary(&self) -> Option<&ContinuitySummary> {
        match self {
            Self::Available(summary) => Some(summary),
            Self::Unavailable { .. } => None,
        }
    }
}

/// Continuity accumulated over every scene before a given one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulatedContinuity {
    pub summary: ContinuitySummary,
    /// Scenes whose notes were merged, ascending.
    pub contributing: Vec<u32>,
    /// Scenes that could not contribute, ascending.
    pub unavailable: Vec<u32>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("analysis response is empty")]
    Empty,
    #[error("analysis response is not a JSON object: {0}")]
    Json(#[from] serde_json::Error),
}

/// Build the analysis instruction for one scene.
pub fn analysis_prompt(scene_number: u32, scene_text: &str) -> String {
    format!(
        r#"You are tracking continuity for an illustrated story. Read scene {scene_number} and report the state of the story at the END of the scene.

Return ONLY a JSON object with these optional fields, no markdown or commentary:
{{
  "transportation": {{"<character>": "<how they are travelling or which vehicle they have>"}},
  "location": "<where the scene ends>",
  "destination": "<where characters are heading, if stated>",
  "possessions": {{"<character>": ["<item>", "..."]}},
  "physical_states": {{"<character>": "<injuries, fatigue, clothing changes>"}},
  "emotional_states": {{"<character>": "<emotional state>"}},
  "unresolved_threads": ["<open question or pending plot point>"],
  "resolved_threads": ["<earlier open thread this scene resolves>"],
  "time_of_day": "<time of day at the end of the scene>"
}}

Only include facts stated or clearly implied by the scene text. Omit anything uncertain.

Scene text:
{scene_text}
"#
    )
}

/// Parse a collaborator response into a summary.
///
/// Tolerates markdown code fences and text around the JSON object.
pub fn parse_summary(raw: &str) -> Result<ContinuitySummary, ParseError> {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    let body = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    };
    Ok(serde_json::from_str(body)?)
}

/// Derives and caches per-scene continuity through an external analyst.
pub struct ContinuityExtractor {
    analyst: Arc<dyn ContinuityAnalyst>,
    store: Box<dyn MemoStore<ContinuitySummary>>,
    cache: BTreeMap<u32, ContinuitySummary>,
    retry: RetryPolicy,
}

impl ContinuityExtractor {
    pub fn new(
        analyst: Arc<dyn ContinuityAnalyst>,
        store: Box<dyn MemoStore<ContinuitySummary>>,
    ) -> Self {
        Self {
            analyst,
            store,
            cache: BTreeMap::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Backoff applied to rate-limited or unavailable analyst calls.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// A summary already derived in this run or persisted by an earlier one.
    pub fn cached(&mut self, scene_number: u32) -> Option<&ContinuitySummary> {
        if !self.cache.contains_key(&scene_number) {
            let stored = self.store.load(scene_number)?;
            self.cache.insert(scene_number, stored);
        }
        self.cache.get(&scene_number)
    }

    /// Continuity notes for a single scene, derived at most once.
    ///
    /// A cache hit makes no collaborator call. Transient failures are
    /// retried per the retry policy; what still fails is logged and
    /// reported as `Unavailable` without being cached, so a later call
    /// tries again.
    #[instrument(skip(self, scene), fields(scene = scene.number))]
    pub async fn continuity_through(&mut self, scene: &SceneRecord) -> ContinuityEntry {
        if let Some(summary) = self.cached(scene.number) {
            debug!("Continuity cache hit");
            return ContinuityEntry::Available(summary.clone());
        }

        let text = match scene.generated_text.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                return ContinuityEntry::Unavailable {
                    reason: "scene has no generated text".to_string(),
                }
            }
        };

        let prompt = analysis_prompt(scene.number, text);
        let analyst = Arc::clone(&self.analyst);
        let raw = match self.retry.run(|| analyst.analyze(&prompt)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Continuity analysis failed");
                return ContinuityEntry::Unavailable {
                    reason: e.to_string(),
                };
            }
        };

        let summary = match parse_summary(&raw) {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Malformed continuity analysis");
                return ContinuityEntry::Unavailable {
                    reason: e.to_string(),
                };
            }
        };

        if let Err(e) = self.store.store(scene.number, &summary) {
            warn!(error = %e, "Could not persist continuity notes, keeping them in memory");
        }
        info!("Continuity notes derived");
        self.cache.insert(scene.number, summary.clone());
        ContinuityEntry::Available(summary)
    }

    /// Merge the notes of every scene numbered below `before`, in order.
    ///
    /// Each scene's extraction completes before the next one starts.
    pub async fn accumulated(
        &mut self,
        scenes: &[SceneRecord],
        before: u32,
    ) -> AccumulatedContinuity {
        let mut ordered: Vec<&SceneRecord> =
            scenes.iter().filter(|scene| scene.number < before).collect();
        ordered.sort_by_key(|scene| scene.number);

        let mut acc = AccumulatedContinuity::default();
        for scene in ordered {
            match self.continuity_through(scene).await {
                ContinuityEntry::Available(summary) => {
                    acc.summary.merge(&summary);
                    acc.contributing.push(scene.number);
                }
                ContinuityEntry::Unavailable { reason } => {
                    debug!(scene = scene.number, %reason, "Scene skipped in accumulated continuity");
                    acc.unavailable.push(scene.number);
                }
            }
        }
        acc
    }
}
