/// The story engine: scene-by-scene context for text and image generation.
///
/// Wires together the entity registry, era filter, introduction tracker,
/// continuity extractor and reference registries for one story.
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::config::{ConfigError, EngineConfig};
use crate::core::continuity::{
    AccumulatedContinuity, ContinuityAnalyst, ContinuityEntry, ContinuityExtractor,
    OfflineAnalyst,
};
use crate::core::era::{EraFilter, SceneEras};
use crate::core::introduction::IntroductionTracker;
use crate::core::memo::{InMemoryStore, JsonDirStore, MemoStore, StoreError};
use crate::core::naming::scene_id;
use crate::core::references::{
    is_canonical_id, ReferenceRegistry, SettingReferenceRegistry, View,
};
use crate::core::registry::{DefinitionError, EntityRegistry};
use crate::core::storyboard::{divide_into_storyboards, Storyboard};
use crate::schema::continuity::ContinuitySummary;
use crate::schema::entity::{Entity, EntityKind, Era};
use crate::schema::scene::{Outline, OutlineError, SceneRecord};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),
    #[error("outline error: {0}")]
    Outline(#[from] OutlineError),
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no {0} provided to the engine builder")]
    MissingInput(&'static str),
    #[error("scene {0} is not in the outline")]
    SceneNotFound(u32),
    #[error("scene {0} has no generated text")]
    NoSceneText(u32),
}

/// Everything the text generator needs to know before drafting a scene.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneContext {
    pub scene_number: u32,
    pub purpose: String,
    /// Settings the purpose mentions.
    pub settings: Vec<String>,
    pub eras: BTreeSet<Era>,
    /// Era-compatible characters, by key.
    pub characters: Vec<String>,
    /// Era-compatible extras already introduced, by key.
    pub extras: Vec<String>,
    /// Notes accumulated over every earlier scene.
    pub continuity: ContinuitySummary,
    /// Earlier scenes whose notes could not be derived.
    pub unavailable_scenes: Vec<u32>,
}

/// Prior imagery for one entity mentioned in a scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReferences {
    pub kind: EntityKind,
    pub key: String,
    /// Set for settings only.
    pub view: Option<View>,
    pub references: Vec<String>,
    /// No canonical exists yet, so one should be generated first.
    pub needs_canonical: bool,
}

/// Reference imagery for the entities a scene's text mentions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualContext {
    pub scene_number: u32,
    pub entities: Vec<EntityReferences>,
}

impl VisualContext {
    pub fn for_kind(&self, kind: EntityKind) -> impl Iterator<Item = &EntityReferences> {
        self.entities.iter().filter(move |e| e.kind == kind)
    }

    pub fn get(&self, key: &str) -> Option<&EntityReferences> {
        self.entities.iter().find(|e| e.key == key)
    }
}

/// The top-level engine for one story. Built via `StoryEngine::builder()`.
pub struct StoryEngine {
    registry: Arc<EntityRegistry>,
    scenes: Vec<SceneRecord>,
    config: EngineConfig,
    state_dir: Option<PathBuf>,
    era_filter: EraFilter,
    introductions: IntroductionTracker,
    continuity: ContinuityExtractor,
    character_refs: Arc<ReferenceRegistry>,
    extra_refs: Arc<ReferenceRegistry>,
    setting_refs: Arc<SettingReferenceRegistry>,
}

/// Builder for constructing a `StoryEngine`.
#[derive(Default)]
pub struct StoryEngineBuilder {
    definitions_path: Option<PathBuf>,
    outline_path: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    scene_dir: Option<PathBuf>,
    config: Option<EngineConfig>,
    analyst: Option<Arc<dyn ContinuityAnalyst>>,
    /// Directly provided registry (for testing without files).
    registry: Option<EntityRegistry>,
    /// Directly provided outline (for testing without files).
    outline: Option<Outline>,
}

impl StoryEngine {
    pub fn builder() -> StoryEngineBuilder {
        StoryEngineBuilder::default()
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// All scenes in ascending order.
    pub fn scenes(&self) -> &[SceneRecord] {
        &self.scenes
    }

    pub fn scene(&self, number: u32) -> Option<&SceneRecord> {
        self.scenes
            .binary_search_by_key(&number, |s| s.number)
            .ok()
            .map(|i| &self.scenes[i])
    }

    pub fn character_references(&self) -> Arc<ReferenceRegistry> {
        Arc::clone(&self.character_refs)
    }

    pub fn extra_references(&self) -> Arc<ReferenceRegistry> {
        Arc::clone(&self.extra_refs)
    }

    pub fn setting_references(&self) -> Arc<SettingReferenceRegistry> {
        Arc::clone(&self.setting_refs)
    }

    pub fn introductions(&self) -> &IntroductionTracker {
        &self.introductions
    }

    /// Record the generated text of a scene.
    pub fn commit_scene_text(&mut self, number: u32, text: impl Into<String>) -> Result<(), EngineError> {
        let index = self
            .scenes
            .binary_search_by_key(&number, |s| s.number)
            .map_err(|_| EngineError::SceneNotFound(number))?;
        self.scenes[index].generated_text = Some(text.into());
        debug!(scene = number, "Scene text committed");
        Ok(())
    }

    /// Commit every `scene-NNNN.md` in `dir` that belongs to the outline.
    /// Returns the number of scenes loaded.
    pub fn load_scene_texts(&mut self, dir: &Path) -> Result<usize, EngineError> {
        let mut loaded = 0;
        let numbers: Vec<u32> = self.scenes.iter().map(|s| s.number).collect();
        for number in numbers {
            let path = dir.join(format!("{}.md", scene_id(number)));
            if path.exists() {
                let text = std::fs::read_to_string(&path)?;
                self.commit_scene_text(number, text)?;
                loaded += 1;
            }
        }
        info!(dir = %dir.display(), loaded, "Loaded scene texts");
        Ok(loaded)
    }

    /// Up to `recent_scene_window` earlier scenes that already have text,
    /// oldest first.
    pub fn previous_scenes(&self, number: u32) -> Vec<&SceneRecord> {
        let mut previous: Vec<&SceneRecord> = self
            .scenes
            .iter()
            .filter(|s| s.number < number && s.generated_text.is_some())
            .collect();
        let skip = previous.len().saturating_sub(self.config.recent_scene_window);
        previous.drain(..skip);
        previous
    }

    fn eligible_keys(&mut self, number: u32, eras: &SceneEras) -> (Vec<String>, Vec<String>) {
        let characters = self
            .era_filter
            .eligible(&self.registry, EntityKind::Character, eras)
            .into_iter()
            .map(|e| e.key.clone())
            .collect();
        let introduced = self
            .introductions
            .introduced_as_of(&self.registry, &self.scenes, number);
        let extras = self
            .era_filter
            .eligible(&self.registry, EntityKind::Extra, eras)
            .into_iter()
            .filter(|e| introduced.contains(&e.key))
            .map(|e| e.key.clone())
            .collect();
        (characters, extras)
    }

    /// Continuity notes derived from one scene's own text.
    pub async fn continuity_through(&mut self, number: u32) -> Result<ContinuityEntry, EngineError> {
        let scene = self.scene(number).cloned().ok_or(EngineError::SceneNotFound(number))?;
        Ok(self.continuity.continuity_through(&scene).await)
    }

    /// Notes accumulated over every scene before `number`.
    pub async fn accumulated_continuity(&mut self, number: u32) -> AccumulatedContinuity {
        self.continuity.accumulated(&self.scenes, number).await
    }

    /// Assemble the drafting context for a scene.
    #[instrument(skip(self))]
    pub async fn scene_context(&mut self, number: u32) -> Result<SceneContext, EngineError> {
        let purpose = self
            .scene(number)
            .map(|s| s.purpose.clone())
            .ok_or(EngineError::SceneNotFound(number))?;

        let eras = SceneEras::detect(&self.registry, &purpose);
        if eras.is_unrecognized() {
            debug!(fallback = ?self.config.unrecognized_setting, "No known setting in scene purpose");
        }
        let (characters, extras) = self.eligible_keys(number, &eras);
        let accumulated = self.accumulated_continuity(number).await;

        info!(
            characters = characters.len(),
            extras = extras.len(),
            unavailable = accumulated.unavailable.len(),
            "Scene context assembled"
        );
        Ok(SceneContext {
            scene_number: number,
            purpose,
            settings: eras.settings,
            eras: eras.eras,
            characters,
            extras,
            continuity: accumulated.summary,
            unavailable_scenes: accumulated.unavailable,
        })
    }

    /// Eligible entities of `kind` that `text` mentions.
    fn mentioned<'r>(
        registry: &'r EntityRegistry,
        kind: EntityKind,
        text: &str,
        eligible: &BTreeSet<String>,
    ) -> Vec<&'r Entity> {
        registry
            .mentions(kind, text)
            .into_iter()
            .filter(|e| kind == EntityKind::Setting || eligible.contains(&e.key))
            .collect()
    }

    fn scene_mentions(&mut self, number: u32, text: &str) -> Result<BTreeMap<EntityKind, Vec<String>>, EngineError> {
        let purpose = self
            .scene(number)
            .map(|s| s.purpose.clone())
            .ok_or(EngineError::SceneNotFound(number))?;
        let eras = SceneEras::detect(&self.registry, &purpose);
        let (characters, extras) = self.eligible_keys(number, &eras);
        let eligible: BTreeSet<String> = characters.into_iter().chain(extras).collect();

        let mut mentions = BTreeMap::new();
        for kind in [EntityKind::Character, EntityKind::Extra, EntityKind::Setting] {
            let keys = Self::mentioned(&self.registry, kind, text, &eligible)
                .into_iter()
                .map(|e| e.key.clone())
                .collect();
            mentions.insert(kind, keys);
        }
        Ok(mentions)
    }

    /// Reference imagery for every eligible entity `text` mentions.
    #[instrument(skip(self, text))]
    pub fn visual_context(&mut self, number: u32, text: &str) -> Result<VisualContext, EngineError> {
        let limit = self.config.reference_limit;
        let mut entities = Vec::new();
        for (kind, keys) in self.scene_mentions(number, text)? {
            for key in keys {
                match kind {
                    EntityKind::Setting => {
                        for view in View::ALL {
                            entities.push(EntityReferences {
                                kind,
                                references: self.setting_refs.references_for(&key, view, limit),
                                needs_canonical: self.setting_refs.ensure_canonical(&key, view),
                                view: Some(view),
                                key: key.clone(),
                            });
                        }
                    }
                    _ => {
                        let refs = self.references(kind);
                        entities.push(EntityReferences {
                            kind,
                            references: refs.references_for(&key, limit),
                            needs_canonical: refs.ensure_canonical(&key),
                            view: None,
                            key,
                        });
                    }
                }
            }
        }
        Ok(VisualContext {
            scene_number: number,
            entities,
        })
    }

    fn references(&self, kind: EntityKind) -> &ReferenceRegistry {
        match kind {
            EntityKind::Extra => &self.extra_refs,
            _ => &self.character_refs,
        }
    }

    /// Record one generated image against an entity.
    ///
    /// `view` is required for settings and ignored otherwise. A setting
    /// recorded without one is refused with a warning.
    pub fn record_reference(
        &self,
        kind: EntityKind,
        key: &str,
        view: Option<View>,
        image_id: &str,
        canonical: bool,
    ) -> bool {
        match (kind, view) {
            (EntityKind::Setting, Some(view)) => {
                self.setting_refs.record_appearance(key, view, image_id, canonical)
            }
            (EntityKind::Setting, None) => {
                warn!(entity = key, image = image_id, "Setting reference needs a view, not recorded");
                false
            }
            (EntityKind::Style, _) => {
                warn!(image = image_id, "Style has no reference list, not recorded");
                false
            }
            _ => self.references(kind).record_appearance(key, image_id, canonical),
        }
    }

    /// Tag a scene's generated images with the entities its text mentions.
    ///
    /// Images whose file name carries the canonical prefix are recorded as
    /// canonical. Settings are tagged only when `view` is given. Returns the
    /// number of new recordings.
    #[instrument(skip(self, images), fields(images = images.len()))]
    pub fn tag_scene_images(
        &mut self,
        number: u32,
        images: &[String],
        view: Option<View>,
    ) -> Result<usize, EngineError> {
        let text = self
            .scene(number)
            .ok_or(EngineError::SceneNotFound(number))?
            .generated_text
            .clone()
            .ok_or(EngineError::NoSceneText(number))?;
        let mentions = self.scene_mentions(number, &text)?;

        let mut recorded = 0;
        for image in images {
            let canonical = is_canonical_id(image, &self.config.canonical_prefix);
            for (kind, keys) in &mentions {
                if *kind == EntityKind::Setting && view.is_none() {
                    continue;
                }
                for key in keys {
                    if self.record_reference(*kind, key, view, image, canonical) {
                        recorded += 1;
                    }
                }
            }
        }
        info!(recorded, "Scene images tagged");
        Ok(recorded)
    }

    /// Storyboards for a scene's generated text.
    pub fn storyboards(&self, number: u32) -> Result<Vec<Storyboard>, EngineError> {
        let text = self
            .scene(number)
            .ok_or(EngineError::SceneNotFound(number))?
            .generated_text
            .as_deref()
            .ok_or(EngineError::NoSceneText(number))?;
        Ok(divide_into_storyboards(
            text,
            self.config.min_storyboards,
            self.config.max_storyboards,
        ))
    }

    /// Persist introductions and references under the state directory.
    /// Continuity notes are persisted as they are derived.
    pub fn save(&self) -> Result<(), EngineError> {
        let Some(dir) = &self.state_dir else {
            debug!("No state directory, nothing to save");
            return Ok(());
        };
        self.introductions
            .save(&dir.join(&self.config.introductions_file))?;
        self.character_refs
            .save(&dir.join(&self.config.character_references_file))?;
        self.extra_refs
            .save(&dir.join(&self.config.extra_references_file))?;
        self.setting_refs
            .save(&dir.join(&self.config.setting_references_file))?;
        info!(dir = %dir.display(), "Story state saved");
        Ok(())
    }
}

impl StoryEngineBuilder {
    pub fn definitions(mut self, path: impl Into<PathBuf>) -> Self {
        self.definitions_path = Some(path.into());
        self
    }

    pub fn outline(mut self, path: impl Into<PathBuf>) -> Self {
        self.outline_path = Some(path.into());
        self
    }

    /// Directory holding reference files, introductions and continuity notes.
    pub fn state_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(path.into());
        self
    }

    /// Directory of `scene-NNNN.md` texts committed at build time.
    pub fn scene_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.scene_dir = Some(path.into());
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn analyst(mut self, analyst: Arc<dyn ContinuityAnalyst>) -> Self {
        self.analyst = Some(analyst);
        self
    }

    /// Provide the registry directly (for testing without files).
    pub fn with_registry(mut self, registry: EntityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Provide the outline directly (for testing without files).
    pub fn with_outline(mut self, outline: Outline) -> Self {
        self.outline = Some(outline);
        self
    }

    pub fn build(self) -> Result<StoryEngine, EngineError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let registry = match (self.registry, &self.definitions_path) {
            (Some(registry), _) => registry,
            (None, Some(path)) => EntityRegistry::load_from_json(path)?,
            (None, None) => return Err(EngineError::MissingInput("definitions")),
        };
        let outline = match (self.outline, &self.outline_path) {
            (Some(outline), _) => outline,
            (None, Some(path)) => Outline::load_from_json(path)?,
            (None, None) => return Err(EngineError::MissingInput("outline")),
        };

        let prefix = config.canonical_prefix.as_str();
        let image_root = config.image_root.as_deref();
        let store: Box<dyn MemoStore<ContinuitySummary>> = match &self.state_dir {
            Some(dir) => Box::new(JsonDirStore::<ContinuitySummary>::new(
                dir.join(&config.continuity_dir),
            )),
            None => Box::new(InMemoryStore::<ContinuitySummary>::new()),
        };
        let (introductions, character_refs, extra_refs, setting_refs) = match &self.state_dir {
            Some(dir) => (
                IntroductionTracker::load(&dir.join(&config.introductions_file)),
                ReferenceRegistry::load(&dir.join(&config.character_references_file), prefix, image_root),
                ReferenceRegistry::load(&dir.join(&config.extra_references_file), prefix, image_root),
                SettingReferenceRegistry::load(&dir.join(&config.setting_references_file), prefix, image_root),
            ),
            None => (
                IntroductionTracker::new(),
                ReferenceRegistry::new(prefix),
                ReferenceRegistry::new(prefix),
                SettingReferenceRegistry::new(prefix),
            ),
        };

        let analyst: Arc<dyn ContinuityAnalyst> = match self.analyst {
            Some(analyst) => analyst,
            None => Arc::new(OfflineAnalyst),
        };
        let continuity =
            ContinuityExtractor::new(analyst, store).with_retry(config.retry.clone());

        let mut engine = StoryEngine {
            registry: Arc::new(registry),
            scenes: outline.scene_records(),
            era_filter: EraFilter::new(config.unrecognized_setting),
            config,
            state_dir: self.state_dir,
            introductions,
            continuity,
            character_refs: Arc::new(character_refs),
            extra_refs: Arc::new(extra_refs),
            setting_refs: Arc::new(setting_refs),
        };

        if let Some(dir) = &self.scene_dir {
            engine.load_scene_texts(dir)?;
        }
        Ok(engine)
    }
}
