/// Reference registry: prior imagery per entity, canonical image first.
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::core::memo::{read_json_or_absent, write_json_atomic, StoreError};

/// Default file-name prefix that marks a canonical reference image.
pub const DEFAULT_CANONICAL_PREFIX: &str = "ref-";

/// Images recorded for one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceEntry {
    pub canonical: Option<String>,
    /// Non-canonical appearances in the order they were recorded.
    pub appearances: Vec<String>,
}

impl ReferenceEntry {
    pub fn contains(&self, image_id: &str) -> bool {
        self.canonical.as_deref() == Some(image_id)
            || self.appearances.iter().any(|id| id == image_id)
    }

    /// Canonical first, then the newest appearances, at most `limit` ids.
    pub fn select(&self, limit: usize) -> Vec<String> {
        self.canonical
            .iter()
            .chain(self.appearances.iter().rev())
            .take(limit)
            .cloned()
            .collect()
    }

    /// Persisted form: canonical first, then appearances oldest first.
    fn to_list(&self) -> Vec<String> {
        self.canonical
            .iter()
            .chain(self.appearances.iter())
            .cloned()
            .collect()
    }

    fn from_list(ids: Vec<String>, canonical_prefix: &str) -> Self {
        let mut ids = ids.into_iter();
        let mut entry = ReferenceEntry::default();
        let Some(first) = ids.next() else {
            return entry;
        };
        if is_canonical_id(&first, canonical_prefix) {
            entry.canonical = Some(first);
        } else {
            entry.appearances.push(first);
        }
        for id in ids {
            if !entry.contains(&id) {
                entry.appearances.push(id);
            }
        }
        entry
    }
}

/// True if the file-name part of `image_id` carries the canonical prefix.
pub fn is_canonical_id(image_id: &str, canonical_prefix: &str) -> bool {
    let file_name = image_id.rsplit(['/', '\\']).next().unwrap_or(image_id);
    !canonical_prefix.is_empty() && file_name.starts_with(canonical_prefix)
}

/// Per-entity image references, shared across concurrent panel tasks.
///
/// Writes to one key are serialized by the map's shard lock; writes to
/// different keys proceed independently.
#[derive(Debug)]
pub struct ReferenceRegistry {
    entries: DashMap<String, ReferenceEntry>,
    canonical_prefix: String,
}

impl Default for ReferenceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CANONICAL_PREFIX)
    }
}

impl ReferenceRegistry {
    pub fn new(canonical_prefix: impl Into<String>) -> Self {
        Self {
            entries: DashMap::new(),
            canonical_prefix: canonical_prefix.into(),
        }
    }

    pub fn canonical_prefix(&self) -> &str {
        &self.canonical_prefix
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, key: &str) -> Option<ReferenceEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Up to `limit` image ids for prompting; the canonical always leads.
    pub fn references_for(&self, key: &str, limit: usize) -> Vec<String> {
        self.entries
            .get(key)
            .map(|entry| entry.select(limit))
            .unwrap_or_default()
    }

    /// True when the entity still needs a canonical reference generated.
    pub fn ensure_canonical(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map_or(true, |entry| entry.canonical.is_none())
    }

    /// Record an image for an entity. Returns false if nothing changed.
    ///
    /// A new canonical takes the head; the one it replaces stays on as an
    /// ordinary appearance. Canonical ids must carry the canonical prefix,
    /// which is how they are recognized again on load; others are refused.
    pub fn record_appearance(&self, key: &str, image_id: &str, canonical: bool) -> bool {
        if canonical && !is_canonical_id(image_id, &self.canonical_prefix) {
            warn!(
                entity = key,
                image = image_id,
                prefix = %self.canonical_prefix,
                "Refusing canonical reference without the canonical prefix"
            );
            return false;
        }
        let mut entry = self.entries.entry(key.to_string()).or_default();
        if canonical {
            if entry.canonical.as_deref() == Some(image_id) {
                return false;
            }
            entry.appearances.retain(|id| id != image_id);
            if let Some(previous) = entry.canonical.replace(image_id.to_string()) {
                debug!(entity = key, %previous, "Canonical reference replaced");
                entry.appearances.push(previous);
            }
        } else {
            if entry.contains(image_id) {
                return false;
            }
            entry.appearances.push(image_id.to_string());
        }
        true
    }

    fn from_lists(lists: BTreeMap<String, Vec<String>>, canonical_prefix: &str, image_root: Option<&Path>) -> Self {
        let registry = Self::new(canonical_prefix);
        for (key, ids) in lists {
            let ids = retain_existing(&key, ids, image_root);
            registry
                .entries
                .insert(key, ReferenceEntry::from_list(ids, canonical_prefix));
        }
        registry
    }

    fn to_lists(&self) -> BTreeMap<String, Vec<String>> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().to_list()))
            .collect()
    }

    /// Load `name → [ids]`. Missing or malformed files give an empty registry.
    ///
    /// With `image_root`, ids whose file no longer exists under it are skipped.
    pub fn load(path: &Path, canonical_prefix: &str, image_root: Option<&Path>) -> Self {
        let lists: BTreeMap<String, Vec<String>> = read_json_or_absent(path).unwrap_or_default();
        let registry = Self::from_lists(lists, canonical_prefix, image_root);
        info!(path = %path.display(), entities = registry.len(), "Loaded references");
        registry
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_json_atomic(path, &self.to_lists())
    }
}

fn retain_existing(key: &str, ids: Vec<String>, image_root: Option<&Path>) -> Vec<String> {
    let Some(root) = image_root else {
        return ids;
    };
    ids.into_iter()
        .filter(|id| {
            let exists = root.join(id).exists();
            if !exists {
                debug!(entity = key, image = %id, "Skipping missing reference image");
            }
            exists
        })
        .collect()
}

/// Which of a setting's two reference lists an image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Indoor,
    Outdoor,
}

impl View {
    pub const ALL: [View; 2] = [View::Indoor, View::Outdoor];
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            View::Indoor => write!(f, "indoor"),
            View::Outdoor => write!(f, "outdoor"),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct SettingLists {
    indoor: Vec<String>,
    outdoor: Vec<String>,
}

/// Settings keep unrelated indoor and outdoor imagery apart.
#[derive(Debug, Default)]
pub struct SettingReferenceRegistry {
    indoor: ReferenceRegistry,
    outdoor: ReferenceRegistry,
}

impl SettingReferenceRegistry {
    pub fn new(canonical_prefix: &str) -> Self {
        Self {
            indoor: ReferenceRegistry::new(canonical_prefix),
            outdoor: ReferenceRegistry::new(canonical_prefix),
        }
    }

    pub fn view(&self, view: View) -> &ReferenceRegistry {
        match view {
            View::Indoor => &self.indoor,
            View::Outdoor => &self.outdoor,
        }
    }

    pub fn references_for(&self, key: &str, view: View, limit: usize) -> Vec<String> {
        self.view(view).references_for(key, limit)
    }

    pub fn ensure_canonical(&self, key: &str, view: View) -> bool {
        self.view(view).ensure_canonical(key)
    }

    pub fn record_appearance(&self, key: &str, view: View, image_id: &str, canonical: bool) -> bool {
        self.view(view).record_appearance(key, image_id, canonical)
    }

    /// Load `name → {indoor, outdoor}`; missing or malformed files give an empty registry.
    pub fn load(path: &Path, canonical_prefix: &str, image_root: Option<&Path>) -> Self {
        let lists: BTreeMap<String, SettingLists> = read_json_or_absent(path).unwrap_or_default();
        let mut indoor = BTreeMap::new();
        let mut outdoor = BTreeMap::new();
        for (key, views) in lists {
            indoor.insert(key.clone(), views.indoor);
            outdoor.insert(key, views.outdoor);
        }
        let registry = Self {
            indoor: ReferenceRegistry::from_lists(indoor, canonical_prefix, image_root),
            outdoor: ReferenceRegistry::from_lists(outdoor, canonical_prefix, image_root),
        };
        info!(path = %path.display(), "Loaded setting references");
        registry
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let mut lists: BTreeMap<String, SettingLists> = BTreeMap::new();
        for (key, ids) in self.indoor.to_lists() {
            lists.entry(key).or_default().indoor = ids;
        }
        for (key, ids) in self.outdoor.to_lists() {
            lists.entry(key).or_default().outdoor = ids;
        }
        write_json_atomic(path, &lists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;

    #[test]
    fn sarah_needs_canonical_until_recorded() {
        let registry = ReferenceRegistry::default();
        assert!(registry.ensure_canonical("Sarah"));
        registry.record_appearance("Sarah", "scene-0001.png", false);
        assert!(registry.ensure_canonical("Sarah"));
        registry.record_appearance("Sarah", "ref-sarah.png", true);
        assert!(!registry.ensure_canonical("Sarah"));
    }

    #[test]
    fn canonical_leads_then_newest_appearances() {
        let registry = ReferenceRegistry::default();
        registry.record_appearance("Sarah", "scene-0001.png", false);
        registry.record_appearance("Sarah", "scene-0002.png", false);
        registry.record_appearance("Sarah", "ref-sarah.png", true);
        registry.record_appearance("Sarah", "scene-0003.png", false);

        assert_eq!(
            registry.references_for("Sarah", 3),
            vec!["ref-sarah.png", "scene-0003.png", "scene-0002.png"]
        );
        for limit in 1..=5 {
            assert_eq!(registry.references_for("Sarah", limit)[0], "ref-sarah.png");
        }
        assert!(registry.references_for("Sarah", 0).is_empty());
        assert!(registry.references_for("Nobody", 3).is_empty());
    }

    #[test]
    fn replacing_canonical_demotes_the_old_one() {
        let registry = ReferenceRegistry::default();
        registry.record_appearance("Sarah", "ref-sarah.png", true);
        registry.record_appearance("Sarah", "ref-sarah-v2.png", true);
        let entry = registry.entry("Sarah").unwrap();
        assert_eq!(entry.canonical.as_deref(), Some("ref-sarah-v2.png"));
        assert_eq!(entry.appearances, vec!["ref-sarah.png"]);
    }

    #[test]
    fn recording_twice_is_a_no_op() {
        let registry = ReferenceRegistry::default();
        assert!(registry.record_appearance("Truck", "scene-0004.png", false));
        assert!(!registry.record_appearance("Truck", "scene-0004.png", false));
        assert!(registry.record_appearance("Truck", "ref-truck.png", true));
        assert!(!registry.record_appearance("Truck", "ref-truck.png", true));
        assert!(!registry.record_appearance("Truck", "ref-truck.png", false));
        assert_eq!(registry.entry("Truck").unwrap().appearances.len(), 1);
    }

    #[test]
    fn unprefixed_canonical_is_refused() {
        let registry = ReferenceRegistry::default();
        registry.record_appearance("Truck", "scene-0004.png", false);
        assert!(!registry.record_appearance("Truck", "scene-0004.png", true));
        assert!(!registry.record_appearance("Truck", "boards/truck.png", true));
        assert!(registry.ensure_canonical("Truck"));
        assert_eq!(
            registry.entry("Truck").unwrap().appearances,
            vec!["scene-0004.png"]
        );

        let unprefixed = ReferenceRegistry::new("");
        assert!(!unprefixed.record_appearance("Truck", "ref-truck.png", true));
    }

    #[test]
    fn repromoting_a_demoted_canonical_moves_it_to_the_head() {
        let registry = ReferenceRegistry::default();
        registry.record_appearance("Truck", "ref-truck.png", true);
        registry.record_appearance("Truck", "ref-truck-v2.png", true);
        assert!(registry.record_appearance("Truck", "ref-truck.png", true));
        let entry = registry.entry("Truck").unwrap();
        assert_eq!(entry.canonical.as_deref(), Some("ref-truck.png"));
        assert_eq!(entry.appearances, vec!["ref-truck-v2.png"]);
    }

    #[test]
    fn every_canonical_path_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("character_references.json");
        let registry = ReferenceRegistry::default();

        // fresh canonical after appearances
        registry.record_appearance("Sarah", "scene-0001.png", false);
        registry.record_appearance("Sarah", "boards/ref-sarah.png", true);
        // replacement demotes the first canonical
        registry.record_appearance("Galia", "ref-galia.png", true);
        registry.record_appearance("Galia", "scene-0002.png", false);
        registry.record_appearance("Galia", "ref-galia-v2.png", true);
        // demoted canonical promoted back
        registry.record_appearance("Eleazar", "ref-eleazar.png", true);
        registry.record_appearance("Eleazar", "ref-eleazar-v2.png", true);
        registry.record_appearance("Eleazar", "ref-eleazar.png", true);
        // refused promotion of an unprefixed appearance
        registry.record_appearance("Truck", "scene-0004.png", false);
        registry.record_appearance("Truck", "scene-0004.png", true);

        registry.save(&path).unwrap();
        let loaded = ReferenceRegistry::load(&path, DEFAULT_CANONICAL_PREFIX, None);
        for key in ["Sarah", "Galia", "Eleazar", "Truck"] {
            assert_eq!(loaded.entry(key), registry.entry(key), "{}", key);
            assert_eq!(loaded.ensure_canonical(key), registry.ensure_canonical(key), "{}", key);
        }
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let registry = Arc::new(ReferenceRegistry::default());
        std::thread::scope(|scope| {
            for worker in 0..8 {
                let registry = Arc::clone(&registry);
                scope.spawn(move || {
                    for i in 0..25 {
                        let id = format!("scene-{:04}-{}.png", i + 1, worker);
                        registry.record_appearance("Sarah", &id, false);
                    }
                    if worker == 0 {
                        registry.record_appearance("Sarah", "ref-sarah.png", true);
                    }
                });
            }
        });
        let entry = registry.entry("Sarah").unwrap();
        assert_eq!(entry.appearances.len(), 200);
        assert_eq!(entry.canonical.as_deref(), Some("ref-sarah.png"));
    }

    #[test]
    fn save_and_load_keep_canonical_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("character_references.json");
        let registry = ReferenceRegistry::default();
        registry.record_appearance("Sarah", "scene-0001.png", false);
        registry.record_appearance("Sarah", "ref-sarah.png", true);
        registry.save(&path).unwrap();

        let raw: BTreeMap<String, Vec<String>> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["Sarah"], vec!["ref-sarah.png", "scene-0001.png"]);

        let loaded = ReferenceRegistry::load(&path, DEFAULT_CANONICAL_PREFIX, None);
        assert_eq!(loaded.entry("Sarah"), registry.entry("Sarah"));
    }

    #[test]
    fn unprefixed_head_is_not_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extra_references.json");
        fs::write(&path, r#"{"Truck": ["boards/scene-0002.png", "boards/scene-0003.png"]}"#).unwrap();
        let loaded = ReferenceRegistry::load(&path, "ref-", None);
        assert!(loaded.ensure_canonical("Truck"));
        assert_eq!(
            loaded.references_for("Truck", 5),
            vec!["boards/scene-0003.png", "boards/scene-0002.png"]
        );
    }

    #[test]
    fn load_skips_missing_images_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ref-sarah.png"), b"png").unwrap();
        let path = dir.path().join("character_references.json");
        fs::write(&path, r#"{"Sarah": ["ref-sarah.png", "scene-0009.png"]}"#).unwrap();
        let loaded = ReferenceRegistry::load(&path, "ref-", Some(dir.path()));
        assert_eq!(loaded.references_for("Sarah", 5), vec!["ref-sarah.png"]);

        fs::write(&path, "[broken").unwrap();
        assert!(ReferenceRegistry::load(&path, "ref-", None).is_empty());
    }

    #[test]
    fn setting_views_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setting_references.json");
        let settings = SettingReferenceRegistry::new("ref-");
        settings.record_appearance("The Farmhouse", View::Outdoor, "ref-farmhouse-out.png", true);
        settings.record_appearance("The Farmhouse", View::Indoor, "scene-0001.png", false);

        assert!(!settings.ensure_canonical("The Farmhouse", View::Outdoor));
        assert!(settings.ensure_canonical("The Farmhouse", View::Indoor));

        settings.save(&path).unwrap();
        let loaded = SettingReferenceRegistry::load(&path, "ref-", None);
        assert_eq!(
            loaded.references_for("The Farmhouse", View::Outdoor, 3),
            vec!["ref-farmhouse-out.png"]
        );
        assert_eq!(
            loaded.references_for("The Farmhouse", View::Indoor, 3),
            vec!["scene-0001.png"]
        );
    }
}
