/// Introduction tracker: withholds extras until the outline introduces them.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

use crate::core::matching::mentions;
use crate::core::memo::{read_json_or_absent, write_json_atomic, StoreError};
use crate::core::registry::EntityRegistry;
use crate::schema::entity::Entity;
use crate::schema::scene::SceneRecord;

/// Persisted introduction state for one story.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntroductionIndex {
    /// Highest scene number whose purpose text has been scanned.
    pub scanned_through: u32,
    /// Extras that took part in the scan so far.
    pub known_extras: BTreeSet<String>,
    /// Extra key → first scene whose purpose mentions it.
    pub points: BTreeMap<String, u32>,
}

/// Derives which extras are narratively available at a given scene.
///
/// Scanning is incremental: scenes already scanned are not scanned again,
/// and recorded points never move later, so the introduced set only grows
/// with the scene number.
#[derive(Debug, Clone, Default)]
pub struct IntroductionTracker {
    index: IntroductionIndex,
}

impl IntroductionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_index(index: IntroductionIndex) -> Self {
        Self { index }
    }

    /// Restore a tracker from disk; a missing or malformed file starts fresh.
    pub fn load(path: &Path) -> Self {
        let index: IntroductionIndex = read_json_or_absent(path).unwrap_or_default();
        debug!(
            path = %path.display(),
            scanned_through = index.scanned_through,
            introduced = index.points.len(),
            "Loaded introduction index"
        );
        Self { index }
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_json_atomic(path, &self.index)
    }

    pub fn index(&self) -> &IntroductionIndex {
        &self.index
    }

    /// Scene at which an extra was introduced, if it has been.
    pub fn introduction_point(&self, key: &str) -> Option<u32> {
        self.index.points.get(key).copied()
    }

    /// Scan scene purposes up to and including `through`.
    ///
    /// `scenes` may be in any order; they are visited ascending.
    pub fn scan(&mut self, registry: &EntityRegistry, scenes: &[SceneRecord], through: u32) {
        let mut ordered: Vec<&SceneRecord> = scenes.iter().collect();
        ordered.sort_by_key(|scene| scene.number);

        // Extras added to the definitions after an earlier scan still need
        // the already-scanned prefix checked.
        let fresh: Vec<&Entity> = registry
            .extras()
            .iter()
            .filter(|extra| !self.index.known_extras.contains(&extra.key))
            .collect();
        let scanned = self.index.scanned_through;
        if !fresh.is_empty() && scanned > 0 {
            for scene in ordered.iter().filter(|scene| scene.number <= scanned) {
                self.record_mentions(scene, &fresh);
            }
        }
        self.index
            .known_extras
            .extend(fresh.iter().map(|extra| extra.key.clone()));

        if through <= scanned {
            return;
        }
        let all: Vec<&Entity> = registry.extras().iter().collect();
        for scene in ordered
            .iter()
            .filter(|scene| scene.number > scanned && scene.number <= through)
        {
            self.record_mentions(scene, &all);
        }
        self.index.scanned_through = through;
    }

    fn record_mentions(&mut self, scene: &SceneRecord, extras: &[&Entity]) {
        for extra in extras {
            if self.index.points.contains_key(&extra.key) {
                continue;
            }
            if extra.names().iter().any(|name| mentions(&scene.purpose, name)) {
                info!(extra = %extra.key, scene = scene.number, "Extra introduced");
                self.index.points.insert(extra.key.clone(), scene.number);
            }
        }
    }

    /// Keys of the extras introduced at or before `scene_number`.
    pub fn introduced_as_of(
        &mut self,
        registry: &EntityRegistry,
        scenes: &[SceneRecord],
        scene_number: u32,
    ) -> BTreeSet<String> {
        self.scan(registry, scenes, scene_number);
        self.index
            .points
            .iter()
            .filter(|(_, point)| **point <= scene_number)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::scene::Outline;

    fn registry() -> EntityRegistry {
        EntityRegistry::parse_json(
            r#"{
                "extras": {
                    "The Cigar Box": {"aliases": ["cigar box"]},
                    "Pickup Truck": {"aliases": ["the red pickup"]},
                    "The Unused Relic": {}
                }
            }"#,
        )
        .unwrap()
    }

    fn scenes() -> Vec<SceneRecord> {
        Outline::parse_json(
            r#"{"acts": [{"number": 1, "scenes": [
                {"number": 1, "purpose": "Sarah arrives at the farmhouse"},
                {"number": 2, "purpose": "Sarah drives the red pickup into town"},
                {"number": 3, "purpose": "Eleazar writes by lamplight"},
                {"number": 4, "purpose": "The pickup truck breaks down"},
                {"number": 5, "purpose": "Galia finds the cigar box"},
                {"number": 6, "purpose": "The Cigar Box is opened"}
            ]}]}"#,
        )
        .unwrap()
        .scene_records()
    }

    #[test]
    fn cigar_box_introduced_at_scene_five() {
        let registry = registry();
        let scenes = scenes();
        let mut tracker = IntroductionTracker::new();
        assert!(!tracker
            .introduced_as_of(&registry, &scenes, 3)
            .contains("The Cigar Box"));
        assert!(tracker
            .introduced_as_of(&registry, &scenes, 5)
            .contains("The Cigar Box"));
        for n in 5..=8 {
            assert!(tracker
                .introduced_as_of(&registry, &scenes, n)
                .contains("The Cigar Box"));
        }
        assert_eq!(tracker.introduction_point("The Cigar Box"), Some(5));
    }

    #[test]
    fn introduced_sets_are_monotonic() {
        let registry = registry();
        let scenes = scenes();
        let mut tracker = IntroductionTracker::new();
        let mut previous = BTreeSet::new();
        for n in 1..=7 {
            let current = tracker.introduced_as_of(&registry, &scenes, n);
            assert!(previous.is_subset(&current), "scene {} lost an extra", n);
            previous = current;
        }
    }

    #[test]
    fn querying_earlier_scene_after_later_scan() {
        let registry = registry();
        let scenes = scenes();
        let mut tracker = IntroductionTracker::new();
        tracker.introduced_as_of(&registry, &scenes, 6);
        let at_two = tracker.introduced_as_of(&registry, &scenes, 2);
        assert_eq!(
            at_two.into_iter().collect::<Vec<_>>(),
            vec!["Pickup Truck".to_string()]
        );
    }

    #[test]
    fn unmentioned_extra_never_introduced() {
        let registry = registry();
        let scenes = scenes();
        let mut tracker = IntroductionTracker::new();
        assert!(!tracker
            .introduced_as_of(&registry, &scenes, 100)
            .contains("The Unused Relic"));
        assert_eq!(tracker.introduction_point("The Unused Relic"), None);
    }

    #[test]
    fn rescanning_is_idempotent() {
        let registry = registry();
        let scenes = scenes();
        let mut tracker = IntroductionTracker::new();
        tracker.scan(&registry, &scenes, 6);
        let first = tracker.index().clone();
        tracker.scan(&registry, &scenes, 6);
        tracker.scan(&registry, &scenes, 4);
        assert_eq!(tracker.index(), &first);
    }

    #[test]
    fn resumed_tracker_matches_continuous_run() {
        let registry = registry();
        let scenes = scenes();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("introductions.json");

        let mut first = IntroductionTracker::new();
        first.scan(&registry, &scenes, 3);
        first.save(&path).unwrap();
        let mut resumed = IntroductionTracker::load(&path);
        resumed.scan(&registry, &scenes, 6);

        let mut continuous = IntroductionTracker::new();
        continuous.scan(&registry, &scenes, 6);
        assert_eq!(resumed.index(), continuous.index());
    }

    #[test]
    fn extras_added_later_see_scanned_prefix() {
        let scenes = scenes();
        let before = EntityRegistry::parse_json(r#"{"extras": {"Pickup Truck": {}}}"#).unwrap();
        let mut tracker = IntroductionTracker::new();
        tracker.scan(&before, &scenes, 6);

        let after = registry();
        let introduced = tracker.introduced_as_of(&after, &scenes, 6);
        assert!(introduced.contains("The Cigar Box"));
        assert_eq!(tracker.introduction_point("The Cigar Box"), Some(5));
    }
}
