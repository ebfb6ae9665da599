/// Era filter: keeps anachronistic entities out of a scene's eligible set.
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::core::registry::EntityRegistry;
use crate::schema::entity::{Entity, EntityKind, Era};

/// What to do when a scene mentions no known setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FallbackPolicy {
    /// Skip era filtering and pass the full registry through.
    #[default]
    Permissive,
    /// Pass only entities that carry no era tag.
    Restrictive,
}

/// The settings a scene mentions and the eras they attest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneEras {
    pub settings: Vec<String>,
    pub eras: BTreeSet<Era>,
}

impl SceneEras {
    /// Detect settings in a scene's purpose text and collect their eras.
    pub fn detect(registry: &EntityRegistry, purpose: &str) -> SceneEras {
        let settings = registry.mentions(EntityKind::Setting, purpose);
        let eras = settings.iter().filter_map(|s| s.era.clone()).collect();
        SceneEras {
            settings: settings.iter().map(|s| s.key.clone()).collect(),
            eras,
        }
    }

    pub fn is_unrecognized(&self) -> bool {
        self.eras.is_empty()
    }
}

/// Filters characters and extras down to those compatible with a scene's eras.
#[derive(Debug, Clone, Copy, Default)]
pub struct EraFilter {
    pub fallback: FallbackPolicy,
}

impl EraFilter {
    pub fn new(fallback: FallbackPolicy) -> Self {
        Self { fallback }
    }

    /// Returns true if `entity` may appear in a scene with the given eras.
    ///
    /// Entities without an era are timeless and always admitted.
    pub fn admits(&self, entity: &Entity, scene: &SceneEras) -> bool {
        if entity.is_era_agnostic() {
            return true;
        }
        if scene.is_unrecognized() {
            return self.fallback == FallbackPolicy::Permissive;
        }
        entity.in_any_era(&scene.eras)
    }

    /// Entities of `kind` eligible for the scene, ordered by key.
    pub fn eligible<'r>(
        &self,
        registry: &'r EntityRegistry,
        kind: EntityKind,
        scene: &SceneEras,
    ) -> Vec<&'r Entity> {
        let eligible: Vec<&Entity> = registry
            .entities(kind)
            .iter()
            .filter(|entity| self.admits(entity, scene))
            .collect();
        debug!(
            %kind,
            eras = ?scene.eras,
            eligible = eligible.len(),
            total = registry.entities(kind).len(),
            "Era filter applied"
        );
        eligible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> EntityRegistry {
        EntityRegistry::parse_json(
            r#"{
                "characters": {
                    "Sarah": {"era": "present-day"},
                    "Eleazar": {"era": "biblical"},
                    "The Narrator": {}
                },
                "settings": {
                    "The Farmhouse": {"era": "present-day"},
                    "Galilee": {"aliases": ["sea of galilee"], "era": "biblical"},
                    "Operations Floor": {"aliases": ["the company floor"], "era": "present-day"}
                },
                "extras": {
                    "Oil Lamp": {"era": "biblical"},
                    "Pickup Truck": {"era": "present-day"}
                }
            }"#,
        )
        .unwrap()
    }

    fn keys(entities: &[&Entity]) -> Vec<String> {
        entities.iter().map(|e| e.key.clone()).collect()
    }

    #[test]
    fn farmhouse_scene_excludes_biblical_characters() {
        let registry = registry();
        let scene = SceneEras::detect(&registry, "Sarah returns to The Farmhouse at night");
        assert_eq!(scene.settings, vec!["The Farmhouse".to_string()]);
        let filter = EraFilter::default();
        let characters = filter.eligible(&registry, EntityKind::Character, &scene);
        assert_eq!(keys(&characters), vec!["Sarah", "The Narrator"]);
        let extras = filter.eligible(&registry, EntityKind::Extra, &scene);
        assert_eq!(keys(&extras), vec!["Pickup Truck"]);
    }

    #[test]
    fn multi_era_scene_admits_both() {
        let registry = registry();
        let scene = SceneEras::detect(
            &registry,
            "Cut between the Sea of Galilee and the company floor",
        );
        assert_eq!(scene.eras.len(), 2);
        let characters = EraFilter::default().eligible(&registry, EntityKind::Character, &scene);
        assert_eq!(characters.len(), 3);
    }

    #[test]
    fn unrecognized_setting_is_permissive_by_default() {
        let registry = registry();
        let scene = SceneEras::detect(&registry, "A dream with no place");
        assert!(scene.is_unrecognized());
        let characters = EraFilter::default().eligible(&registry, EntityKind::Character, &scene);
        assert_eq!(characters.len(), 3);
    }

    #[test]
    fn restrictive_fallback_keeps_only_timeless() {
        let registry = registry();
        let scene = SceneEras::detect(&registry, "A dream with no place");
        let filter = EraFilter::new(FallbackPolicy::Restrictive);
        let characters = filter.eligible(&registry, EntityKind::Character, &scene);
        assert_eq!(keys(&characters), vec!["The Narrator"]);
    }

    #[test]
    fn no_foreign_era_leaks_for_any_single_setting() {
        let registry = registry();
        let filter = EraFilter::default();
        for setting in registry.settings() {
            let scene = SceneEras::detect(&registry, &format!("They meet at {}", setting.key));
            let era = setting.era.clone().unwrap();
            for kind in [EntityKind::Character, EntityKind::Extra] {
                for entity in filter.eligible(&registry, kind, &scene) {
                    assert!(entity.era.is_none() || entity.era.as_ref() == Some(&era));
                }
            }
        }
    }
}
