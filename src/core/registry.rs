/// Entity registry: load-once, read-many store of story definitions.
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::matching::{find_mentions, normalize_name};
use crate::schema::entity::{Entity, EntityKind, Era, Value};

/// Key under which the story style is filed.
pub const STYLE_KEY: &str = "style";

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate {kind} name or alias '{name}' (used by '{first}' and '{second}')")]
    Duplicate {
        kind: EntityKind,
        name: String,
        first: String,
        second: String,
    },
    #[error("{kind} '{key}' has an empty name or alias")]
    EmptyName { kind: EntityKind, key: String },
}

// The definitions document files entities under their names, with the
// descriptive fields inline next to `aliases` and `era`.

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    aliases: Option<Vec<String>>,
    #[serde(default)]
    era: Option<String>,
    #[serde(flatten)]
    fields: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawDefinitions {
    #[serde(default)]
    characters: BTreeMap<String, RawEntity>,
    #[serde(default)]
    settings: BTreeMap<String, RawEntity>,
    #[serde(default)]
    extras: BTreeMap<String, RawEntity>,
    #[serde(default)]
    style: BTreeMap<String, Value>,
}

/// Immutable registry of characters, settings, extras and style.
///
/// Share it behind an `Arc`; there is no mutation API. Reload the whole
/// registry to pick up changed definitions.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: FxHashMap<EntityKind, Vec<Entity>>,
    lookup: FxHashMap<(EntityKind, String), usize>,
}

impl EntityRegistry {
    /// Load a registry from a `definitions.json` file.
    pub fn load_from_json(path: &Path) -> Result<EntityRegistry, DefinitionError> {
        let contents = std::fs::read_to_string(path)?;
        let registry = Self::parse_json(&contents)?;
        info!(
            path = %path.display(),
            characters = registry.characters().len(),
            settings = registry.settings().len(),
            extras = registry.extras().len(),
            "Loaded definitions"
        );
        Ok(registry)
    }

    /// Parse a registry from a definitions JSON string.
    pub fn parse_json(input: &str) -> Result<EntityRegistry, DefinitionError> {
        let raw: RawDefinitions = serde_json::from_str(input)?;
        let mut entities = Vec::new();

        for (kind, section) in [
            (EntityKind::Character, raw.characters),
            (EntityKind::Setting, raw.settings),
            (EntityKind::Extra, raw.extras),
        ] {
            for (key, raw_entity) in section {
                let display_name = raw_entity
                    .name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| key.clone());
                entities.push(Entity {
                    kind,
                    key,
                    display_name,
                    aliases: raw_entity.aliases.unwrap_or_default(),
                    era: raw_entity
                        .era
                        .filter(|e| !e.trim().is_empty())
                        .map(|e| Era::new(&e)),
                    fields: raw_entity.fields,
                });
            }
        }

        if !raw.style.is_empty() {
            entities.push(Entity {
                kind: EntityKind::Style,
                key: STYLE_KEY.to_string(),
                display_name: STYLE_KEY.to_string(),
                aliases: Vec::new(),
                era: None,
                fields: raw.style,
            });
        }

        Self::from_entities(entities)
    }

    /// Build a registry from already-constructed entities.
    ///
    /// Fails if two entities of the same kind share a name or alias after
    /// normalization (case, whitespace and a leading "the"), since mention
    /// detection could not tell them apart.
    pub fn from_entities(entities: Vec<Entity>) -> Result<EntityRegistry, DefinitionError> {
        let mut by_kind: FxHashMap<EntityKind, Vec<Entity>> = FxHashMap::default();
        for entity in entities {
            by_kind.entry(entity.kind).or_default().push(entity);
        }

        let mut lookup = FxHashMap::default();
        for (kind, list) in by_kind.iter_mut() {
            list.sort_by(|a, b| a.key.cmp(&b.key));
            for (index, entity) in list.iter().enumerate() {
                for name in entity.names() {
                    let normalized = normalize_name(name);
                    if normalized.is_empty() {
                        return Err(DefinitionError::EmptyName {
                            kind: *kind,
                            key: entity.key.clone(),
                        });
                    }
                    match lookup.insert((*kind, normalized), index) {
                        Some(previous) if previous != index => {
                            return Err(DefinitionError::Duplicate {
                                kind: *kind,
                                name: name.to_string(),
                                first: list[previous].key.clone(),
                                second: entity.key.clone(),
                            });
                        }
                        _ => {}
                    }
                }
            }
        }

        debug!(names = lookup.len(), "Built entity lookup");
        Ok(EntityRegistry {
            entities: by_kind,
            lookup,
        })
    }

    /// Look up an entity by name or alias, ignoring case, spacing and a
    /// leading "the".
    pub fn get(&self, kind: EntityKind, name: &str) -> Option<&Entity> {
        let index = self.lookup.get(&(kind, normalize_name(name)))?;
        self.entities.get(&kind).and_then(|list| list.get(*index))
    }

    /// All entities of a kind, ordered by key.
    pub fn entities(&self, kind: EntityKind) -> &[Entity] {
        self.entities
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn characters(&self) -> &[Entity] {
        self.entities(EntityKind::Character)
    }

    pub fn settings(&self) -> &[Entity] {
        self.entities(EntityKind::Setting)
    }

    pub fn extras(&self) -> &[Entity] {
        self.entities(EntityKind::Extra)
    }

    pub fn style(&self) -> Option<&Entity> {
        self.entities(EntityKind::Style).first()
    }

    /// Entities of a kind mentioned in `text`, ordered by key.
    ///
    /// Matching is whole-word and article-insensitive; where names overlap
    /// in the text the longest one wins.
    pub fn mentions(&self, kind: EntityKind, text: &str) -> Vec<&Entity> {
        let list = self.entities(kind);
        let candidates = list
            .iter()
            .enumerate()
            .flat_map(|(index, entity)| entity.names().into_iter().map(move |n| (index, n)));
        find_mentions(text, candidates)
            .into_iter()
            .map(|index| &list[index])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITIONS: &str = r#"{
        "characters": {
            "Sarah": {"name": "Sarah Cohen", "aliases": ["Sal"], "era": "present-day",
                      "appearance": "Tall, black hair"},
            "Eleazar": {"aliases": ["the scribe"], "era": "biblical"}
        },
        "settings": {
            "The Farmhouse": {"aliases": ["farm"], "era": "present-day"}
        },
        "extras": {
            "The Cigar Box": {"aliases": ["cigar box"], "era": "present-day"}
        },
        "style": {"description": "Inked, limited palette", "line_width": 2}
    }"#;

    #[test]
    fn loads_all_sections() {
        let registry = EntityRegistry::parse_json(DEFINITIONS).unwrap();
        assert_eq!(registry.characters().len(), 2);
        assert_eq!(registry.settings().len(), 1);
        assert_eq!(registry.extras().len(), 1);
        let style = registry.style().unwrap();
        assert_eq!(style.key, STYLE_KEY);
        assert!(style.era.is_none());
        assert_eq!(style.field_text("line_width").as_deref(), Some("2"));
    }

    #[test]
    fn lookup_by_name_alias_and_display_name() {
        let registry = EntityRegistry::parse_json(DEFINITIONS).unwrap();
        assert_eq!(registry.get(EntityKind::Character, "sal").unwrap().key, "Sarah");
        assert_eq!(
            registry.get(EntityKind::Character, "  SARAH   cohen").unwrap().key,
            "Sarah"
        );
        assert_eq!(
            registry.get(EntityKind::Character, "The Scribe").unwrap().key,
            "Eleazar"
        );
        assert!(registry.get(EntityKind::Setting, "Sarah").is_none());
    }

    #[test]
    fn characters_are_key_ordered() {
        let registry = EntityRegistry::parse_json(DEFINITIONS).unwrap();
        let keys: Vec<&str> = registry.characters().iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["Eleazar", "Sarah"]);
    }

    #[test]
    fn duplicate_alias_within_kind_is_fatal() {
        let input = r#"{
            "characters": {
                "Sarah": {"aliases": ["the operator"]},
                "Miriam": {"aliases": ["The  Operator"]}
            }
        }"#;
        let err = EntityRegistry::parse_json(input).unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::Duplicate { kind: EntityKind::Character, .. }
        ));
    }

    #[test]
    fn article_variants_are_duplicates() {
        let input = r#"{"extras": {"The Box": {}, "Box": {"era": "biblical"}}}"#;
        let err = EntityRegistry::parse_json(input).unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::Duplicate { kind: EntityKind::Extra, .. }
        ));
    }

    #[test]
    fn null_fields_load_as_empty_text() {
        let input = r#"{
            "characters": {"Sarah": {"era": "present-day", "aliases": null, "nickname": null}},
            "style": {"palette": null}
        }"#;
        let registry = EntityRegistry::parse_json(input).unwrap();
        let sarah = registry.get(EntityKind::Character, "Sarah").unwrap();
        assert_eq!(sarah.fields.get("nickname"), Some(&Value::Null));
        assert_eq!(sarah.field_text("nickname").as_deref(), Some(""));
        assert!(sarah.aliases.is_empty());
        assert!(registry.style().is_some());
    }

    #[test]
    fn same_name_across_kinds_is_allowed() {
        let input = r#"{
            "characters": {"Galilee": {}},
            "settings": {"Galilee": {"era": "biblical"}}
        }"#;
        let registry = EntityRegistry::parse_json(input).unwrap();
        assert!(registry.get(EntityKind::Character, "Galilee").is_some());
        assert!(registry.get(EntityKind::Setting, "Galilee").is_some());
    }

    #[test]
    fn alias_repeating_own_key_is_not_a_duplicate() {
        let input = r#"{"extras": {"Lamp": {"aliases": ["lamp", "oil lamp"]}}}"#;
        assert!(EntityRegistry::parse_json(input).is_ok());
    }

    #[test]
    fn empty_alias_rejected() {
        let input = r#"{"extras": {"Lamp": {"aliases": [" "]}}}"#;
        assert!(matches!(
            EntityRegistry::parse_json(input),
            Err(DefinitionError::EmptyName { .. })
        ));
    }

    #[test]
    fn mentions_in_text() {
        let registry = EntityRegistry::parse_json(DEFINITIONS).unwrap();
        let found = registry.mentions(EntityKind::Character, "Sal met the scribe at dawn.");
        let keys: Vec<&str> = found.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["Eleazar", "Sarah"]);
        assert!(registry
            .mentions(EntityKind::Setting, "Nobody went anywhere")
            .is_empty());
    }
}
