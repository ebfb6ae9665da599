use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutlineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("scene numbers must be positive (act {act})")]
    ZeroSceneNumber { act: u32 },
    #[error("scene {0} appears more than once in the outline")]
    DuplicateScene(u32),
}

/// One scene as planned in the outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneOutline {
    pub number: u32,
    pub purpose: String,
}

/// An act with its ordered scenes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Act {
    pub number: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scenes: Vec<SceneOutline>,
}

/// A scene as tracked while the story is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub number: u32,
    pub act_number: u32,
    pub act_title: String,
    pub purpose: String,
    pub generated_text: Option<String>,
}

/// The acts/scenes structure of a story, validated on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Outline {
    pub acts: Vec<Act>,
}

impl Outline {
    /// Load an outline from an `acts.json` file.
    pub fn load_from_json(path: &Path) -> Result<Outline, OutlineError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_json(&contents)
    }

    /// Parse and validate an outline from a JSON string.
    pub fn parse_json(input: &str) -> Result<Outline, OutlineError> {
        let outline: Outline = serde_json::from_str(input)?;
        outline.validate()?;
        Ok(outline)
    }

    /// Build an outline directly from acts, with the same validation.
    pub fn from_acts(acts: Vec<Act>) -> Result<Outline, OutlineError> {
        let outline = Outline { acts };
        outline.validate()?;
        Ok(outline)
    }

    fn validate(&self) -> Result<(), OutlineError> {
        let mut seen = BTreeMap::new();
        for act in &self.acts {
            for scene in &act.scenes {
                if scene.number == 0 {
                    return Err(OutlineError::ZeroSceneNumber { act: act.number });
                }
                if seen.insert(scene.number, ()).is_some() {
                    return Err(OutlineError::DuplicateScene(scene.number));
                }
            }
        }
        Ok(())
    }

    /// All scenes as records, in ascending scene-number order.
    pub fn scene_records(&self) -> Vec<SceneRecord> {
        let mut records: Vec<SceneRecord> = self
            .acts
            .iter()
            .flat_map(|act| {
                act.scenes.iter().map(move |scene| SceneRecord {
                    number: scene.number,
                    act_number: act.number,
                    act_title: act.title.clone(),
                    purpose: scene.purpose.clone(),
                    generated_text: None,
                })
            })
            .collect();
        records.sort_by_key(|r| r.number);
        records
    }

    /// Number of scenes across all acts.
    pub fn scene_count(&self) -> usize {
        self.acts.iter().map(|act| act.scenes.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTS: &str = r#"{
        "acts": [
            {
                "number": 1,
                "title": "The Siege",
                "description": "War comes to the valley.",
                "scenes": [
                    {"number": 2, "purpose": "Eleazar hides the scrolls"},
                    {"number": 1, "purpose": "Sarah arrives at The Farmhouse"}
                ]
            },
            {
                "number": 2,
                "title": "The Search",
                "scenes": [{"number": 3, "purpose": "Galia finds the cigar box"}]
            }
        ]
    }"#;

    #[test]
    fn records_are_sorted_by_number() {
        let outline = Outline::parse_json(ACTS).unwrap();
        let numbers: Vec<u32> = outline.scene_records().iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(outline.scene_count(), 3);
    }

    #[test]
    fn records_carry_act_context() {
        let outline = Outline::parse_json(ACTS).unwrap();
        let records = outline.scene_records();
        assert_eq!(records[2].act_number, 2);
        assert_eq!(records[2].act_title, "The Search");
        assert!(records[2].generated_text.is_none());
    }

    #[test]
    fn duplicate_scene_numbers_rejected() {
        let input = r#"{"acts": [
            {"number": 1, "scenes": [{"number": 1, "purpose": "a"}]},
            {"number": 2, "scenes": [{"number": 1, "purpose": "b"}]}
        ]}"#;
        assert!(matches!(
            Outline::parse_json(input),
            Err(OutlineError::DuplicateScene(1))
        ));
    }

    #[test]
    fn zero_scene_number_rejected() {
        let input = r#"{"acts": [{"number": 1, "scenes": [{"number": 0, "purpose": "a"}]}]}"#;
        assert!(matches!(
            Outline::parse_json(input),
            Err(OutlineError::ZeroSceneNumber { act: 1 })
        ));
    }
}
