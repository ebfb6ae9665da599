use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The four kinds of definitions a story carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Character,
    Setting,
    Extra,
    Style,
}

impl EntityKind {
    /// Name of the definitions section holding this kind.
    pub fn section(&self) -> &'static str {
        match self {
            Self::Character => "characters",
            Self::Setting => "settings",
            Self::Extra => "extras",
            Self::Style => "style",
        }
    }

    /// Kinds that carry an era tag and take part in era filtering.
    pub fn is_era_bound(&self) -> bool {
        !matches!(self, Self::Style)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Character => "character",
            Self::Setting => "setting",
            Self::Extra => "extra",
            Self::Style => "style",
        };
        f.write_str(label)
    }
}

/// Newtype wrapper for era tags ("biblical", "present-day", ...).
///
/// Eras compare case-insensitively: the tag is normalized on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Era(String);

impl Era {
    pub fn new(tag: &str) -> Self {
        Self(tag.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Era {
    fn from(tag: String) -> Self {
        Self::new(&tag)
    }
}

impl From<Era> for String {
    fn from(era: Era) -> Self {
        era.0
    }
}

impl fmt::Display for Era {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A free-form descriptive value attached to a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Flatten the value into prompt-ready text.
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
            Self::List(items) => items
                .iter()
                .filter(|v| !matches!(v, Self::Null))
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(", "),
            Self::Map(map) => map
                .iter()
                .filter(|(_, v)| !matches!(v, Self::Null))
                .map(|(k, v)| format!("{}: {}", k, v.to_text()))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

/// A loaded definition: a character, setting, extra, or the story style.
///
/// `key` is the unique name the definition is filed under. `display_name`
/// is the inner `name` field when the document provides one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub key: String,
    pub display_name: String,
    pub aliases: Vec<String>,
    pub era: Option<Era>,
    pub fields: BTreeMap<String, Value>,
}

impl Entity {
    /// Every phrase this entity can be recognized by: key, display name, aliases.
    pub fn names(&self) -> Vec<&str> {
        let mut names = vec![self.key.as_str()];
        if self.display_name != self.key {
            names.push(self.display_name.as_str());
        }
        names.extend(self.aliases.iter().map(String::as_str));
        names
    }

    /// Returns true if the entity carries no era and so fits any scene.
    pub fn is_era_agnostic(&self) -> bool {
        self.era.is_none()
    }

    /// Returns true if this entity belongs to one of the given eras.
    pub fn in_any_era<'a>(&self, eras: impl IntoIterator<Item = &'a Era>) -> bool {
        match &self.era {
            Some(own) => eras.into_iter().any(|era| era == own),
            None => false,
        }
    }

    /// Text form of a descriptive field, if present.
    pub fn field_text(&self, field: &str) -> Option<String> {
        self.fields.get(field).map(Value::to_text)
    }
}
