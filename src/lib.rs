//! Continuity Engine: keeps a multi-stage generative story consistent.
//!
//! Tracks which characters, settings and props may appear in each scene,
//! carries state forward from scene to scene, and remembers the imagery
//! already generated for every entity so later illustrations match.

pub mod core;
pub mod schema;

pub use crate::core::config::EngineConfig;
pub use crate::core::continuity::{CollaboratorError, ContinuityAnalyst, ContinuityEntry};
pub use crate::core::engine::{EngineError, SceneContext, StoryEngine, VisualContext};
pub use crate::core::references::View;
