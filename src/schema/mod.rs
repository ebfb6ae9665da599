pub mod continuity;
pub mod entity;
pub mod scene;
