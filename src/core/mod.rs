pub mod config;
pub mod continuity;
pub mod engine;
pub mod era;
pub mod introduction;
pub mod matching;
pub mod memo;
pub mod naming;
pub mod references;
pub mod registry;
pub mod retry;
pub mod storyboard;
