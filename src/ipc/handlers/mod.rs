pub mod analytics;
pub mod autosave;
pub mod core;
pub mod courses;
pub mod curriculum;
pub mod roster;
pub mod setup;
