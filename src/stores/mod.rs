//! Concrete stores, one per entity family.

pub mod actions;
pub mod notes;
pub mod stats;
pub mod transcriptions;

pub use actions::ActionsStore;
pub use notes::NotesStore;
pub use stats::StatsStore;
pub use transcriptions::TranscriptionStore;
