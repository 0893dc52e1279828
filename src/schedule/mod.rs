//! Level schedule: which backup level is due at a given minute.
pub mod level;
pub mod tick;

pub use level::{Level, LevelRule, LevelSet};
pub use tick::Tick;
