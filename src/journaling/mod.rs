mod autosave;

pub use autosave::{AutoSaveStatus, AutoSaveTimer};
