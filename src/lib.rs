pub mod app;
pub mod cli;
pub mod config;
pub mod date_key;
pub mod document;
pub mod editor;
pub mod journaling;
pub mod storage;

pub use app::{DiaryController, DiaryEvent};
pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use date_key::DateKey;
pub use document::Document;
pub use storage::EntryStore;
