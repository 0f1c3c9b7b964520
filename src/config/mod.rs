use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "Diary";
const APP_NAME: &str = "diary";

pub const DATABASE_FILE_NAME: &str = "diary.sqlite";
pub const BACKUP_DIR_NAME: &str = "Backups";
pub const LEGACY_PREFERENCES_FILE_NAME: &str = "preferences.json";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn with_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub backup_dir: PathBuf,
    pub legacy_preferences: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("DIARY_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("DIARY_DATA").ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving per-user application directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        Ok(Self::rooted(config_dir, config_file, data_root))
    }

    /// Lays out every path below an explicit config and data directory.
    pub fn rooted(config_dir: PathBuf, config_file: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            legacy_preferences: config_dir.join(LEGACY_PREFERENCES_FILE_NAME),
            config_dir,
            config_file,
            database_path: data_dir.join(DATABASE_FILE_NAME),
            backup_dir: data_dir.join(BACKUP_DIR_NAME),
            data_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.backup_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub auto_save: AutoSaveConfig,
    pub storage: StorageOptions,
    pub navigation: NavigationOptions,
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        if self.storage.backup_retain == 0 {
            tracing::warn!("backup_retain of 0 would delete every backup, keeping 1");
            self.storage.backup_retain = 1;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSaveConfig {
    pub debounce_ms: u64,
    pub enabled: bool,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 800,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    #[serde(skip)]
    pub backup_dir: PathBuf,
    pub wal_autocheckpoint: u32,
    pub backup_on_exit: bool,
    /// Number of timestamped backups kept after each rotation.
    pub backup_retain: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            backup_dir: PathBuf::new(),
            wal_autocheckpoint: 1000,
            backup_on_exit: true,
            backup_retain: 10,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        if self.backup_dir.as_os_str().is_empty() {
            self.backup_dir = paths.backup_dir.clone();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationOptions {
    /// How many days "previous/next entry" looks before giving up.
    pub content_search_horizon_days: u32,
}

impl Default for NavigationOptions {
    fn default() -> Self {
        Self {
            content_search_horizon_days: 365,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn loader(root: &TempDir) -> ConfigLoader {
        let config_dir = root.path().join("config");
        ConfigLoader::with_paths(ConfigPaths::rooted(
            config_dir.clone(),
            config_dir.join("config.toml"),
            root.path().join("data"),
        ))
    }

    #[test]
    fn first_run_writes_defaults() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let loader = loader(&temp);
        let cfg = loader.load_or_init()?;
        assert!(loader.paths().config_file.exists());
        assert!(loader.paths().backup_dir.is_dir());
        assert_eq!(cfg.auto_save.debounce_ms, 800);
        assert_eq!(cfg.navigation.content_search_horizon_days, 365);
        assert_eq!(cfg.storage.database_path, temp.path().join("data/diary.sqlite"));
        assert_eq!(cfg.storage.backup_dir, temp.path().join("data/Backups"));
        Ok(())
    }

    #[test]
    fn partial_config_keeps_remaining_defaults() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let loader = loader(&temp);
        loader.paths().ensure_directories()?;
        fs::write(
            &loader.paths().config_file,
            "[auto_save]\ndebounce_ms = 250\n\n[storage]\nbackup_retain = 0\n",
        )?;
        let cfg = loader.load_or_init()?;
        assert_eq!(cfg.auto_save.debounce_ms, 250);
        assert!(cfg.auto_save.enabled);
        assert_eq!(cfg.storage.backup_retain, 1);
        assert!(cfg.storage.backup_on_exit);
        Ok(())
    }
}
