// src/config.rs
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{Error, Result};

const APP_DIR: &str = "lectern";
const SETTINGS_FILE: &str = "settings.toml";
const DATABASE_FILE: &str = "lectern.sqlite";

/// What alignment does with a chapter present on only one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingChapterPolicy {
    /// Leave the chapter out of the alignment and log it.
    #[default]
    Skip,
    /// Fail the alignment.
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Recorded as the creator of every revision written by this replica.
    pub creator_id: String,
    pub database_path: Option<PathBuf>,
    pub missing_chapters: MissingChapterPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            creator_id: Uuid::new_v4().to_string(),
            database_path: None,
            missing_chapters: MissingChapterPolicy::Skip,
        }
    }
}

/// Get the config directory path for the application
fn get_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join(APP_DIR))
        .ok_or(Error::NoDirectory("config"))
}

/// Get the settings file path
pub fn settings_file_path() -> Result<PathBuf> {
    get_config_dir().map(|p| p.join(SETTINGS_FILE))
}

impl Settings {
    /// Load settings from the user config directory, defaults if there are none yet.
    pub fn load() -> Result<Self> {
        let path = settings_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Configured database path, or the default under the user data directory.
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|p| p.join(APP_DIR).join(DATABASE_FILE))
            .ok_or(Error::NoDirectory("data"))
    }
}
