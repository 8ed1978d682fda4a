//! Settings loading for ScriptDeck

use crate::error::{Result, ScriptDeckError};
use crate::policy::{SecurityPolicy, DEFAULT_EXTENSIONS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Settings file names to search for, in order
pub const CONFIG_FILE_NAMES: &[&str] = &["scriptdeck.yaml", "scriptdeck.yml", "scriptdeck.json"];

/// Environment variable overriding the home directory
pub const HOME_ENV: &str = "SCRIPTDECK_HOME";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directories scripts may be discovered in and run from
    pub roots: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub max_execution_secs: u64,
    pub max_output_lines: usize,
    /// Commands that trigger a warning when a script mentions them
    pub restricted_commands: Vec<String>,
    pub history_limit: usize,
    pub grace_period_secs: u64,
    pub follow_symlinks: bool,
    pub include_hidden: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            max_execution_secs: 300,
            max_output_lines: 10_000,
            restricted_commands: Vec::new(),
            history_limit: 100,
            grace_period_secs: 5,
            follow_symlinks: false,
            include_hidden: false,
        }
    }
}

impl Settings {
    /// Problems that would make the settings unusable
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.roots.is_empty() {
            problems.push("no script roots configured".to_string());
        }
        for root in &self.roots {
            if !root.is_dir() {
                problems.push(format!("root is not a directory: {}", root.display()));
            }
        }
        if self.extensions.is_empty() {
            problems.push("no script extensions allowed".to_string());
        }
        if self.max_execution_secs == 0 {
            problems.push("max_execution_secs must be greater than 0".to_string());
        }
        if self.max_output_lines == 0 {
            problems.push("max_output_lines must be greater than 0".to_string());
        }
        if self.history_limit == 0 {
            problems.push("history_limit must be greater than 0".to_string());
        }
        problems
    }

    pub fn max_execution_time(&self) -> Duration {
        Duration::from_secs(self.max_execution_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Build the security policy; roots are canonicalized here
    pub fn to_policy(&self) -> Result<SecurityPolicy> {
        if self.max_execution_secs == 0 {
            return Err(ScriptDeckError::InvalidConfig(
                "max_execution_secs must be greater than 0".to_string(),
            ));
        }
        Ok(SecurityPolicy::new(&self.roots)?
            .with_extensions(&self.extensions)
            .with_max_execution_time(self.max_execution_time())
            .with_max_output_lines(self.max_output_lines)
            .with_restricted_commands(&self.restricted_commands))
    }
}

/// Loads and saves settings files
pub struct ConfigManager {
    cache: HashMap<PathBuf, CachedSettings>,
}

struct CachedSettings {
    settings: Settings,
    modified_time: SystemTime,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// `$SCRIPTDECK_HOME`, or `~/.scriptdeck`
    pub fn scriptdeck_home() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(HOME_ENV) {
            return Ok(PathBuf::from(path));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| ScriptDeckError::Config("could not find home directory".to_string()))?;
        Ok(home.join(".scriptdeck"))
    }

    pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    /// Load a settings file. Relative roots are taken relative to the
    /// file's directory.
    pub fn load(&mut self, config_path: &Path) -> Result<Settings> {
        let metadata = std::fs::metadata(config_path)?;
        let modified_time = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        if let Some(cached) = self.cache.get(config_path) {
            if cached.modified_time == modified_time {
                return Ok(cached.settings.clone());
            }
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut settings: Settings = if is_json(config_path) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        let base_dir = config_path.parent().unwrap_or(Path::new("."));
        for root in &mut settings.roots {
            if root.is_relative() {
                *root = base_dir.join(&*root);
            }
        }

        self.cache.insert(
            config_path.to_path_buf(),
            CachedSettings {
                settings: settings.clone(),
                modified_time,
            },
        );
        Ok(settings)
    }

    pub fn load_from_directory(&mut self, dir: &Path) -> Result<(Settings, PathBuf)> {
        let config_path = Self::find_config_file(dir)
            .ok_or_else(|| ScriptDeckError::ConfigNotFound(dir.display().to_string()))?;
        let settings = self.load(&config_path)?;
        Ok((settings, config_path))
    }

    /// Settings from `dir`, else from the home directory, else defaults
    pub fn discover(&mut self, dir: &Path) -> Result<Settings> {
        if let Some(path) = Self::find_config_file(dir) {
            return self.load(&path);
        }
        if let Some(path) = Self::scriptdeck_home()
            .ok()
            .and_then(|home| Self::find_config_file(&home))
        {
            return self.load(&path);
        }
        Ok(Settings::default())
    }

    /// Write settings as JSON or YAML depending on the file extension
    pub fn save(&mut self, settings: &Settings, config_path: &Path) -> Result<()> {
        let content = if is_json(config_path) {
            serde_json::to_string_pretty(settings)?
        } else {
            serde_yaml::to_string(settings)?
        };

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_path, content)?;
        self.cache.remove(config_path);
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}
