//! Configuration management for the autograph CLI.
//!
//! Configuration is stored in `~/.autograph/config.yaml` as a set of named
//! contexts, one of which is current (kubectl-style).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default base configuration directory name.
pub const DEFAULT_BASE_DIR: &str = ".autograph";
/// Default configuration filename.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Name of the currently active context.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_context: String,

    /// Map of context name to context configuration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contexts: BTreeMap<String, Context>,

    #[serde(skip)]
    config_path: PathBuf,
}

/// One deployment: a recognition backend plus a local data directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Recognition backend base URL. Empty means no backend.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// Request timeout in seconds (0 = library default).
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timeout: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Directory holding `meta.redb` and `blobs/`. Empty means
    /// `~/.autograph/data/{name}`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data_dir: String,

    /// Default acceptance threshold for identities that are not ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sample_bytes: Option<u64>,

    /// Verification mode: `auto`, `backend` or `gallery`. Empty means auto.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl Config {
    /// Gets the default config directory (`~/.autograph`).
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_BASE_DIR))
    }

    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join(DEFAULT_CONFIG_FILE))
    }

    /// Returns the config file path.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Saves the configuration to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&self.config_path, content)?;
        Ok(())
    }

    /// Adds or replaces a context. The first context added becomes current.
    pub fn add_context(&mut self, name: &str, mut ctx: Context) -> anyhow::Result<()> {
        if name.is_empty() {
            anyhow::bail!("context name must not be empty");
        }
        ctx.name = name.to_string();
        self.contexts.insert(name.to_string(), ctx);
        if self.current_context.is_empty() {
            self.current_context = name.to_string();
        }
        self.save()
    }

    pub fn delete_context(&mut self, name: &str) -> anyhow::Result<()> {
        if self.contexts.remove(name).is_none() {
            anyhow::bail!("context '{}' not found", name);
        }
        if self.current_context == name {
            self.current_context.clear();
        }
        self.save()
    }

    pub fn use_context(&mut self, name: &str) -> anyhow::Result<()> {
        if !self.contexts.contains_key(name) {
            anyhow::bail!("context '{}' not found", name);
        }
        self.current_context = name.to_string();
        self.save()
    }

    pub fn get_context(&self, name: &str) -> Option<&Context> {
        self.contexts.get(name)
    }

    pub fn get_current_context(&self) -> Option<&Context> {
        if self.current_context.is_empty() {
            return None;
        }
        self.contexts.get(&self.current_context)
    }

    /// Resolves the context by name, or the current context if no name is
    /// given.
    pub fn resolve_context(&self, name: Option<&str>) -> Option<&Context> {
        match name {
            Some(n) if !n.is_empty() => self.get_context(n),
            _ => self.get_current_context(),
        }
    }

    /// Context names in sorted order.
    pub fn list_contexts(&self) -> Vec<&str> {
        self.contexts.keys().map(|s| s.as_str()).collect()
    }
}

impl Context {
    /// Request timeout, if one is configured.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    /// Resolve the data directory for this context.
    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        if !self.data_dir.is_empty() {
            return Ok(expand_home(&self.data_dir));
        }
        let base = Config::default_config_dir()
            .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        let name = if self.name.is_empty() {
            "default"
        } else {
            &self.name
        };
        Ok(base.join("data").join(name))
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Loads configuration from `custom_path` or the default location, creating
/// an empty file if none exists.
pub fn load_config(custom_path: Option<&str>) -> anyhow::Result<Config> {
    let config_path = match custom_path {
        Some(p) => PathBuf::from(p),
        None => Config::default_config_path()
            .ok_or_else(|| anyhow::anyhow!("cannot determine config path"))?,
    };

    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut cfg: Config = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&content)?
        }
    } else {
        let cfg = Config::default();
        std::fs::write(&config_path, serde_yaml::to_string(&cfg)?)?;
        cfg
    };

    cfg.config_path = config_path;
    Ok(cfg)
}

/// Masks the API key for display.
pub fn mask_api_key(key: &str) -> String {
    if key.len() <= 8 {
        "*".repeat(key.len())
    } else {
        format!(
            "{}{}{}",
            &key[..4],
            "*".repeat(key.len() - 8),
            &key[key.len() - 4..]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn load(dir: &Path) -> Config {
        let path = dir.join("config.yaml");
        load_config(Some(path.to_str().unwrap())).unwrap()
    }

    #[test]
    fn missing_file_is_created_empty() {
        let dir = tempdir().unwrap();
        let cfg = load(dir.path());
        assert!(cfg.contexts.is_empty());
        assert!(dir.path().join("config.yaml").is_file());
    }

    #[test]
    fn contexts_persist() {
        let dir = tempdir().unwrap();
        let mut cfg = load(dir.path());
        cfg.add_context(
            "campus",
            Context {
                base_url: "http://localhost:8000".into(),
                threshold: Some(0.75),
                max_retries: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
        cfg.add_context("offline", Context::default()).unwrap();
        assert_eq!(cfg.current_context, "campus");

        let mut again = load(dir.path());
        assert_eq!(again.list_contexts(), vec!["campus", "offline"]);
        let campus = again.resolve_context(None).unwrap();
        assert_eq!(campus.name, "campus");
        assert_eq!(campus.threshold, Some(0.75));
        assert_eq!(campus.max_retries, Some(0));

        again.use_context("offline").unwrap();
        again.delete_context("offline").unwrap();
        assert!(again.get_current_context().is_none());
        assert!(again.delete_context("offline").is_err());
        assert!(again.use_context("nope").is_err());
    }

    #[test]
    fn data_dir_resolution() {
        let ctx = Context {
            data_dir: "/srv/autograph".into(),
            ..Default::default()
        };
        assert_eq!(ctx.data_dir().unwrap(), PathBuf::from("/srv/autograph"));

        let ctx = Context {
            name: "campus".into(),
            ..Default::default()
        };
        if let Ok(dir) = ctx.data_dir() {
            assert!(dir.ends_with("data/campus"));
        }
    }

    #[test]
    fn timeout_zero_means_default() {
        assert_eq!(Context::default().timeout(), None);
        let ctx = Context {
            timeout: 5,
            ..Default::default()
        };
        assert_eq!(ctx.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn masks_keys() {
        assert_eq!(mask_api_key("short"), "*****");
        assert_eq!(mask_api_key("sk-1234567890"), "sk-1*****7890");
    }
}
