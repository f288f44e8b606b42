use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::source::{DEFAULT_DESCRIPTOR_ATTRIBUTE, DEFAULT_PYTHON_INTERPRETER, SourceOptions};

pub const DEFAULT_SEARCH_URL: &str = "http://localhost:9200";
pub const DEFAULT_RESOURCES_INDEX: &str = "resources";
pub const DEFAULT_PAGE_SIZE: usize = 250;
pub const DEFAULT_SCROLL_KEEP_ALIVE: &str = "1m";
pub const DEFAULT_BACKUP_DIR: &str = ".db_backups/daily";
pub const DEFAULT_KEEP_DAILIES: usize = 10;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ArchesConfig {
    #[serde(default)]
    pub postgres: PostgresSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub python: PythonSection,
    #[serde(default)]
    pub files: FilesSection,
    #[serde(default)]
    pub backup: BackupSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PostgresSection {
    pub name: Option<String>,
    pub user: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SearchSection {
    pub url: Option<String>,
    pub resources_index: Option<String>,
    pub page_size: Option<usize>,
    pub scroll_keep_alive: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PythonSection {
    pub interpreter: Option<String>,
    pub descriptor_attribute: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FilesSection {
    pub media_root: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BackupSection {
    pub dir: Option<String>,
    pub keep_dailies: Option<usize>,
    pub aws_profile: Option<String>,
}

/// Connection settings handed to `pg_dump`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresSettings {
    pub name: String,
    pub user: String,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl ArchesConfig {
    /// Resolve the search URL: env ARCHES_EXT_SEARCH_URL > config > default.
    pub fn search_url(&self) -> String {
        self.search_url_with_lookup(|key| env::var(key).ok())
    }

    fn search_url_with_lookup<F>(&self, lookup_env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        non_empty(lookup_env("ARCHES_EXT_SEARCH_URL"))
            .or_else(|| self.search.url.clone())
            .unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn resources_index(&self) -> String {
        self.search
            .resources_index
            .clone()
            .unwrap_or_else(|| DEFAULT_RESOURCES_INDEX.to_string())
    }

    pub fn page_size(&self) -> usize {
        self.search.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1)
    }

    pub fn scroll_keep_alive(&self) -> String {
        self.search
            .scroll_keep_alive
            .clone()
            .unwrap_or_else(|| DEFAULT_SCROLL_KEEP_ALIVE.to_string())
    }

    /// Resolve the Python interpreter: env ARCHES_EXT_PYTHON > config > `python3`.
    pub fn python_interpreter(&self) -> String {
        non_empty(env::var("ARCHES_EXT_PYTHON").ok())
            .or_else(|| self.python.interpreter.clone())
            .unwrap_or_else(|| DEFAULT_PYTHON_INTERPRETER.to_string())
    }

    pub fn source_options(&self, project_root: &Path) -> SourceOptions {
        SourceOptions {
            python_interpreter: PathBuf::from(self.python_interpreter()),
            descriptor_attribute: self
                .python
                .descriptor_attribute
                .clone()
                .unwrap_or_else(|| DEFAULT_DESCRIPTOR_ATTRIBUTE.to_string()),
            working_dir: Some(project_root.to_path_buf()),
        }
    }

    pub fn media_root(&self, project_root: &Path) -> PathBuf {
        match self.files.media_root.as_deref() {
            Some(value) => absolutize(Path::new(value), project_root),
            None => project_root.to_path_buf(),
        }
    }

    pub fn backup_dir(&self, project_root: &Path) -> PathBuf {
        absolutize(
            Path::new(self.backup.dir.as_deref().unwrap_or(DEFAULT_BACKUP_DIR)),
            project_root,
        )
    }

    pub fn keep_dailies(&self) -> usize {
        self.backup.keep_dailies.unwrap_or(DEFAULT_KEEP_DAILIES)
    }

    /// Postgres settings with env overrides (ARCHES_EXT_DB_NAME, _USER, _HOST, _PORT, _PASSWORD).
    pub fn postgres(&self) -> PostgresSettings {
        self.postgres_with_lookup(|key| env::var(key).ok())
    }

    fn postgres_with_lookup<F>(&self, lookup_env: F) -> PostgresSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        let section = &self.postgres;
        PostgresSettings {
            name: non_empty(lookup_env("ARCHES_EXT_DB_NAME"))
                .or_else(|| section.name.clone())
                .unwrap_or_else(|| "arches".to_string()),
            user: non_empty(lookup_env("ARCHES_EXT_DB_USER"))
                .or_else(|| section.user.clone())
                .unwrap_or_else(|| "postgres".to_string()),
            host: non_empty(lookup_env("ARCHES_EXT_DB_HOST"))
                .or_else(|| section.host.clone())
                .unwrap_or_else(|| "localhost".to_string()),
            port: non_empty(lookup_env("ARCHES_EXT_DB_PORT"))
                .and_then(|value| value.parse().ok())
                .or(section.port)
                .unwrap_or(5432),
            password: non_empty(lookup_env("ARCHES_EXT_DB_PASSWORD"))
                .or_else(|| section.password.clone()),
        }
    }
}

/// Load and parse the config file. Returns the default config if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ArchesConfig> {
    if !config_path.exists() {
        return Ok(ArchesConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ArchesConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::runtime::{ResolvedPaths, render_materialized_config};
    use tempfile::tempdir;

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, ArchesConfig::default());
        assert_eq!(config.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(config.keep_dailies(), DEFAULT_KEEP_DAILIES);
    }

    #[test]
    fn materialized_config_parses() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_project(temp.path());
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, render_materialized_config(&paths)).expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.postgres.port, Some(5432));
        assert_eq!(config.resources_index(), "resources");
        assert_eq!(config.search.page_size, Some(250));
        assert_eq!(config.backup.keep_dailies, Some(10));
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[search\nurl = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn env_overrides_search_url_and_trims_slash() {
        let config = ArchesConfig {
            search: SearchSection {
                url: Some("http://es.internal:9200/".to_string()),
                ..SearchSection::default()
            },
            ..ArchesConfig::default()
        };
        assert_eq!(
            config.search_url_with_lookup(|_| None),
            "http://es.internal:9200"
        );

        let env = HashMap::from([(
            "ARCHES_EXT_SEARCH_URL".to_string(),
            " http://override:9200 ".to_string(),
        )]);
        assert_eq!(
            config.search_url_with_lookup(|key| env.get(key).cloned()),
            "http://override:9200"
        );
    }

    #[test]
    fn postgres_settings_layer_env_over_config() {
        let config = ArchesConfig {
            postgres: PostgresSection {
                name: Some("heritage".to_string()),
                port: Some(5433),
                ..PostgresSection::default()
            },
            ..ArchesConfig::default()
        };
        let env = HashMap::from([
            ("ARCHES_EXT_DB_USER".to_string(), "arches_admin".to_string()),
            ("ARCHES_EXT_DB_PASSWORD".to_string(), "secret".to_string()),
        ]);

        let settings = config.postgres_with_lookup(|key| env.get(key).cloned());
        assert_eq!(settings.name, "heritage");
        assert_eq!(settings.user, "arches_admin");
        assert_eq!(settings.host, "localhost");
        assert_eq!(settings.port, 5433);
        assert_eq!(settings.password.as_deref(), Some("secret"));
    }

    #[test]
    fn relative_locations_resolve_from_project_root() {
        let config = ArchesConfig {
            files: FilesSection {
                media_root: Some("uploadedfiles".to_string()),
            },
            ..ArchesConfig::default()
        };
        let root = Path::new("/srv/arches");
        assert_eq!(config.media_root(root), root.join("uploadedfiles"));
        assert_eq!(config.backup_dir(root), root.join(DEFAULT_BACKUP_DIR));
    }
}
