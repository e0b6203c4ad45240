//! Layered configuration: built-in defaults, then `supertool.toml` (or an
//! explicit file), then `SUPERTOOL_*` environment variables.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::debug;

use crate::database::PersistenceMode;
use crate::error::{Result, SupertoolError};
use crate::filters::FilterStore;
use crate::script::IncludePath;

pub const DEFAULT_CONFIG_FILE: &str = "supertool";
pub const DEFAULT_ROW_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    /// SQLite file of the host database; in memory when absent.
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub include_dir: Option<PathBuf>,
    #[serde(default)]
    pub custom_filters: Option<PathBuf>,
    pub row_limit: usize,
    pub csv_delimiter: String,
    pub listen: String,
    pub log: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database: None,
            include_dir: None,
            custom_filters: default_custom_filters(),
            row_limit: DEFAULT_ROW_LIMIT,
            csv_delimiter: String::from(","),
            listen: String::from("127.0.0.1:8080"),
            log: String::from("supertool=info"),
        }
    }
}

fn default_custom_filters() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("supertool").join("custom_filters.json"))
}

impl Settings {
    /// Loads the settings. An explicit file must exist; the default
    /// `supertool.toml` in the working directory is optional.
    pub fn load(file: Option<&Path>) -> Result<Settings> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            .set_default("row_limit", defaults.row_limit as i64)?
            .set_default("csv_delimiter", defaults.csv_delimiter.clone())?
            .set_default("listen", defaults.listen.clone())?
            .set_default("log", defaults.log.clone())?;
        if let Some(filters) = &defaults.custom_filters {
            builder = builder.set_default("custom_filters", filters.to_string_lossy().into_owned())?;
        }
        builder = match file {
            Some(path) => {
                if !path.exists() {
                    return Err(SupertoolError::Config(format!(
                        "Configuration file '{}' does not exist",
                        path.display()
                    )));
                }
                builder.add_source(File::from(path).required(true))
            }
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };
        let settings: Settings = builder
            .add_source(Environment::with_prefix("SUPERTOOL").try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        debug!(?settings, "settings loaded");
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.csv_delimiter.chars().count() != 1 {
            return Err(SupertoolError::Config(format!(
                "csv_delimiter must be a single character, got '{}'",
                self.csv_delimiter
            )));
        }
        Ok(())
    }

    pub fn delimiter(&self) -> char {
        self.csv_delimiter.chars().next().unwrap_or(',')
    }

    pub fn persistence_mode(&self) -> PersistenceMode {
        match &self.database {
            Some(path) if !path.is_empty() => PersistenceMode::File(path.clone()),
            _ => PersistenceMode::InMemory,
        }
    }

    pub fn filter_store(&self) -> FilterStore {
        FilterStore::new(self.custom_filters.clone())
    }

    pub fn include_path(&self) -> IncludePath {
        IncludePath::standard(self.include_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "row_limit = 5\ncsv_delimiter = \";\"\ndatabase = \"genealogy.db\"\n").unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.row_limit, 5);
        assert_eq!(settings.delimiter(), ';');
        assert_eq!(settings.listen, "127.0.0.1:8080");
        assert_eq!(
            settings.persistence_mode(),
            PersistenceMode::File(String::from("genealogy.db"))
        );
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let error = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(error, SupertoolError::Config(_)));
    }

    #[test]
    fn delimiter_must_be_one_character() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "csv_delimiter = \"::\"\n").unwrap();
        assert!(Settings::load(Some(&path)).is_err());
    }
}
