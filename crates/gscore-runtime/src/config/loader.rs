//! Layered configuration loading with figment.
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. Profile file (`gscore.{profile}.toml`), profile from `GSCORE_PROFILE`
//!    or [`ConfigLoader::profile`], `development` otherwise
//! 3. Main file (`gscore.toml` / `config.toml`, or YAML with `yaml-config`)
//! 4. `GSCORE_*` environment variables, `__` separating sections:
//!    `GSCORE_SERVER__PORT=9000` sets `server.port`
//! 5. [`ConfigLoader::merge`]
//!
//! Files are looked up in the search paths, which default to the working
//! directory and `<user config dir>/gscore`. The first directory holding a
//! main file wins.
//!
//! ```rust,ignore
//! let config = ConfigLoader::new()
//!     .profile("prod")
//!     .file("./deploy/gscore.toml")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::GsCoreConfig;
use super::validation::validate_config;

const PROFILE_ENV: &str = "GSCORE_PROFILE";
const ENV_PREFIX: &str = "GSCORE_";

type MergeFile = fn(Figment, &Path) -> Figment;

/// Enabled file formats: candidate file names and how to merge one.
#[allow(unused_mut)]
fn file_formats() -> Vec<(&'static [&'static str], MergeFile)> {
    let mut formats: Vec<(&'static [&'static str], MergeFile)> = Vec::new();
    #[cfg(feature = "toml-config")]
    formats.push((&["gscore.toml", "config.toml"], |figment: Figment, path: &Path| {
        figment.merge(Toml::file(path))
    }));
    #[cfg(feature = "yaml-config")]
    formats.push((
        &["gscore.yaml", "gscore.yml", "config.yaml", "config.yml"],
        |figment: Figment, path: &Path| figment.merge(Yaml::file(path)),
    ));
    formats
}

/// `prod` and `dev` are shorthands; other names are used lowercased.
fn normalize_profile(name: &str) -> String {
    match name.to_lowercase().as_str() {
        "prod" | "production" => "production".to_string(),
        "dev" | "development" => "development".to_string(),
        other => other.to_string(),
    }
}

/// `gscore.toml` under profile `production` becomes `gscore.production.toml`.
fn profiled_name(name: &str, profile: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    Some(format!("{stem}.{profile}.{ext}"))
}

/// Builds a [`GsCoreConfig`] from every configured source.
pub struct ConfigLoader {
    profile: String,
    search_paths: Vec<PathBuf>,
    file: Option<PathBuf>,
    env: bool,
    overrides: Figment,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        let profile = std::env::var(PROFILE_ENV)
            .map(|p| normalize_profile(&p))
            .unwrap_or_else(|_| "development".to_string());
        Self {
            profile,
            search_paths: Vec::new(),
            file: None,
            env: true,
            overrides: Figment::new(),
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = normalize_profile(profile.as_ref());
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    /// Merges configuration above every other source.
    pub fn merge(mut self, config: GsCoreConfig) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(config));
        self
    }

    /// Loads, validates and returns the configuration.
    pub fn load(self) -> ConfigResult<GsCoreConfig> {
        let mut figment = Figment::from(Serialized::defaults(GsCoreConfig::default()));

        figment = match &self.file {
            Some(path) => self.merge_explicit(figment, path)?,
            None => self.discover(figment),
        };
        if self.env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }
        let config: GsCoreConfig = figment.merge(self.overrides).extract()?;
        validate_config(&config)?;

        debug!(
            profile = %self.profile,
            port = config.server.port,
            level = %config.logging.level,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn merge_explicit(&self, figment: Figment, path: &Path) -> ConfigResult<Figment> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let merge = file_formats()
            .into_iter()
            .find(|(names, _)| names.iter().any(|n| n.ends_with(&format!(".{ext}"))))
            .map(|(_, merge)| merge)
            .ok_or_else(|| {
                ConfigError::ParseError(format!(
                    "Unsupported or disabled configuration file format: .{ext}"
                ))
            })?;
        info!(path = %path.display(), "Loading configuration file");
        Ok(merge(figment, path))
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join("gscore")))
            .collect()
    }

    /// Per format, the first directory with a main file supplies it and its
    /// profile file.
    fn discover(&self, mut figment: Figment) -> Figment {
        let dirs = self.search_dirs();
        let mut found = false;

        for (names, merge) in file_formats() {
            'dirs: for dir in &dirs {
                for name in names {
                    if let Some(profiled) = profiled_name(name, &self.profile) {
                        let path = dir.join(profiled);
                        if path.exists() {
                            debug!(path = %path.display(), "Loading profile configuration");
                            figment = merge(figment, &path);
                        }
                    }
                    let path = dir.join(name);
                    if path.exists() {
                        info!(path = %path.display(), "Loading configuration file");
                        figment = merge(figment, &path);
                        found = true;
                        break 'dirs;
                    }
                }
            }
        }

        if !found {
            warn!("No configuration file found, using defaults");
        }
        figment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::new()
            .without_env()
            .search_path(dir.path())
            .load()
            .unwrap();
        assert_eq!(config.logging.level.as_str(), "info");
        assert_eq!(config.server.port, 8765);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::new()
            .without_env()
            .file(dir.path().join("absent.toml"))
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn unknown_extension_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gscore.ini");
        std::fs::write(&path, "port=1").unwrap();
        let err = ConfigLoader::new()
            .without_env()
            .file(&path)
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn main_file_overrides_profile_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("gscore.production.toml"),
            "[server]\nport = 9100\nhost = \"0.0.0.0\"\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("gscore.toml"), "[server]\nport = 9200\n").unwrap();

        let config = ConfigLoader::new()
            .without_env()
            .profile("prod")
            .search_path(dir.path())
            .load()
            .unwrap();
        assert_eq!(config.server.port, 9200);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gscore.toml");
        std::fs::write(&path, "[client]\nreconnect_delay_secs = 0\n").unwrap();

        let err = ConfigLoader::new()
            .without_env()
            .file(&path)
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn programmatic_merge_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut overrides = GsCoreConfig::default();
        overrides.server.port = 7000;

        let config = ConfigLoader::new()
            .without_env()
            .search_path(dir.path())
            .merge(overrides)
            .load()
            .unwrap();
        assert_eq!(config.server.port, 7000);
    }

    #[test]
    fn profile_names() {
        assert_eq!(normalize_profile("PROD"), "production");
        assert_eq!(normalize_profile("dev"), "development");
        assert_eq!(normalize_profile("Staging"), "staging");
        assert_eq!(
            profiled_name("gscore.toml", "staging").as_deref(),
            Some("gscore.staging.toml")
        );
    }
}
