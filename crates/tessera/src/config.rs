#![forbid(unsafe_code)]

//! Combined engine configuration.
//!
//! With the `policy-config` feature the configuration can be read from
//! TOML. Missing tables and keys fall back to their defaults:
//!
//! ```toml
//! [view]
//! catch_panics = false
//! max_follow_up_passes = 4
//!
//! [loader]
//! preload_enabled = true
//! max_inflight_preloads = 2
//! ```

use std::fmt;

use tessera_loader::LoaderConfig;
use tessera_view::UpdateConfig;

/// Configuration of both engines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "policy-config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "policy-config", serde(default))]
pub struct EngineConfig {
    pub view: UpdateConfig,
    pub loader: LoaderConfig,
}

impl EngineConfig {
    #[must_use]
    pub fn with_view(mut self, view: UpdateConfig) -> Self {
        self.view = view;
        self
    }

    #[must_use]
    pub fn with_loader(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }

    /// Parse a configuration from TOML text.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Read and parse a TOML configuration file.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render the configuration as TOML.
    #[cfg(feature = "policy-config")]
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|err| ConfigError::Serialize(err.to_string()))
    }
}

/// Failure to load an [`EngineConfig`].
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    Serialize(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "reading config: {err}"),
            Self::Parse(msg) => write!(f, "parsing config: {msg}"),
            Self::Serialize(msg) => write!(f, "writing config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(_) | Self::Serialize(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_defaults() {
        let config = EngineConfig::default();
        assert!(config.view.catch_panics);
        assert_eq!(config.view.max_follow_up_passes, 10);
        assert!(config.loader.preload_enabled);
        assert_eq!(config.loader.max_inflight_preloads, 4);
    }

    #[test]
    fn builders_replace_sections() {
        let config = EngineConfig::default()
            .with_view(UpdateConfig::default().with_catch_panics(false))
            .with_loader(LoaderConfig::default().with_max_inflight_preloads(1));
        assert!(!config.view.catch_panics);
        assert_eq!(config.loader.max_inflight_preloads, 1);
    }

    #[cfg(feature = "policy-config")]
    mod toml_loading {
        use super::*;

        #[test]
        fn partial_toml_keeps_defaults() {
            let config = EngineConfig::from_toml_str(
                "[view]\nmax_follow_up_passes = 3\n\n[loader]\npreload_enabled = false\n",
            )
            .unwrap();
            assert_eq!(config.view.max_follow_up_passes, 3);
            assert!(config.view.catch_panics);
            assert!(!config.loader.preload_enabled);
            assert_eq!(config.loader.max_inflight_preloads, 4);
        }

        #[test]
        fn empty_toml_is_default() {
            assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
        }

        #[test]
        fn round_trips_through_toml() {
            let config = EngineConfig::default()
                .with_loader(LoaderConfig::default().with_max_inflight_preloads(7));
            let text = config.to_toml_string().unwrap();
            assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
        }

        #[test]
        fn bad_types_are_reported() {
            let err = EngineConfig::from_toml_str("[view]\ncatch_panics = \"yes\"\n").unwrap_err();
            assert!(matches!(err, ConfigError::Parse(_)));
            assert!(err.to_string().starts_with("parsing config"));
        }
    }
}
