use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::processing::gpu::AdapterPreference;

/// Environment variable that overrides the configured adapter preference.
pub const ADAPTER_ENV: &str = "DEEPFRY_ADAPTER";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
/// Persisted settings for the command-line front end.
pub struct AppConfig {
    pub adapter: Option<String>,
    pub export_dir: Option<PathBuf>,
    pub default_preset: Option<String>,
    pub default_quality: Option<f32>,
}

impl AppConfig {
    /// Returns the user config file path, if a config directory is available.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("deepfry").join("config.toml"))
    }

    /// Loads config from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Self {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring malformed config");
                Self::default()
            }
        }
    }

    /// Writes config to disk, ignoring filesystem/serialization errors.
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            self.save_to(&path);
        }
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(s) = toml::to_string_pretty(self) {
            let _ = std::fs::write(path, s);
        }
    }
}

pub fn parse_adapter_preference(value: &str) -> AdapterPreference {
    match value.trim().to_ascii_lowercase().as_str() {
        "high" | "high_performance" | "discrete" => AdapterPreference::HighPerformance,
        "low" | "low_power" | "integrated" => AdapterPreference::LowPower,
        "fallback" | "software" | "cpu" => AdapterPreference::Fallback,
        _ => AdapterPreference::Auto,
    }
}

/// Environment first, then the config file, then [`AdapterPreference::Auto`].
pub fn resolve_adapter_preference(config: &AppConfig) -> AdapterPreference {
    resolve_adapter_from(std::env::var(ADAPTER_ENV).ok().as_deref(), config)
}

fn resolve_adapter_from(env: Option<&str>, config: &AppConfig) -> AdapterPreference {
    if let Some(raw) = env {
        return parse_adapter_preference(raw);
    }
    if let Some(raw) = config.adapter.as_deref() {
        return parse_adapter_preference(raw);
    }
    AdapterPreference::Auto
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_adapter_preference_handles_supported_values() {
        assert_eq!(parse_adapter_preference("high"), AdapterPreference::HighPerformance);
        assert_eq!(parse_adapter_preference(" LOW "), AdapterPreference::LowPower);
        assert_eq!(parse_adapter_preference("fallback"), AdapterPreference::Fallback);
        assert_eq!(parse_adapter_preference("auto"), AdapterPreference::Auto);
        assert_eq!(parse_adapter_preference("quantum"), AdapterPreference::Auto);
    }

    #[test]
    fn environment_beats_config_file() {
        let config = AppConfig {
            adapter: Some("low".to_string()),
            ..AppConfig::default()
        };
        assert_eq!(
            resolve_adapter_from(Some("fallback"), &config),
            AdapterPreference::Fallback
        );
        assert_eq!(resolve_adapter_from(None, &config), AdapterPreference::LowPower);
        assert_eq!(
            resolve_adapter_from(None, &AppConfig::default()),
            AdapterPreference::Auto
        );
    }

    #[test]
    fn config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deepfry").join("config.toml");
        let config = AppConfig {
            adapter: Some("high".to_string()),
            export_dir: Some(PathBuf::from("/tmp/fried")),
            default_preset: Some("nuclear".to_string()),
            default_quality: Some(35.0),
        };
        config.save_to(&path);
        assert_eq!(AppConfig::load_from(&path), config);
    }

    #[test]
    fn missing_or_malformed_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            AppConfig::load_from(&dir.path().join("absent.toml")),
            AppConfig::default()
        );
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "adapter = [").unwrap();
        assert_eq!(AppConfig::load_from(&path), AppConfig::default());
    }
}
