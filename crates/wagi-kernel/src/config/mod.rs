//! Settings loading.
//!
//! Gateway process settings (listen address, limits, default deadline) are
//! read through the `config` crate: an optional settings file whose format is
//! detected from its extension, overlaid by prefixed environment variables.
//!
//! The module *document* is not loaded here: it is parsed by
//! [`crate::gateway::ModuleDocument`] so that environment key case survives.

use config::{Config as Cfg, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Settings loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Detect configuration format from file extension
///
/// # Supported Extensions
///
/// - YAML: `.yaml`, `.yml`
/// - TOML: `.toml`
/// - JSON: `.json`
pub fn detect_format(path: impl AsRef<Path>) -> ConfigResult<FileFormat> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat(format!("no file extension on {}", path.display())))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Load settings from a string with explicit format
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let config = Cfg::builder()
        .add_source(File::from_str(content, format))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load settings with environment variable overrides
///
/// The file is optional; when absent only the environment and the target
/// type's serde defaults apply. Environment variables use the given prefix
/// and double underscores for nesting, so `WAGI_LIMITS__MAX_FUEL` sets
/// `limits.max_fuel`.
pub fn load_with_env<T>(path: Option<&Path>, env_prefix: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let mut builder = Cfg::builder();

    if let Some(path) = path {
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        builder = builder.add_source(File::from_str(&content, format));
    }

    let config = builder
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Limits {
        max_fuel: u64,
    }

    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct TestSettings {
        listen: String,
        #[serde(default)]
        request_timeout_ms: Option<u64>,
        limits: Limits,
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format("settings.yaml").unwrap(), FileFormat::Yaml);
        assert_eq!(detect_format("settings.yml").unwrap(), FileFormat::Yaml);
        assert_eq!(detect_format("settings.toml").unwrap(), FileFormat::Toml);
        assert_eq!(detect_format("settings.JSON").unwrap(), FileFormat::Json);
        assert!(detect_format("settings.txt").is_err());
        assert!(detect_format("settings").is_err());
    }

    #[test]
    fn test_from_str_toml() {
        let toml = r#"
listen = "127.0.0.1:3000"
request_timeout_ms = 500

[limits]
max_fuel = 1000
"#;
        let settings: TestSettings = from_str(toml, FileFormat::Toml).unwrap();
        assert_eq!(settings.listen, "127.0.0.1:3000");
        assert_eq!(settings.request_timeout_ms, Some(500));
        assert_eq!(settings.limits.max_fuel, 1000);
    }

    #[test]
    fn test_from_str_yaml() {
        let yaml = r#"
listen: 0.0.0.0:8080
limits:
  max_fuel: 7
"#;
        let settings: TestSettings = from_str(yaml, FileFormat::Yaml).unwrap();
        assert_eq!(settings.listen, "0.0.0.0:8080");
        assert_eq!(settings.request_timeout_ms, None);
        assert_eq!(settings.limits.max_fuel, 7);
    }

    #[test]
    fn test_missing_field_is_serialization_error() {
        let err = from_str::<TestSettings>(r#"{ "listen": "x" }"#, FileFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::Serialization(_)));
    }

    #[test]
    fn test_load_with_env_reads_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{ "listen": "127.0.0.1:9000", "limits": {{ "max_fuel": 42 }} }}"#).unwrap();

        let settings: TestSettings =
            load_with_env(Some(file.path()), "WAGI_KERNEL_CONFIG_TEST").unwrap();
        assert_eq!(settings.listen, "127.0.0.1:9000");
        assert_eq!(settings.limits.max_fuel, 42);
    }

    #[test]
    fn test_load_with_env_missing_file_is_io_error() {
        let err = load_with_env::<TestSettings>(
            Some(Path::new("/nonexistent/wagi-settings.toml")),
            "WAGI_KERNEL_CONFIG_TEST",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
