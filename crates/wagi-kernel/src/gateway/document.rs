//! The module configuration document.
//!
//! ```json
//! {
//!   "Wagi": {
//!     "Modules": {
//!       "Write blob": {
//!         "Module": "builtin:blob-write",
//!         "Route": "/writeblob",
//!         "Environment": { "STORAGE_ACCOUNT": "${TEST_STORAGE_ACCOUNT_NAME}" },
//!         "AllowedHosts": [ "https://${TEST_STORAGE_ACCOUNT_NAME}.blob.core.windows.net" ]
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Documents can be layered: [`ModuleDocument::merge`] applies an overlay on
//! top of a base, field by field per module. Keys keep their exact case.
//!
//! JSON documents are read as JSON5, so trailing commas and comments are
//! accepted.

use super::error::GatewayError;
use super::router::RouteConfig;
use super::types::HttpMethod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Serialization format of a module document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
    Toml,
}

impl DocumentFormat {
    /// Detect the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self, GatewayError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| GatewayError::UnsupportedFormat(path.display().to_string()))?;
        match ext.to_lowercase().as_str() {
            "json" => Ok(DocumentFormat::Json),
            "yaml" | "yml" => Ok(DocumentFormat::Yaml),
            "toml" => Ok(DocumentFormat::Toml),
            other => Err(GatewayError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// One module entry as written in the document. Every field is optional so
/// that overlays can declare only what they change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ModuleEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_hosts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ModuleEntry {
    /// Apply `overlay` on top of `self`.
    fn merge(&mut self, overlay: ModuleEntry) {
        if overlay.module.is_some() {
            self.module = overlay.module;
        }
        if overlay.route.is_some() {
            self.route = overlay.route;
        }
        if let Some(env) = overlay.environment {
            self.environment.get_or_insert_with(BTreeMap::new).extend(env);
        }
        if overlay.allowed_hosts.is_some() {
            self.allowed_hosts = overlay.allowed_hosts;
        }
        if overlay.methods.is_some() {
            self.methods = overlay.methods;
        }
        if overlay.timeout_ms.is_some() {
            self.timeout_ms = overlay.timeout_ms;
        }
    }

    fn to_route_config(&self, name: &str) -> Result<RouteConfig, GatewayError> {
        let missing = |field: &str| GatewayError::MissingField(name.to_string(), field.to_string());
        let route = self.route.as_deref().ok_or_else(|| missing("Route"))?;
        let module = self.module.as_deref().ok_or_else(|| missing("Module"))?;

        let methods = self
            .methods
            .iter()
            .flatten()
            .map(|m| {
                HttpMethod::from_str_ci(m)
                    .ok_or_else(|| GatewayError::InvalidMethod(name.to_string(), m.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let timeout_ms = match self.timeout_ms {
            Some(0) => return Err(GatewayError::InvalidRouteTimeout(name.to_string())),
            Some(ms) => ms,
            None => 0,
        };

        let mut config = RouteConfig::new(name, route, module)
            .with_methods(methods)
            .with_timeout_ms(timeout_ms);
        config.environment = self.environment.clone().unwrap_or_default();
        config.allowed_hosts = self.allowed_hosts.clone().unwrap_or_default();
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(rename = "Wagi")]
    wagi: Option<RawWagiSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawWagiSection {
    #[serde(default)]
    modules: BTreeMap<String, ModuleEntry>,
}

/// Parsed `Wagi.Modules` section, keyed by module name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleDocument {
    modules: BTreeMap<String, ModuleEntry>,
}

impl ModuleDocument {
    /// Parse a document from text.
    pub fn from_str(content: &str, format: DocumentFormat) -> Result<Self, GatewayError> {
        let invalid = |e: String| GatewayError::InvalidDocument(e);
        let raw: RawDocument = match format {
            DocumentFormat::Json => json5::from_str(content).map_err(|e| invalid(e.to_string()))?,
            DocumentFormat::Yaml => serde_yaml::from_str(content).map_err(|e| invalid(e.to_string()))?,
            DocumentFormat::Toml => toml::from_str(content).map_err(|e| invalid(e.to_string()))?,
        };
        let section = raw
            .wagi
            .ok_or_else(|| invalid("missing top-level 'Wagi' section".to_string()))?;
        Ok(Self {
            modules: section.modules,
        })
    }

    /// Read and parse a document file, detecting the format from its extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let format = DocumentFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::InvalidDocument(format!("{}: {e}", path.display())))?;
        Self::from_str(&content, format)
    }

    /// Load several documents, each overriding the previous ones.
    pub fn load_layered<P: AsRef<Path>>(paths: &[P]) -> Result<Self, GatewayError> {
        paths.iter().try_fold(Self::default(), |acc, path| {
            Ok(acc.merge(Self::load(path)?))
        })
    }

    /// Builder: add or overlay one module entry.
    pub fn with_module(mut self, name: impl Into<String>, entry: ModuleEntry) -> Self {
        self.modules.entry(name.into()).or_default().merge(entry);
        self
    }

    /// Overlay `other` on top of `self`.
    pub fn merge(mut self, other: ModuleDocument) -> Self {
        for (name, entry) in other.modules {
            self.modules.entry(name).or_default().merge(entry);
        }
        self
    }

    pub fn modules(&self) -> &BTreeMap<String, ModuleEntry> {
        &self.modules
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Convert every entry to a [`RouteConfig`].
    ///
    /// Fails on the first entry missing `Route`/`Module`, naming an unknown
    /// method, or declaring a zero timeout.
    pub fn to_route_configs(&self) -> Result<Vec<RouteConfig>, GatewayError> {
        self.modules
            .iter()
            .map(|(name, entry)| entry.to_route_config(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"{
        "Logging": { "LogLevel": { "Default": "Information" } },
        "Wagi": {
            "Modules": {
                "Echo": { "Module": "builtin:echo", "Route": "/test" },
                "Write blob": {
                    "Module": "builtin:blob-write",
                    "Route": "/writeblob",
                    "Environment": { "STORAGE_ACCOUNT": "base", "KEEP": "me" }
                }
            }
        }
    }"#;

    const OVERLAY: &str = r#"{
        "Wagi": {
            "Modules": {
                "Write blob": {
                    "Environment": { "STORAGE_ACCOUNT": "acct", "STORAGE_MASTER_KEY": "key" },
                    "AllowedHosts": [ "https://acct.blob.core.windows.net" ],
                    "Route": "/writeblob"
                }
            }
        }
    }"#;

    /// Overlay as handed to the host configuration stream, trailing commas included.
    const TRAILING_COMMA_OVERLAY: &str = r#"{
        "Wagi": {
          "Modules": {
            "Write blob": {
              "Environment" :{
                "STORAGE_ACCOUNT":"wagitest",
                "STORAGE_MASTER_KEY" : "a2V5"
              },
              "AllowedHosts": [
                "https://wagitest.blob.core.windows.net"
              ],
              "Route" : "/writeblob",
            },
            "Read blob": {
              "Environment" :{
                "STORAGE_ACCOUNT":"wagitest",
                "STORAGE_MASTER_KEY" : "a2V5"
              },
              "AllowedHosts": [
                "https://wagitest.blob.core.windows.net"
              ],
              "Route" : "/readblob",
            }
          }
        }
      }"#;

    #[test]
    fn json_accepts_trailing_commas_and_comments() {
        let overlay = ModuleDocument::from_str(TRAILING_COMMA_OVERLAY, DocumentFormat::Json).unwrap();
        let read = overlay.modules().get("Read blob").unwrap();
        assert_eq!(read.route.as_deref(), Some("/readblob"));
        assert_eq!(
            read.allowed_hosts.as_deref(),
            Some(&["https://wagitest.blob.core.windows.net".to_string()][..])
        );

        let base = r#"{
            // shipped defaults
            "Wagi": { "Modules": {
                "Write blob": { "Module": "builtin:blob-write", "Route": "/writeblob" },
                "Read blob": { "Module": "builtin:blob-read", "Route": "/readblob", "TimeoutMs": 2500 },
            } },
        }"#;
        let merged = ModuleDocument::from_str(base, DocumentFormat::Json).unwrap().merge(overlay);
        let routes = merged.to_route_configs().unwrap();
        assert_eq!(routes.len(), 2);
        let read = routes.iter().find(|r| r.id == "Read blob").unwrap();
        assert_eq!(read.timeout_ms, 2500);
        assert_eq!(read.environment.get("STORAGE_ACCOUNT").unwrap(), "wagitest");
    }

    #[test]
    fn parses_json_document() {
        let doc = ModuleDocument::from_str(BASE, DocumentFormat::Json).unwrap();
        assert_eq!(doc.modules().len(), 2);
        let routes = doc.to_route_configs().unwrap();
        let echo = routes.iter().find(|r| r.id == "Echo").unwrap();
        assert_eq!(echo.path_pattern, "/test");
        assert_eq!(echo.module_reference, "builtin:echo");
        assert!(echo.allowed_hosts.is_empty());
    }

    #[test]
    fn overlay_merges_environment_and_replaces_hosts() {
        let base = ModuleDocument::from_str(BASE, DocumentFormat::Json).unwrap();
        let overlay = ModuleDocument::from_str(OVERLAY, DocumentFormat::Json).unwrap();
        let merged = base.merge(overlay);
        let routes = merged.to_route_configs().unwrap();
        let write = routes.iter().find(|r| r.id == "Write blob").unwrap();
        assert_eq!(write.module_reference, "builtin:blob-write");
        assert_eq!(write.environment.get("STORAGE_ACCOUNT").unwrap(), "acct");
        assert_eq!(write.environment.get("STORAGE_MASTER_KEY").unwrap(), "key");
        assert_eq!(write.environment.get("KEEP").unwrap(), "me");
        assert_eq!(write.allowed_hosts, vec!["https://acct.blob.core.windows.net".to_string()]);
    }

    #[test]
    fn environment_key_case_is_preserved() {
        let doc = ModuleDocument::from_str(OVERLAY, DocumentFormat::Json).unwrap();
        let entry = doc.modules().get("Write blob").unwrap();
        assert!(entry.environment.as_ref().unwrap().contains_key("STORAGE_MASTER_KEY"));
    }

    #[test]
    fn overlay_only_module_lacks_module_reference() {
        let doc = ModuleDocument::from_str(OVERLAY, DocumentFormat::Json).unwrap();
        assert_eq!(
            doc.to_route_configs(),
            Err(GatewayError::MissingField("Write blob".into(), "Module".into()))
        );
    }

    #[test]
    fn missing_wagi_section_is_invalid() {
        let err = ModuleDocument::from_str(r#"{ "Logging": {} }"#, DocumentFormat::Json).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidDocument(_)));
    }

    #[test]
    fn unknown_module_field_is_invalid() {
        let doc = r#"{ "Wagi": { "Modules": { "A": { "Route": "/a", "Module": "builtin:echo", "Rout": "/b" } } } }"#;
        assert!(matches!(
            ModuleDocument::from_str(doc, DocumentFormat::Json),
            Err(GatewayError::InvalidDocument(_))
        ));
    }

    #[test]
    fn methods_and_timeout_are_parsed() {
        let doc = r#"{ "Wagi": { "Modules": { "Read blob": {
            "Route": "/readblob", "Module": "builtin:blob-read",
            "Methods": ["get", "HEAD"], "TimeoutMs": 2500 } } } }"#;
        let routes = ModuleDocument::from_str(doc, DocumentFormat::Json)
            .unwrap()
            .to_route_configs()
            .unwrap();
        assert_eq!(routes[0].methods, vec![HttpMethod::Get, HttpMethod::Head]);
        assert_eq!(routes[0].timeout_ms, 2500);
    }

    #[test]
    fn unknown_method_and_zero_timeout_are_rejected() {
        let bad_method = r#"{ "Wagi": { "Modules": { "A": { "Route": "/a", "Module": "m", "Methods": ["BREW"] } } } }"#;
        assert_eq!(
            ModuleDocument::from_str(bad_method, DocumentFormat::Json).unwrap().to_route_configs(),
            Err(GatewayError::InvalidMethod("A".into(), "BREW".into()))
        );
        let zero = r#"{ "Wagi": { "Modules": { "A": { "Route": "/a", "Module": "m", "TimeoutMs": 0 } } } }"#;
        assert_eq!(
            ModuleDocument::from_str(zero, DocumentFormat::Json).unwrap().to_route_configs(),
            Err(GatewayError::InvalidRouteTimeout("A".into()))
        );
    }

    #[test]
    fn parses_yaml_and_toml() {
        let yaml = "Wagi:\n  Modules:\n    Echo:\n      Module: builtin:echo\n      Route: /test\n";
        let doc = ModuleDocument::from_str(yaml, DocumentFormat::Yaml).unwrap();
        assert_eq!(doc.to_route_configs().unwrap()[0].path_pattern, "/test");

        let toml = "[Wagi.Modules.Echo]\nModule = \"builtin:echo\"\nRoute = \"/test\"\n";
        let doc = ModuleDocument::from_str(toml, DocumentFormat::Toml).unwrap();
        assert_eq!(doc.to_route_configs().unwrap()[0].module_reference, "builtin:echo");
    }

    #[test]
    fn layered_files_override_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("appsettings.json");
        let overlay = dir.path().join("overlay.json");
        std::fs::write(&base, BASE).unwrap();
        std::fs::write(&overlay, OVERLAY).unwrap();

        let doc = ModuleDocument::load_layered(&[base, overlay]).unwrap();
        let routes = doc.to_route_configs().unwrap();
        assert_eq!(routes.len(), 2);
    }

    #[test]
    fn format_detection() {
        assert_eq!(DocumentFormat::from_path(Path::new("a.JSON")).unwrap(), DocumentFormat::Json);
        assert_eq!(DocumentFormat::from_path(Path::new("a.yml")).unwrap(), DocumentFormat::Yaml);
        assert!(DocumentFormat::from_path(Path::new("a.ini")).is_err());
        assert!(DocumentFormat::from_path(Path::new("noext")).is_err());
    }
}
