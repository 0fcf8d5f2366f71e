//! Secret resolution for credentials referenced from the configuration.
//!
//! A secret can be given in three ways, checked in this order:
//!
//! 1. **Direct value** (`"value": "..."`), handy for local testing
//! 2. **File reference** (`"file": "/run/secrets/ocr_api_key"`), the Docker secrets pattern
//! 3. **Env var reference** (`"env": "OCR_API_KEY"`)

use std::fs;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where to find a secret. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretSource {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub env: Option<String>,
}

impl SecretSource {
    pub fn resolve(&self) -> Result<Option<SecretString>> {
        resolve_secret_optional(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env.as_deref(),
        )
    }

    pub fn is_configured(&self) -> bool {
        has_secret_source(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env.as_deref(),
        )
    }
}

/// Resolves a secret from the first non-empty source: direct value, then
/// file contents, then environment variable. File and env values are trimmed.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return fs::read_to_string(&expanded)
            .map(|content| SecretString::from(content.trim().to_string()))
            .map_err(|e| SecretError::FileReadError {
                path: expanded,
                source: e,
            });
    }

    if let Some(var_name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(var_name) {
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: var_name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: var_name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but `Ok(None)` when nothing is configured.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    direct.is_some_and(|s| !s.is_empty())
        || file_path.is_some_and(|s| !s.is_empty())
        || env_var.is_some_and(|s| !s.is_empty())
}

/// Expands a leading `~` to the home directory. `~user/...` is not supported.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_direct_value_takes_priority() {
        std::env::set_var("INVOICEFLOW_TEST_SECRET_1", "env_value");
        let secret =
            resolve_secret(Some("direct"), None, Some("INVOICEFLOW_TEST_SECRET_1")).unwrap();
        assert_eq!(secret.expose_secret(), "direct");
    }

    #[test]
    fn test_file_takes_priority_over_env() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "  file_value  ").unwrap();
        std::env::set_var("INVOICEFLOW_TEST_SECRET_2", "env_value");

        let path = temp_file.path().to_string_lossy().to_string();
        let secret = resolve_secret(None, Some(&path), Some("INVOICEFLOW_TEST_SECRET_2")).unwrap();
        assert_eq!(secret.expose_secret(), "file_value");
    }

    #[test]
    fn test_env_var_fallback() {
        std::env::set_var("INVOICEFLOW_TEST_SECRET_3", "env_value\n");
        let secret = resolve_secret(Some(""), Some(""), Some("INVOICEFLOW_TEST_SECRET_3")).unwrap();
        assert_eq!(secret.expose_secret(), "env_value");
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            resolve_secret(None, None, None),
            Err(SecretError::NoSourceProvided)
        ));
        assert!(matches!(
            resolve_secret(None, Some("/nonexistent/secret"), None),
            Err(SecretError::FileReadError { .. })
        ));
        assert!(matches!(
            resolve_secret(None, None, Some("INVOICEFLOW_DEFINITELY_NOT_SET")),
            Err(SecretError::EnvVarNotSet { .. })
        ));
    }

    #[test]
    fn test_source_from_config_json() {
        let source: SecretSource = serde_json::from_str(r#"{"value": "k-123"}"#).unwrap();
        assert!(source.is_configured());
        let secret = source.resolve().unwrap().unwrap();
        assert_eq!(secret.expose_secret(), "k-123");

        let empty = SecretSource::default();
        assert!(!empty.is_configured());
        assert!(empty.resolve().unwrap().is_none());

        assert!(serde_json::from_str::<SecretSource>(r#"{"token": "x"}"#).is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/etc/secret"), "/etc/secret");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_home("~/key"),
                format!("{}/key", home.to_string_lossy())
            );
        }
    }
}
