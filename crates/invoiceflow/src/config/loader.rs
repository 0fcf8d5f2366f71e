use std::path::Path;

use crate::config::schema::{Config, QueueConfig};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

const MAX_QUEUE_ATTEMPTS: u32 = 10;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let base_url = config.ocr.base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::Validation {
            message: format!("OCR base_url must be an http(s) URL, got '{}'", base_url),
        });
    }

    if config.ocr.retry.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "ocr.retry.max_attempts must be at least 1".to_string(),
        });
    }

    validate_queue("processing", &config.queues.processing)?;
    validate_queue("notifications", &config.queues.notifications)?;

    if config.progress.channel_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "progress.channel_capacity must be positive".to_string(),
        });
    }

    Ok(())
}

fn validate_queue(name: &str, queue: &QueueConfig) -> Result<(), ConfigError> {
    if queue.concurrency == 0 {
        return Err(ConfigError::Validation {
            message: format!("queues.{}.concurrency must be positive", name),
        });
    }
    if queue.attempts == 0 || queue.attempts > MAX_QUEUE_ATTEMPTS {
        return Err(ConfigError::Validation {
            message: format!(
                "queues.{}.attempts must be between 1 and {}, got {}",
                name, MAX_QUEUE_ATTEMPTS, queue.attempts
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_load_minimal_config() {
        let config = load_config_from_str(
            r#"{ "version": "1.0", "ocr": { "base_url": "http://localhost:8000" } }"#,
        )
        .unwrap();

        assert_eq!(config.ocr.timeout_secs, 300);
        assert_eq!(config.ocr.language, "eng");
        assert_eq!(config.ocr.cache.ttl_secs, 86_400);
        assert!(!config.ocr.api_key.is_configured());

        let scheduler = config.scheduler_settings();
        assert_eq!(scheduler.processing_attempts, 3);
        assert_eq!(scheduler.notification_attempts, 5);
        assert!(scheduler.processing_concurrency >= 1);
        assert!(config.database_path().is_some());
    }

    #[test]
    fn test_load_full_config() {
        let config = load_config_from_str(
            r#"
            {
                "version": "1.0",
                "database_path": "/var/lib/invoiceflow/db.sqlite",
                "ocr": {
                    "base_url": "https://ocr.internal",
                    "api_key": { "env": "OCR_API_KEY" },
                    "timeout_secs": 60,
                    "dpi": 200,
                    "retry": { "max_attempts": 4, "base_delay_ms": 250 },
                    "cache": { "max_entries": 50, "ttl_secs": 600 }
                },
                "queues": {
                    "processing": { "concurrency": 8, "attempts": 3, "backoff_ms": 1000 },
                    "notifications": { "concurrency": 1, "attempts": 5, "backoff_ms": 500 }
                },
                "webhook": { "timeout_secs": 5 }
            }
            "#,
        )
        .unwrap();

        let settings = config.ocr.settings();
        assert_eq!(settings.dpi, 200);
        assert_eq!(settings.retry.max_attempts, 4);
        assert_eq!(settings.retry.base_delay, Duration::from_millis(250));
        assert_eq!(settings.cache_ttl, Duration::from_secs(600));
        assert_eq!(config.scheduler_settings().processing_concurrency, 8);
        assert_eq!(
            config.scheduler_settings().notification_backoff,
            Duration::from_millis(500)
        );
        assert_eq!(config.ocr.api_key.env.as_deref(), Some("OCR_API_KEY"));
    }

    #[test]
    fn test_schema_rejects_unknown_fields() {
        let result = load_config_from_str(
            r#"{ "version": "1.0", "ocr": { "base_url": "http://x" }, "workers": 3 }"#,
        );
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_schema_rejects_bad_url_and_version() {
        assert!(matches!(
            load_config_from_str(r#"{ "version": "1.0", "ocr": { "base_url": "ftp://x" } }"#),
            Err(ConfigError::SchemaValidation { .. })
        ));
        assert!(matches!(
            load_config_from_str(r#"{ "version": "2.0", "ocr": { "base_url": "http://x" } }"#),
            Err(ConfigError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = load_config_from_str(
            r#"{
                "version": "1.0",
                "ocr": { "base_url": "http://x" },
                "queues": { "processing": { "concurrency": 0, "attempts": 3, "backoff_ms": 10 } }
            }"#,
        );
        match result {
            Err(ConfigError::Validation { message }) => {
                assert!(message.contains("processing.concurrency"))
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_too_many_attempts_rejected() {
        let result = load_config_from_str(
            r#"{
                "version": "1.0",
                "ocr": { "base_url": "http://x" },
                "queues": { "notifications": { "concurrency": 1, "attempts": 11, "backoff_ms": 10 } }
            }"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "version": "1.0", "ocr": {{ "base_url": "http://localhost:8000" }} }}"#
        )
        .unwrap();
        assert!(load_config(file.path()).is_ok());

        assert!(matches!(
            load_config("/nonexistent/invoiceflow.json"),
            Err(ConfigError::ReadFile { .. })
        ));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            load_config_from_str("{ not json"),
            Err(ConfigError::ParseJson(_))
        ));
    }
}
