use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ocr::{OcrSettings, RetryPolicy};
use crate::scheduler::SchedulerSettings;
use crate::secrets::SecretSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Defaults to `~/.invoiceflow/data/invoiceflow.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    pub ocr: OcrConfig,
    #[serde(default)]
    pub queues: QueuesConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

impl Config {
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            processing_concurrency: self.queues.processing.concurrency,
            processing_attempts: self.queues.processing.attempts,
            processing_backoff: Duration::from_millis(self.queues.processing.backoff_ms),
            notification_concurrency: self.queues.notifications.concurrency,
            notification_attempts: self.queues.notifications.attempts,
            notification_backoff: Duration::from_millis(self.queues.notifications.backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: SecretSource,
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    #[serde(default)]
    pub retry: OcrRetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl OcrConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn settings(&self) -> OcrSettings {
        let defaults = OcrSettings::default();
        OcrSettings {
            language: self.language.clone(),
            dpi: self.dpi,
            scratch_dir: self.scratch_dir.clone().unwrap_or(defaults.scratch_dir),
            cache_ttl: Duration::from_secs(self.cache.ttl_secs),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
                multiplier: self.retry.multiplier,
            },
        }
    }
}

fn default_ocr_timeout_secs() -> u64 {
    300
}

fn default_language() -> String {
    "eng".to_string()
}

fn default_dpi() -> u32 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrRetryConfig {
    #[serde(default = "default_ocr_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_ocr_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_ocr_attempts() -> u32 {
    3
}

fn default_ocr_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for OcrRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_ocr_attempts(),
            base_delay_ms: default_ocr_base_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_entries")]
    pub max_entries: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_cache_entries() -> u64 {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
            ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuesConfig {
    #[serde(default = "QueueConfig::processing")]
    pub processing: QueueConfig,
    #[serde(default = "QueueConfig::notifications")]
    pub notifications: QueueConfig,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            processing: QueueConfig::processing(),
            notifications: QueueConfig::notifications(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl QueueConfig {
    fn processing() -> Self {
        Self {
            concurrency: num_cpus::get().clamp(1, 4),
            attempts: 3,
            backoff_ms: 5000,
        }
    }

    fn notifications() -> Self {
        Self {
            concurrency: 2,
            attempts: 5,
            backoff_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_webhook_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    32
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}
