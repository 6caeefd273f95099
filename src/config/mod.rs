//! Configuration loading
//!
//! Values are layered with figment, lowest priority first:
//!
//! 1. defaults embedded from `default-config.toml`
//! 2. user config in `~/.config/compliance-reports/config.{toml,json,yaml}`
//! 3. repository config `compliance-reports.{toml,json,yaml}` in the working
//!    directory, or the single file given with `--config`
//! 4. `COMPLIANCE_REPORTS_` environment variables, `__` separating sections
//!    (`COMPLIANCE_REPORTS_DELIVERY__EMAIL_SEND_ATTEMPTS=5`)

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sender::{EmailTemplate, RetryPolicy};

const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");

pub const ENV_PREFIX: &str = "COMPLIANCE_REPORTS_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportsConfig {
    pub delivery: DeliveryConfig,
    pub email: EmailTemplate,
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifiers: Vec<NotifierEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub email_send_attempts: u32,
    pub backoff_base_ms: u64,
}

impl DeliveryConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.email_send_attempts,
            Duration::from_millis(self.backoff_base_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub blob_dir: PathBuf,
    pub outbox_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    /// Writes emails into `storage.outbox_dir`
    Outbox,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierEntry {
    pub id: String,
    pub kind: NotifierKind,
}

impl ReportsConfig {
    pub fn load(custom_config: Option<&str>) -> Result<Self> {
        Self::figment(custom_config)
            .extract()
            .context("Failed to load configuration")
    }

    pub fn figment(custom_config: Option<&str>) -> Figment {
        let mut figment = Figment::new().merge(Toml::string(DEFAULT_CONFIG));

        if let Some(path) = custom_config {
            figment = figment.merge(file_provider(Path::new(path)));
        } else {
            let user = user_config_dir();
            figment = figment
                .merge(Toml::file(user.join("config.toml")))
                .merge(Json::file(user.join("config.json")))
                .merge(Yaml::file(user.join("config.yaml")))
                .merge(Toml::file("compliance-reports.toml"))
                .merge(Json::file("compliance-reports.json"))
                .merge(Yaml::file("compliance-reports.yaml"));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.delivery.email_send_attempts == 0 {
            anyhow::bail!("delivery.email_send_attempts must be at least 1");
        }
        if self.email.subject_template.trim().is_empty() {
            anyhow::bail!("email.subject_template must not be empty");
        }
        if self.email.body_template.trim().is_empty() {
            anyhow::bail!("email.body_template must not be empty");
        }

        let mut seen = std::collections::HashSet::new();
        for notifier in &self.notifiers {
            if notifier.id.is_empty() {
                anyhow::bail!("notifier ids must not be empty");
            }
            if !seen.insert(notifier.id.as_str()) {
                anyhow::bail!("duplicate notifier id: {}", notifier.id);
            }
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// Pick the figment provider matching the file extension, TOML otherwise
fn file_provider(path: &Path) -> Figment {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "json" => Figment::from(Json::file(path)),
        "yaml" | "yml" => Figment::from(Yaml::file(path)),
        _ => Figment::from(Toml::file(path)),
    }
}

fn user_config_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".config/compliance-reports"),
        Err(_) => PathBuf::from("~/.config/compliance-reports"),
    }
}
