//! Configuration management.

use crate::types::{ModelId, ModelPricing, ModelRole};
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Top-level configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub orchestrator: OrchestratorConfig,
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub model_catalog: HashMap<String, ModelPricing>,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub addr: String,
    pub max_body_bytes: u64,
    #[serde(default)]
    pub audit_dir: Option<String>,
}

/// Orchestrator defaults applied when a submitted run omits a policy field.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    pub default_max_parallelism: usize,
    pub default_timeout_ms: u64,
    pub default_currency: String,
    pub chars_per_token: u32,
    pub retention_secs: u64,
    pub prune_interval_secs: u64,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
    pub log_level: String,
    pub log_format: LogFormat,
}

/// Log format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Config {
    /// Load configuration from an optional `config.toml`, then environment
    /// variables prefixed `WORKFLOW_RUNTIME`, layered over the built-in
    /// defaults (mirrors the teacher crate's builder pattern).
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder()
            .set_default("server.addr", "0.0.0.0:8080")?
            .set_default("server.max_body_bytes", 4 * 1024 * 1024)?
            .set_default("orchestrator.default_max_parallelism", 4)?
            .set_default("orchestrator.default_timeout_ms", 0)?
            .set_default("orchestrator.default_currency", "USD")?
            .set_default("orchestrator.chars_per_token", 4)?
            .set_default("orchestrator.retention_secs", 3600)?
            .set_default("orchestrator.prune_interval_secs", 60)?
            .set_default("observability.metrics_enabled", true)?
            .set_default("observability.log_level", "info")?
            .set_default("observability.log_format", "compact")?;

        let path = config_file.unwrap_or("config.toml");
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("WORKFLOW_RUNTIME")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config.with_default_catalog_seeded())
    }

    /// Merge the built-in seed catalog under any entries the config file
    /// or environment did not already provide.
    fn with_default_catalog_seeded(mut self) -> Self {
        for (id, pricing) in default_model_catalog() {
            self.model_catalog.entry(id).or_insert(pricing);
        }
        self
    }

    /// Resolve a catalog entry by role (flagship/balanced/fast), if any
    /// model advertises that role.
    #[must_use]
    pub fn resolve_role(&self, role: ModelRole) -> Option<ModelId> {
        self.model_catalog
            .iter()
            .find(|(_, pricing)| pricing.default_role == Some(role))
            .map(|(id, _)| ModelId(id.clone()))
    }
}

/// Small static seed table. Real pricing data is explicitly out of
/// scope (spec.md §1) — this exists only so the runtime works without
/// an external catalog file.
fn default_model_catalog() -> HashMap<String, ModelPricing> {
    let mut catalog = HashMap::new();
    catalog.insert(
        "flagship-1".to_string(),
        ModelPricing {
            provider: "generic".to_string(),
            input_per_million: 5.0,
            output_per_million: 15.0,
            max_context: 200_000,
            default_role: Some(ModelRole::Flagship),
            supports_tools: true,
        },
    );
    catalog.insert(
        "balanced-1".to_string(),
        ModelPricing {
            provider: "generic".to_string(),
            input_per_million: 1.0,
            output_per_million: 3.0,
            max_context: 128_000,
            default_role: Some(ModelRole::Balanced),
            supports_tools: true,
        },
    );
    catalog.insert(
        "fast-1".to_string(),
        ModelPricing {
            provider: "generic".to_string(),
            input_per_million: 0.1,
            output_per_million: 0.3,
            max_context: 32_000,
            default_role: Some(ModelRole::Fast),
            supports_tools: false,
        },
    );
    catalog
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                addr: "0.0.0.0:8080".to_string(),
                max_body_bytes: 4 * 1024 * 1024,
                audit_dir: None,
            },
            orchestrator: OrchestratorConfig {
                default_max_parallelism: 4,
                default_timeout_ms: 0,
                default_currency: "USD".to_string(),
                chars_per_token: 4,
                retention_secs: 3600,
                prune_interval_secs: 60,
            },
            observability: ObservabilityConfig {
                metrics_enabled: true,
                log_level: "info".to_string(),
                log_format: LogFormat::Compact,
            },
            model_catalog: default_model_catalog(),
        }
    }
}
