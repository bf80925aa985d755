use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AttestError;
use crate::retry::RetryPolicy;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Resolve `${VAR_NAME}` references using the process environment.
///
/// Used for secrets in source headers and webhook URLs. A missing variable
/// or an unclosed reference is an error naming the offending input.
pub fn resolve_env_vars(input: &str) -> Result<String, AttestError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if !closed {
                return Err(AttestError::Config(format!(
                    "unclosed env var reference in: {input}"
                )));
            }
            let value = env::var(&var_name)
                .map_err(|_| AttestError::Config(format!("env var not found: {var_name}")))?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub pipeline: PipelineConfig,
    pub adapters: AdapterConfig,
    pub sink: SinkConfig,
    pub rules: RulesConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `ATTEST_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("ATTEST_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            pipeline: PipelineConfig::from_env_profiled(p),
            adapters: AdapterConfig::from_env_profiled(p),
            sink: SinkConfig::from_env_profiled(p),
            rules: RulesConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs (the webhook URL is not logged).
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  pipeline:  idempotency_window={}s, dedup_cap={}, dispatch_attempts={}",
            self.pipeline.idempotency_window_secs,
            self.pipeline.dedup_max_entries_per_resource,
            self.pipeline.dispatch_max_attempts
        );
        tracing::info!(
            "  adapters:  max_concurrency={}, sources_file={}",
            self.adapters.max_concurrency,
            self.adapters.sources_file.display()
        );
        tracing::info!(
            "  sink:      webhook={}, publish_attempts={}",
            self.sink.is_webhook_configured(),
            self.sink.publish_max_attempts
        );
        tracing::info!(
            "  rules:     dir={}, catalog={}",
            self.rules.rules_dir.display(),
            self.rules.catalog_path.display()
        );
    }
}

// ── Pipeline ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// How long a dedup key suppresses redelivery.
    pub idempotency_window_secs: u64,
    /// Upper bound on remembered dedup keys per resource.
    pub dedup_max_entries_per_resource: usize,
    pub dispatch_max_attempts: u32,
    pub dispatch_initial_backoff_ms: u64,
    pub dispatch_max_backoff_ms: u64,
    /// Upper bound on a single dispatch call; a timeout counts as a transient failure.
    pub dispatch_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            idempotency_window_secs: 600,
            dedup_max_entries_per_resource: 1024,
            dispatch_max_attempts: 3,
            dispatch_initial_backoff_ms: 100,
            dispatch_max_backoff_ms: 10_000,
            dispatch_timeout_ms: 30_000,
        }
    }
}

impl PipelineConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            idempotency_window_secs: profiled_env_u64(p, "IDEMPOTENCY_WINDOW_SECS", d.idempotency_window_secs),
            dedup_max_entries_per_resource: profiled_env_u64(
                p,
                "DEDUP_MAX_ENTRIES_PER_RESOURCE",
                d.dedup_max_entries_per_resource as u64,
            ) as usize,
            dispatch_max_attempts: profiled_env_u32(p, "DISPATCH_MAX_ATTEMPTS", d.dispatch_max_attempts),
            dispatch_initial_backoff_ms: profiled_env_u64(p, "DISPATCH_INITIAL_BACKOFF_MS", d.dispatch_initial_backoff_ms),
            dispatch_max_backoff_ms: profiled_env_u64(p, "DISPATCH_MAX_BACKOFF_MS", d.dispatch_max_backoff_ms),
            dispatch_timeout_ms: profiled_env_u64(p, "DISPATCH_TIMEOUT_MS", d.dispatch_timeout_ms),
        }
    }

    pub fn idempotency_window(&self) -> Duration {
        Duration::from_secs(self.idempotency_window_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn dispatch_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.dispatch_max_attempts,
            Duration::from_millis(self.dispatch_initial_backoff_ms),
            Duration::from_millis(self.dispatch_max_backoff_ms),
        )
    }
}

// ── Adapters ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Global bound on concurrently running source collections.
    pub max_concurrency: usize,
    pub sources_file: PathBuf,
}

impl AdapterConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_concurrency: (profiled_env_u32(p, "COLLECT_MAX_CONCURRENCY", 4) as usize).max(1),
            sources_file: PathBuf::from(profiled_env_or(p, "SOURCES_FILE", "config/sources.yml")),
        }
    }
}

// ── Finding sink ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub webhook_url: Option<String>,
    pub publish_max_attempts: u32,
    pub publish_initial_backoff_ms: u64,
    pub publish_max_backoff_ms: u64,
}

impl SinkConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            webhook_url: profiled_env_opt(p, "FINDINGS_WEBHOOK_URL"),
            publish_max_attempts: profiled_env_u32(p, "PUBLISH_MAX_ATTEMPTS", 5),
            publish_initial_backoff_ms: profiled_env_u64(p, "PUBLISH_INITIAL_BACKOFF_MS", 200),
            publish_max_backoff_ms: profiled_env_u64(p, "PUBLISH_MAX_BACKOFF_MS", 5_000),
        }
    }

    pub fn is_webhook_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    pub fn publish_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.publish_max_attempts,
            Duration::from_millis(self.publish_initial_backoff_ms),
            Duration::from_millis(self.publish_max_backoff_ms),
        )
    }
}

// ── Rules ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    pub rules_dir: PathBuf,
    pub catalog_path: PathBuf,
}

impl RulesConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            rules_dir: PathBuf::from(profiled_env_or(p, "RULES_DIR", "data/rules")),
            catalog_path: PathBuf::from(profiled_env_or(p, "ATTRIBUTE_CATALOG", "data/catalog.yml")),
        }
    }
}
