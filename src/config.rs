//! Configuration loading.
//!
//! Loads `policy-agent.toml` (or `$POLICY_AGENT_CONFIG`). Every section has
//! defaults, so a missing or empty file is valid.
//!
//! Precedence: CLI flags > env vars > config file > defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::policy::evaluator::DEFAULT_QUERY;

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "POLICY_AGENT_CONFIG";
/// Config file used when neither a flag nor the env var names one.
pub const DEFAULT_CONFIG_FILE: &str = "policy-agent.toml";

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Policy source tree and evaluation settings.
    pub policies: PoliciesConfig,
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Remediation bridge settings.
    pub remediation: RemediationConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Env overrides that could not be parsed, kept for reporting once
    /// logging is up.
    #[serde(skip)]
    ignored_overrides: Vec<IgnoredOverride>,
}

/// An env override whose value could not be parsed and was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredOverride {
    /// Variable name.
    pub var: &'static str,
    /// Raw value found in the environment.
    pub value: String,
}

/// `[policies]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoliciesConfig {
    /// Root of the policy tree.
    pub dir: PathBuf,
    /// Rule path queried in every module.
    pub query: String,
    /// Reload the repository when policy files change.
    pub watch: bool,
}

impl Default for PoliciesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./policies"),
            query: DEFAULT_QUERY.to_owned(),
            watch: false,
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,
    /// Assistant calls served at once; further `/generate` and `/fix`
    /// requests wait for a slot. Validation and admission never wait.
    pub remediation_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8443".to_owned(),
            remediation_limit: 4,
        }
    }
}

/// `[remediation]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Model identifier.
    pub model: String,
    /// Maximum tokens per reply.
    pub max_tokens: u32,
    /// Messages endpoint.
    pub api_url: String,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            api_key_env: "ANTHROPIC_API_KEY".to_owned(),
            model: "claude-sonnet-4-20250514".to_owned(),
            max_tokens: 4096,
            api_url: "https://api.anthropic.com/v1/messages".to_owned(),
        }
    }
}

impl RemediationConfig {
    /// Resolve the API key through `env`; blank values count as absent.
    pub fn api_key(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        env(&self.api_key_env).filter(|key| !key.trim().is_empty())
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily-rolling JSON logs; console only when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            dir: None,
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────

impl Config {
    /// Load with env overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or
    /// parsed, or an explicitly named file is missing.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    /// Load using a custom env resolver (for testing).
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`].
    pub fn load_with(
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut config = match explicit {
            Some(path) => load_config(path)?,
            None => {
                let path = env(CONFIG_PATH_ENV)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
                match std::fs::read_to_string(&path) {
                    Ok(contents) => parse_config(&path, &contents)?,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        tracing::debug!(path = %path.display(), "no config file found, using defaults");
                        Config::default()
                    }
                    Err(e) => {
                        return Err(anyhow::anyhow!(
                            "failed to read config at {}: {e}",
                            path.display()
                        ))
                    }
                }
            }
        };
        config.apply_overrides(env);
        Ok(config)
    }

    /// Env overrides skipped because their values did not parse.
    ///
    /// Config is usually loaded before logging is initialised, so the
    /// caller reports these.
    pub fn ignored_overrides(&self) -> &[IgnoredOverride] {
        &self.ignored_overrides
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids `set_var` in tests).
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("POLICY_AGENT_POLICIES_DIR") {
            self.policies.dir = PathBuf::from(v);
        }
        if let Some(v) = env("POLICY_AGENT_WATCH") {
            match v.parse() {
                Ok(watch) => self.policies.watch = watch,
                Err(_) => self.ignore("POLICY_AGENT_WATCH", v),
            }
        }
        if let Some(v) = env("POLICY_AGENT_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = env("POLICY_AGENT_REMEDIATION_LIMIT") {
            match v.parse() {
                Ok(limit) => self.server.remediation_limit = limit,
                Err(_) => self.ignore("POLICY_AGENT_REMEDIATION_LIMIT", v),
            }
        }
        if let Some(v) = env("POLICY_AGENT_MODEL") {
            self.remediation.model = v;
        }
        if let Some(v) = env("POLICY_AGENT_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    fn ignore(&mut self, var: &'static str, value: String) {
        self.ignored_overrides.push(IgnoredOverride { var, value });
    }
}

/// Load a config file that must exist.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    parse_config(path, &contents)
}

fn parse_config(path: &Path, contents: &str) -> anyhow::Result<Config> {
    toml::from_str(contents).with_context(|| format!("failed to parse config at {}", path.display()))
}
