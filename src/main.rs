//! Policy Agent CLI entry point.
//!
//! Provides `validate`, `generate`, `fix`, and `list` one-shot subcommands
//! and `serve` for the HTTP API and admission webhook.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use policy_agent::config::Config;
use policy_agent::logging;
use policy_agent::policy::{store, PolicyEngine, PolicyStore, RegoEvaluator};
use policy_agent::remediation::anthropic::AnthropicBridge;
use policy_agent::remediation::{self, BridgeError, RemediationBridge};
use policy_agent::server::{self, AppState};
use policy_agent::validator::{render_report, Validator};

/// Policy validation agent for infrastructure and application configs.
#[derive(Parser)]
#[command(name = "policy-agent", version, about)]
struct Cli {
    /// Config file (default: $POLICY_AGENT_CONFIG or ./policy-agent.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory containing Rego policies.
    #[arg(long, global = true)]
    policies_dir: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Validate a configuration file against policies.
    Validate {
        /// Policy domain (kafka, kubernetes, terraform, ...).
        #[arg(long)]
        domain: String,
        /// Configuration file to validate.
        #[arg(long)]
        file: PathBuf,
    },
    /// Generate a policy-compliant configuration.
    Generate {
        /// Policy domain.
        #[arg(long)]
        domain: String,
        /// Natural language requirements.
        #[arg(long)]
        requirements: String,
    },
    /// Fix policy violations in a configuration.
    Fix {
        /// Policy domain.
        #[arg(long)]
        domain: String,
        /// Configuration file to fix.
        #[arg(long)]
        file: PathBuf,
    },
    /// List available policies.
    List {
        /// Filter by domain.
        #[arg(long)]
        domain: Option<String>,
    },
    /// Run the HTTP API and admission webhook.
    Serve {
        /// Listen address (overrides config).
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.policies_dir {
        config.policies.dir = dir;
    }

    // The serve guard must outlive the server, so it is held here.
    let _logging_guard = match cli.command {
        Command::Serve { .. } => Some(logging::init_server(&config.logging)?),
        _ => {
            logging::init_cli(&config.logging.level);
            None
        }
    };
    for ignored in config.ignored_overrides() {
        warn!(var = ignored.var, value = %ignored.value, "ignoring invalid env override");
    }

    match cli.command {
        Command::Validate { domain, file } => handle_validate(&config, &domain, &file),
        Command::Generate {
            domain,
            requirements,
        } => handle_generate(&config, &domain, &requirements).await,
        Command::Fix { domain, file } => handle_fix(&config, &domain, &file).await,
        Command::List { domain } => handle_list(&config, domain.as_deref().unwrap_or("")),
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            handle_serve(config).await
        }
    }
}

fn load_store(config: &Config) -> anyhow::Result<Arc<PolicyStore>> {
    let evaluator = Arc::new(RegoEvaluator::new(config.policies.query.clone()));
    let store = PolicyStore::load(&config.policies.dir, evaluator).with_context(|| {
        format!(
            "failed to load policies from {}",
            config.policies.dir.display()
        )
    })?;
    Ok(Arc::new(store))
}

fn build_validator(config: &Config) -> anyhow::Result<Validator> {
    Ok(Validator::new(PolicyEngine::new(load_store(config)?)))
}

fn build_bridge(config: &Config) -> Option<AnthropicBridge> {
    config
        .remediation
        .api_key(|key| std::env::var(key).ok())
        .map(|key| AnthropicBridge::new(&config.remediation, key))
}

fn require_bridge(config: &Config, purpose: &str) -> anyhow::Result<AnthropicBridge> {
    build_bridge(config).ok_or_else(|| {
        anyhow::anyhow!(
            "{} environment variable required for {purpose}",
            config.remediation.api_key_env
        )
    })
}

/// Run a bridge call, abandoning it on Ctrl-C.
async fn until_interrupted<F>(call: F) -> Result<String, BridgeError>
where
    F: Future<Output = Result<String, BridgeError>>,
{
    tokio::select! {
        result = call => result,
        _ = tokio::signal::ctrl_c() => Err(BridgeError::Cancelled),
    }
}

fn read_file(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn handle_validate(config: &Config, domain: &str, file: &Path) -> anyhow::Result<ExitCode> {
    let validator = build_validator(config)?;
    let source = read_file(file)?;
    let result = validator
        .validate(domain, &source)
        .context("validation failed")?;

    println!("{}", render_report(&result));
    Ok(if result.valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn handle_generate(
    config: &Config,
    domain: &str,
    requirements: &str,
) -> anyhow::Result<ExitCode> {
    let validator = build_validator(config)?;
    let bridge = require_bridge(config, "generation")?;
    let policies = validator
        .policies(domain)
        .context("failed to list policies")?;

    let generated = until_interrupted(bridge.generate_config(domain, requirements, &policies))
        .await
        .context("generation failed")?;
    println!("{generated}");

    let recheck = remediation::revalidate(&validator, domain, &generated);
    if let Some(error) = recheck.error {
        eprintln!("warning: generated configuration could not be validated: {error}");
    } else if !recheck.validated {
        eprintln!("warning: generated configuration still violates policy:");
        for violation in &recheck.violations {
            eprintln!("  - {}", violation.summary());
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn handle_fix(config: &Config, domain: &str, file: &Path) -> anyhow::Result<ExitCode> {
    let validator = build_validator(config)?;
    let source = read_file(file)?;
    let result = validator
        .validate(domain, &source)
        .context("validation failed")?;

    if result.valid() {
        println!("✓ No violations to fix");
        return Ok(ExitCode::SUCCESS);
    }

    let bridge = require_bridge(config, "auto-fix")?;
    let messages: Vec<String> = result
        .violations()
        .iter()
        .map(|violation| violation.message.clone())
        .collect();
    let fixed = until_interrupted(bridge.fix_violations(domain, &source, &messages))
        .await
        .context("auto-fix failed")?;
    println!("{fixed}");
    Ok(ExitCode::SUCCESS)
}

fn handle_list(config: &Config, domain: &str) -> anyhow::Result<ExitCode> {
    let validator = build_validator(config)?;
    let policies = validator.policies(domain)?;
    if policies.is_empty() {
        println!("No policies found");
        return Ok(ExitCode::SUCCESS);
    }
    for policy in &policies {
        println!(
            "  • {} ({}) - {}",
            policy.name, policy.domain, policy.description
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn handle_serve(config: Config) -> anyhow::Result<ExitCode> {
    let store = load_store(&config)?;
    let _watcher = if config.policies.watch {
        Some(store::watch(Arc::clone(&store))?)
    } else {
        None
    };
    let validator = Arc::new(Validator::new(PolicyEngine::new(store)));

    let bridge: Option<Arc<dyn RemediationBridge>> = match build_bridge(&config) {
        Some(bridge) => {
            info!(model = bridge.model(), "remediation enabled");
            Some(Arc::new(bridge) as Arc<dyn RemediationBridge>)
        }
        None => {
            warn!(
                var = %config.remediation.api_key_env,
                "remediation credential not set, generate and fix disabled"
            );
            None
        }
    };

    let state = Arc::new(
        AppState::new(validator, bridge).with_remediation_limit(config.server.remediation_limit),
    );
    server::serve(&config.server.bind, state).await?;
    Ok(ExitCode::SUCCESS)
}
