//! Coverage for config parsing and env overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use policy_agent::config::{load_config, Config, CONFIG_PATH_ENV};

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect();
    move |key: &str| vars.get(key).cloned()
}

fn write_config(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("policy-agent.toml");
    std::fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn parse_full_config() {
    let toml_str = r#"
[policies]
dir = "/etc/policy-agent/policies"
query = "data.compliance.deny"
watch = true

[server]
bind = "127.0.0.1:9000"
remediation_limit = 8

[remediation]
api_key_env = "POLICY_AGENT_ANTHROPIC_KEY"
model = "claude-test"
max_tokens = 2048

[logging]
level = "debug"
dir = "/var/log/policy-agent"
"#;
    let config: Config = toml::from_str(toml_str).expect("config should parse");
    assert_eq!(config.policies.dir, PathBuf::from("/etc/policy-agent/policies"));
    assert_eq!(config.policies.query, "data.compliance.deny");
    assert!(config.policies.watch);
    assert_eq!(config.server.bind, "127.0.0.1:9000");
    assert_eq!(config.server.remediation_limit, 8);
    assert_eq!(config.remediation.api_key_env, "POLICY_AGENT_ANTHROPIC_KEY");
    assert_eq!(config.remediation.model, "claude-test");
    assert_eq!(config.remediation.max_tokens, 2048);
    assert_eq!(config.remediation.api_url, "https://api.anthropic.com/v1/messages");
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.dir, Some(PathBuf::from("/var/log/policy-agent")));
}

#[test]
fn partial_sections_keep_defaults() {
    let config: Config = toml::from_str("[server]\nremediation_limit = 2\n").expect("config should parse");
    assert_eq!(config.server.remediation_limit, 2);
    assert_eq!(config.server.bind, "0.0.0.0:8443");
    assert_eq!(config.policies.dir, PathBuf::from("./policies"));
}

#[test]
fn missing_implicit_file_uses_defaults() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let missing = tmp.path().join("absent.toml");
    let missing = missing.to_string_lossy().into_owned();

    let config = Config::load_with(None, env_from(&[(CONFIG_PATH_ENV, &missing)]))
        .expect("defaults");
    assert_eq!(config.server.remediation_limit, 4);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let missing = tmp.path().join("absent.toml");
    assert!(Config::load_with(Some(&missing), env_from(&[])).is_err());
    assert!(load_config(&missing).is_err());
}

#[test]
fn env_named_file_is_loaded() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = write_config(tmp.path(), "[policies]\ndir = \"/srv/policies\"\n");
    let path = path.to_string_lossy().into_owned();

    let config = Config::load_with(None, env_from(&[(CONFIG_PATH_ENV, &path)])).expect("load");
    assert_eq!(config.policies.dir, PathBuf::from("/srv/policies"));
}

#[test]
fn env_overrides_beat_file_values() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = write_config(
        tmp.path(),
        "[server]\nbind = \"127.0.0.1:1\"\n[logging]\nlevel = \"warn\"\n",
    );

    let config = Config::load_with(
        Some(&path),
        env_from(&[
            ("POLICY_AGENT_BIND", "0.0.0.0:9443"),
            ("POLICY_AGENT_POLICIES_DIR", "/opt/policies"),
            ("POLICY_AGENT_WATCH", "true"),
            ("POLICY_AGENT_REMEDIATION_LIMIT", "16"),
            ("POLICY_AGENT_MODEL", "claude-override"),
            ("POLICY_AGENT_LOG_LEVEL", "trace"),
        ]),
    )
    .expect("load");
    assert_eq!(config.server.bind, "0.0.0.0:9443");
    assert_eq!(config.policies.dir, PathBuf::from("/opt/policies"));
    assert!(config.policies.watch);
    assert_eq!(config.server.remediation_limit, 16);
    assert_eq!(config.remediation.model, "claude-override");
    assert_eq!(config.logging.level, "trace");
}

#[test]
fn invalid_toml_is_an_error() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = write_config(tmp.path(), "[server\nbind = 1\n");
    let err = Config::load_with(Some(&path), env_from(&[])).expect_err("must fail");
    assert!(format!("{err:#}").contains("failed to parse config"));
}

#[test]
fn api_key_resolves_through_configured_variable() {
    let config: Config =
        toml::from_str("[remediation]\napi_key_env = \"MY_KEY\"\n").expect("config should parse");
    let env = env_from(&[("MY_KEY", "sk-ant-test"), ("ANTHROPIC_API_KEY", "other")]);
    assert_eq!(config.remediation.api_key(env), Some("sk-ant-test".to_owned()));
    assert_eq!(config.remediation.api_key(env_from(&[])), None);
}

#[test]
fn unparsable_overrides_are_kept_for_reporting() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = write_config(tmp.path(), "[policies]\nwatch = true\n");

    let config = Config::load_with(
        Some(&path),
        env_from(&[
            ("POLICY_AGENT_WATCH", "sometimes"),
            ("POLICY_AGENT_BIND", "127.0.0.1:9000"),
        ]),
    )
    .expect("load");

    assert!(config.policies.watch, "file value survives a bad override");
    assert_eq!(config.server.bind, "127.0.0.1:9000");
    let ignored: Vec<_> = config
        .ignored_overrides()
        .iter()
        .map(|ignored| (ignored.var, ignored.value.as_str()))
        .collect();
    assert_eq!(ignored, [("POLICY_AGENT_WATCH", "sometimes")]);
}
