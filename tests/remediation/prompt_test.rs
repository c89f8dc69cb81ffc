//! Prompt construction and reply cleanup.

use policy_agent::policy::PolicyModule;
use policy_agent::remediation::{
    fix_prompt, generation_prompt, sanitize_http_error_body, strip_code_fence,
};

fn topic_policy() -> PolicyModule {
    PolicyModule {
        name: "partitions".to_owned(),
        domain: "kafka".to_owned(),
        description: "Topics need partitions".to_owned(),
        relative_path: "kafka/partitions.rego".to_owned(),
        raw_content: "package policy\n# partitions rule body\n".to_owned(),
    }
}

#[test]
fn generation_prompt_grounds_on_policy_sources() {
    let prompt = generation_prompt("kafka", "an orders topic", &[topic_policy()]);
    assert!(prompt.system.contains("kafka configurations"));
    assert!(prompt.system.contains("Policy: partitions"));
    assert!(prompt.system.contains("Description: Topics need partitions"));
    assert!(prompt.system.contains("# partitions rule body"));
    assert_eq!(
        prompt.user,
        "Generate a kafka configuration for: an orders topic"
    );
}

#[test]
fn fix_prompt_lists_violations_and_original() {
    let violations = vec![
        "missing replica limit".to_owned(),
        "no owner label".to_owned(),
    ];
    let prompt = fix_prompt("kubernetes", "kind: Deployment\n", &violations);
    assert!(prompt.system.contains("kubernetes"));
    assert!(prompt
        .user
        .contains("Violations:\nmissing replica limit\nno owner label"));
    assert!(prompt.user.ends_with("Configuration:\nkind: Deployment\n"));
}

#[test]
fn code_fence_is_stripped_only_when_it_wraps_everything() {
    assert_eq!(strip_code_fence("```yaml\na: 1\nb: 2\n```\n"), "a: 1\nb: 2");
    assert_eq!(strip_code_fence("```\na: 1\n```"), "a: 1");
    assert_eq!(strip_code_fence("a: 1\n"), "a: 1\n");
    assert_eq!(
        strip_code_fence("Here you go:\n```yaml\na: 1\n```"),
        "Here you go:\n```yaml\na: 1\n```"
    );
}

#[test]
fn error_bodies_are_redacted_and_truncated() {
    let body = format!(
        "{{\"error\": \"bad key sk-ant-{}\"}}\n\n   trailing",
        "a".repeat(40)
    );
    let sanitized = sanitize_http_error_body(&body);
    assert!(sanitized.contains("[REDACTED]"));
    assert!(!sanitized.contains("sk-ant-aaaa"));
    assert!(sanitized.ends_with("trailing"));

    let long = "x".repeat(1000);
    let truncated = sanitize_http_error_body(&long);
    assert!(truncated.ends_with("...[truncated]"));
    assert!(truncated.len() < 300);
}
