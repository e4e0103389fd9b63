//! Tests for configuration loading and validation.

use super::*;
use crate::{
    AuditBackendKind, AuditConfig, AuditFailureMode, ErrorPropagation, RetryStrategy,
    RoutingStrategy,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Write JSON5 contents to a path, creating parent directories if needed.
fn write_json5(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("dir");
    }
    fs::write(path, contents).expect("write");
}

#[test]
fn parse_minimal_config() {
    let config = HelmsmanConfig::load_from_str("{}").expect("config");
    assert_eq!(config, HelmsmanConfig::default());
    assert_eq!(config.planning.max_steps, 10);
    assert_eq!(config.planning.budget.call_ceiling, 50);
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.base_delay_ms, 1_000);
    assert_eq!(config.retry.max_delay_ms, 60_000);
    assert_eq!(config.routing.strategy, RoutingStrategy::RoundRobin);
    assert_eq!(config.audit.on_failure, AuditFailureMode::FailClosed);
    assert_eq!(
        config.orchestrator.error_propagation,
        ErrorPropagation::FailFast
    );
}

#[test]
fn parse_full_config_with_comments() {
    let json5 = r#"{
        // planner limits
        planning: { max_steps: 5, budget: { cost_ceiling: 12.5, call_ceiling: 4, token_ceiling: 900 } },
        routing: { strategy: "capability_based" },
        retry: { strategy: "linear", max_attempts: 2, fixed_delay_ms: 10 },
        audit: { backend: "sqlite", path: "/tmp/audit.db", on_failure: "fail_open" },
        orchestrator: { error_propagation: "continue", max_concurrency: 4 },
    }"#;
    let config = HelmsmanConfig::load_from_str(json5).expect("config");
    assert_eq!(config.planning.max_steps, 5);
    assert_eq!(config.planning.budget.cost_ceiling, 12.5);
    assert_eq!(config.routing.strategy, RoutingStrategy::CapabilityBased);
    assert_eq!(config.retry.strategy, RetryStrategy::Linear);
    assert_eq!(config.retry.fixed_delay_ms, 10);
    assert_eq!(config.audit.backend, AuditBackendKind::Sqlite);
    assert_eq!(config.audit.on_failure, AuditFailureMode::FailOpen);
    assert_eq!(config.orchestrator.max_concurrency, 4);
}

#[test]
fn rejects_unknown_top_level_key() {
    let err = HelmsmanConfig::load_from_str("{ unexpected: true }").unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("unknown key"));
}

#[test]
fn rejects_unsupported_routing_strategy() {
    let err = HelmsmanConfig::load_from_str(r#"{ routing: { strategy: "random" } }"#)
        .unwrap_err();
    match err {
        ConfigError::InvalidField { path, message } => {
            assert_eq!(path, "config:routing.strategy");
            assert!(message.contains("round_robin"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn rejects_zero_attempts() {
    let err = HelmsmanConfig::load_from_str("{ retry: { max_attempts: 0 } }").unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("retry.max_attempts"));
}

#[test]
fn rejects_base_delay_above_max_delay() {
    let err =
        HelmsmanConfig::load_from_str("{ retry: { base_delay_ms: 5000, max_delay_ms: 10 } }")
            .unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("retry.base_delay_ms"));
}

#[test]
fn out_of_range_max_steps_is_accepted_for_clamping() {
    let config = HelmsmanConfig::load_from_str("{ planning: { max_steps: 500 } }").expect("config");
    assert_eq!(config.planning.max_steps, 500);
}

#[test]
fn load_from_path_reads_json5_file() {
    let temp = TempDir::new().expect("tmp");
    let path = temp.path().join("helmsman.json5");
    write_json5(&path, "{ retry: { strategy: 'none' } }");
    let config = HelmsmanConfig::load_from_path(&path).expect("config");
    assert_eq!(config.retry.strategy, RetryStrategy::None);
}

#[test]
fn layered_config_prefers_cwd_over_project_and_user() {
    let temp = TempDir::new().expect("tmp");
    let root = temp.path();
    let project_root = root.join("project");
    fs::create_dir_all(project_root.join(".git")).expect("git");
    let cwd = project_root.join("subdir");
    fs::create_dir_all(&cwd).expect("cwd");

    let user_config = root.join("user.json5");
    write_json5(
        &user_config,
        "{ planning: { max_steps: 3 }, routing: { strategy: 'load_balanced' } }",
    );
    write_json5(
        &project_root
            .join(DEFAULT_CONFIG_DIR)
            .join(DEFAULT_CONFIG_FILE),
        "{ planning: { max_steps: 4, budget: { call_ceiling: 7 } } }",
    );
    write_json5(&cwd.join(DEFAULT_CONFIG_FILE), "{ planning: { max_steps: 6 } }");

    let options = LayeredConfigOptions::new(&cwd).with_user_config_path(&user_config);
    let layered = HelmsmanConfig::load_layered_with_options(options).expect("layered");

    assert_eq!(layered.config.planning.max_steps, 6);
    assert_eq!(layered.config.planning.budget.call_ceiling, 7);
    assert_eq!(layered.config.routing.strategy, RoutingStrategy::LoadBalanced);
    let sources: Vec<_> = layered.layers.iter().map(|layer| layer.source).collect();
    assert_eq!(
        sources,
        vec![
            ConfigLayerSource::User,
            ConfigLayerSource::Project,
            ConfigLayerSource::Cwd
        ]
    );
}

#[test]
fn runtime_layer_overrides_everything() {
    let temp = TempDir::new().expect("tmp");
    let cwd = temp.path().join("work");
    fs::create_dir_all(&cwd).expect("cwd");
    write_json5(&cwd.join(DEFAULT_CONFIG_FILE), "{ orchestrator: { max_concurrency: 2 } }");
    let runtime = temp.path().join("runtime.json5");
    write_json5(&runtime, "{ orchestrator: { max_concurrency: 8 } }");

    let options = LayeredConfigOptions::new(&cwd)
        .with_user_config_path(temp.path().join("missing.json5"))
        .with_runtime_path(&runtime);
    let layered = HelmsmanConfig::load_layered_with_options(options).expect("layered");
    assert_eq!(layered.config.orchestrator.max_concurrency, 8);
    assert_eq!(layered.layers.len(), 2);
}

#[test]
fn schema_errors_name_the_layer() {
    let temp = TempDir::new().expect("tmp");
    let cwd = temp.path().to_path_buf();
    write_json5(&cwd.join(DEFAULT_CONFIG_FILE), "{ audit: { backend: 'postgres' } }");
    let options = LayeredConfigOptions::new(&cwd).with_user_config_path(cwd.join("none.json5"));
    let err = HelmsmanConfig::load_layered_with_options(options).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("cwd("));
    assert!(msg.contains("audit.backend"));
}

#[test]
fn explicit_audit_path_wins_and_memory_has_none() {
    let audit = AuditConfig {
        backend: AuditBackendKind::Jsonl,
        path: Some("/var/log/helmsman.jsonl".into()),
        on_failure: AuditFailureMode::FailClosed,
    };
    assert_eq!(
        audit.resolved_path(),
        Some(Path::new("/var/log/helmsman.jsonl").to_path_buf())
    );

    let memory = AuditConfig {
        backend: AuditBackendKind::Memory,
        ..AuditConfig::default()
    };
    assert_eq!(memory.resolved_path(), None);
}

#[test]
fn builder_replaces_sections() {
    let config = HelmsmanConfig::builder()
        .orchestrator(crate::OrchestratorConfig {
            error_propagation: ErrorPropagation::Retry,
            max_concurrency: 3,
        })
        .build();
    assert_eq!(config.orchestrator.error_propagation, ErrorPropagation::Retry);
    assert_eq!(config.retry, crate::RetryConfig::default());
}

#[test]
fn later_layers_combine_objects_and_replace_arrays() {
    let mut base = serde_json::json!({
        "retry": { "max_attempts": 5, "strategy": "linear" },
        "tags": ["a", "b"],
    });
    overlay_layer(
        &mut base,
        serde_json::json!({
            "retry": { "max_attempts": 2 },
            "tags": ["c"],
            "audit": { "backend": "memory" },
        }),
    );
    assert_eq!(
        base,
        serde_json::json!({
            "retry": { "max_attempts": 2, "strategy": "linear" },
            "tags": ["c"],
            "audit": { "backend": "memory" },
        })
    );
}
