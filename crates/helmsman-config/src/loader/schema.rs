//! Structural validation for raw config layers.
//!
//! Runs before serde decoding so unknown keys and bad enum values are reported
//! with the layer and dotted path they came from.

use crate::ConfigError;
use serde_json::{Map, Value};

/// Validate a raw layer value against the known config shape.
pub(super) fn validate_layer_schema(value: &Value, layer: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, "")?;
    ensure_allowed_keys(
        map,
        &[
            "$schema",
            "planning",
            "routing",
            "retry",
            "audit",
            "orchestrator",
        ],
        layer,
        "",
    )?;

    if let Some(value) = map.get("$schema") {
        expect_string(value, layer, "$schema")?;
    }
    if let Some(value) = map.get("planning") {
        validate_planning(value, layer, "planning")?;
    }
    if let Some(value) = map.get("routing") {
        validate_routing(value, layer, "routing")?;
    }
    if let Some(value) = map.get("retry") {
        validate_retry(value, layer, "retry")?;
    }
    if let Some(value) = map.get("audit") {
        validate_audit(value, layer, "audit")?;
    }
    if let Some(value) = map.get("orchestrator") {
        validate_orchestrator(value, layer, "orchestrator")?;
    }
    Ok(())
}

fn validate_planning(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["max_steps", "budget"], layer, path)?;
    if let Some(value) = map.get("max_steps") {
        expect_u64(value, layer, &join_path(path, "max_steps"))?;
    }
    if let Some(value) = map.get("budget") {
        let budget_path = join_path(path, "budget");
        let budget = expect_object(value, layer, &budget_path)?;
        ensure_allowed_keys(
            budget,
            &["cost_ceiling", "call_ceiling", "token_ceiling"],
            layer,
            &budget_path,
        )?;
        if let Some(value) = budget.get("cost_ceiling") {
            expect_f64(value, layer, &join_path(&budget_path, "cost_ceiling"))?;
        }
        if let Some(value) = budget.get("call_ceiling") {
            expect_u64(value, layer, &join_path(&budget_path, "call_ceiling"))?;
        }
        if let Some(value) = budget.get("token_ceiling") {
            expect_u64(value, layer, &join_path(&budget_path, "token_ceiling"))?;
        }
    }
    Ok(())
}

fn validate_routing(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["strategy"], layer, path)?;
    if let Some(value) = map.get("strategy") {
        expect_one_of(
            value,
            &["round_robin", "capability_based", "load_balanced"],
            layer,
            &join_path(path, "strategy"),
        )?;
    }
    Ok(())
}

fn validate_retry(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(
        map,
        &[
            "strategy",
            "max_attempts",
            "base_delay_ms",
            "max_delay_ms",
            "multiplier",
            "jitter",
            "fixed_delay_ms",
        ],
        layer,
        path,
    )?;
    if let Some(value) = map.get("strategy") {
        expect_one_of(
            value,
            &["exponential", "linear", "none"],
            layer,
            &join_path(path, "strategy"),
        )?;
    }
    for key in ["max_attempts", "base_delay_ms", "max_delay_ms", "fixed_delay_ms"] {
        if let Some(value) = map.get(key) {
            expect_u64(value, layer, &join_path(path, key))?;
        }
    }
    for key in ["multiplier", "jitter"] {
        if let Some(value) = map.get(key) {
            expect_f64(value, layer, &join_path(path, key))?;
        }
    }
    Ok(())
}

fn validate_audit(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["backend", "path", "on_failure"], layer, path)?;
    if let Some(value) = map.get("backend") {
        expect_one_of(
            value,
            &["jsonl", "sqlite", "memory"],
            layer,
            &join_path(path, "backend"),
        )?;
    }
    if let Some(value) = map.get("path") {
        expect_string(value, layer, &join_path(path, "path"))?;
    }
    if let Some(value) = map.get("on_failure") {
        expect_one_of(
            value,
            &["fail_closed", "fail_open"],
            layer,
            &join_path(path, "on_failure"),
        )?;
    }
    Ok(())
}

fn validate_orchestrator(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(
        map,
        &["error_propagation", "max_concurrency"],
        layer,
        path,
    )?;
    if let Some(value) = map.get("error_propagation") {
        expect_one_of(
            value,
            &["fail_fast", "retry", "fallback", "continue"],
            layer,
            &join_path(path, "error_propagation"),
        )?;
    }
    if let Some(value) = map.get("max_concurrency") {
        expect_u64(value, layer, &join_path(path, "max_concurrency"))?;
    }
    Ok(())
}

/// Expect a JSON object or return a typed error.
fn expect_object<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(invalid_field(layer, path, "expected object")),
    }
}

/// Expect a JSON string or return a typed error.
fn expect_string(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.as_str().is_some() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected string"))
    }
}

/// Expect a non-negative JSON integer or return a typed error.
fn expect_u64(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_u64() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected non-negative integer"))
    }
}

/// Expect a JSON number or return a typed error.
fn expect_f64(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_f64() || value.is_u64() || value.is_i64() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected number"))
    }
}

/// Expect a string drawn from a fixed vocabulary.
fn expect_one_of(
    value: &Value,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    match value.as_str() {
        Some(raw) if allowed.contains(&raw) => Ok(()),
        Some(raw) => Err(invalid_field(
            layer,
            path,
            &format!("unsupported value `{raw}` (expected one of {})", allowed.join(", ")),
        )),
        None => Err(invalid_field(layer, path, "expected string")),
    }
}

/// Ensure an object contains only allowed keys.
fn ensure_allowed_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(invalid_field(layer, &join_path(path, key), "unknown key"));
        }
    }
    Ok(())
}

/// Join nested paths for better error messages.
fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Build a structured invalid-field error.
fn invalid_field(layer: &str, path: &str, message: &str) -> ConfigError {
    let normalized_path = if path.is_empty() { "root" } else { path };
    ConfigError::InvalidField {
        path: format!("{layer}:{normalized_path}"),
        message: message.to_string(),
    }
}
