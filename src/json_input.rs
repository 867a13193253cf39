use anyhow::{Context, Result, anyhow};
use meta_ads::FilterRule;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Accepts inline JSON, `@path`, or a bare path to an existing file.
pub fn read_json_input(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if let Some(path) = trimmed.strip_prefix('@') {
        return read_json_file(Path::new(path));
    }

    if Path::new(trimmed).is_file() {
        return read_json_file(Path::new(trimmed));
    }

    serde_json::from_str(trimmed).context("invalid JSON input")
}

/// A filter is either one rule object or an array of rules.
pub fn read_filter_rules(raw: &str) -> Result<Vec<FilterRule>> {
    let value = read_json_input(raw)?;
    let value = match value {
        Value::Array(_) => value,
        Value::Object(_) => Value::Array(vec![value]),
        other => return Err(anyhow!("filter must be an object or array, got {other}")),
    };
    serde_json::from_value(value).context("invalid filter rule (expected field, operator, value)")
}

fn read_json_file(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read json file {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .map_err(|err| anyhow!("invalid JSON in {}: {err}", path.display()))?;
    Ok(value)
}
