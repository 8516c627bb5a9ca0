//! Settings loading with deep merge and environment variable overrides.
//!
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `TETHER_*` environment overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::TetherSettings;

/// `~/.tether`
pub fn tether_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether")
}

/// `~/.tether/settings.json`
pub fn settings_path() -> PathBuf {
    tether_home().join("settings.json")
}

pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Recursive deep merge: objects merge per key, everything else is
/// replaced, nulls in `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides. `lookup` is `std::env::var` in production.
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides<F>(settings: &mut TetherSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("TETHER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16_in("TETHER_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("TETHER_SERVER_NAME") {
        settings.server.server_name = v;
    }
    if let Some(v) = env.string("TETHER_API_SECRET") {
        settings.server.api_secret = v;
    }
    if let Some(v) = env.string("TETHER_PROCESSOR_URL") {
        settings.processor.url = v;
    }
    if let Some(v) = env.string("TETHER_PROCESSOR_SECRET") {
        settings.processor.secret = v;
    }
    if let Some(v) = env.string("TETHER_CREDENTIAL_STORE_URL") {
        settings.credential_store.url = v;
    }
    if let Some(v) = env.string("TETHER_PROTOCOL_URL") {
        settings.protocol.url = v;
    }
    if let Some(v) = env.u32_in("TETHER_MAX_RECONNECT_ATTEMPTS", 1, 1_000) {
        settings.retry.max_attempts = v;
    }
    if let Some(v) = env.string("TETHER_DATA_DIR") {
        settings.storage.data_dir = v;
    }
    if let Some(v) = env.string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u16_in(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.string(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u32_in(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        let val = self.string(name)?;
        let result = parse_u32_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tether-settings-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 3001, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(
            serde_json::json!({"a": 1, "b": 2}),
            serde_json::json!({"a": null}),
        );
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = temp_path("absent.json");
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.retry.max_attempts, 5);
    }

    #[test]
    fn file_values_merged() {
        let path = temp_path("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"serverName": "bot-7"}, "retry": {"baseDelayMs": 100}}"#,
        )
        .unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.server_name, "bot-7");
        assert_eq!(settings.retry.base_delay_ms, 100);
        assert_eq!(settings.retry.max_delay_ms, 30_000);
    }

    #[test]
    fn invalid_json_is_error() {
        let path = temp_path("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = TetherSettings::default();
        apply_env_overrides(
            &mut settings,
            env_of(&[
                ("TETHER_PORT", "8088"),
                ("TETHER_SERVER_NAME", "edge-1"),
                ("TETHER_API_SECRET", "tok"),
                ("TETHER_MAX_RECONNECT_ATTEMPTS", "3"),
                ("TETHER_CREDENTIAL_STORE_URL", "https://store.example/creds"),
            ]),
        );
        assert_eq!(settings.server.port, 8088);
        assert_eq!(settings.server.server_name, "edge-1");
        assert_eq!(settings.server.api_secret, "tok");
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.credential_store.url, "https://store.example/creds");
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut settings = TetherSettings::default();
        apply_env_overrides(
            &mut settings,
            env_of(&[
                ("TETHER_PORT", "0"),
                ("TETHER_MAX_RECONNECT_ATTEMPTS", "many"),
                ("TETHER_HOST", ""),
            ]),
        );
        assert_eq!(settings.server.port, 3001);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn range_parsers() {
        assert_eq!(parse_u16_range("80", 1, 65535), Some(80));
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u32_range("0", 1, 10), None);
        assert_eq!(parse_u32_range("10", 1, 10), Some(10));
    }
}
