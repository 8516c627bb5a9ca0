use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    pub server: ServerSettings,
    pub processor: ProcessorSettings,
    pub credential_store: CredentialStoreSettings,
    pub protocol: ProtocolSettings,
    pub retry: RetrySettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// HTTP control surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Identity this bridge uses when talking to the durable store.
    pub server_name: String,
    /// Bearer secret for `/api/*`. Empty rejects every protected request.
    pub api_secret: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            server_name: "default".to_string(),
            api_secret: String::new(),
        }
    }
}

/// External message processor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessorSettings {
    pub url: String,
    pub secret: String,
    pub timeout_ms: u64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            secret: String::new(),
            timeout_ms: 30_000,
        }
    }
}

/// Durable credential store. An empty URL disables it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CredentialStoreSettings {
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for CredentialStoreSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_ms: 15_000,
        }
    }
}

/// Protocol daemon endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolSettings {
    pub url: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765".to_string(),
            connect_timeout_ms: 20_000,
            request_timeout_ms: 60_000,
        }
    }
}

/// Reconnect backoff.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Pause after the session opens before pushing credentials.
    pub sync_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 5_000,
            max_delay_ms: 30_000,
            multiplier: 1.0,
            sync_delay_ms: 3_000,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn sync_delay(&self) -> Duration {
        Duration::from_millis(self.sync_delay_ms)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Empty means `~/.tether`.
    pub data_dir: String,
}

impl StorageSettings {
    pub fn resolved_data_dir(&self) -> PathBuf {
        if self.data_dir.is_empty() {
            crate::loader::tether_home()
        } else {
            PathBuf::from(&self.data_dir)
        }
    }

    pub fn credentials_db(&self) -> PathBuf {
        self.resolved_data_dir().join("credentials.db")
    }

    pub fn logs_db(&self) -> PathBuf {
        self.resolved_data_dir().join("logs.db")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub log_to_sqlite: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_sqlite: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = TetherSettings::default();
        assert_eq!(s.server.port, 3001);
        assert_eq!(s.server.server_name, "default");
        assert!(s.server.api_secret.is_empty());
        assert_eq!(s.retry.max_attempts, 5);
        assert_eq!(s.retry.base_delay(), Duration::from_secs(5));
        assert_eq!(s.retry.max_delay(), Duration::from_secs(30));
        assert!(s.credential_store.url.is_empty());
        assert!(s.logging.log_to_sqlite);
    }

    #[test]
    fn camel_case_keys() {
        let json = serde_json::to_value(TetherSettings::default()).unwrap();
        assert!(json["server"]["serverName"].is_string());
        assert!(json["credentialStore"]["timeoutMs"].is_number());
        assert!(json["retry"]["maxAttempts"].is_number());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: TetherSettings =
            serde_json::from_value(serde_json::json!({"retry": {"maxAttempts": 9}})).unwrap();
        assert_eq!(s.retry.max_attempts, 9);
        assert_eq!(s.retry.base_delay_ms, 5_000);
        assert_eq!(s.server.port, 3001);
    }

    #[test]
    fn storage_paths() {
        let storage = StorageSettings {
            data_dir: "/var/lib/tether".into(),
        };
        assert_eq!(
            storage.credentials_db(),
            PathBuf::from("/var/lib/tether/credentials.db")
        );
        assert_eq!(storage.logs_db(), PathBuf::from("/var/lib/tether/logs.db"));
    }
}
