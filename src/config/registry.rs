use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Coordination-service endpoint, host:port.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_session_timeout_in_ms")]
    pub session_timeout_in_ms: u64,

    #[serde(default = "default_connect_timeout_in_ms")]
    pub connect_timeout_in_ms: u64,

    /// Fixed backoff between watch-loop retries.
    #[serde(default = "default_watch_retry_interval_in_ms")]
    pub watch_retry_interval_in_ms: u64,

    #[serde(default)]
    pub auth_scheme: Option<String>,

    #[serde(default)]
    pub auth_credential: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            session_timeout_in_ms: default_session_timeout_in_ms(),
            connect_timeout_in_ms: default_connect_timeout_in_ms(),
            watch_retry_interval_in_ms: default_watch_retry_interval_in_ms(),
            auth_scheme: None,
            auth_credential: None,
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(Error::InvalidConfig("registry endpoint cannot be empty".into()));
        }

        if self.session_timeout_in_ms == 0 {
            return Err(Error::InvalidConfig(
                "session_timeout_in_ms must be greater than zero".into(),
            ));
        }

        if self.auth_scheme.is_some() != self.auth_credential.is_some() {
            return Err(Error::InvalidConfig(
                "auth_scheme and auth_credential must be set together".into(),
            ));
        }

        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_in_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_in_ms)
    }

    pub fn watch_retry_interval(&self) -> Duration {
        Duration::from_millis(self.watch_retry_interval_in_ms)
    }
}

fn default_endpoint() -> String {
    "127.0.0.1:2181".to_string()
}

fn default_session_timeout_in_ms() -> u64 {
    60_000
}

fn default_connect_timeout_in_ms() -> u64 {
    10_000
}

fn default_watch_retry_interval_in_ms() -> u64 {
    5_000
}
