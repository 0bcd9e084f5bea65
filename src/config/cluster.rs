use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    /// Address this process answers on; also its key on the hash ring
    /// and its ephemeral registration name.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Service type this process registers itself under.
    #[serde(default = "default_module_name")]
    pub module_name: String,

    /// Well-known base path for ephemeral service registrations.
    #[serde(default = "default_services_base_path")]
    pub services_base_path: String,

    /// Peer service types to discover for outbound calls.
    #[serde(default)]
    pub peer_services: Vec<String>,

    #[serde(default = "default_db_dir")]
    pub db_root_dir: PathBuf,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            scheme: default_scheme(),
            module_name: default_module_name(),
            services_base_path: default_services_base_path(),
            peer_services: vec![],
            db_root_dir: default_db_dir(),
        }
    }
}

impl ClusterConfig {
    /// Validates cluster configuration consistency
    pub fn validate(&self) -> Result<()> {
        if self.listen_address.is_empty() {
            return Err(Error::InvalidConfig("listen_address cannot be empty".into()));
        }

        if !self.listen_address.contains(':') {
            return Err(Error::InvalidConfig(format!(
                "listen_address '{}' must be host:port",
                self.listen_address
            )));
        }

        if self.module_name.is_empty() {
            return Err(Error::InvalidConfig("module_name cannot be empty".into()));
        }

        if !self.services_base_path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "services_base_path '{}' must be absolute",
                self.services_base_path
            )));
        }

        if self.db_root_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("db_root_dir cannot be empty".into()));
        }

        Ok(())
    }

    /// Registry path under which peers of `service` register themselves.
    pub fn service_path(
        &self,
        service: &str,
    ) -> String {
        format!("{}/{}", self.services_base_path, service)
    }

    /// Registry path for this process's own service type.
    pub fn membership_path(&self) -> String {
        self.service_path(&self.module_name)
    }
}

fn default_listen_address() -> String {
    "127.0.0.1:9081".to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_module_name() -> String {
    "host-sync".to_string()
}

fn default_services_base_path() -> String {
    "/services".to_string()
}

fn default_db_dir() -> PathBuf {
    PathBuf::from("/tmp/task_ring/db")
}
