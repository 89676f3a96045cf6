use serde::Deserialize;

use crate::config::is_valid_secs;

/// Where readings are uploaded.
///
/// `backend = "local"` writes under `{root}/{container}`; `backend = "http"`
/// PUTs block blobs to `{account_url}/{container}/{key}`.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default)]
    pub account_url: Option<String>,
    #[serde(default)]
    pub sas_token: Option<String>,
    #[serde(default = "default_write_latest")]
    pub write_latest: bool,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: f64,
}

fn default_backend() -> String {
    "local".to_string()
}
fn default_root() -> String {
    "./blobstore".to_string()
}
fn default_container() -> String {
    "weatherdata".to_string()
}
fn default_write_latest() -> bool {
    true
}
fn default_store_timeout_secs() -> f64 {
    10.0
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: default_backend(),
            root: default_root(),
            container: default_container(),
            account_url: None,
            sas_token: None,
            write_latest: default_write_latest(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

impl StoreConfig {
    pub fn is_http(&self) -> bool {
        self.backend == "http"
    }

    pub(crate) fn validate(&self, errors: &mut Vec<String>) {
        match self.backend.as_str() {
            "local" => {
                if self.root.trim().is_empty() {
                    errors.push(
                        "store.root must not be empty. Example: root = \"./blobstore\"".to_string(),
                    );
                }
            }
            "http" => match self.account_url.as_deref() {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
                Some(url) => errors.push(format!(
                    "store.account_url must start with http:// or https://, got '{}'",
                    url
                )),
                None => errors.push(
                    "store.account_url is required when backend = \"http\". Example: account_url = \"https://acct.blob.core.windows.net\""
                        .to_string(),
                ),
            },
            other => errors.push(format!(
                "store.backend must be \"local\" or \"http\", got '{}'",
                other
            )),
        }

        let valid_container = (3..=63).contains(&self.container.len())
            && self
                .container
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !self.container.starts_with('-')
            && !self.container.ends_with('-');
        if !valid_container {
            errors.push(format!(
                "store.container must be 3-63 lowercase letters, digits or hyphens, got '{}'. Example: container = \"weatherdata\"",
                self.container
            ));
        }

        if !is_valid_secs(self.timeout_secs) {
            errors.push(format!(
                "store.timeout_secs must be > 0.0 and fit in a duration, got {}. Example: timeout_secs = 10.0",
                self.timeout_secs
            ));
        }
    }
}

/// Optional HTTP dashboard that receives every reading.
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_dashboard_timeout_secs")]
    pub timeout_secs: f64,
}

fn default_dashboard_timeout_secs() -> f64 {
    5.0
}

impl Default for DashboardConfig {
    fn default() -> Self {
        DashboardConfig {
            url: None,
            timeout_secs: default_dashboard_timeout_secs(),
        }
    }
}

impl DashboardConfig {
    pub(crate) fn validate(&self, errors: &mut Vec<String>) {
        if let Some(url) = &self.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(format!(
                    "dashboard.url must start with http:// or https://, got '{}'. Example: url = \"http://localhost:8080/api/weather\"",
                    url
                ));
            }
        }
        if !is_valid_secs(self.timeout_secs) {
            errors.push(format!(
                "dashboard.timeout_secs must be > 0.0 and fit in a duration, got {}. Example: timeout_secs = 5.0",
                self.timeout_secs
            ));
        }
    }
}

/// Bind address for the dashboard API (`serve`).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub(crate) fn validate(&self, errors: &mut Vec<String>) {
        if self.port == 0 {
            errors.push(format!(
                "server.port must be 1-65535, got {}. Example: port = 8080",
                self.port
            ));
        }
    }
}
