use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_GRAPHQL_ENDPOINT: &str = "http://127.0.0.1:8787/graphql";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const SETTINGS_DIRECTORY_NAME: &str = "parley";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "PARLEY_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_graphql_endpoint")]
    pub graphql_endpoint: String,
    /// Streaming endpoint; derived from the GraphQL endpoint when unset.
    #[serde(default)]
    pub stream_endpoint: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Log every request and response body at debug level.
    #[serde(default)]
    pub network_logs: bool,
    /// Show full error details to the user instead of a generic apology.
    #[serde(default)]
    pub error_details: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            graphql_endpoint: default_graphql_endpoint(),
            stream_endpoint: None,
            timeout_ms: default_timeout_ms(),
            network_logs: false,
            error_details: false,
        }
    }
}

impl ClientSettings {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".parley"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Defaults, then the settings file, then `PARLEY_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            figment = figment.merge(Json::file(&path));
        } else {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }

        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, SettingsError> {
        let settings = figment.extract::<Self>().map_err(Box::new).context(ExtractSnafu {
            stage: "extract-client-settings",
        })?;
        Ok(settings.normalized())
    }

    pub fn normalized(mut self) -> Self {
        self.graphql_endpoint = if self.graphql_endpoint.trim().is_empty() {
            default_graphql_endpoint()
        } else {
            self.graphql_endpoint.trim().to_string()
        };
        self.stream_endpoint = self
            .stream_endpoint
            .map(|endpoint| endpoint.trim().to_string())
            .filter(|endpoint| !endpoint.is_empty());
        if self.timeout_ms == 0 {
            self.timeout_ms = default_timeout_ms();
        }
        self
    }

    pub fn with_graphql_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.graphql_endpoint = endpoint.into();
        self.normalized()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn stream_url(&self) -> String {
        if let Some(endpoint) = &self.stream_endpoint {
            return endpoint.clone();
        }

        let base = self.graphql_endpoint.trim_end_matches('/');
        let base = base.strip_suffix("/graphql").unwrap_or(base);
        format!("{base}/stream")
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to load settings on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        source: Box<figment::Error>,
    },
}

fn default_graphql_endpoint() -> String {
    DEFAULT_GRAPHQL_ENDPOINT.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}
