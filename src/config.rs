// ⚙️ Configuration - process-wide settings loaded once from the environment
//
// Values come from the process environment, optionally seeded from a `.env`
// file. Missing credentials are fatal before any network call is made.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("CPD_HOST environment variable is required")]
    MissingHost,

    #[error("API_KEY required for SAAS environment")]
    MissingSaasApiKey,

    #[error("USERNAME and PASSWORD required for password authentication")]
    MissingPasswordCredentials,

    #[error("USERNAME and API_KEY required for API key authentication")]
    MissingApiKeyCredentials,

    #[error("PROJECT_ID environment variable is required for this job")]
    MissingProjectId,

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("failed to load env file {path}: {reason}")]
    EnvFile { path: String, reason: String },
}

// ============================================================================
// DEPLOYMENT FLAVOURS
// ============================================================================

/// Where the platform runs. Decides which token endpoint is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvType {
    /// Self-managed software install (`/icp4d-api/v1/authorize`)
    Software,
    /// IBM Cloud managed service (IAM api-key grant)
    Saas,
}

impl EnvType {
    pub fn parse(value: &str) -> Self {
        if value == "SAAS" {
            EnvType::Saas
        } else {
            EnvType::Software
        }
    }
}

/// Credential used against the software token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Password,
    ApiKey,
}

impl AuthMode {
    pub fn parse(value: &str) -> Self {
        if value == "PASSWORD" {
            AuthMode::Password
        } else {
            AuthMode::ApiKey
        }
    }
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    /// Platform host without scheme, e.g. `cpd.example.com`
    pub host: String,
    pub env_type: EnvType,
    pub auth_mode: AuthMode,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,

    /// Project the asset-based jobs operate in
    pub project_id: Option<String>,

    /// Verify TLS certificates (clusters commonly use self-signed ones)
    pub verify_tls: bool,

    /// Per-request timeout; `None` keeps the HTTP client default
    pub timeout: Option<Duration>,
}

impl Config {
    /// Load `.env` (or the file named by `CPD_ENV_FILE`) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var("CPD_ENV_FILE") {
            Ok(path) => {
                dotenvy::from_path(Path::new(&path)).map_err(|e| ConfigError::EnvFile {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            }
            Err(_) => {
                // A missing .env is fine; everything can come from the shell
                let _ = dotenvy::dotenv();
            }
        }

        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build and validate a config from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            vars.get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = get("CPD_HOST").ok_or(ConfigError::MissingHost)?;
        let host = host
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .to_string();

        let env_type = EnvType::parse(&get("ENV_TYPE").unwrap_or_else(|| "SW".to_string()));
        let auth_mode = AuthMode::parse(&get("AUTH_TYPE").unwrap_or_else(|| "PASSWORD".to_string()));

        let verify_tls = match get("CPD_VERIFY_TLS") {
            None => false,
            Some(v) => parse_bool(&v).ok_or(ConfigError::InvalidValue {
                name: "CPD_VERIFY_TLS",
                value: v,
            })?,
        };

        let timeout = match get("CPD_TIMEOUT_SECS") {
            None => None,
            Some(v) => Some(Duration::from_secs(v.parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue {
                    name: "CPD_TIMEOUT_SECS",
                    value: v.clone(),
                }
            })?)),
        };

        let config = Config {
            host,
            env_type,
            auth_mode,
            username: get("USERNAME"),
            password: get("PASSWORD"),
            api_key: get("API_KEY"),
            project_id: get("PROJECT_ID"),
            verify_tls,
            timeout,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match (self.env_type, self.auth_mode) {
            (EnvType::Saas, _) if self.api_key.is_none() => Err(ConfigError::MissingSaasApiKey),
            (EnvType::Saas, _) => Ok(()),
            (EnvType::Software, AuthMode::Password)
                if self.username.is_none() || self.password.is_none() =>
            {
                Err(ConfigError::MissingPasswordCredentials)
            }
            (EnvType::Software, AuthMode::ApiKey)
                if self.username.is_none() || self.api_key.is_none() =>
            {
                Err(ConfigError::MissingApiKeyCredentials)
            }
            _ => Ok(()),
        }
    }

    /// Project id, required by the asset-based jobs
    pub fn require_project_id(&self) -> Result<&str, ConfigError> {
        self.project_id.as_deref().ok_or(ConfigError::MissingProjectId)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_missing_host_is_fatal() {
        let result = Config::from_vars(&vars(&[("USERNAME", "admin"), ("PASSWORD", "pw")]));
        assert_eq!(result.unwrap_err(), ConfigError::MissingHost);
    }

    #[test]
    fn test_password_mode_defaults() {
        let config = Config::from_vars(&vars(&[
            ("CPD_HOST", "https://cpd.example.com/"),
            ("USERNAME", "admin"),
            ("PASSWORD", "pw"),
        ]))
        .unwrap();

        assert_eq!(config.host, "cpd.example.com");
        assert_eq!(config.env_type, EnvType::Software);
        assert_eq!(config.auth_mode, AuthMode::Password);
        assert!(!config.verify_tls);
        assert!(config.timeout.is_none());
        assert!(config.project_id.is_none());
    }

    #[test]
    fn test_password_mode_requires_password() {
        let result = Config::from_vars(&vars(&[("CPD_HOST", "h"), ("USERNAME", "admin")]));
        assert_eq!(result.unwrap_err(), ConfigError::MissingPasswordCredentials);
    }

    #[test]
    fn test_api_key_mode_requires_username_and_key() {
        let result = Config::from_vars(&vars(&[
            ("CPD_HOST", "h"),
            ("AUTH_TYPE", "APIKEY"),
            ("API_KEY", "k"),
        ]));
        assert_eq!(result.unwrap_err(), ConfigError::MissingApiKeyCredentials);

        let config = Config::from_vars(&vars(&[
            ("CPD_HOST", "h"),
            ("AUTH_TYPE", "APIKEY"),
            ("USERNAME", "admin"),
            ("API_KEY", "k"),
        ]))
        .unwrap();
        assert_eq!(config.auth_mode, AuthMode::ApiKey);
    }

    #[test]
    fn test_saas_requires_api_key_only() {
        let result = Config::from_vars(&vars(&[("CPD_HOST", "h"), ("ENV_TYPE", "SAAS")]));
        assert_eq!(result.unwrap_err(), ConfigError::MissingSaasApiKey);

        let config = Config::from_vars(&vars(&[
            ("CPD_HOST", "h"),
            ("ENV_TYPE", "SAAS"),
            ("API_KEY", "k"),
        ]))
        .unwrap();
        assert_eq!(config.env_type, EnvType::Saas);
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let result = Config::from_vars(&vars(&[
            ("CPD_HOST", "h"),
            ("USERNAME", "admin"),
            ("PASSWORD", "   "),
        ]));
        assert_eq!(result.unwrap_err(), ConfigError::MissingPasswordCredentials);
    }

    #[test]
    fn test_tls_and_timeout_overrides() {
        let config = Config::from_vars(&vars(&[
            ("CPD_HOST", "h"),
            ("USERNAME", "admin"),
            ("PASSWORD", "pw"),
            ("CPD_VERIFY_TLS", "true"),
            ("CPD_TIMEOUT_SECS", "45"),
            ("PROJECT_ID", "p-1"),
        ]))
        .unwrap();

        assert!(config.verify_tls);
        assert_eq!(config.timeout, Some(Duration::from_secs(45)));
        assert_eq!(config.require_project_id().unwrap(), "p-1");
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let result = Config::from_vars(&vars(&[
            ("CPD_HOST", "h"),
            ("USERNAME", "admin"),
            ("PASSWORD", "pw"),
            ("CPD_TIMEOUT_SECS", "soon"),
        ]));
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { name: "CPD_TIMEOUT_SECS", .. }
        ));
    }

    #[test]
    fn test_require_project_id_missing() {
        let config = Config::from_vars(&vars(&[
            ("CPD_HOST", "h"),
            ("USERNAME", "admin"),
            ("PASSWORD", "pw"),
        ]))
        .unwrap();
        assert_eq!(config.require_project_id().unwrap_err(), ConfigError::MissingProjectId);
    }
}
