use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DARKCHAT_JWT_SECRET is unset or still a placeholder; it must match the game server's signing secret")]
    MissingSecret,

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub redact_errors: bool,
}

impl ServerConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("DARKCHAT_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::MissingSecret);
        }

        let db_path = lookup("DARKCHAT_DB_PATH").unwrap_or_else(|| "darkchat.db".into());
        let host = lookup("DARKCHAT_HOST").unwrap_or_else(|| "0.0.0.0".into());

        let port = match lookup("DARKCHAT_PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "DARKCHAT_PORT",
                value,
            })?,
            None => 3100,
        };

        let redact_errors = match lookup("DARKCHAT_REDACT_ERRORS").as_deref() {
            None | Some("") | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "DARKCHAT_REDACT_ERRORS",
                    value: other.to_string(),
                });
            }
        };

        Ok(Self {
            jwt_secret,
            db_path: db_path.into(),
            host,
            port,
            redact_errors,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::Invalid {
            name: "DARKCHAT_HOST",
            value: self.host.clone(),
        })
    }
}
