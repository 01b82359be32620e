use std::{env, fmt::Display, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub payment: PaymentConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Simulated gateway round trip.
    pub delay: Duration,
}

/// Reads the service configuration from the environment.
pub fn load() -> Result<Config> {
    Ok(Config {
        server: ServerConfig {
            port: try_load("PORT", "8080")?,
        },
        database: DatabaseConfig {
            url: required("DATABASE_URL")?,
        },
        auth: AuthConfig {
            jwt_secret: required("JWT_SECRET")?,
        },
        payment: PaymentConfig {
            delay: Duration::from_millis(try_load("PAYMENT_DELAY_MS", "200")?),
        },
    })
}

fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("Environment variable {key} must be set"))
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e| anyhow::anyhow!("Invalid {key} value {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_when_unset() {
        let port: u16 = try_load("TIFFIN_TEST_UNSET_PORT", "8080").unwrap();
        assert_eq!(port, 8080);
    }

    #[test]
    fn rejects_unparsable_default() {
        let port: Result<u16> = try_load("TIFFIN_TEST_UNSET_PORT", "eighty");
        assert!(port.unwrap_err().to_string().contains("TIFFIN_TEST_UNSET_PORT"));
    }

    #[test]
    fn missing_required_variable_names_the_key() {
        let err = required("TIFFIN_TEST_UNSET_SECRET").unwrap_err();
        assert!(err.to_string().contains("TIFFIN_TEST_UNSET_SECRET"));
    }

    #[test]
    fn debug_output_hides_jwt_secret() {
        let auth = AuthConfig {
            jwt_secret: "hunter2".into(),
        };
        assert!(!format!("{auth:?}").contains("hunter2"));
    }
}
