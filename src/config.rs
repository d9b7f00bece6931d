//! Server configuration read from the environment (and `.env` via dotenvy in
//! the binaries).

use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set to a non-empty value")]
    MissingSecret(&'static str),

    #[error("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ")]
    SharedSecret,

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_api_base: String,
    pub database_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub cors_origins: Vec<String>,
    /// Refresh cookies carry `Secure` only in production.
    pub production: bool,
    pub bcrypt_cost: u32,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let access_token_secret =
            var("ACCESS_TOKEN_SECRET").ok_or(ConfigError::MissingSecret("ACCESS_TOKEN_SECRET"))?;
        let refresh_token_secret = var("REFRESH_TOKEN_SECRET")
            .ok_or(ConfigError::MissingSecret("REFRESH_TOKEN_SECRET"))?;
        if access_token_secret == refresh_token_secret {
            return Err(ConfigError::SharedSecret);
        }

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = var("PORT").unwrap_or_else(|| "3001".into());
        let bind_addr = format!("{host}:{port}")
            .parse()
            .map_err(|_| ConfigError::Invalid {
                name: "HOST/PORT",
                value: format!("{host}:{port}"),
            })?;

        let bcrypt_cost = match var("BCRYPT_COST") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|cost| (4..=31).contains(cost))
                .ok_or(ConfigError::Invalid {
                    name: "BCRYPT_COST",
                    value: raw,
                })?,
            None => bcrypt::DEFAULT_COST,
        };

        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        let cors_origins: Vec<String> = var("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000".into())
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        // Credentialed CORS cannot use a wildcard origin, and every entry must
        // be a valid header value.
        if let Some(bad) = cors_origins
            .iter()
            .find(|o| o.as_str() == "*" || axum::http::HeaderValue::from_str(o).is_err())
        {
            return Err(ConfigError::Invalid {
                name: "CORS_ORIGINS",
                value: bad.clone(),
            });
        }

        Ok(Config {
            access_token_secret,
            refresh_token_secret,
            stripe_secret_key: var("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: var("STRIPE_WEBHOOK_SECRET"),
            stripe_api_base: var("STRIPE_API_BASE")
                .unwrap_or_else(|| "https://api.stripe.com".into()),
            database_path: var("DATABASE_URL")
                .unwrap_or_else(|| "inventory_data".into())
                .into(),
            bind_addr,
            cors_origins,
            production: var("APP_ENV").as_deref() == Some("production"),
            bcrypt_cost,
            log_format,
            log_dir: var("LOG_DIR").map(PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| env.get(name).cloned())
    }

    const SECRETS: [(&str, &str); 2] = [
        ("ACCESS_TOKEN_SECRET", "access"),
        ("REFRESH_TOKEN_SECRET", "refresh"),
    ];

    #[test]
    fn defaults() {
        let config = load(&SECRETS).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3001".parse().unwrap());
        assert_eq!(config.cors_origins, vec!["http://localhost:3000".to_string()]);
        assert_eq!(config.stripe_api_base, "https://api.stripe.com");
        assert_eq!(config.database_path, PathBuf::from("inventory_data"));
        assert_eq!(config.bcrypt_cost, bcrypt::DEFAULT_COST);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.stripe_webhook_secret.is_none());
        assert!(!config.production);
    }

    #[test]
    fn token_secrets_are_required_and_distinct() {
        assert_eq!(
            load(&[("REFRESH_TOKEN_SECRET", "refresh")]).unwrap_err(),
            ConfigError::MissingSecret("ACCESS_TOKEN_SECRET")
        );
        assert_eq!(
            load(&[("ACCESS_TOKEN_SECRET", "x"), ("REFRESH_TOKEN_SECRET", "  ")]).unwrap_err(),
            ConfigError::MissingSecret("REFRESH_TOKEN_SECRET")
        );
        assert_eq!(
            load(&[("ACCESS_TOKEN_SECRET", "same"), ("REFRESH_TOKEN_SECRET", "same")]).unwrap_err(),
            ConfigError::SharedSecret
        );
    }

    #[test]
    fn overrides() {
        let mut pairs = SECRETS.to_vec();
        pairs.extend([
            ("PORT", "8080"),
            ("HOST", "127.0.0.1"),
            ("CORS_ORIGINS", "https://a.example, https://b.example"),
            ("APP_ENV", "production"),
            ("BCRYPT_COST", "12"),
            ("LOG_FORMAT", "json"),
        ]);
        let config = load(&pairs).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.cors_origins.len(), 2);
        assert!(config.production);
        assert_eq!(config.bcrypt_cost, 12);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_bad_values() {
        let mut pairs = SECRETS.to_vec();
        pairs.push(("BCRYPT_COST", "99"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::Invalid { name: "BCRYPT_COST", .. })
        ));

        let mut pairs = SECRETS.to_vec();
        pairs.push(("PORT", "not-a-port"));
        assert!(matches!(load(&pairs), Err(ConfigError::Invalid { .. })));

        for origins in ["*", "https://a.example,*"] {
            let mut pairs = SECRETS.to_vec();
            pairs.push(("CORS_ORIGINS", origins));
            assert_eq!(
                load(&pairs).unwrap_err(),
                ConfigError::Invalid {
                    name: "CORS_ORIGINS",
                    value: "*".into()
                }
            );
        }
    }
}
