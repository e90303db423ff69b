use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

/// Longest token lifetime accepted from the environment (30 days).
const MAX_TOKEN_TTL_HOURS: i64 = 24 * 30;

#[derive(Debug)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub upload_dir: PathBuf,
    pub token_ttl: chrono::Duration,
    pub max_resume_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup so tests don't have to touch the process
    /// environment.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("SECLINK_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("SECLINK_JWT_SECRET is unset or still a placeholder");
        }

        let host = get("SECLINK_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("SECLINK_PORT")
            .unwrap_or_else(|| "5050".into())
            .parse()
            .context("SECLINK_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .context("SECLINK_HOST must be an IP address")?;

        let token_ttl_hours: i64 = get("SECLINK_TOKEN_TTL_HOURS")
            .map(|v| v.parse::<i64>())
            .transpose()
            .context("SECLINK_TOKEN_TTL_HOURS must be a whole number of hours")?
            .unwrap_or(2);
        if !(1..=MAX_TOKEN_TTL_HOURS).contains(&token_ttl_hours) {
            bail!("SECLINK_TOKEN_TTL_HOURS must be between 1 and {}", MAX_TOKEN_TTL_HOURS);
        }
        let token_ttl = chrono::Duration::try_hours(token_ttl_hours)
            .context("SECLINK_TOKEN_TTL_HOURS is out of range")?;

        let max_resume_bytes: usize = get("SECLINK_MAX_RESUME_BYTES")
            .map(|v| v.parse::<usize>())
            .transpose()
            .context("SECLINK_MAX_RESUME_BYTES must be a byte count")?
            .unwrap_or(5 * 1024 * 1024);

        Ok(Self {
            jwt_secret,
            db_path: get("SECLINK_DB_PATH").unwrap_or_else(|| "seclink.db".into()).into(),
            addr,
            upload_dir: get("SECLINK_UPLOAD_DIR").unwrap_or_else(|| "./uploads".into()).into(),
            token_ttl,
            max_resume_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[("SECLINK_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(config.addr, "0.0.0.0:5050".parse().unwrap());
        assert_eq!(config.db_path, PathBuf::from("seclink.db"));
        assert_eq!(config.upload_dir, PathBuf::from("./uploads"));
        assert_eq!(config.token_ttl, chrono::Duration::hours(2));
        assert_eq!(config.max_resume_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn rejects_missing_or_placeholder_secret() {
        assert!(load(&[]).is_err());
        assert!(load(&[("SECLINK_JWT_SECRET", "  ")]).is_err());
        assert!(load(&[("SECLINK_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("SECLINK_JWT_SECRET", "a-real-secret"),
            ("SECLINK_HOST", "127.0.0.1"),
            ("SECLINK_PORT", "8080"),
            ("SECLINK_TOKEN_TTL_HOURS", "12"),
            ("SECLINK_MAX_RESUME_BYTES", "1024"),
        ])
        .unwrap();
        assert_eq!(config.addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.token_ttl, chrono::Duration::hours(12));
        assert_eq!(config.max_resume_bytes, 1024);
    }

    #[test]
    fn rejects_bad_numbers() {
        let secret = ("SECLINK_JWT_SECRET", "a-real-secret");
        assert!(load(&[secret, ("SECLINK_PORT", "http")]).is_err());
        assert!(load(&[secret, ("SECLINK_TOKEN_TTL_HOURS", "0")]).is_err());
        assert!(load(&[secret, ("SECLINK_TOKEN_TTL_HOURS", "721")]).is_err());
        assert!(load(&[secret, ("SECLINK_TOKEN_TTL_HOURS", "9223372036854775807")]).is_err());
        assert!(load(&[secret, ("SECLINK_TOKEN_TTL_HOURS", "720")]).is_ok());
        assert!(load(&[secret, ("SECLINK_MAX_RESUME_BYTES", "-1")]).is_err());
    }
}
