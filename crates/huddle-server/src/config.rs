use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub typing_ttl: Duration,
    /// How often expired typing indicators are swept.
    pub typing_sweep: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("HUDDLE_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("HUDDLE_JWT_SECRET is unset or still a placeholder; it must match the account service's secret");
        }

        let db_path = get("HUDDLE_DB_PATH").unwrap_or_else(|| "huddle.db".into()).into();
        let host = get("HUDDLE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("HUDDLE_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("HUDDLE_PORT")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("bad listen address {}:{}", host, port))?;

        let ttl_ms: u64 = match get("HUDDLE_TYPING_TTL_MS") {
            Some(v) => v.parse().context("HUDDLE_TYPING_TTL_MS")?,
            None => huddle_types::TYPING_TTL.as_millis() as u64,
        };
        if ttl_ms == 0 {
            bail!("HUDDLE_TYPING_TTL_MS must be positive");
        }
        let typing_ttl = Duration::from_millis(ttl_ms);

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            typing_ttl,
            typing_sweep: (typing_ttl / 3).max(Duration::from_millis(100)),
        })
    }
}
