use anyhow::{Context, Result, anyhow, bail};
use chrono::Duration;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::token::TokenSettings;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/newtube-env";
pub const DEFAULT_NEWTUBE_PORT: u16 = 8080;
pub const DEFAULT_NEWTUBE_HOST: &str = "127.0.0.1";
pub const DEFAULT_DATABASE_PATH: &str = "/www/newtube.com/accounts.db";
pub const DEFAULT_ACCESS_TOKEN_EXPIRY: &str = "1d";
pub const DEFAULT_REFRESH_TOKEN_EXPIRY: &str = "10d";

/// Keys recognised in the env file. The process environment may override any
/// of them.
const KNOWN_KEYS: &[&str] = &[
    "DATABASE_PATH",
    "NEWTUBE_HOST",
    "NEWTUBE_PORT",
    "ACCESS_TOKEN_SECRET",
    "ACCESS_TOKEN_EXPIRY",
    "REFRESH_TOKEN_SECRET",
    "REFRESH_TOKEN_EXPIRY",
    "CORS_ORIGIN",
    "COOKIE_SECURE",
];

#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub database_path: Option<PathBuf>,
    pub newtube_host: Option<String>,
    pub newtube_port: Option<u16>,
    pub access_token_secret: Option<String>,
    pub access_token_expiry: Option<Duration>,
    pub refresh_token_secret: Option<String>,
    pub refresh_token_expiry: Option<Duration>,
    pub cors_origin: Option<String>,
    pub cookie_secure: Option<bool>,
}

impl EnvConfig {
    /// Applies a single `KEY=value` pair. `source` only feeds error messages.
    fn apply(&mut self, key: &str, value: &str, source: &str) -> Result<()> {
        match key {
            "DATABASE_PATH" => {
                if !value.is_empty() {
                    self.database_path = Some(PathBuf::from(value));
                }
            }
            "NEWTUBE_HOST" => {
                if !value.is_empty() {
                    self.newtube_host = Some(value.to_string());
                }
            }
            "NEWTUBE_PORT" => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("Parsing NEWTUBE_PORT from {source}"))?;
                self.newtube_port = Some(port);
            }
            "ACCESS_TOKEN_SECRET" => {
                if !value.is_empty() {
                    self.access_token_secret = Some(value.to_string());
                }
            }
            "REFRESH_TOKEN_SECRET" => {
                if !value.is_empty() {
                    self.refresh_token_secret = Some(value.to_string());
                }
            }
            "ACCESS_TOKEN_EXPIRY" => {
                self.access_token_expiry = Some(
                    parse_expiry(value)
                        .with_context(|| format!("Parsing ACCESS_TOKEN_EXPIRY from {source}"))?,
                );
            }
            "REFRESH_TOKEN_EXPIRY" => {
                self.refresh_token_expiry = Some(
                    parse_expiry(value)
                        .with_context(|| format!("Parsing REFRESH_TOKEN_EXPIRY from {source}"))?,
                );
            }
            "CORS_ORIGIN" => {
                if !value.is_empty() {
                    self.cors_origin = Some(value.to_string());
                }
            }
            "COOKIE_SECURE" => {
                self.cookie_secure = Some(
                    parse_bool(value)
                        .with_context(|| format!("Parsing COOKIE_SECURE from {source}"))?,
                );
            }
            _ => {}
        }
        Ok(())
    }
}

/// Fully resolved settings for the `backend` binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub tokens: TokenSettings,
    pub cors_origin: Option<String>,
    pub cookie_secure: bool,
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let source = path.display().to_string();
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            cfg.apply(key.trim(), value, &source)?;
        }
    }
    Ok(Some(cfg))
}

/// Overlays variables from the process environment on top of `cfg`.
pub fn apply_process_env(cfg: &mut EnvConfig) -> Result<()> {
    apply_overrides(cfg, KNOWN_KEYS.iter().filter_map(|key| {
        env::var(key).ok().map(|value| (key.to_string(), value))
    }))
}

fn apply_overrides<I>(cfg: &mut EnvConfig, pairs: I) -> Result<()>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in pairs {
        cfg.apply(&key, value.trim(), "environment")?;
    }
    Ok(())
}

pub fn load_server_config_from(path: impl AsRef<Path>) -> Result<ServerConfig> {
    let path = path.as_ref();
    let mut cfg = read_env_config(path)?.unwrap_or_default();
    apply_process_env(&mut cfg)?;
    resolve(cfg, path)
}

fn resolve(cfg: EnvConfig, path: &Path) -> Result<ServerConfig> {
    let access_secret = cfg
        .access_token_secret
        .ok_or_else(|| anyhow!("ACCESS_TOKEN_SECRET not set in {} or environment", path.display()))?;
    let refresh_secret = cfg.refresh_token_secret.ok_or_else(|| {
        anyhow!("REFRESH_TOKEN_SECRET not set in {} or environment", path.display())
    })?;
    if access_secret == refresh_secret {
        bail!("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ");
    }

    let access_ttl = match cfg.access_token_expiry {
        Some(ttl) => ttl,
        None => parse_expiry(DEFAULT_ACCESS_TOKEN_EXPIRY)?,
    };
    let refresh_ttl = match cfg.refresh_token_expiry {
        Some(ttl) => ttl,
        None => parse_expiry(DEFAULT_REFRESH_TOKEN_EXPIRY)?,
    };

    Ok(ServerConfig {
        database_path: cfg
            .database_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
        host: cfg
            .newtube_host
            .unwrap_or_else(|| DEFAULT_NEWTUBE_HOST.to_string()),
        port: cfg.newtube_port.unwrap_or(DEFAULT_NEWTUBE_PORT),
        tokens: TokenSettings {
            access_secret,
            access_ttl,
            refresh_secret,
            refresh_ttl,
        },
        cors_origin: cfg.cors_origin,
        cookie_secure: cfg.cookie_secure.unwrap_or(true),
    })
}

/// Parses expiry windows written as `90`, `90s`, `15m`, `12h` or `10d`.
pub fn parse_expiry(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&raw[..idx], c.to_ascii_lowercase()),
        Some(_) => (raw, 's'),
        None => bail!("empty expiry value"),
    };
    let amount: i64 = digits
        .trim()
        .parse()
        .with_context(|| format!("invalid expiry amount in {raw:?}"))?;
    if amount <= 0 {
        bail!("expiry must be positive, got {raw:?}");
    }
    let duration = match unit {
        's' => Duration::try_seconds(amount),
        'm' => Duration::try_minutes(amount),
        'h' => Duration::try_hours(amount),
        'd' => Duration::try_days(amount),
        other => bail!("unknown expiry unit {other:?} in {raw:?}"),
    };
    duration.ok_or_else(|| anyhow!("expiry {raw:?} is out of range"))
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}
