use crate::services::payment::PayloadFormat;
use anyhow::{Result, anyhow, bail};
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

/// Application configuration loaded and validated at startup
///
/// The configuration is loaded once in `main` and handed to every component
/// that needs it.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Router management API configuration
    pub router: RouterConfig,

    /// Access grant persistence
    pub grants: GrantConfig,

    /// Payment webhook configuration
    pub webhook: WebhookConfig,

    /// Router provisioning configuration
    pub provisioning: ProvisioningConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,
}

#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Clone)]
pub struct RouterConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// No timeout is applied when unset.
    pub timeout: Option<Duration>,
}

impl fmt::Debug for RouterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct GrantConfig {
    pub store_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub payload_format: PayloadFormat,
    pub ledger_capacity: usize,
    pub ledger_ttl: Duration,
}

#[derive(Clone, Debug)]
pub struct ProvisioningConfig {
    pub on_startup: bool,
    pub purchase_site_address: String,
}

impl AppConfig {
    /// Load all configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::load(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// Missing variables fall back to their documented defaults, malformed
    /// ones are reported as errors.
    pub fn load(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            server: ServerConfig::load(&var)?,
            router: RouterConfig::load(&var)?,
            grants: GrantConfig::load(&var),
            webhook: WebhookConfig::load(&var)?,
            provisioning: ProvisioningConfig::load(&var)?,
        })
    }
}

fn string_or(var: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    string_or(var, key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| anyhow!("failed to parse {key}: {e}"))
}

impl ServerConfig {
    fn load(var: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_address = string_or(var, "BIND_ADDRESS", "0.0.0.0");
        let port = parse_or(var, "SERVER_PORT", "5000")?;

        let tls = match (var("TLS_CERT_PATH"), var("TLS_KEY_PATH")) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path: cert_path.into(),
                key_path: key_path.into(),
            }),
            (None, None) => None,
            _ => bail!("failed to configure tls: TLS_CERT_PATH and TLS_KEY_PATH must be set together"),
        };

        Ok(Self {
            bind_address,
            port,
            tls,
        })
    }
}

impl RouterConfig {
    fn load(var: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let timeout = match var("ROUTER_TIMEOUT_SECS") {
            Some(secs) => Some(Duration::from_secs(
                secs.trim()
                    .parse()
                    .map_err(|e| anyhow!("failed to parse ROUTER_TIMEOUT_SECS: {e}"))?,
            )),
            None => None,
        };

        Ok(Self {
            host: string_or(var, "ROUTER_HOST", "192.168.88.1"),
            port: parse_or(var, "ROUTER_PORT", "8728")?,
            username: string_or(var, "ROUTER_USERNAME", "admin"),
            password: string_or(var, "ROUTER_PASSWORD", "admin"),
            timeout,
        })
    }
}

impl GrantConfig {
    fn load(var: &impl Fn(&str) -> Option<String>) -> Self {
        Self {
            store_path: string_or(var, "GRANT_STORE_PATH", "/data/grants.json").into(),
        }
    }
}

impl WebhookConfig {
    fn load(var: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            payload_format: parse_or(var, "WEBHOOK_PAYLOAD_FORMAT", "external_reference")?,
            ledger_capacity: parse_or(var, "NOTIFICATION_LEDGER_CAPACITY", "1024")?,
            ledger_ttl: Duration::from_secs(parse_or(
                var,
                "NOTIFICATION_LEDGER_TTL_SECS",
                "86400",
            )?),
        })
    }
}

impl ProvisioningConfig {
    fn load(var: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            on_startup: parse_or(var, "PROVISION_ON_START", "false")?,
            purchase_site_address: string_or(var, "PURCHASE_SITE_ADDRESS", "203.0.113.10"),
        })
    }
}
