use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use ipnet::IpNet;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::secrets::Secret;
use crate::tron::client::DEFAULT_FEE_LIMIT;
use crate::tron::TronAddress;
use crate::validation::validate_exchange_rate;

pub const DEFAULT_SERVER_PORT: u16 = 3000;
pub const DEFAULT_TRON_API_URL: &str = "https://api.trongrid.io";
pub const DEFAULT_USDT_CONTRACT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
pub const DEFAULT_EXCHANGE_RATE: &str = "132";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 600;
pub const CALLBACK_PATH: &str = "/callbacks/mpesa";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{name} is invalid: {message}")]
    Invalid { name: &'static str, message: String },
}

fn invalid(name: &'static str, message: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        name,
        message: message.to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllowedIps {
    Any,
    Cidrs(Vec<IpNet>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Read on its own so logging is up before the rest of the
    /// configuration is validated.
    pub fn from_env() -> Self {
        Self::parse(env::var("LOG_FORMAT").ok().as_deref())
    }

    fn parse(raw: Option<&str>) -> Self {
        match raw.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MpesaEnvironment {
    Sandbox,
    Production,
}

impl MpesaEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            MpesaEnvironment::Sandbox => "https://sandbox.safaricom.co.ke",
            MpesaEnvironment::Production => "https://api.safaricom.co.ke",
        }
    }
}

impl FromStr for MpesaEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sandbox" => Ok(MpesaEnvironment::Sandbox),
            "production" => Ok(MpesaEnvironment::Production),
            other => Err(format!("expected 'sandbox' or 'production', got '{}'", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MpesaConfig {
    pub environment: MpesaEnvironment,
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: Secret,
    pub short_code: String,
    pub passkey: Secret,
}

#[derive(Clone, Debug)]
pub struct TronConfig {
    pub api_url: String,
    pub api_key: Option<Secret>,
    pub sender_address: TronAddress,
    pub private_key: Secret,
    pub contract_address: TronAddress,
    pub fee_limit: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    /// Without a database the service runs on the in-memory ledger.
    pub database_url: Option<String>,
    pub public_base_url: Url,
    pub mpesa: MpesaConfig,
    pub tron: TronConfig,
    pub poller: PollerConfig,
    pub default_exchange_rate: BigDecimal,
    pub token_deposit_address: Option<TronAddress>,
    pub http_timeout: Duration,
    pub callback_allowed_ips: AllowedIps,
    pub trusted_proxy_depth: usize,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok(); // Load .env file if present

        Self::from_vars(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let server_port = match get("SERVER_PORT") {
            Some(raw) => raw.parse().map_err(|e| invalid("SERVER_PORT", e))?,
            None => DEFAULT_SERVER_PORT,
        };

        let public_base_url = Url::parse(&required("PUBLIC_BASE_URL")?)
            .map_err(|e| invalid("PUBLIC_BASE_URL", e))?;

        let environment = match get("MPESA_ENVIRONMENT") {
            Some(raw) => raw.parse().map_err(|e: String| invalid("MPESA_ENVIRONMENT", e))?,
            None => MpesaEnvironment::Sandbox,
        };
        let mpesa = MpesaConfig {
            environment,
            base_url: get("MPESA_BASE_URL").unwrap_or_else(|| environment.base_url().to_string()),
            consumer_key: required("MPESA_CONSUMER_KEY")?,
            consumer_secret: Secret::new(required("MPESA_CONSUMER_SECRET")?),
            short_code: required("MPESA_SHORT_CODE")?,
            passkey: Secret::new(required("MPESA_PASSKEY")?),
        };

        let parse_address = |name: &'static str, raw: String| {
            raw.parse::<TronAddress>().map_err(|e| invalid(name, e))
        };
        let tron = TronConfig {
            api_url: get("TRON_API_URL").unwrap_or_else(|| DEFAULT_TRON_API_URL.to_string()),
            api_key: get("TRON_API_KEY").map(Secret::new),
            sender_address: parse_address("TRON_SENDER_ADDRESS", required("TRON_SENDER_ADDRESS")?)?,
            private_key: Secret::new(required("TRON_PRIVATE_KEY")?),
            contract_address: parse_address(
                "USDT_CONTRACT_ADDRESS",
                get("USDT_CONTRACT_ADDRESS").unwrap_or_else(|| DEFAULT_USDT_CONTRACT.to_string()),
            )?,
            fee_limit: parse_or("TRON_FEE_LIMIT", get("TRON_FEE_LIMIT"), DEFAULT_FEE_LIMIT)?,
        };

        let token_deposit_address = get("TOKEN_DEPOSIT_ADDRESS")
            .map(|raw| parse_address("TOKEN_DEPOSIT_ADDRESS", raw))
            .transpose()?;

        let default_exchange_rate = BigDecimal::from_str(
            &get("DEFAULT_EXCHANGE_RATE").unwrap_or_else(|| DEFAULT_EXCHANGE_RATE.to_string()),
        )
        .map_err(|e| invalid("DEFAULT_EXCHANGE_RATE", e))?;
        validate_exchange_rate(&default_exchange_rate)
            .map_err(|e| invalid("DEFAULT_EXCHANGE_RATE", e.message))?;

        let poller = PollerConfig {
            interval: Duration::from_secs(parse_or(
                "POLL_INTERVAL_SECS",
                get("POLL_INTERVAL_SECS"),
                DEFAULT_POLL_INTERVAL_SECS,
            )?),
            timeout: Duration::from_secs(parse_or(
                "POLL_TIMEOUT_SECS",
                get("POLL_TIMEOUT_SECS"),
                DEFAULT_POLL_TIMEOUT_SECS,
            )?),
        };
        if poller.interval.is_zero() {
            return Err(invalid("POLL_INTERVAL_SECS", "must be at least 1"));
        }

        let http_timeout = Duration::from_secs(parse_or(
            "HTTP_TIMEOUT_SECS",
            get("HTTP_TIMEOUT_SECS"),
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?);

        let callback_allowed_ips =
            parse_allowed_ips(&get("CALLBACK_ALLOWED_IPS").unwrap_or_else(|| "*".to_string()))?;

        let log_format = LogFormat::parse(get("LOG_FORMAT").as_deref());

        Ok(Config {
            server_port,
            database_url: get("DATABASE_URL"),
            public_base_url,
            mpesa,
            tron,
            poller,
            default_exchange_rate,
            token_deposit_address,
            http_timeout,
            callback_allowed_ips,
            trusted_proxy_depth: parse_or("TRUSTED_PROXY_DEPTH", get("TRUSTED_PROXY_DEPTH"), 0)?,
            log_format,
        })
    }

    /// Absolute URL the gateway posts confirmations to.
    pub fn callback_url(&self) -> String {
        let base = self.public_base_url.as_str().trim_end_matches('/');
        format!("{}{}", base, CALLBACK_PATH)
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.parse().map_err(|e| invalid(name, e)),
        None => Ok(default),
    }
}

pub fn parse_allowed_ips(raw: &str) -> Result<AllowedIps, ConfigError> {
    let value = raw.trim();
    if value == "*" {
        return Ok(AllowedIps::Any);
    }

    let cidrs = value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<IpNet>()
                .or_else(|_| entry.parse::<std::net::IpAddr>().map(IpNet::from))
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid("CALLBACK_ALLOWED_IPS", e))?;

    if cidrs.is_empty() {
        return Err(invalid(
            "CALLBACK_ALLOWED_IPS",
            "must be '*' or a comma-separated list of CIDRs",
        ));
    }

    Ok(AllowedIps::Cidrs(cidrs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SENDER: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

    fn base_vars() -> HashMap<&'static str, String> {
        HashMap::from([
            ("PUBLIC_BASE_URL", "https://ramp.example.com/".to_string()),
            ("MPESA_CONSUMER_KEY", "key".to_string()),
            ("MPESA_CONSUMER_SECRET", "secret".to_string()),
            ("MPESA_SHORT_CODE", "174379".to_string()),
            ("MPESA_PASSKEY", "passkey".to_string()),
            ("TRON_SENDER_ADDRESS", SENDER.to_string()),
            ("TRON_PRIVATE_KEY", "00".repeat(31) + "01"),
        ])
    }

    fn load(vars: &HashMap<&'static str, String>) -> Result<Config, ConfigError> {
        Config::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn applies_defaults() {
        let config = load(&base_vars()).unwrap();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.mpesa.environment, MpesaEnvironment::Sandbox);
        assert_eq!(config.mpesa.base_url, "https://sandbox.safaricom.co.ke");
        assert_eq!(config.tron.api_url, DEFAULT_TRON_API_URL);
        assert_eq!(config.tron.fee_limit, 100_000_000);
        assert_eq!(config.default_exchange_rate, BigDecimal::from(132));
        assert_eq!(config.poller.interval, Duration::from_secs(3));
        assert_eq!(config.poller.timeout, Duration::from_secs(600));
        assert_eq!(config.callback_allowed_ips, AllowedIps::Any);
        assert_eq!(config.trusted_proxy_depth, 0);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.database_url.is_none());
        assert_eq!(config.callback_url(), "https://ramp.example.com/callbacks/mpesa");
    }

    #[test]
    fn missing_secret_is_reported_by_name() {
        let mut vars = base_vars();
        vars.remove("MPESA_PASSKEY");
        assert_eq!(load(&vars).unwrap_err(), ConfigError::Missing("MPESA_PASSKEY"));
    }

    #[test]
    fn rejects_invalid_sender_address() {
        let mut vars = base_vars();
        vars.insert("TRON_SENDER_ADDRESS", "not-an-address".to_string());
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { name: "TRON_SENDER_ADDRESS", .. })
        ));
    }

    #[test]
    fn production_environment_selects_live_url() {
        let mut vars = base_vars();
        vars.insert("MPESA_ENVIRONMENT", "production".to_string());
        vars.insert("LOG_FORMAT", "JSON".to_string());
        let config = load(&vars).unwrap();
        assert_eq!(config.mpesa.base_url, "https://api.safaricom.co.ke");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn log_format_defaults_to_pretty() {
        assert_eq!(LogFormat::parse(None), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(Some(" Json ")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("logfmt")), LogFormat::Pretty);
    }

    #[test]
    fn rejects_non_positive_default_rate() {
        let mut vars = base_vars();
        vars.insert("DEFAULT_EXCHANGE_RATE", "0".to_string());
        assert!(load(&vars).is_err());
    }

    #[test]
    fn parses_allowed_ip_list() {
        assert_eq!(parse_allowed_ips("*").unwrap(), AllowedIps::Any);
        match parse_allowed_ips("196.201.214.0/24, 196.201.213.44").unwrap() {
            AllowedIps::Cidrs(cidrs) => assert_eq!(cidrs.len(), 2),
            AllowedIps::Any => panic!("expected cidrs"),
        }
        assert!(parse_allowed_ips("not-an-ip").is_err());
        assert!(parse_allowed_ips(" , ").is_err());
    }
}
