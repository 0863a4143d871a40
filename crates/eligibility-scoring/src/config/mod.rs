use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;

use crate::scoring::categorical::RiskRule;
use crate::scoring::config::{parse_precedence, ScoringConfig};
use crate::scoring::volatility::VolatilityThresholds;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub scoring: ScoringConfig,
}

impl AppConfig {
    /// Load from the environment (after `.env`), rejecting invalid scoring policy up front.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let include_targets = environment != AppEnvironment::Production;

        let scoring = load_scoring_config()?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                include_targets,
            },
            scoring,
        })
    }
}

fn load_scoring_config() -> Result<ScoringConfig, ConfigError> {
    let defaults = ScoringConfig::default();

    let min_sample = env_number::<i64>("SCORING_MIN_SAMPLE")?
        .unwrap_or(defaults.min_sample_size as i64);
    if min_sample <= 0 {
        return Err(ConfigError::InvalidMinSample(min_sample));
    }

    let precedence = match env::var("SCORING_PRECEDENCE") {
        Ok(raw) if !raw.trim().is_empty() => parse_precedence(&raw)?,
        _ => defaults.precedence.clone(),
    };

    let risk_rules = match env::var("SCORING_RISK_RULES") {
        Ok(path) if !path.trim().is_empty() => load_risk_rules(path.trim())?,
        _ => Vec::new(),
    };

    let config = ScoringConfig {
        min_sample_size: min_sample as u64,
        confidence_level: env_number("SCORING_CONFIDENCE_LEVEL")?
            .unwrap_or(defaults.confidence_level),
        precedence,
        recency_half_life_days: env_number("SCORING_HALF_LIFE_DAYS")?
            .unwrap_or(defaults.recency_half_life_days),
        volatility: VolatilityThresholds {
            low: env_number("SCORING_VOLATILITY_LOW")?.unwrap_or(defaults.volatility.low),
            high: env_number("SCORING_VOLATILITY_HIGH")?.unwrap_or(defaults.volatility.high),
        },
        volatility_windows: env_number("SCORING_VOLATILITY_WINDOWS")?
            .unwrap_or(defaults.volatility_windows),
        volatility_reference_cv: env_number("SCORING_VOLATILITY_REFERENCE_CV")?
            .unwrap_or(defaults.volatility_reference_cv),
        disagreement_penalty: env_number("SCORING_DISAGREEMENT_PENALTY")?
            .unwrap_or(defaults.disagreement_penalty),
        scoring_version: env::var("SCORING_VERSION").unwrap_or(defaults.scoring_version),
        risk_rules,
    };

    config.validate()?;
    Ok(config)
}

fn env_number<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        _ => Ok(None),
    }
}

/// Risk rules are a JSON array of `{ "name", "when", "adverse_rate" }` objects.
pub fn load_risk_rules<P: AsRef<Path>>(path: P) -> Result<Vec<RiskRule>, ConfigError> {
    let display = path.as_ref().display().to_string();
    let raw = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::RiskRulesIo {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::RiskRulesFormat {
        path: display,
        source,
    })
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub include_targets: bool,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost {
        source: std::net::AddrParseError,
    },
    InvalidNumber {
        key: &'static str,
        value: String,
    },
    InvalidMinSample(i64),
    InvalidParameter {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },
    InvertedVolatilityThresholds {
        low: f64,
        high: f64,
    },
    InvalidPrecedence(String),
    MissingScoringVersion,
    InvalidRiskRule {
        name: String,
        reason: String,
    },
    RiskRulesIo {
        path: String,
        source: std::io::Error,
    },
    RiskRulesFormat {
        path: String,
        source: serde_json::Error,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be numeric (got '{value}')")
            }
            ConfigError::InvalidMinSample(value) => {
                write!(f, "minimum sample size must be positive (got {value})")
            }
            ConfigError::InvalidParameter {
                name,
                value,
                expected,
            } => write!(f, "{name} must be {expected} (got {value})"),
            ConfigError::InvertedVolatilityThresholds { low, high } => write!(
                f,
                "volatility low threshold {low} must be below high threshold {high}"
            ),
            ConfigError::InvalidPrecedence(detail) => {
                write!(f, "invalid backoff precedence: {detail}")
            }
            ConfigError::MissingScoringVersion => write!(f, "scoring version must not be blank"),
            ConfigError::InvalidRiskRule { name, reason } => {
                write!(f, "invalid risk rule '{name}': {reason}")
            }
            ConfigError::RiskRulesIo { path, .. } => {
                write!(f, "unable to read risk rules from {path}")
            }
            ConfigError::RiskRulesFormat { path, .. } => {
                write!(f, "risk rules in {path} are not valid JSON")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::RiskRulesIo { source, .. } => Some(source),
            ConfigError::RiskRulesFormat { source, .. } => Some(source),
            _ => None,
        }
    }
}
