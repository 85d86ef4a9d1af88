//! Configuration management for the lending server.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::escalation::AlertPolicy;
use crate::notify::SmtpConfig;
use crate::token::TokenIssuer;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `PostgreSQL` configuration; `None` runs on the in-memory store
    pub postgres: Option<PostgresConfig>,
    /// Application server configuration
    pub server: ServerConfig,
    /// Request lifecycle configuration
    pub lending: LendingConfig,
    /// Alert escalation configuration
    pub escalation: EscalationConfig,
    /// Outbound channels
    pub notify: NotifyConfig,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections in the pool
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Metrics server host (for Prometheus scraping)
    pub metrics_host: String,
    /// Metrics server port
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Request lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendingConfig {
    /// Base URL of requester links (`{base}/status/{token}`); the server
    /// answers that path itself, so the default points at this server
    pub public_base_url: String,
    /// Token validity in hours (default: 72)
    pub token_validity_hours: i64,
    /// Manager roster: `actor=station_uuid,station_uuid;actor2=...`
    pub station_managers: String,
}

/// Alert escalation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Quantity at or below which stock is low (default: 2)
    pub low_stock_threshold: u32,
    /// Days faulty before equipment is escalated (default: 21)
    pub faulty_after_days: i64,
    /// Days between notices for a still-open condition (default: 7)
    pub follow_up_days: i64,
    /// Seconds between scheduled runs (default: one day)
    pub interval_secs: u64,
    /// Stations processed concurrently (default: 4)
    pub parallelism: usize,
}

/// Outbound channel configuration. An unset channel logs to the console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Email relay
    pub smtp: Option<SmtpConfig>,
    /// WhatsApp gateway
    pub whatsapp: Option<WhatsAppConfig>,
}

/// WhatsApp gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Webhook URL
    pub webhook_url: String,
    /// Bearer token
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    #[must_use]
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
            var(name).and_then(|s| s.trim().parse().ok())
        }
        let non_empty = |name: &str| var(name).filter(|s| !s.trim().is_empty());

        Self {
            postgres: non_empty("DATABASE_URL").map(|url| PostgresConfig {
                url,
                max_connections: parsed(&var, "DATABASE_MAX_CONNECTIONS").unwrap_or(10),
                min_connections: parsed(&var, "DATABASE_MIN_CONNECTIONS").unwrap_or(2),
                connect_timeout: parsed(&var, "DATABASE_CONNECT_TIMEOUT").unwrap_or(30),
            }),
            server: ServerConfig {
                host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parsed(&var, "PORT").unwrap_or(8080),
                metrics_host: var("METRICS_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                metrics_port: parsed(&var, "METRICS_PORT").unwrap_or(9090),
                shutdown_timeout: parsed(&var, "SHUTDOWN_TIMEOUT").unwrap_or(30),
            },
            lending: LendingConfig {
                public_base_url: var("PUBLIC_BASE_URL")
                    .unwrap_or_else(|| "http://localhost:8080".to_string()),
                token_validity_hours: parsed(&var, "TOKEN_VALIDITY_HOURS").unwrap_or(72),
                station_managers: var("STATION_MANAGERS").unwrap_or_default(),
            },
            escalation: EscalationConfig {
                low_stock_threshold: parsed(&var, "LOW_STOCK_THRESHOLD").unwrap_or(2),
                faulty_after_days: parsed(&var, "FAULTY_AFTER_DAYS").unwrap_or(21),
                follow_up_days: parsed(&var, "ALERT_FOLLOW_UP_DAYS").unwrap_or(7),
                interval_secs: parsed(&var, "ESCALATION_INTERVAL_SECS").unwrap_or(86_400),
                parallelism: parsed(&var, "ESCALATION_PARALLELISM").unwrap_or(4),
            },
            notify: NotifyConfig {
                smtp: non_empty("SMTP_HOST").map(|host| SmtpConfig {
                    host,
                    port: parsed(&var, "SMTP_PORT").unwrap_or(587),
                    username: var("SMTP_USERNAME").unwrap_or_default(),
                    password: var("SMTP_PASSWORD").unwrap_or_default(),
                    from: var("SMTP_FROM")
                        .unwrap_or_else(|| "Station Lending <noreply@localhost>".to_string()),
                }),
                whatsapp: non_empty("WHATSAPP_WEBHOOK_URL").map(|webhook_url| WhatsAppConfig {
                    webhook_url,
                    token: non_empty("WHATSAPP_WEBHOOK_TOKEN"),
                }),
            },
        }
    }

    /// Get server bind address
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Get metrics bind address
    #[must_use]
    pub fn metrics_address(&self) -> String {
        format!("{}:{}", self.server.metrics_host, self.server.metrics_port)
    }
}

impl LendingConfig {
    /// Token issuer for the configured validity.
    #[must_use]
    pub fn token_issuer(&self) -> TokenIssuer {
        TokenIssuer::new(chrono::Duration::hours(self.token_validity_hours.max(1)))
    }
}

impl EscalationConfig {
    /// Alert thresholds.
    #[must_use]
    pub fn policy(&self) -> AlertPolicy {
        AlertPolicy {
            low_stock_threshold: self.low_stock_threshold,
            faulty_after: chrono::Duration::days(self.faulty_after_days),
            follow_up: chrono::Duration::days(self.follow_up_days),
        }
    }

    /// Interval between scheduled runs.
    #[must_use]
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs.max(1))
    }
}
