//! Configuration management for the POS stock core
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with POS_ prefix

use std::time::Duration;

use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::{RiskWeights, TransferPolicy};

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT verification configuration
    pub jwt: JwtConfig,

    /// Batch ledger and allocation policy
    pub stock: StockConfig,

    /// Transfer recommendation scoring
    pub transfer: TransferConfig,

    /// Background scan jobs
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Keep all state in process memory instead of PostgreSQL (demos, local runs)
    pub in_memory: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    /// Shared secret used by the auth service to sign access tokens
    pub secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StockConfig {
    /// Warning window used when a product's category does not define one
    pub default_warning_days: u32,

    /// Upper bound for any single ledger transaction, in milliseconds
    pub transaction_timeout_ms: u64,

    /// Refuse to sell batches whose expiry date has passed
    pub exclude_expired_from_sale: bool,
}

impl StockConfig {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            default_warning_days: 30,
            transaction_timeout_ms: 5_000,
            exclude_expired_from_sale: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransferConfig {
    /// Units above minimum stock a branch keeps before it counts as surplus
    pub reorder_buffer: i64,

    /// Flat handling cost of one transfer
    pub fixed_cost: Decimal,

    /// Freight cost per unit moved
    pub cost_per_unit: Decimal,

    /// Write-off risk weights per urgency tier
    pub risk_low: Decimal,
    pub risk_medium: Decimal,
    pub risk_high: Decimal,
    pub risk_critical: Decimal,
}

impl TransferConfig {
    pub fn policy(&self) -> TransferPolicy {
        TransferPolicy {
            reorder_buffer: self.reorder_buffer,
            fixed_cost: self.fixed_cost,
            cost_per_unit: self.cost_per_unit,
            risk_weights: RiskWeights {
                low: self.risk_low,
                medium: self.risk_medium,
                high: self.risk_high,
                critical: self.risk_critical,
            },
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        let weights = RiskWeights::default();
        Self {
            reorder_buffer: 0,
            fixed_cost: Decimal::ZERO,
            cost_per_unit: Decimal::ZERO,
            risk_low: weights.low,
            risk_medium: weights.medium,
            risk_high: weights.high,
            risk_critical: weights.critical,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    /// Run the periodic expired-batch sweep
    pub disposal_sweep_enabled: bool,

    /// Seconds between disposal sweeps
    pub disposal_sweep_interval_secs: u64,

    /// Run the periodic transfer scan
    pub transfer_scan_enabled: bool,

    /// Seconds between transfer scans
    pub transfer_scan_interval_secs: u64,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("POS_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.url", "postgres://localhost/pos_stock")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.in_memory", false)?
            .set_default("jwt.secret", "development-secret-key")?
            .set_default("stock.default_warning_days", 30)?
            .set_default("stock.transaction_timeout_ms", 5_000)?
            .set_default("stock.exclude_expired_from_sale", false)?
            .set_default("transfer.reorder_buffer", 0)?
            .set_default("transfer.fixed_cost", "0")?
            .set_default("transfer.cost_per_unit", "0")?
            .set_default("transfer.risk_low", "0")?
            .set_default("transfer.risk_medium", "0.25")?
            .set_default("transfer.risk_high", "0.50")?
            .set_default("transfer.risk_critical", "0.75")?
            .set_default("jobs.disposal_sweep_enabled", true)?
            .set_default("jobs.disposal_sweep_interval_secs", 3600)?
            .set_default("jobs.transfer_scan_enabled", false)?
            .set_default("jobs.transfer_scan_interval_secs", 6 * 3600)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (POS_ prefix)
            .add_source(
                Environment::with_prefix("POS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/pos_stock".to_string(),
            max_connections: 10,
            min_connections: 2,
            in_memory: false,
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "development-secret-key".to_string(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            disposal_sweep_enabled: true,
            disposal_sweep_interval_secs: 3600,
            transfer_scan_enabled: false,
            transfer_scan_interval_secs: 6 * 3600,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            jwt: JwtConfig::default(),
            stock: StockConfig::default(),
            transfer: TransferConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}
