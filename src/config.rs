// src/config.rs - Configuration management
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub policy: PolicyConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Deployment-level issuance policy. The daily limit is global per student
/// and applies to walk-up issuance only; the stock model is picked once per
/// deployment.
#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    /// One meal per student per calendar day (walk-up flow only).
    pub daily_limit: bool,
    /// How dish availability is accounted.
    pub stock_model: StockModel,
    /// How often the background low-stock report runs, in seconds.
    pub low_stock_check_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StockModel {
    /// Dishes are ready-made portions; issuance decrements `stock_quantity`.
    Portions,
    /// Issuance consumes recipe ingredients from the ledger.
    Recipe,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub max_request_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub console_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:canteen.db".to_string(),
            max_connections: 10,
            min_connections: 1,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            daily_limit: true,
            stock_model: StockModel::Portions,
            low_stock_check_seconds: 600,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:8080".to_string(),
            ],
            max_request_size: 1024 * 1024,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_enabled: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            policy: PolicyConfig::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config() -> Result<Config> {
    load_env_file()?;

    let mut config = if let Ok(config_file) = env::var("CONFIG_FILE") {
        let path = Path::new(&config_file);
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", config_file))?;
        toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", config_file))?
    } else {
        Config::default()
    };

    override_with_env(&mut config)?;

    config.validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

fn override_with_env(config: &mut Config) -> Result<()> {
    if let Ok(host) = env::var("BIND_ADDRESS") {
        config.server.host = host;
    }
    if let Ok(port_str) = env::var("CANTEEN_PORT") {
        if let Ok(port) = port_str.parse::<u16>() {
            config.server.port = port;
        }
    }
    if let Ok(workers_str) = env::var("CANTEEN_WORKERS") {
        if let Ok(workers) = workers_str.parse::<usize>() {
            config.server.workers = Some(workers);
        }
    }
    if let Ok(url) = env::var("DATABASE_URL") {
        config.database.url = url;
    }
    if let Ok(max_conn_str) = env::var("DATABASE_MAX_CONNECTIONS") {
        if let Ok(max_conn) = max_conn_str.parse::<u32>() {
            config.database.max_connections = max_conn;
        }
    }
    if let Ok(daily_limit_str) = env::var("CANTEEN_DAILY_LIMIT") {
        if let Ok(daily_limit) = daily_limit_str.parse::<bool>() {
            config.policy.daily_limit = daily_limit;
        }
    }
    if let Ok(model_str) = env::var("CANTEEN_STOCK_MODEL") {
        match model_str.to_lowercase().as_str() {
            "portions" => config.policy.stock_model = StockModel::Portions,
            "recipe" => config.policy.stock_model = StockModel::Recipe,
            other => anyhow::bail!("Unknown CANTEEN_STOCK_MODEL: {}", other),
        }
    }
    if let Ok(origins_str) = env::var("ALLOWED_ORIGINS") {
        config.security.allowed_origins = origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(level) = env::var("RUST_LOG") {
        config.logging.level = level;
    }

    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections < self.database.min_connections {
            return Err(anyhow::anyhow!(
                "max_connections ({}) must be >= min_connections ({})",
                self.database.max_connections,
                self.database.min_connections
            ));
        }

        if self.policy.low_stock_check_seconds == 0 {
            return Err(anyhow::anyhow!(
                "policy.low_stock_check_seconds must be positive"
            ));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        env::var("CANTEEN_ENV").map(|v| v == "production").unwrap_or(false)
    }

    pub fn print_startup_info(&self) {
        log::info!("Canteen starting up...");
        log::info!("Server: {}:{}", self.server.host, self.server.port);
        log::info!("Database: {}",
            if self.database.url.contains("sqlite") { "SQLite" } else { "Unknown" });
        log::info!("Stock model: {:?}", self.policy.stock_model);
        log::info!("Daily issuance limit: {}",
            if self.policy.daily_limit { "Enabled" } else { "Disabled" });
        log::info!("Logging: {} level", self.logging.level);

        if !self.is_production() {
            log::warn!("Running in development mode");
        }
    }
}

pub fn load_env_file() -> Result<()> {
    if let Ok(env_file) = env::var("ENV_FILE") {
        dotenvy::from_filename(&env_file)
            .with_context(|| format!("Failed to load environment file: {}", env_file))?;
    } else if Path::new(".env").exists() {
        dotenvy::dotenv().context("Failed to load .env file")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.policy.stock_model, StockModel::Portions);
        assert!(config.policy.daily_limit);
    }

    #[test]
    fn test_connection_bounds_checked() {
        let mut config = Config::default();
        config.database.max_connections = 1;
        config.database.min_connections = 5;
        assert!(config.validate().is_err());
    }
}
