//! Configuration module for the shop backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key guarding the admin back-office routes
    pub admin_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy search index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Flat delivery fee added to every order, in minor currency units
    pub delivery_fee: i64,
    pub email: EmailConfig,
}

/// Settings for the transactional email API used by newsletters.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: String,
    /// Without a key, sends are logged instead of delivered.
    pub api_key: Option<String>,
    pub from_address: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.resend.com".to_string(),
            api_key: None,
            from_address: "newsletter@localhost".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let admin_psk = env::var("SHOP_ADMIN_PSK").ok().filter(|s| !s.is_empty());

        let db_path = env::var("SHOP_DB_PATH")
            .unwrap_or_else(|_| "./data/shop.sqlite".to_string())
            .into();

        let index_path = env::var("SHOP_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let bind_addr = env::var("SHOP_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .map_err(|e| format!("Invalid SHOP_BIND_ADDR format: {}", e))?;

        let log_level = env::var("SHOP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let delivery_fee = match env::var("SHOP_DELIVERY_FEE") {
            Ok(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|fee| *fee >= 0)
                .ok_or_else(|| format!("Invalid SHOP_DELIVERY_FEE value: {}", raw))?,
            Err(_) => 0,
        };

        let defaults = EmailConfig::default();
        let email = EmailConfig {
            api_url: env::var("SHOP_EMAIL_API_URL").unwrap_or(defaults.api_url),
            api_key: env::var("SHOP_EMAIL_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            from_address: env::var("SHOP_EMAIL_FROM").unwrap_or(defaults.from_address),
        };

        Ok(Self {
            admin_psk,
            db_path,
            index_path,
            bind_addr,
            log_level,
            delivery_fee,
            email,
        })
    }
}
