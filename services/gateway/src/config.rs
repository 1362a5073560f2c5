use market_data::{BroadcasterConfig, RecorderConfig, SessionConfig};
use matching_engine::EngineConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use types::ids::UserId;
use types::symbol::SymbolConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/gateway.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,tower_http=debug".to_string(),
            json: false,
        }
    }
}

/// Funds credited at startup, standing in for the wallet subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedBalance {
    pub user_id: UserId,
    pub currency: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub broadcaster: BroadcasterConfig,
    pub session: SessionConfig,
    pub recorder: RecorderConfig,
    /// Engine commit journal; in-memory store when unset
    pub journal_path: Option<PathBuf>,
    /// How often engines re-evaluate time-dependent state
    pub refresh_interval_ms: Option<u64>,
    pub symbols: Vec<SymbolConfig>,
    pub seed_balances: Vec<SeedBalance>,
}

impl GatewayConfig {
    /// Layer the TOML file (optional) and `GATEWAY__*` environment variables
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        settings.try_deserialize()
    }

    pub fn server_address(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }

    pub fn refresh_interval_ms(&self) -> u64 {
        self.refresh_interval_ms.unwrap_or(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = GatewayConfig::load("does/not/exist").unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.symbols.is_empty());
        assert_eq!(config.session.max_subscriptions_per_connection, 50);
        assert_eq!(config.server_address().unwrap().port(), 8080);
    }
}
