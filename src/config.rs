// src/config.rs
// Environment-backed application configuration

use lazy_static::lazy_static;
use std::path::PathBuf;

pub struct Config {
    pub host: String,
    pub port: u16,
    /// Well-known path of the MCP server config file
    pub mcp_servers_config_path: PathBuf,
}

impl Config {
    fn from_env() -> Self {
        let host = std::env::var("REPOLENS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("REPOLENS_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8021);

        let mcp_servers_config_path = std::env::var("REPOLENS_MCP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("repolens")
                    .join("mcp_servers.json")
            });

        Self {
            host,
            port,
            mcp_servers_config_path,
        }
    }

    /// Effective bind address, preferring explicit CLI overrides over the
    /// environment-backed defaults.
    pub fn bind_addr(&self, host: Option<String>, port: Option<u16>) -> String {
        let host = host.unwrap_or_else(|| self.host.clone());
        let port = port.unwrap_or(self.port);
        format!("{}:{}", host, port)
    }
}

lazy_static! {
    pub static ref CONFIG: Config = Config::from_env();
}
