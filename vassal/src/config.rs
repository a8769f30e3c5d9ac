//! Configuration management

use serde::Deserialize;

/// Server configuration, loaded from an optional `vassal.toml` plus
/// `VASSAL_*` environment variables. CLI arguments override both.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    /// External base URL queue URLs are minted under. Derived from
    /// `bind_ip`/`port` when unset.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_ip: default_bind_ip(),
            base_url: None,
        }
    }
}

fn default_port() -> u16 {
    4589
}

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("vassal").required(false))
            .add_source(config::Environment::with_prefix("VASSAL"))
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }

    /// The base URL for queue URLs. A wildcard bind address is not a usable
    /// hostname, so it falls back to localhost.
    pub fn base_url(&self) -> String {
        if let Some(base_url) = &self.base_url {
            return base_url.trim_end_matches('/').to_string();
        }

        let host = if self.bind_ip == "0.0.0.0" || self.bind_ip == "::" {
            "localhost"
        } else {
            &self.bind_ip
        };
        format!("http://{}:{}", host, self.port)
    }
}
