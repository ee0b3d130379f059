use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::KeyPolicy;

/// Passphrase used when none is configured. Only fit for local development.
pub const PLACEHOLDER_PASSPHRASE: &str = "top secret";

/// Key exchange service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyxConfig {
    /// The address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Server and client key settings
    #[serde(default)]
    pub keys: KeysConfig,

    /// CORS settings
    #[serde(default)]
    pub cors: CorsConfig,

    /// Request limits and proxy handling
    #[serde(default)]
    pub security: SecurityConfig,
}

impl KeyxConfig {
    /// Apply command line / `SERVER_ADDR` / `SERVER_PORT` overrides
    ///
    /// `bind` is either a bare host address (`0.0.0.0`), which keeps the
    /// configured port, or a full socket address (`127.0.0.1:4000`).
    /// `port` is applied last.
    pub fn apply_bind_overrides(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
    ) -> eyre::Result<()> {
        if let Some(bind) = bind {
            let bind = bind.trim();
            if let Ok(addr) = bind.parse::<SocketAddr>() {
                self.listen_addr = addr;
            } else {
                let ip = bind
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .parse::<IpAddr>()
                    .map_err(|_| eyre::eyre!("invalid bind address {bind}"))?;
                self.listen_addr.set_ip(ip);
            }
        }

        if let Some(port) = port {
            self.listen_addr.set_port(port);
        }

        Ok(())
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// RocksDB storage
    #[serde(rename = "rocksdb")]
    RocksDB {
        /// The path to the RocksDB database
        path: PathBuf,
    },

    /// In-memory storage (for development only)
    #[serde(rename = "memory")]
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::RocksDB {
            path: PathBuf::from("./data/keyx_db"),
        }
    }
}

/// Key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Modulus size of a newly generated server key
    #[serde(default = "default_modulus_bits")]
    pub modulus_bits: usize,

    /// Smallest client modulus accepted on hello
    #[serde(default = "default_min_client_modulus_bits")]
    pub min_client_modulus_bits: usize,

    /// Largest client modulus accepted on hello
    #[serde(default = "default_max_client_modulus_bits")]
    pub max_client_modulus_bits: usize,

    /// PBKDF2 iterations protecting the server private key at rest
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Passphrase protecting the server private key at rest
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl KeysConfig {
    pub fn client_key_policy(&self) -> KeyPolicy {
        KeyPolicy {
            min_modulus_bits: self.min_client_modulus_bits,
            max_modulus_bits: self.max_client_modulus_bits,
        }
    }

    /// The configured passphrase, or the placeholder when none is set
    pub fn passphrase_or_placeholder(&self) -> &str {
        self.passphrase.as_deref().unwrap_or(PLACEHOLDER_PASSPHRASE)
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            modulus_bits: default_modulus_bits(),
            min_client_modulus_bits: default_min_client_modulus_bits(),
            max_client_modulus_bits: default_max_client_modulus_bits(),
            kdf_iterations: default_kdf_iterations(),
            passphrase: None,
        }
    }
}

fn default_modulus_bits() -> usize {
    4096
}

fn default_min_client_modulus_bits() -> usize {
    2048
}

fn default_max_client_modulus_bits() -> usize {
    4096
}

fn default_kdf_iterations() -> u32 {
    100_000
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allow all origins
    #[serde(default = "default_true")]
    pub allow_all_origins: bool,

    /// Allowed origins (if allow_all_origins is false)
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Allowed methods
    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,

    /// Allowed headers
    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_allowed_methods() -> Vec<String> {
    vec!["GET".to_owned(), "POST".to_owned(), "OPTIONS".to_owned()]
}

fn default_allowed_headers() -> Vec<String> {
    vec![
        "Content-Type".to_owned(),
        "Accept".to_owned(),
        "uuid".to_owned(),
    ]
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_all_origins: true,
            allowed_origins: Vec::new(),
            allowed_methods: default_allowed_methods(),
            allowed_headers: default_allowed_headers(),
        }
    }
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Per-client rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Honour `X-Forwarded-For` from loopback, link-local and unique-local peers
    #[serde(default = "default_true")]
    pub trust_proxy: bool,
}

fn default_max_body_size() -> usize {
    64 * 1024
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: default_max_body_size(),
            rate_limit: RateLimitConfig::default(),
            trust_proxy: true,
        }
    }
}

/// Rate limit configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

fn default_requests_per_minute() -> u32 {
    50
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

/// Load the configuration from a file, with `KEYX__*` environment overrides
///
/// # Arguments
///
/// * `path` - The path to the configuration file
///
/// # Returns
///
/// * `Result<KeyxConfig, eyre::Error>` - The loaded configuration
pub fn load_config(path: &Path) -> eyre::Result<KeyxConfig> {
    let config = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(config::Environment::with_prefix("KEYX").separator("__"))
        .build()?
        .try_deserialize()?;

    Ok(config)
}

/// Load the configuration from `KEYX__*` environment variables alone
pub fn load_env_config() -> eyre::Result<KeyxConfig> {
    let config = config::Config::builder()
        .add_source(config::Environment::with_prefix("KEYX").separator("__"))
        .build()?
        .try_deserialize()?;

    Ok(config)
}

/// Generate a default configuration
pub fn default_config() -> KeyxConfig {
    KeyxConfig {
        listen_addr: default_listen_addr(),
        storage: StorageConfig::default(),
        keys: KeysConfig::default(),
        cors: CorsConfig::default(),
        security: SecurityConfig::default(),
    }
}
