use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Command-line layer. Only values the user actually passed (or set through
/// the matching env var) are serialized, so unset flags never mask the TOML
/// file.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "storefront-server", version, about = "Storefront backend server")]
pub struct Cli {
    /// Port to listen on [default: 5000]
    #[arg(long, env = "STOREFRONT_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "STOREFRONT_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./storefront.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "STOREFRONT_JSON_LOGS")]
    #[serde(skip_serializing_if = "is_false")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "is_false")]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key) [default: ./data]
    #[arg(long, env = "STOREFRONT_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Origin allowed by CORS (the single-page frontend) [default: http://localhost:4200]
    #[arg(long, env = "STOREFRONT_CORS_ORIGIN")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_origin: Option<String>,

    /// Keep hub sockets without a valid token open as untracked connections
    #[arg(long, env = "STOREFRONT_ALLOW_ANONYMOUS")]
    #[serde(skip_serializing_if = "is_false")]
    pub allow_anonymous: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default, skip_serializing)]
    pub generate_config: bool,
    pub data_dir: String,
    pub cors_origin: String,
    #[serde(default)]
    pub allow_anonymous: bool,

    /// Access token settings ([jwt] section in TOML)
    #[serde(default)]
    pub jwt: JwtConfig,

    /// Presence hub settings ([presence] section in TOML)
    #[serde(default)]
    pub presence: PresenceConfig,
}

/// Access token issuance and validation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// `iss` claim written and required (default: "storefront")
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// `aud` claim written and required (default: "storefront-clients")
    #[serde(default = "default_audience")]
    pub audience: String,

    /// Token lifetime in minutes (default: 60)
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            audience: default_audience(),
            ttl_minutes: default_ttl_minutes(),
        }
    }
}

fn default_issuer() -> String {
    "storefront".to_string()
}

fn default_audience() -> String {
    "storefront-clients".to_string()
}

fn default_ttl_minutes() -> i64 {
    60
}

/// Presence hub tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Per-connection outbound event queue; events beyond it are dropped (default: 64)
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

fn default_outbox_capacity() -> usize {
    64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            cors_origin: "http://localhost:4200".to_string(),
            allow_anonymous: false,
            jwt: JwtConfig::default(),
            presence: PresenceConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (STOREFRONT_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(Cli::parse()).extract()
    }

    fn figment(cli: Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("STOREFRONT_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Storefront Server Configuration
# Place this file at ./storefront.toml or specify with --config <path>
# All settings can be overridden via environment variables (STOREFRONT_PORT,
# STOREFRONT_JWT__ISSUER, etc.) or CLI flags (--port, etc.)

# Server port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0 - all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and JWT signing key
# data_dir = "./data"

# Origin of the single-page frontend allowed by CORS
# cors_origin = "http://localhost:4200"

# Serve hub sockets without a valid token as untracked connections.
# When false, such sockets are closed with 4001 (expired) / 4002 (invalid).
# allow_anonymous = false

# ---- Access Tokens ----
# [jwt]
# issuer = "storefront"
# audience = "storefront-clients"
# ttl_minutes = 60

# ---- Presence Hub ----
# [presence]

# Outbound event queue per connection. A slow client that lets it fill up
# misses events instead of stalling the hub.
# outbox_capacity = 64
"#
    .to_string()
}
