//! Configuration loading and types for MockCodes.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different collaborator:
//! networking, caller identity, record persistence, object storage,
//! upload limits, the generation and analysis services, identity-provider
//! webhooks, and quota defaults.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Built-in HS256 secret.  Anyone can mint tokens while it is in use.
pub const DEFAULT_JWT_SECRET: &str = "mockcodes-dev-secret";

/// Built-in URL signing secret.  Anyone can sign reads while it is in use.
pub const DEFAULT_SIGNING_SECRET: &str = "mockcodes-signing-secret";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Caller identity settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Record store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Object storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upload validation and path layout.
    #[serde(default)]
    pub upload: UploadConfig,

    /// External generation service settings.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Screenshot analysis service settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Identity-provider webhook settings.
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Quota defaults applied to new profiles.
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health check).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Config keys whose secrets are still the public built-in values.
    ///
    /// The JWT secret only counts in `jwt` mode.
    pub fn default_secrets_in_use(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.auth.mode == "jwt" && self.auth.jwt_secret == DEFAULT_JWT_SECRET {
            keys.push("auth.jwt_secret");
        }
        if self.storage.signing_secret == DEFAULT_SIGNING_SECRET {
            keys.push("storage.signing_secret");
        }
        keys
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable the `/health` endpoint.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

/// Caller identity settings.
///
/// `mode` selects the resolver: `jwt` verifies an HS256 bearer token,
/// `trusted_header` reads the user id from a header set by an upstream proxy.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Resolver mode: `jwt` or `trusted_header`.
    #[serde(default = "default_auth_mode")]
    pub mode: String,

    /// Shared secret for HS256 bearer tokens.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Expected `iss` claim, if any.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Expected `aud` claim, if any.
    #[serde(default)]
    pub audience: Option<String>,

    /// Header carrying the user id in `trusted_header` mode.
    #[serde(default = "default_user_header")]
    pub user_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: default_auth_mode(),
            jwt_secret: default_jwt_secret(),
            issuer: None,
            audience: None,
            user_header: default_user_header(),
        }
    }
}

/// Record store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Backend type: `sqlite` or `memory`.
    #[serde(default = "default_metadata_engine")]
    pub engine: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            engine: default_metadata_engine(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// SQLite-specific record store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `local` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Local storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// Base URL under which `/objects/*` signed reads are served.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// HMAC secret for signed read URLs.
    #[serde(default = "default_signing_secret")]
    pub signing_secret: String,

    /// Validity of freshly minted access descriptors, in seconds.
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_secs: u64,
}

impl StorageConfig {
    /// Validity window for access descriptors.
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
            public_base_url: default_public_base_url(),
            signing_secret: default_signing_secret(),
            signed_url_ttl_secs: default_signed_url_ttl(),
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory for stored objects.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// Upload validation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum accepted file size in bytes (default 5 MiB).
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Leading path segment for stored screenshots.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            path_prefix: default_path_prefix(),
        }
    }
}

/// External generation service settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    /// Base URL of the generation service; requests go to `{endpoint}/scaffold`.
    #[serde(default = "default_generation_endpoint")]
    pub endpoint: String,

    /// Upper bound on a single generation call, in seconds.
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl GenerationConfig {
    /// Upper bound on a single generation call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_generation_endpoint(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

/// Screenshot analysis service settings.
///
/// The service speaks the chat-completions protocol: requests go to
/// `{endpoint}/chat/completions` with an inline image.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Base URL of the analysis service.
    #[serde(default = "default_analysis_endpoint")]
    pub endpoint: String,

    /// Vision model name.
    #[serde(default = "default_analysis_model")]
    pub model: String,

    /// Bearer token for the service, if it requires one.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Completion length cap.
    #[serde(default = "default_analysis_max_tokens")]
    pub max_tokens: u32,

    /// Upper bound on a single analysis call, in seconds.
    #[serde(default = "default_analysis_timeout")]
    pub timeout_secs: u64,
}

impl AnalysisConfig {
    /// Upper bound on a single analysis call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: default_analysis_endpoint(),
            model: default_analysis_model(),
            api_key: None,
            max_tokens: default_analysis_max_tokens(),
            timeout_secs: default_analysis_timeout(),
        }
    }
}

/// Identity-provider webhook settings.
///
/// `POST /webhooks/identity` is only served when `secret` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Signing secret shared with the provider (`whsec_` + base64, or raw).
    #[serde(default)]
    pub secret: Option<String>,

    /// Largest accepted clock skew of a delivery timestamp, in seconds.
    #[serde(default = "default_webhook_tolerance")]
    pub tolerance_secs: u64,
}

impl WebhookConfig {
    pub fn tolerance(&self) -> Duration {
        Duration::from_secs(self.tolerance_secs)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            tolerance_secs: default_webhook_tolerance(),
        }
    }
}

/// Quota defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Monthly generation allowance for newly created profiles.
    #[serde(default = "default_quota_limit")]
    pub default_limit: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_limit: default_quota_limit(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9300
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_auth_mode() -> String {
    "jwt".to_string()
}

fn default_jwt_secret() -> String {
    DEFAULT_JWT_SECRET.to_string()
}

fn default_user_header() -> String {
    "x-user-id".to_string()
}

fn default_metadata_engine() -> String {
    "sqlite".to_string()
}

fn default_metadata_path() -> String {
    "./data/mockcodes.db".to_string()
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_storage_root() -> String {
    "./data/objects".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:9300".to_string()
}

fn default_signing_secret() -> String {
    DEFAULT_SIGNING_SECRET.to_string()
}

fn default_signed_url_ttl() -> u64 {
    3600
}

fn default_max_file_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_path_prefix() -> String {
    "screenshots".to_string()
}

fn default_generation_endpoint() -> String {
    "http://localhost:8000".to_string()
}

fn default_generation_timeout() -> u64 {
    60
}

fn default_analysis_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_analysis_model() -> String {
    "gpt-4o".to_string()
}

fn default_analysis_max_tokens() -> u32 {
    2000
}

fn default_analysis_timeout() -> u64 {
    60
}

fn default_webhook_tolerance() -> u64 {
    300
}

fn default_quota_limit() -> u32 {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
