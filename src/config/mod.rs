//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;

pub use cli::{
    CliArgs, Command, CredentialArgs, FingerprintArgs, InspectArgs, ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "bimvision";
const ENV_PREFIX: &str = "BIMVISION";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 8000;
const DEFAULT_ADMIN_PORT: u16 = 8001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_SLOW_REQUEST_MS: u64 = 5_000;
const DEFAULT_CACHE_TTL_HOURS: f64 = 24.0;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 600;
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_MAX_FILE_BYTES: u64 = 500 * 1024 * 1024;
const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
const DEFAULT_ANALYSIS_MAX_TOKENS: u32 = 4096;
const DEFAULT_ANSWER_MAX_TOKENS: u32 = 2048;
const DEFAULT_TEMPERATURE: f32 = 0.7;
const MAX_TEMPERATURE: f32 = 2.0;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 300;
const DEFAULT_KEEP_ALIVE_INTERVAL_SECS: u64 = 480;
const DEFAULT_KEEP_ALIVE_DELAY_SECS: u64 = 60;

/// Values copied from sample `.env` files; treated as unset.
const PLACEHOLDER_SUPABASE_URL: &str = "https://your-project.supabase.co";
const PLACEHOLDER_SUPABASE_KEY: &str = "your_supabase_anon_key_here";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub uploads: UploadSettings,
    pub llm: LlmSettings,
    /// `None` when Supabase credentials are absent; history routes then answer 503.
    pub persistence: Option<PersistenceSettings>,
    pub keep_alive: Option<KeepAliveSettings>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
    pub slow_request: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub max_entries: Option<NonZeroUsize>,
    pub single_flight: bool,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub directory: PathBuf,
    pub max_file_bytes: NonZeroU64,
    pub retain_files: bool,
}

#[derive(Clone)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub base_url: Url,
    pub model: String,
    pub analysis_max_tokens: NonZeroU32,
    pub answer_max_tokens: NonZeroU32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url.as_str())
            .field("model", &self.model)
            .field("analysis_max_tokens", &self.analysis_max_tokens)
            .field("answer_max_tokens", &self.answer_max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Clone)]
pub struct PersistenceSettings {
    pub supabase_url: Url,
    pub supabase_key: String,
}

impl std::fmt::Debug for PersistenceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceSettings")
            .field("supabase_url", &self.supabase_url.as_str())
            .field("supabase_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct KeepAliveSettings {
    pub url: Url,
    pub interval: Duration,
    pub initial_delay: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_credentials(&cli.credentials);
    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Fingerprint(_)) | Some(Command::Inspect(_)) | None => {}
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    uploads: RawUploadSettings,
    llm: RawLlmSettings,
    persistence: RawPersistenceSettings,
    keep_alive: RawKeepAliveSettings,
}

impl RawSettings {
    fn apply_credentials(&mut self, credentials: &CredentialArgs) {
        if let Some(key) = credentials.llm_api_key.as_ref() {
            self.llm.api_key = Some(key.clone());
        }
        if let Some(url) = credentials.supabase_url.as_ref() {
            self.persistence.supabase_url = Some(url.clone());
        }
        if let Some(key) = credentials.supabase_key.as_ref() {
            self.persistence.supabase_key = Some(key.clone());
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(hours) = overrides.cache_ttl_hours {
            self.cache.ttl_hours = Some(hours);
        }
        if let Some(seconds) = overrides.cache_sweep_interval_seconds {
            self.cache.sweep_interval_seconds = Some(seconds);
        }
        if let Some(max) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max);
        }
        if let Some(enabled) = overrides.cache_single_flight {
            self.cache.single_flight = Some(enabled);
        }
        if let Some(directory) = overrides.uploads_directory.as_ref() {
            self.uploads.directory = Some(directory.clone());
        }
        if let Some(limit) = overrides.uploads_max_file_bytes {
            self.uploads.max_file_bytes = Some(limit);
        }
        if let Some(model) = overrides.llm_model.as_ref() {
            self.llm.model = Some(model.clone());
        }
        if let Some(url) = overrides.llm_base_url.as_ref() {
            self.llm.base_url = Some(url.clone());
        }
        if let Some(url) = overrides.keep_alive_url.as_ref() {
            self.keep_alive.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            uploads,
            llm,
            persistence,
            keep_alive,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            uploads: build_upload_settings(uploads)?,
            llm: build_llm_settings(llm)?,
            persistence: build_persistence_settings(persistence)?,
            keep_alive: build_keep_alive_settings(keep_alive)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.host", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_host", reason))?;
    if public_addr == admin_addr {
        return Err(LoadError::invalid(
            "server.admin_port",
            "admin listener must not share the public address",
        ));
    }

    let graceful_shutdown = positive_secs(
        server
            .graceful_shutdown_seconds
            .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS),
        "server.graceful_shutdown_seconds",
    )?;
    let slow_request_ms = server.slow_request_ms.unwrap_or(DEFAULT_SLOW_REQUEST_MS);
    if slow_request_ms == 0 {
        return Err(LoadError::invalid(
            "server.slow_request_ms",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown,
        slow_request: Duration::from_millis(slow_request_ms),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let hours = cache.ttl_hours.unwrap_or(DEFAULT_CACHE_TTL_HOURS);
    if !hours.is_finite() || hours <= 0.0 {
        return Err(LoadError::invalid(
            "cache.ttl_hours",
            "must be a positive number of hours",
        ));
    }
    let ttl = Duration::try_from_secs_f64(hours * 3600.0)
        .map_err(|err| LoadError::invalid("cache.ttl_hours", err.to_string()))?;

    let sweep_interval = positive_secs(
        cache
            .sweep_interval_seconds
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        "cache.sweep_interval_seconds",
    )?;

    let max_entries = match cache.max_entries {
        Some(value) => Some(NonZeroUsize::new(value).ok_or_else(|| {
            LoadError::invalid("cache.max_entries", "must be greater than zero when set")
        })?),
        None => None,
    };

    Ok(CacheSettings {
        ttl,
        sweep_interval,
        max_entries,
        single_flight: cache.single_flight.unwrap_or(false),
    })
}

fn build_upload_settings(uploads: RawUploadSettings) -> Result<UploadSettings, LoadError> {
    let directory = uploads
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "uploads.directory",
            "path must not be empty",
        ));
    }

    let max_file_bytes_value = uploads.max_file_bytes.unwrap_or(DEFAULT_MAX_FILE_BYTES);
    let max_file_bytes = NonZeroU64::new(max_file_bytes_value)
        .ok_or_else(|| LoadError::invalid("uploads.max_file_bytes", "must be greater than zero"))?;
    usize::try_from(max_file_bytes_value).map_err(|_| {
        LoadError::invalid(
            "uploads.max_file_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(UploadSettings {
        directory,
        max_file_bytes,
        retain_files: uploads.retain_files.unwrap_or(true),
    })
}

fn build_llm_settings(llm: RawLlmSettings) -> Result<LlmSettings, LoadError> {
    let base_url = parse_http_url(
        llm.base_url.as_deref().unwrap_or(DEFAULT_LLM_BASE_URL),
        "llm.base_url",
    )?;

    let model = llm
        .model
        .map(|model| model.trim().to_string())
        .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string());
    if model.is_empty() {
        return Err(LoadError::invalid("llm.model", "must not be empty"));
    }

    let temperature = llm.temperature.unwrap_or(DEFAULT_TEMPERATURE);
    if !(0.0..=MAX_TEMPERATURE).contains(&temperature) {
        return Err(LoadError::invalid(
            "llm.temperature",
            format!("must be within [0, {MAX_TEMPERATURE}]"),
        ));
    }

    Ok(LlmSettings {
        api_key: non_blank(llm.api_key),
        base_url,
        model,
        analysis_max_tokens: non_zero_u32(
            llm.analysis_max_tokens.unwrap_or(DEFAULT_ANALYSIS_MAX_TOKENS),
            "llm.analysis_max_tokens",
        )?,
        answer_max_tokens: non_zero_u32(
            llm.answer_max_tokens.unwrap_or(DEFAULT_ANSWER_MAX_TOKENS),
            "llm.answer_max_tokens",
        )?,
        temperature,
        timeout: positive_secs(
            llm.timeout_seconds.unwrap_or(DEFAULT_LLM_TIMEOUT_SECS),
            "llm.timeout_seconds",
        )?,
    })
}

fn build_persistence_settings(
    persistence: RawPersistenceSettings,
) -> Result<Option<PersistenceSettings>, LoadError> {
    let url = non_blank(persistence.supabase_url).filter(|url| url != PLACEHOLDER_SUPABASE_URL);
    let key = non_blank(persistence.supabase_key).filter(|key| key != PLACEHOLDER_SUPABASE_KEY);

    match (url, key) {
        (Some(url), Some(key)) => Ok(Some(PersistenceSettings {
            supabase_url: parse_http_url(&url, "persistence.supabase_url")?,
            supabase_key: key,
        })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(LoadError::invalid(
            "persistence.supabase_key",
            "must be set together with supabase_url",
        )),
        (None, Some(_)) => Err(LoadError::invalid(
            "persistence.supabase_url",
            "must be set together with supabase_key",
        )),
    }
}

fn build_keep_alive_settings(
    keep_alive: RawKeepAliveSettings,
) -> Result<Option<KeepAliveSettings>, LoadError> {
    let Some(url) = non_blank(keep_alive.url) else {
        return Ok(None);
    };

    Ok(Some(KeepAliveSettings {
        url: parse_http_url(&url, "keep_alive.url")?,
        interval: positive_secs(
            keep_alive
                .interval_seconds
                .unwrap_or(DEFAULT_KEEP_ALIVE_INTERVAL_SECS),
            "keep_alive.interval_seconds",
        )?,
        initial_delay: Duration::from_secs(
            keep_alive
                .initial_delay_seconds
                .unwrap_or(DEFAULT_KEEP_ALIVE_DELAY_SECS),
        ),
    }))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    admin_host: Option<String>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    slow_request_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    ttl_hours: Option<f64>,
    sweep_interval_seconds: Option<u64>,
    max_entries: Option<usize>,
    single_flight: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUploadSettings {
    directory: Option<PathBuf>,
    max_file_bytes: Option<u64>,
    retain_files: Option<bool>,
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
struct RawLlmSettings {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    analysis_max_tokens: Option<u32>,
    answer_max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout_seconds: Option<u64>,
}

impl std::fmt::Debug for RawLlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawLlmSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
struct RawPersistenceSettings {
    supabase_url: Option<String>,
    supabase_key: Option<String>,
}

impl std::fmt::Debug for RawPersistenceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawPersistenceSettings")
            .field("supabase_url", &self.supabase_url)
            .field(
                "supabase_key",
                &self.supabase_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawKeepAliveSettings {
    url: Option<String>,
    interval_seconds: Option<u64>,
    initial_delay_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid url `{value}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{other}`; expected http or https"),
        )),
    }
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_u32(value: u32, key: &'static str) -> Result<NonZeroU32, LoadError> {
    NonZeroU32::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
