use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the bimvision binary.
#[derive(Debug, Parser)]
#[command(
    name = "bimvision",
    version,
    about = "Building-model analysis server with a content-addressed result cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "BIMVISION_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the public and admin HTTP listeners.
    Serve(Box<ServeArgs>),
    /// Print the content fingerprint of a file.
    Fingerprint(FingerprintArgs),
    /// Parse an IFC model and print the extracted record.
    Inspect(InspectArgs),
}

/// Credentials commonly provided through the process environment.
#[derive(Debug, Args, Default, Clone)]
pub struct CredentialArgs {
    /// API key for the OpenAI-compatible endpoint.
    #[arg(
        long = "llm-api-key",
        env = "OPENAI_API_KEY",
        hide_env_values = true,
        value_name = "KEY",
        global = true
    )]
    pub llm_api_key: Option<String>,

    /// Supabase project URL; enables analysis history together with the key.
    #[arg(long = "supabase-url", env = "SUPABASE_URL", value_name = "URL", global = true)]
    pub supabase_url: Option<String>,

    /// Supabase service or anon key.
    #[arg(
        long = "supabase-key",
        env = "SUPABASE_KEY",
        hide_env_values = true,
        value_name = "KEY",
        global = true
    )]
    pub supabase_key: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the administrative listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub server_admin_host: Option<String>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the cache entry lifetime.
    #[arg(long = "cache-ttl-hours", value_name = "HOURS")]
    pub cache_ttl_hours: Option<f64>,

    /// Override the expiration sweep cadence.
    #[arg(long = "cache-sweep-interval-seconds", value_name = "SECONDS")]
    pub cache_sweep_interval_seconds: Option<u64>,

    /// Bound each cache namespace to this many entries.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<usize>,

    /// Coalesce concurrent analyses of the same file.
    #[arg(
        long = "cache-single-flight",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_single_flight: Option<bool>,

    /// Override the uploads directory.
    #[arg(long = "uploads-directory", value_name = "PATH")]
    pub uploads_directory: Option<PathBuf>,

    /// Override the maximum accepted model size in bytes.
    #[arg(long = "uploads-max-file-bytes", value_name = "BYTES")]
    pub uploads_max_file_bytes: Option<u64>,

    /// Override the model identifier used for analyses.
    #[arg(long = "llm-model", value_name = "MODEL")]
    pub llm_model: Option<String>,

    /// Override the OpenAI-compatible API base URL.
    #[arg(long = "llm-base-url", value_name = "URL")]
    pub llm_base_url: Option<String>,

    /// Public URL pinged periodically to keep the deployment warm.
    #[arg(long = "keep-alive-url", value_name = "URL")]
    pub keep_alive_url: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct FingerprintArgs {
    /// File whose bytes are hashed.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct InspectArgs {
    /// IFC model to parse.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Pretty-print the JSON output.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub pretty: bool,

    /// Only report project information and element counts.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub fast: bool,
}
