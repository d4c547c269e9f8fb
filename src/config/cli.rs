use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the XRechnung viewer binary.
#[derive(Debug, Parser)]
#[command(
    name = "xrechnung-viewer",
    version,
    about = "XRechnung invoice preview and PDF export server"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "XRECHNUNG_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Print which stylesheets and engines were found, then exit.
    #[command(name = "check")]
    Check,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct EngineOverrides {
    /// Override the XSLT processor executable.
    #[arg(long = "xslt-program", value_name = "PATH")]
    pub xslt_program: Option<PathBuf>,

    /// Override the directory holding the XRechnung visualization stylesheets.
    #[arg(long = "stylesheets-directory", value_name = "PATH")]
    pub stylesheets_directory: Option<PathBuf>,

    /// Override the PDF formatting engine executable.
    #[arg(long = "render-program", value_name = "PATH")]
    pub render_program: Option<PathBuf>,

    /// Override the directory holding fonts registered with the formatting engine.
    #[arg(long = "render-fonts-dir", value_name = "PATH")]
    pub render_fonts_dir: Option<PathBuf>,

    /// Override the directory in which per-request workspaces are created.
    #[arg(long = "work-dir", value_name = "PATH")]
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub engines: EngineOverrides,

    /// Override the listener host.
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Override the listener port.
    #[arg(long = "port", value_name = "PORT")]
    pub port: Option<u16>,

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

    /// Override the maximum size of an uploaded document in bytes.
    #[arg(long = "uploads-max-request-bytes", value_name = "BYTES")]
    pub uploads_max_request_bytes: Option<u64>,

    /// Override the per-request XSLT time limit.
    #[arg(long = "transform-timeout-seconds", value_name = "SECONDS")]
    pub transform_timeout_seconds: Option<u64>,

    /// Override the per-request PDF render time limit.
    #[arg(long = "render-timeout-seconds", value_name = "SECONDS")]
    pub render_timeout_seconds: Option<u64>,

    /// Override the number of PDF renders allowed to run at once.
    #[arg(long = "render-max-concurrency", value_name = "COUNT")]
    pub render_max_concurrency: Option<u32>,

    /// Override how long a render request may wait for a free slot.
    #[arg(long = "render-queue-wait-ms", value_name = "MILLISECONDS")]
    pub render_queue_wait_ms: Option<u64>,
}
