//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::variants::{VariantDefinition, VariantTable};

pub use cli::{CliArgs, Command, EngineOverrides, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "xrechnung";
const ENV_PREFIX: &str = "XRECHNUNG";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 4242;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_STYLESHEET_DIR: &str = "3rdparty/xrechnung-visualization/src/xsl";
const DEFAULT_XSLT_PROGRAM: &str = "java";
const DEFAULT_XSLT_ARGS: [&str; 2] = ["-jar", "lib/saxon/saxon-he.jar"];
const DEFAULT_TRANSFORM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RENDER_PROGRAM: &str = "lib/fop/fop";
const DEFAULT_RENDER_FONTS_DIR: &str = "3rdparty/xrechnung-visualization/conf/fonts";
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RENDER_MAX_CONCURRENCY: u32 = 2;
const DEFAULT_RENDER_QUEUE_WAIT_MS: u64 = 2_000;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub uploads: UploadSettings,
    pub stylesheets: StylesheetSettings,
    pub xslt: XsltSettings,
    pub transform: TransformSettings,
    pub render: RenderSettings,
    pub workspace: WorkspaceSettings,
    pub validation: ValidationSettings,
    pub variants: VariantTable,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
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
pub struct UploadSettings {
    pub max_request_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct StylesheetSettings {
    pub directory: PathBuf,
}

/// Invocation of the external XSLT 3.0 processor (Saxon command-line conventions).
#[derive(Debug, Clone)]
pub struct XsltSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TransformSettings {
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub fonts_dir: Option<PathBuf>,
    pub timeout: Duration,
    pub max_concurrency: NonZeroU32,
    pub queue_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ValidationSettings {
    pub policy: ConformancePolicy,
}

/// How strictly uploaded documents are checked before any stylesheet runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConformancePolicy {
    /// Well-formed XML with a recognised root namespace.
    WellFormed,
    /// Additionally run an external validator; the document path is appended to `args`.
    External { program: PathBuf, args: Vec<String> },
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

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(" ")
            .with_list_parse_key("xslt.args")
            .with_list_parse_key("render.args")
            .with_list_parse_key("validation.args"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Check) | None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Build settings from an inline TOML document with the same validation as [`load`].
pub fn from_toml(source: &str) -> Result<Settings, LoadError> {
    let raw: RawSettings = Config::builder()
        .add_source(File::from_str(source, FileFormat::Toml))
        .build()?
        .try_deserialize()?;
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
    uploads: RawUploadSettings,
    stylesheets: RawStylesheetSettings,
    xslt: RawXsltSettings,
    transform: RawTransformSettings,
    render: RawRenderSettings,
    workspace: RawWorkspaceSettings,
    validation: RawValidationSettings,
    variants: Option<Vec<VariantDefinition>>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.server.port = Some(port);
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
        if let Some(limit) = overrides.uploads_max_request_bytes {
            self.uploads.max_request_bytes = Some(limit);
        }
        if let Some(seconds) = overrides.transform_timeout_seconds {
            self.transform.timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.render_timeout_seconds {
            self.render.timeout_seconds = Some(seconds);
            self.render.timeout_ms = None;
        }
        if let Some(value) = overrides.render_max_concurrency {
            self.render.max_concurrency = Some(value);
        }
        if let Some(value) = overrides.render_queue_wait_ms {
            self.render.queue_wait_ms = Some(value);
        }

        self.apply_engine_overrides(&overrides.engines);
    }

    fn apply_engine_overrides(&mut self, overrides: &EngineOverrides) {
        if let Some(path) = overrides.xslt_program.as_ref() {
            self.xslt.program = Some(path.clone());
        }
        if let Some(dir) = overrides.stylesheets_directory.as_ref() {
            self.stylesheets.directory = Some(dir.clone());
        }
        if let Some(path) = overrides.render_program.as_ref() {
            self.render.program = Some(path.clone());
        }
        if let Some(dir) = overrides.render_fonts_dir.as_ref() {
            self.render.fonts_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.work_dir.as_ref() {
            self.workspace.directory = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            uploads,
            stylesheets,
            xslt,
            transform,
            render,
            workspace,
            validation,
            variants,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            uploads: build_upload_settings(uploads)?,
            stylesheets: build_stylesheet_settings(stylesheets)?,
            xslt: build_xslt_settings(xslt)?,
            transform: build_transform_settings(transform)?,
            render: build_render_settings(render)?,
            workspace: build_workspace_settings(workspace)?,
            validation: build_validation_settings(validation)?,
            variants: build_variant_table(variants)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
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

fn build_upload_settings(uploads: RawUploadSettings) -> Result<UploadSettings, LoadError> {
    let max_request_bytes_value = uploads
        .max_request_bytes
        .unwrap_or(DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value).ok_or_else(|| {
        LoadError::invalid("uploads.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "uploads.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(UploadSettings { max_request_bytes })
}

fn build_stylesheet_settings(
    stylesheets: RawStylesheetSettings,
) -> Result<StylesheetSettings, LoadError> {
    let directory = stylesheets
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STYLESHEET_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "stylesheets.directory",
            "path must not be empty",
        ));
    }

    Ok(StylesheetSettings { directory })
}

fn build_xslt_settings(xslt: RawXsltSettings) -> Result<XsltSettings, LoadError> {
    let program = xslt
        .program
        .unwrap_or_else(|| PathBuf::from(DEFAULT_XSLT_PROGRAM));
    if program.as_os_str().is_empty() {
        return Err(LoadError::invalid("xslt.program", "path must not be empty"));
    }

    let args = xslt
        .args
        .unwrap_or_else(|| DEFAULT_XSLT_ARGS.iter().map(|arg| arg.to_string()).collect());

    Ok(XsltSettings { program, args })
}

fn build_transform_settings(
    transform: RawTransformSettings,
) -> Result<TransformSettings, LoadError> {
    let seconds = transform
        .timeout_seconds
        .unwrap_or(DEFAULT_TRANSFORM_TIMEOUT_SECS);
    if seconds == 0 {
        return Err(LoadError::invalid(
            "transform.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(TransformSettings {
        timeout: Duration::from_secs(seconds),
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let program = render
        .program
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RENDER_PROGRAM));
    if program.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.program",
            "path must not be empty",
        ));
    }

    let fonts_dir = match render.fonts_dir {
        Some(dir) if dir.as_os_str().is_empty() => None,
        Some(dir) => Some(dir),
        None => Some(PathBuf::from(DEFAULT_RENDER_FONTS_DIR)),
    };

    let timeout_ms = match render.timeout_ms {
        Some(ms) => ms,
        None => render
            .timeout_seconds
            .unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS)
            .saturating_mul(1_000),
    };
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "render.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let max_concurrency = non_zero_u32(
        render
            .max_concurrency
            .unwrap_or(DEFAULT_RENDER_MAX_CONCURRENCY)
            .into(),
        "render.max_concurrency",
    )?;

    let queue_wait = Duration::from_millis(
        render
            .queue_wait_ms
            .unwrap_or(DEFAULT_RENDER_QUEUE_WAIT_MS),
    );

    Ok(RenderSettings {
        program,
        args: render.args.unwrap_or_default(),
        fonts_dir,
        timeout: Duration::from_millis(timeout_ms),
        max_concurrency,
        queue_wait,
    })
}

fn build_workspace_settings(
    workspace: RawWorkspaceSettings,
) -> Result<WorkspaceSettings, LoadError> {
    let directory = workspace.directory.unwrap_or_else(std::env::temp_dir);
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "workspace.directory",
            "path must not be empty",
        ));
    }

    Ok(WorkspaceSettings { directory })
}

fn build_validation_settings(
    validation: RawValidationSettings,
) -> Result<ValidationSettings, LoadError> {
    let policy = match validation.policy.as_deref().map(str::trim) {
        None | Some("") | Some("well-formed") => ConformancePolicy::WellFormed,
        Some("external") => {
            let program = validation
                .program
                .filter(|path| !path.as_os_str().is_empty())
                .ok_or_else(|| {
                    LoadError::invalid(
                        "validation.program",
                        "required when validation.policy is `external`",
                    )
                })?;
            ConformancePolicy::External {
                program,
                args: validation.args.unwrap_or_default(),
            }
        }
        Some(other) => {
            return Err(LoadError::invalid(
                "validation.policy",
                format!("unknown policy `{other}` (expected `well-formed` or `external`)"),
            ));
        }
    };

    Ok(ValidationSettings { policy })
}

fn build_variant_table(variants: Option<Vec<VariantDefinition>>) -> Result<VariantTable, LoadError> {
    match variants {
        None => Ok(VariantTable::builtin()),
        Some(definitions) => VariantTable::new(definitions)
            .map_err(|err| LoadError::invalid("variants", err.to_string())),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUploadSettings {
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStylesheetSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawXsltSettings {
    program: Option<PathBuf>,
    args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTransformSettings {
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    program: Option<PathBuf>,
    args: Option<Vec<String>>,
    fonts_dir: Option<PathBuf>,
    timeout_seconds: Option<u64>,
    /// Finer-grained alternative to `timeout_seconds`; wins when both are set.
    timeout_ms: Option<u64>,
    max_concurrency: Option<u32>,
    queue_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkspaceSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawValidationSettings {
    policy: Option<String>,
    program: Option<PathBuf>,
    args: Option<Vec<String>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = if host.eq_ignore_ascii_case("localhost") {
        format!("127.0.0.1:{port}")
    } else if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
